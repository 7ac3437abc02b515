use parley::{api, config::Config, db, logging, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let config = Config::from_env()?;
    let db_pool = db::connect(&config.database).await?;
    db::migrate(&db_pool).await?;

    let app = api::app(AppState::new(db_pool, &config));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{ids::UserId, AppError};

/// Header the upstream auth gateway sets to the verified caller.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct Actor(pub UserId);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::Unauthenticated)?;

        raw.trim().parse().map(Actor).map_err(|_| AppError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(header: Option<&str>) -> Result<Actor, AppError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_the_gateway_header() {
        let user = UserId::new();
        let Actor(actor) = extract(Some(&user.to_string())).await.unwrap();
        assert_eq!(actor, user);
    }

    #[tokio::test]
    async fn missing_or_garbled_header_is_unauthenticated() {
        assert!(matches!(extract(None).await, Err(AppError::Unauthenticated)));
        assert!(matches!(extract(Some("not-a-uuid")).await, Err(AppError::Unauthenticated)));
    }
}

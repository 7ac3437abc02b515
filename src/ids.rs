use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, AppResult};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_type!(
    /// Opaque user identifier issued by the identity service.
    UserId
);
id_type!(ConversationId);
id_type!(MessageId);
id_type!(
    /// One live websocket; never persisted.
    ConnectionId
);

/// Parses an id read back from a text column.
pub(crate) fn parse_column<T>(raw: &str) -> AppResult<T>
where
    T: FromStr<Err = uuid::Error>,
{
    raw.parse()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt id column {raw:?}: {e}")))
}

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::File => "file",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "video" => Ok(MessageKind::Video),
            "file" => Ok(MessageKind::File),
            other => Err(AppError::Validation(format!("unknown message kind {other:?}"))),
        }
    }
}

/// Message content. Each kind carries exactly the field it needs, so a stored
/// message can never have both a body and a media locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Payload {
    Text { text: String },
    Image { media_url: String },
    Video { media_url: String },
    File { media_url: String },
}

impl Payload {
    pub fn text(text: impl Into<String>) -> AppResult<Self> {
        Self::from_parts(MessageKind::Text, Some(text.into()), None)
    }

    pub fn media(kind: MessageKind, media_url: impl Into<String>) -> AppResult<Self> {
        Self::from_parts(kind, None, Some(media_url.into()))
    }

    /// Validates the kind/body pairing. Blank strings count as absent.
    pub fn from_parts(
        kind: MessageKind,
        text: Option<String>,
        media_url: Option<String>,
    ) -> AppResult<Self> {
        let text = text.filter(|t| !t.trim().is_empty());
        let media_url = media_url.filter(|m| !m.trim().is_empty());

        match (kind, text, media_url) {
            (MessageKind::Text, Some(text), None) => Ok(Payload::Text { text }),
            (MessageKind::Text, None, _) => {
                Err(AppError::Validation("text messages require a text body".into()))
            }
            (MessageKind::Text, Some(_), Some(_)) => {
                Err(AppError::Validation("text messages cannot carry a media locator".into()))
            }
            (kind, None, Some(media_url)) => Ok(match kind {
                MessageKind::Image => Payload::Image { media_url },
                MessageKind::Video => Payload::Video { media_url },
                _ => Payload::File { media_url },
            }),
            (kind, _, None) => Err(AppError::Validation(format!(
                "{kind} messages require a media locator"
            ))),
            (kind, Some(_), Some(_)) => Err(AppError::Validation(format!(
                "{kind} messages cannot carry a text body"
            ))),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Text { .. } => MessageKind::Text,
            Payload::Image { .. } => MessageKind::Image,
            Payload::Video { .. } => MessageKind::Video,
            Payload::File { .. } => MessageKind::File,
        }
    }

    /// Text body or media locator, whichever this kind carries.
    pub fn body(&self) -> &str {
        match self {
            Payload::Text { text } => text,
            Payload::Image { media_url } | Payload::Video { media_url } | Payload::File { media_url } => {
                media_url
            }
        }
    }

    pub(crate) fn columns(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Payload::Text { text } => (Some(text.as_str()), None),
            _ => (None, Some(self.body())),
        }
    }

    /// Short human-readable line for notifications.
    pub fn summary(&self) -> String {
        const MAX_CHARS: usize = 80;

        match self {
            Payload::Text { text } if text.chars().count() > MAX_CHARS => {
                let mut cut: String = text.chars().take(MAX_CHARS - 1).collect();
                cut.push('…');
                cut
            }
            Payload::Text { text } => text.clone(),
            Payload::Image { .. } => "Sent a photo".to_owned(),
            Payload::Video { .. } => "Sent a video".to_owned(),
            Payload::File { .. } => "Sent a file".to_owned(),
        }
    }
}

/// Loosely shaped payload as clients send it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadInput {
    #[serde(alias = "type")]
    pub kind: MessageKind,
    #[serde(default, alias = "body")]
    pub text: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
}

impl TryFrom<PayloadInput> for Payload {
    type Error = AppError;

    fn try_from(input: PayloadInput) -> Result<Self, Self::Error> {
        Payload::from_parts(input.kind, input.text, input.media_url)
    }
}

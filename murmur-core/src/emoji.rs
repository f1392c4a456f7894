//! Emoji identity.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::id::EmojiId;

/// A reaction emoji: either a unicode sequence or a custom server emoji.
///
/// Unicode emoji are identified by their text, custom emoji by id alone
/// since their names can be changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "EmojiData", into = "EmojiData")]
pub enum Emoji {
    Unicode(String),
    Custom {
        id: EmojiId,
        name: String,
        animated: bool,
    },
}

/// Wire shape: `{"id": null, "name": "👍"}` or `{"id": "41771983429993937", "name": "LUL"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmojiData {
    #[serde(default)]
    id: Option<EmojiId>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    animated: bool,
}

impl TryFrom<EmojiData> for Emoji {
    type Error = CacheError;

    fn try_from(data: EmojiData) -> Result<Self, Self::Error> {
        match (data.id, data.name) {
            (Some(id), name) => Ok(Emoji::Custom {
                id,
                name: name.unwrap_or_default(),
                animated: data.animated,
            }),
            (None, Some(name)) if !name.is_empty() => Ok(Emoji::Unicode(name)),
            _ => Err(CacheError::MalformedDelta(
                "emoji has neither id nor name".to_string(),
            )),
        }
    }
}

impl From<Emoji> for EmojiData {
    fn from(emoji: Emoji) -> Self {
        match emoji {
            Emoji::Unicode(name) => EmojiData {
                id: None,
                name: Some(name),
                animated: false,
            },
            Emoji::Custom { id, name, animated } => EmojiData {
                id: Some(id),
                name: Some(name),
                animated,
            },
        }
    }
}

impl Emoji {
    pub fn unicode(text: impl Into<String>) -> Self {
        Emoji::Unicode(text.into())
    }

    pub fn custom(id: impl Into<EmojiId>, name: impl Into<String>) -> Self {
        Emoji::Custom {
            id: id.into(),
            name: name.into(),
            animated: false,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Emoji::Custom { .. })
    }
}

impl PartialEq for Emoji {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Emoji::Unicode(a), Emoji::Unicode(b)) => a == b,
            (Emoji::Custom { id: a, .. }, Emoji::Custom { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Emoji {}

impl Hash for Emoji {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Emoji::Unicode(text) => {
                0u8.hash(state);
                text.hash(state);
            }
            Emoji::Custom { id, .. } => {
                1u8.hash(state);
                id.hash(state);
            }
        }
    }
}

impl fmt::Display for Emoji {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Emoji::Unicode(text) => f.write_str(text),
            Emoji::Custom {
                id,
                name,
                animated: true,
            } => write!(f, "<a:{name}:{id}>"),
            Emoji::Custom { id, name, .. } => write!(f, "<:{name}:{id}>"),
        }
    }
}

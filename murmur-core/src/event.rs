//! Gateway events consumed by the store, and the message events it hands to
//! listeners.
//!
//! [`GatewayEvent`] is serialized with `#[serde(tag = "type", content = "data")]`:
//!
//! ```json
//! {"type":"reaction_add","data":{"id":"12","channel_id":"3","emoji":{"id":null,"name":"👍"},"user_id":"7"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::embed::{Embed, EmbedData};
use crate::emoji::Emoji;
use crate::error::{CacheError, Result};
use crate::id::{ChannelId, MessageId, Snowflake, UserId};
use crate::listener::ListenerKind;
use crate::reaction::ReactionData;
use crate::user::AuthorData;

/// Full snapshot of a newly created message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreate {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: Option<AuthorData>,
    /// Set for messages posted through a webhook; such messages have no
    /// author.
    #[serde(default)]
    pub webhook_id: Option<Snowflake>,
    #[serde(default)]
    pub embeds: Vec<EmbedData>,
    #[serde(default)]
    pub reactions: Vec<ReactionData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEdit {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub content: String,
    #[serde(default)]
    pub embeds: Vec<EmbedData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelete {
    pub id: MessageId,
    pub channel_id: ChannelId,
}

/// One user adding or removing one reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionDelta {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub emoji: Emoji,
    pub user_id: UserId,
    #[serde(default)]
    pub is_self: bool,
}

/// A decoded event from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    MessageCreate(MessageCreate),
    MessageEdit(MessageEdit),
    MessageDelete(MessageDelete),
    ReactionAdd(ReactionDelta),
    ReactionRemove(ReactionDelta),
}

impl GatewayEvent {
    /// Decode one JSON event.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CacheError::MalformedDelta(e.to_string()))
    }

    pub fn message_id(&self) -> MessageId {
        match self {
            GatewayEvent::MessageCreate(e) => e.id,
            GatewayEvent::MessageEdit(e) => e.id,
            GatewayEvent::MessageDelete(e) => e.id,
            GatewayEvent::ReactionAdd(e) | GatewayEvent::ReactionRemove(e) => e.id,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        match self {
            GatewayEvent::MessageCreate(e) => e.channel_id,
            GatewayEvent::MessageEdit(e) => e.channel_id,
            GatewayEvent::MessageDelete(e) => e.channel_id,
            GatewayEvent::ReactionAdd(e) | GatewayEvent::ReactionRemove(e) => e.channel_id,
        }
    }
}

/// What listeners are told, alongside the message snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessageEvent {
    Edit {
        message_id: MessageId,
        previous_content: String,
        content: String,
        /// The embeds now on the message.
        embeds: Vec<Embed>,
    },
    Delete {
        message_id: MessageId,
    },
    ReactionAdd {
        message_id: MessageId,
        user_id: UserId,
        emoji: Emoji,
        is_self: bool,
        /// Count for `emoji` after the add.
        count: u32,
    },
    ReactionRemove {
        message_id: MessageId,
        user_id: UserId,
        emoji: Emoji,
        is_self: bool,
        /// Count for `emoji` after the remove; zero once it is gone.
        count: u32,
    },
}

impl MessageEvent {
    pub fn kind(&self) -> ListenerKind {
        match self {
            MessageEvent::Edit { .. } => ListenerKind::Edit,
            MessageEvent::Delete { .. } => ListenerKind::Delete,
            MessageEvent::ReactionAdd { .. } => ListenerKind::ReactionAdd,
            MessageEvent::ReactionRemove { .. } => ListenerKind::ReactionRemove,
        }
    }

    pub fn message_id(&self) -> MessageId {
        match self {
            MessageEvent::Edit { message_id, .. }
            | MessageEvent::Delete { message_id }
            | MessageEvent::ReactionAdd { message_id, .. }
            | MessageEvent::ReactionRemove { message_id, .. } => *message_id,
        }
    }
}

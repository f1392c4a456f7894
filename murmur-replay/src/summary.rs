//! End-of-replay report: what each channel cache holds.

use murmur_core::{ChannelId, MessageCache, MessageId, MessageSnapshot, MessageStore};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Summary {
    /// Events that reached the store.
    pub events: usize,
    /// Input lines that did not decode.
    pub malformed_lines: usize,
    pub channels: Vec<ChannelSummary>,
}

#[derive(Debug, Serialize)]
pub struct ChannelSummary {
    pub channel_id: ChannelId,
    pub capacity: usize,
    pub max_age_seconds: u64,
    pub cached: Vec<MessageId>,
    pub pinned: Vec<MessageId>,
    pub deleted: Vec<MessageId>,
    pub messages: Vec<MessageSnapshot>,
}

impl Summary {
    pub fn collect(store: &MessageStore, events: usize, malformed_lines: usize) -> Self {
        Self {
            events,
            malformed_lines,
            channels: store.channels().iter().map(|c| ChannelSummary::of(c)).collect(),
        }
    }
}

impl ChannelSummary {
    pub fn of(cache: &MessageCache) -> Self {
        let config = cache.config();
        let messages: Vec<MessageSnapshot> =
            cache.messages().iter().map(|m| m.snapshot()).collect();
        let ids = |keep: fn(&MessageSnapshot) -> bool| -> Vec<MessageId> {
            messages.iter().filter(|m| keep(*m)).map(|m| m.id).collect()
        };
        Self {
            channel_id: cache.channel_id(),
            capacity: config.capacity(),
            max_age_seconds: config.max_age_seconds(),
            cached: ids(|_| true),
            pinned: ids(|m| m.cached_forever),
            deleted: ids(|m| m.deleted),
            messages,
        }
    }
}

//! murmur-core: the entity cache and event dispatch of a chat client.
//!
//! The transport hands decoded [`GatewayEvent`]s to a [`MessageStore`],
//! which keeps a bounded [`MessageCache`] per channel, folds reaction deltas
//! into per-emoji counters and calls the listeners registered on each
//! message.
//!
//! ```no_run
//! use murmur_core::{GatewayEvent, ListenerKind, MessageStore, StoreConfig, listener};
//!
//! let store = MessageStore::new(StoreConfig::default());
//! let line = r#"{"type":"message_create","data":{"id":"1","channel_id":"2","content":"hi"}}"#;
//! let event = GatewayEvent::from_json(line).unwrap();
//! let id = event.message_id();
//! store.apply(event).unwrap();
//!
//! // Delete listeners keep the message cached until it is deleted.
//! store
//!     .register_listener(id, ListenerKind::Delete, listener(|msg, _| {
//!         println!("deleted: {}", msg.content);
//!     }))
//!     .unwrap();
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod embed;
pub mod emoji;
pub mod error;
pub mod event;
pub mod id;
pub mod listener;
pub mod message;
pub mod reaction;
pub mod store;
pub mod user;

pub use cache::MessageCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, LateDeltaPolicy, StoreConfig};
pub use embed::{Embed, EmbedData, EmbedThumbnail};
pub use emoji::Emoji;
pub use error::{CacheError, Result};
pub use event::{GatewayEvent, MessageEvent};
pub use id::{ChannelId, EmojiId, MessageId, Snowflake, UserId};
pub use listener::{ListenerHandle, ListenerId, ListenerKind, MessageListener, listener};
pub use message::{Message, MessageSnapshot};
pub use reaction::{Reaction, ReactionAggregator};
pub use store::MessageStore;
pub use user::{User, UserDirectory};

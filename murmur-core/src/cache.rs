//! Per-channel message cache.
//!
//! Entries are kept in arrival order. Two bounds apply to entries that are
//! not pinned:
//!
//! - age: an entry inserted more than `max_age_seconds` ago is evicted;
//! - capacity: at most `capacity` unpinned entries are kept, oldest first
//!   out.
//!
//! Pinned entries never count against the capacity and are never evicted,
//! so a cache with pinned entries can hold more than `capacity` messages.
//! Eviction is a lazy sweep run on every insert (and on [`MessageCache::evict`]);
//! there is no background timer.
//!
//! If either bound is zero the cache is disabled and [`MessageCache::insert`]
//! stores nothing. [`MessageCache::pin`] always stores.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::id::{ChannelId, MessageId};
use crate::message::Message;

struct CacheEntry {
    message: Arc<Message>,
    inserted_at: DateTime<Utc>,
}

struct CacheInner {
    config: CacheConfig,
    entries: VecDeque<CacheEntry>,
}

pub struct MessageCache {
    channel_id: ChannelId,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner>,
}

impl MessageCache {
    pub fn new(channel_id: ChannelId, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            channel_id,
            clock,
            inner: Mutex::new(CacheInner {
                config,
                entries: VecDeque::new(),
            }),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn config(&self) -> CacheConfig {
        self.inner.lock().config
    }

    /// Replace the bounds and sweep with the new ones.
    pub fn set_config(&self, config: CacheConfig) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.config = config;
        self.sweep(&mut inner, now);
    }

    /// Add `message` and sweep. Returns whether the message is cached
    /// afterwards. Does nothing while the cache is disabled. A message
    /// already cached keeps its original position and insertion time.
    pub fn insert(&self, message: &Arc<Message>) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if !inner.config.is_enabled() {
            return false;
        }
        if !contains(&inner, message.id()) {
            inner.entries.push_back(CacheEntry {
                message: Arc::clone(message),
                inserted_at: now,
            });
        }
        self.sweep(&mut inner, now);
        contains(&inner, message.id())
    }

    pub fn lookup(&self, id: MessageId) -> Option<Arc<Message>> {
        self.inner
            .lock()
            .entries
            .iter()
            .find(|e| e.message.id() == id)
            .map(|e| Arc::clone(&e.message))
    }

    pub fn contains(&self, id: MessageId) -> bool {
        contains(&self.inner.lock(), id)
    }

    /// Mark `message` as cached forever and make sure it is present, even
    /// when the cache is disabled.
    pub fn pin(&self, message: &Arc<Message>) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        message.set_pinned(true);
        if !contains(&inner, message.id()) {
            inner.entries.push_back(CacheEntry {
                message: Arc::clone(message),
                inserted_at: now,
            });
            tracing::debug!(channel = %self.channel_id, message = %message.id(), "pinned message re-cached");
        }
    }

    /// Clear the pin. The entry stays until an eviction pass removes it.
    pub fn unpin(&self, message: &Arc<Message>) {
        message.set_pinned(false);
    }

    pub fn remove(&self, id: MessageId) -> Option<Arc<Message>> {
        let mut inner = self.inner.lock();
        let pos = inner.entries.iter().position(|e| e.message.id() == id)?;
        inner.entries.remove(pos).map(|e| e.message)
    }

    /// Run an eviction pass now. Returns how many entries were removed.
    pub fn evict(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.sweep(&mut inner, now)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Cached messages in arrival order.
    pub fn messages(&self) -> Vec<Arc<Message>> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|e| Arc::clone(&e.message))
            .collect()
    }

    /// Up to `limit` cached messages, newest by id first.
    pub fn newest(&self, limit: usize) -> Vec<Arc<Message>> {
        let mut messages = self.messages();
        messages.sort_unstable_by_key(|m| std::cmp::Reverse(m.id()));
        messages.truncate(limit);
        messages
    }

    fn sweep(&self, inner: &mut CacheInner, now: DateTime<Utc>) -> usize {
        let before = inner.entries.len();
        let config = inner.config;

        if !config.is_enabled() {
            inner.entries.retain(|e| e.message.is_cached_forever());
        } else {
            let max_age = config.max_age();
            inner.entries.retain(|e| {
                let keep = e.message.is_cached_forever() || now - e.inserted_at <= max_age;
                if !keep {
                    tracing::debug!(channel = %self.channel_id, message = %e.message.id(), "evicted message (age)");
                }
                keep
            });

            let mut unpinned = inner
                .entries
                .iter()
                .filter(|e| !e.message.is_cached_forever())
                .count();
            while unpinned > config.capacity() {
                let Some(pos) = inner
                    .entries
                    .iter()
                    .position(|e| !e.message.is_cached_forever())
                else {
                    break;
                };
                if let Some(e) = inner.entries.remove(pos) {
                    tracing::debug!(channel = %self.channel_id, message = %e.message.id(), "evicted message (capacity)");
                }
                unpinned -= 1;
            }
        }

        before - inner.entries.len()
    }
}

fn contains(inner: &CacheInner, id: MessageId) -> bool {
    inner.entries.iter().any(|e| e.message.id() == id)
}

impl std::fmt::Debug for MessageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MessageCache")
            .field("channel_id", &self.channel_id)
            .field("config", &inner.config)
            .field("len", &inner.entries.len())
            .finish()
    }
}

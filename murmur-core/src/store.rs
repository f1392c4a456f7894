//! Event application layer.
//!
//! [`MessageStore`] takes decoded [`GatewayEvent`]s, finds or creates the
//! affected message in its channel cache, applies the change and dispatches
//! to the message's listeners (and, for reactions, the reacting user's).
//!
//! Per message the states are absent → live → deleted. A create, edit or
//! reaction for an unknown id creates the message (edits and reactions get
//! a placeholder). A delete is terminal: later edits never change a deleted
//! message and never reach edit or reaction listeners; late reactions follow
//! [`LateDeltaPolicy`]. Deleted ids are remembered as tombstones so that a
//! late delta for a deleted message that has since been evicted does not
//! bring it back as a live placeholder. The tombstone window is bounded by
//! [`StoreConfig::tombstone_capacity`]; ids older than the window are
//! forgotten.
//!
//! A create for an id that is cached as a placeholder fills the placeholder
//! in instead of being ignored, so reordered or backfilled creates still
//! land.
//!
//! A bad delta only affects itself: the fields that could be read are
//! applied, the error is returned to the caller, and [`MessageStore::run`]
//! logs it and moves on.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::cache::MessageCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, StoreConfig};
use crate::embed::Embed;
use crate::error::{CacheError, Result};
use crate::event::{
    GatewayEvent, MessageCreate, MessageDelete, MessageEdit, MessageEvent, ReactionDelta,
};
use crate::id::{ChannelId, MessageId};
use crate::listener::{ListenerHandle, ListenerId, ListenerKind};
use crate::message::{Message, MessageSnapshot, ReactionOutcome};
use crate::reaction::{Reaction, ReactionAggregator};
use crate::user::UserDirectory;

/// Called once for every message created from a create event.
pub type CreateListener = Arc<dyn Fn(&Arc<Message>) + Send + Sync>;

/// Bounded FIFO of deleted message ids.
#[derive(Debug, Default)]
struct Tombstones {
    capacity: usize,
    order: VecDeque<MessageId>,
    ids: HashSet<MessageId>,
}

impl Tombstones {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    fn insert(&mut self, id: MessageId) {
        if self.capacity == 0 || !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }
}

pub struct MessageStore {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    channels: DashMap<ChannelId, Arc<MessageCache>>,
    users: UserDirectory,
    tombstones: Mutex<Tombstones>,
    create_listeners: RwLock<Vec<CreateListener>>,
}

impl MessageStore {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            users: UserDirectory::new(config.self_id),
            tombstones: Mutex::new(Tombstones::new(config.tombstone_capacity)),
            channels: DashMap::new(),
            create_listeners: RwLock::new(Vec::new()),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// The cache for `channel_id`, created with its configured bounds on
    /// first use.
    pub fn channel(&self, channel_id: ChannelId) -> Arc<MessageCache> {
        self.channels
            .entry(channel_id)
            .or_insert_with(|| {
                Arc::new(MessageCache::new(
                    channel_id,
                    self.config.cache_config_for(channel_id),
                    Arc::clone(&self.clock),
                ))
            })
            .clone()
    }

    /// Change one channel's bounds. Takes effect immediately.
    pub fn configure_channel(&self, channel_id: ChannelId, config: CacheConfig) {
        self.channel(channel_id).set_config(config);
    }

    /// Every channel cache created so far, ordered by channel id.
    pub fn channels(&self) -> Vec<Arc<MessageCache>> {
        let mut caches: Vec<_> = self.channels.iter().map(|e| Arc::clone(e.value())).collect();
        caches.sort_unstable_by_key(|c| c.channel_id());
        caches
    }

    /// Find a cached message in any channel.
    pub fn message(&self, id: MessageId) -> Option<Arc<Message>> {
        self.channels().into_iter().find_map(|cache| cache.lookup(id))
    }

    fn require(&self, id: MessageId) -> Result<Arc<Message>> {
        self.message(id).ok_or(CacheError::NotFound(id))
    }

    /// Whether `id` was deleted (as far as the tombstones remember).
    pub fn is_tombstoned(&self, id: MessageId) -> bool {
        self.tombstones.lock().contains(id)
    }

    pub fn add_create_listener(&self, listener: CreateListener) {
        self.create_listeners.write().push(listener);
    }

    // ── Caller-facing operations ──

    pub fn register_listener(
        &self,
        id: MessageId,
        kind: ListenerKind,
        handle: ListenerHandle,
    ) -> Result<ListenerId> {
        Ok(self.require(id)?.add_listener(kind, handle))
    }

    /// Unregistering a listener that was never registered is a no-op and
    /// returns `Ok(false)`.
    pub fn unregister_listener(
        &self,
        id: MessageId,
        kind: ListenerKind,
        listener_id: ListenerId,
    ) -> Result<bool> {
        Ok(self.require(id)?.remove_listener(kind, listener_id))
    }

    pub fn get_reactions(&self, id: MessageId) -> Result<Vec<Reaction>> {
        Ok(self.require(id)?.reactions())
    }

    pub fn get_embeds(&self, id: MessageId) -> Result<Vec<Embed>> {
        Ok(self.require(id)?.embeds())
    }

    pub fn set_cached_forever(&self, id: MessageId, cached_forever: bool) -> Result<()> {
        self.require(id)?.set_cached_forever(cached_forever);
        Ok(())
    }

    // ── Ingestion ──

    pub fn apply(&self, event: GatewayEvent) -> Result<()> {
        match event {
            GatewayEvent::MessageCreate(e) => self.create(e),
            GatewayEvent::MessageEdit(e) => self.edit(e),
            GatewayEvent::MessageDelete(e) => self.delete(e),
            GatewayEvent::ReactionAdd(e) => self.reaction_add(e),
            GatewayEvent::ReactionRemove(e) => self.reaction_remove(e),
        }
    }

    /// Apply events in order. Failures are logged and skipped; returns how
    /// many failed.
    pub fn apply_all(&self, events: impl IntoIterator<Item = GatewayEvent>) -> usize {
        events
            .into_iter()
            .map(|event| self.apply_logged(event))
            .filter(Result::is_err)
            .count()
    }

    /// Drain `rx` until every sender is gone. Returns how many events were
    /// received.
    pub async fn run(&self, mut rx: mpsc::Receiver<GatewayEvent>) -> usize {
        let mut received = 0;
        while let Some(event) = rx.recv().await {
            received += 1;
            let _ = self.apply_logged(event);
        }
        tracing::debug!(received, "event stream closed");
        received
    }

    fn apply_logged(&self, event: GatewayEvent) -> Result<()> {
        let id = event.message_id();
        let channel = event.channel_id();
        let result = self.apply(event);
        if let Err(e) = &result {
            tracing::warn!(message = %id, %channel, "delta not fully applied: {e}");
        }
        result
    }

    pub fn create(&self, event: MessageCreate) -> Result<()> {
        if self.is_tombstoned(event.id) {
            tracing::debug!(message = %event.id, "ignoring create for deleted message");
            return Ok(());
        }
        let author = match (&event.webhook_id, &event.author) {
            (None, Some(author)) => Some(self.users.get_or_create(author)),
            _ => None,
        };
        let (embeds, malformed) = match Embed::parse_all(event.embeds) {
            Ok(embeds) => (Some(embeds), None),
            Err(e) => (None, Some(e)),
        };
        let reactions = ReactionAggregator::from_snapshot(event.reactions);

        let cache = self.channel(event.channel_id);
        let message = match cache.lookup(event.id) {
            Some(existing) => {
                if !existing.fill_placeholder(author, event.content, embeds, reactions) {
                    tracing::debug!(message = %event.id, "duplicate create");
                    return Ok(());
                }
                tracing::debug!(message = %event.id, "placeholder filled by late create");
                existing
            }
            None => {
                let message = Arc::new(Message::new(
                    event.id,
                    event.channel_id,
                    author,
                    event.content,
                    embeds.unwrap_or_default(),
                    reactions,
                    Arc::downgrade(&cache),
                ));
                cache.insert(&message);
                message
            }
        };

        let listeners = self.create_listeners.read().clone();
        for listener in listeners {
            listener(&message);
        }

        malformed.map_or(Ok(()), Err)
    }

    pub fn edit(&self, event: MessageEdit) -> Result<()> {
        let (embeds, malformed) = match Embed::parse_all(event.embeds) {
            Ok(embeds) => (Some(embeds), None),
            Err(e) => (None, Some(e)),
        };
        let Some(message) = self.locate_or_create(event.channel_id, event.id) else {
            return Ok(());
        };

        match message.apply_edit(event.content, embeds) {
            Some((previous_content, snapshot)) => {
                let change = MessageEvent::Edit {
                    message_id: event.id,
                    previous_content,
                    content: snapshot.content.clone(),
                    embeds: snapshot.embeds.clone(),
                };
                self.dispatch(&message, &snapshot, &change);
            }
            None => tracing::debug!(message = %event.id, "ignoring edit for deleted message"),
        }

        malformed.map_or(Ok(()), Err)
    }

    pub fn delete(&self, event: MessageDelete) -> Result<()> {
        self.tombstones.lock().insert(event.id);
        let Some(message) = self.channel(event.channel_id).lookup(event.id) else {
            tracing::debug!(message = %event.id, "delete for uncached message");
            return Ok(());
        };

        let (first, snapshot) = message.mark_deleted();
        if first {
            // Deletion releases the pin; the entry leaves at the next sweep.
            message.set_cached_forever(false);
        }
        let change = MessageEvent::Delete {
            message_id: event.id,
        };
        self.dispatch(&message, &snapshot, &change);
        Ok(())
    }

    pub fn reaction_add(&self, event: ReactionDelta) -> Result<()> {
        // Users who have only ever reacted still get a directory entry.
        self.users.get_or_insert(event.user_id);
        let is_self = self.is_self(&event);
        let Some(message) = self.locate_or_create(event.channel_id, event.id) else {
            return Ok(());
        };
        let outcome = message.add_reaction(&event.emoji, is_self, self.config.late_delta_policy);
        if let ReactionOutcome::Applied { snapshot, count } = outcome {
            let change = MessageEvent::ReactionAdd {
                message_id: event.id,
                user_id: event.user_id,
                emoji: event.emoji,
                is_self,
                count,
            };
            self.dispatch(&message, &snapshot, &change);
        } else {
            tracing::debug!(message = %event.id, ?outcome, "late reaction add");
        }
        Ok(())
    }

    pub fn reaction_remove(&self, event: ReactionDelta) -> Result<()> {
        // Users who have only ever reacted still get a directory entry.
        self.users.get_or_insert(event.user_id);
        let is_self = self.is_self(&event);
        let Some(message) = self.locate_or_create(event.channel_id, event.id) else {
            return Ok(());
        };
        let outcome = message.remove_reaction(&event.emoji, is_self, self.config.late_delta_policy);
        if let ReactionOutcome::Applied { snapshot, count } = outcome {
            let change = MessageEvent::ReactionRemove {
                message_id: event.id,
                user_id: event.user_id,
                emoji: event.emoji,
                is_self,
                count,
            };
            self.dispatch(&message, &snapshot, &change);
        } else {
            tracing::debug!(message = %event.id, ?outcome, "late reaction remove");
        }
        Ok(())
    }

    fn is_self(&self, event: &ReactionDelta) -> bool {
        event.is_self || self.users.self_id() == Some(event.user_id)
    }

    /// The cached message, or a fresh placeholder. `None` for tombstoned
    /// ids that are no longer cached.
    fn locate_or_create(&self, channel_id: ChannelId, id: MessageId) -> Option<Arc<Message>> {
        let cache = self.channel(channel_id);
        if let Some(message) = cache.lookup(id) {
            return Some(message);
        }
        if self.is_tombstoned(id) {
            tracing::debug!(message = %id, "dropping delta for deleted message");
            return None;
        }
        tracing::trace!(message = %id, channel = %channel_id, "synthesizing placeholder");
        let message = Arc::new(Message::placeholder(id, channel_id, Arc::downgrade(&cache)));
        cache.insert(&message);
        Some(message)
    }

    fn dispatch(&self, message: &Message, snapshot: &MessageSnapshot, event: &MessageEvent) {
        let kind = event.kind();
        let mut called = message.registry().dispatch(snapshot, event);
        if let MessageEvent::ReactionAdd { user_id, .. } | MessageEvent::ReactionRemove { user_id, .. } = event {
            if let Some(user) = self.users.get(*user_id) {
                called += user.dispatch(snapshot, event);
            }
        }
        tracing::debug!(message = %snapshot.id, ?kind, listeners = called, "dispatched");
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("config", &self.config)
            .field("channels", &self.channels.len())
            .field("users", &self.users.len())
            .finish_non_exhaustive()
    }
}

//! The message entity.
//!
//! A [`Message`] is shared as `Arc<Message>` between its channel cache, the
//! store and application code. Content, embeds, reactions and the deleted
//! flag sit behind one per-message lock; readers get owned snapshots, never
//! references into live state.
//!
//! Lock order: a message's state lock may be held while taking its channel
//! cache lock, never the other way round.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::MessageCache;
use crate::config::LateDeltaPolicy;
use crate::embed::Embed;
use crate::emoji::Emoji;
use crate::id::{ChannelId, MessageId, UserId};
use crate::listener::{ListenerHandle, ListenerId, ListenerKind, ListenerRegistry};
use crate::reaction::{Reaction, ReactionAggregator};
use crate::user::User;

/// Immutable copy of a message at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSnapshot {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: Option<UserId>,
    pub content: String,
    pub embeds: Vec<Embed>,
    pub reactions: Vec<Reaction>,
    pub deleted: bool,
    pub cached_forever: bool,
}

impl MessageSnapshot {
    /// An empty snapshot for a message nothing is known about yet.
    pub fn placeholder(id: MessageId, channel_id: ChannelId) -> Self {
        Self {
            id,
            channel_id,
            author_id: None,
            content: String::new(),
            embeds: Vec::new(),
            reactions: Vec::new(),
            deleted: false,
            cached_forever: false,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.id.created_at()
    }
}

#[derive(Debug, Default)]
struct MessageState {
    author: Option<Arc<User>>,
    content: String,
    embeds: Vec<Embed>,
    reactions: ReactionAggregator,
    deleted: bool,
    /// Synthesized from an edit or reaction; no create has been seen yet.
    placeholder: bool,
    /// An edit has been applied since the message was first seen.
    edited: bool,
}

/// Result of applying a reaction delta to a message.
#[derive(Debug, Clone, PartialEq)]
pub enum ReactionOutcome {
    /// Applied to a live message; listeners should hear about it.
    Applied {
        snapshot: MessageSnapshot,
        count: u32,
    },
    /// Folded into a deleted message's frozen counters, no dispatch.
    Frozen,
    /// The message is deleted and the delta was ignored.
    Dropped,
}

pub struct Message {
    id: MessageId,
    channel_id: ChannelId,
    cache: Weak<MessageCache>,
    state: Mutex<MessageState>,
    pinned: AtomicBool,
    listeners: ListenerRegistry,
}

impl Message {
    pub(crate) fn new(
        id: MessageId,
        channel_id: ChannelId,
        author: Option<Arc<User>>,
        content: String,
        embeds: Vec<Embed>,
        reactions: ReactionAggregator,
        cache: Weak<MessageCache>,
    ) -> Self {
        Self {
            id,
            channel_id,
            cache,
            state: Mutex::new(MessageState {
                author,
                content,
                embeds,
                reactions,
                deleted: false,
                placeholder: false,
                edited: false,
            }),
            pinned: AtomicBool::new(false),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Stand-in for a message first seen through an edit or reaction.
    pub(crate) fn placeholder(
        id: MessageId,
        channel_id: ChannelId,
        cache: Weak<MessageCache>,
    ) -> Self {
        let mut message = Self::new(
            id,
            channel_id,
            None,
            String::new(),
            Vec::new(),
            ReactionAggregator::new(),
            cache,
        );
        message.state.get_mut().placeholder = true;
        message
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// `None` for webhook and integration messages, and for placeholders.
    pub fn author(&self) -> Option<Arc<User>> {
        self.state.lock().author.clone()
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.id.created_at()
    }

    pub fn content(&self) -> String {
        self.state.lock().content.clone()
    }

    pub fn embeds(&self) -> Vec<Embed> {
        self.state.lock().embeds.clone()
    }

    pub fn reactions(&self) -> Vec<Reaction> {
        self.state.lock().reactions.snapshot()
    }

    pub fn reaction(&self, emoji: &Emoji) -> Option<Reaction> {
        self.state.lock().reactions.get(emoji).cloned()
    }

    pub fn is_deleted(&self) -> bool {
        self.state.lock().deleted
    }

    /// Whether the message is still waiting for its create snapshot.
    pub fn is_placeholder(&self) -> bool {
        self.state.lock().placeholder
    }

    pub fn is_cached_forever(&self) -> bool {
        self.pinned.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> MessageSnapshot {
        let state = self.state.lock();
        self.snapshot_locked(&state)
    }

    fn snapshot_locked(&self, state: &MessageState) -> MessageSnapshot {
        MessageSnapshot {
            id: self.id,
            channel_id: self.channel_id,
            author_id: state.author.as_ref().map(|a| a.id()),
            content: state.content.clone(),
            embeds: state.embeds.clone(),
            reactions: state.reactions.snapshot(),
            deleted: state.deleted,
            cached_forever: self.is_cached_forever(),
        }
    }

    /// Exempt the message from eviction, or make it evictable again.
    ///
    /// Pinning also puts the message back into its channel cache if it was
    /// evicted or never cached. Unpinning does not evict by itself; the
    /// next eviction pass does.
    pub fn set_cached_forever(self: &Arc<Self>, cached_forever: bool) {
        match self.cache.upgrade() {
            Some(cache) if cached_forever => cache.pin(self),
            Some(cache) => cache.unpin(self),
            None => self.set_pinned(cached_forever),
        }
    }

    pub(crate) fn set_pinned(&self, pinned: bool) {
        self.pinned.store(pinned, Ordering::Release);
    }

    /// Register a listener. A delete listener pins the message unless it
    /// is already deleted.
    pub fn add_listener(self: &Arc<Self>, kind: ListenerKind, handle: ListenerHandle) -> ListenerId {
        let id = self.listeners.register(kind, handle);
        if kind.pins() {
            // Held across the pin so a concurrent delete either sees the pin
            // and releases it, or happens first and the pin is skipped.
            let state = self.state.lock();
            if !state.deleted {
                self.set_cached_forever(true);
            }
        }
        id
    }

    /// Returns false if no such listener was registered.
    pub fn remove_listener(&self, kind: ListenerKind, id: ListenerId) -> bool {
        self.listeners.unregister(kind, id)
    }

    pub fn listeners(&self, kind: ListenerKind) -> Vec<ListenerHandle> {
        self.listeners.snapshot(kind)
    }

    pub(crate) fn registry(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Replace content and, when given, the whole embed list. Returns the
    /// previous content and the new snapshot, or `None` if the message is
    /// deleted.
    pub(crate) fn apply_edit(
        &self,
        content: String,
        embeds: Option<Vec<Embed>>,
    ) -> Option<(String, MessageSnapshot)> {
        let mut state = self.state.lock();
        if state.deleted {
            return None;
        }
        let previous = std::mem::replace(&mut state.content, content);
        if let Some(embeds) = embeds {
            state.embeds = embeds;
        }
        state.edited = true;
        Some((previous, self.snapshot_locked(&state)))
    }

    /// Fill a placeholder from a late create snapshot. Returns false, and
    /// changes nothing, unless the message is a live placeholder.
    ///
    /// The author is always taken. Content and embeds are taken only if no
    /// edit reached the placeholder, since an edit is newer than the
    /// snapshot. `None` embeds leave the current ones in place. Snapshot
    /// reactions are absorbed into the counters already folded.
    pub(crate) fn fill_placeholder(
        &self,
        author: Option<Arc<User>>,
        content: String,
        embeds: Option<Vec<Embed>>,
        reactions: ReactionAggregator,
    ) -> bool {
        let mut state = self.state.lock();
        if !state.placeholder || state.deleted {
            return false;
        }
        state.placeholder = false;
        state.author = author;
        if !state.edited {
            state.content = content;
            if let Some(embeds) = embeds {
                state.embeds = embeds;
            }
        }
        state.reactions.absorb(reactions);
        true
    }

    /// Mark deleted. Returns the snapshot and whether this call made the
    /// transition.
    pub(crate) fn mark_deleted(&self) -> (bool, MessageSnapshot) {
        let mut state = self.state.lock();
        let first = !state.deleted;
        state.deleted = true;
        (first, self.snapshot_locked(&state))
    }

    pub(crate) fn add_reaction(
        &self,
        emoji: &Emoji,
        is_self: bool,
        policy: LateDeltaPolicy,
    ) -> ReactionOutcome {
        let mut state = self.state.lock();
        if state.deleted {
            return match policy {
                LateDeltaPolicy::Drop => ReactionOutcome::Dropped,
                LateDeltaPolicy::FoldFrozen => {
                    state.reactions.add(emoji, is_self);
                    ReactionOutcome::Frozen
                }
            };
        }
        let count = state.reactions.add(emoji, is_self).count;
        ReactionOutcome::Applied {
            snapshot: self.snapshot_locked(&state),
            count,
        }
    }

    pub(crate) fn remove_reaction(
        &self,
        emoji: &Emoji,
        is_self: bool,
        policy: LateDeltaPolicy,
    ) -> ReactionOutcome {
        let mut state = self.state.lock();
        if state.deleted {
            return match policy {
                LateDeltaPolicy::Drop => ReactionOutcome::Dropped,
                LateDeltaPolicy::FoldFrozen => {
                    state.reactions.remove(emoji, is_self);
                    ReactionOutcome::Frozen
                }
            };
        }
        let count = state.reactions.remove(emoji, is_self);
        ReactionOutcome::Applied {
            snapshot: self.snapshot_locked(&state),
            count,
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Message {}

impl Hash for Message {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("channel_id", &self.channel_id)
            .field("pinned", &self.is_cached_forever())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

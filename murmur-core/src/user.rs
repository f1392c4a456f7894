//! Users and the shared user directory.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::event::MessageEvent;
use crate::id::UserId;
use crate::listener::{ListenerHandle, ListenerId, ListenerKind, ListenerRegistry};
use crate::message::MessageSnapshot;

/// Author object as carried by a message snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorData {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

/// A user account.
///
/// Users carry their own reaction listeners: they hear about reactions the
/// user adds or removes on any cached message.
///
/// A user first seen through a reaction has an empty name and is not a bot
/// until a message they authored fills those in.
pub struct User {
    id: UserId,
    name: RwLock<String>,
    bot: AtomicBool,
    yourself: bool,
    listeners: ListenerRegistry,
}

impl User {
    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn is_bot(&self) -> bool {
        self.bot.load(Ordering::Relaxed)
    }

    /// Whether this is the local account.
    pub fn is_yourself(&self) -> bool {
        self.yourself
    }

    /// `<@id>`
    pub fn mention_tag(&self) -> String {
        format!("<@{}>", self.id)
    }

    /// `<@!id>`, which renders the server nickname.
    pub fn nickname_mention_tag(&self) -> String {
        format!("<@!{}>", self.id)
    }

    pub fn add_reaction_add_listener(&self, handle: ListenerHandle) -> ListenerId {
        self.listeners.register(ListenerKind::ReactionAdd, handle)
    }

    pub fn add_reaction_remove_listener(&self, handle: ListenerHandle) -> ListenerId {
        self.listeners.register(ListenerKind::ReactionRemove, handle)
    }

    pub fn remove_listener(&self, kind: ListenerKind, id: ListenerId) -> bool {
        self.listeners.unregister(kind, id)
    }

    pub fn reaction_add_listeners(&self) -> Vec<ListenerHandle> {
        self.listeners.snapshot(ListenerKind::ReactionAdd)
    }

    pub fn reaction_remove_listeners(&self) -> Vec<ListenerHandle> {
        self.listeners.snapshot(ListenerKind::ReactionRemove)
    }

    pub(crate) fn dispatch(&self, message: &MessageSnapshot, event: &MessageEvent) -> usize {
        self.listeners.dispatch(message, event)
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &*self.name.read())
            .field("bot", &self.is_bot())
            .field("yourself", &self.yourself)
            .finish()
    }
}

/// Get-or-create table of users, shared by every channel.
///
/// Entries are never evicted: the directory holds one user per distinct id
/// seen as an author or reactor for the lifetime of the store.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: DashMap<UserId, Arc<User>>,
    self_id: Option<UserId>,
}

impl UserDirectory {
    pub fn new(self_id: Option<UserId>) -> Self {
        Self {
            users: DashMap::new(),
            self_id,
        }
    }

    pub fn self_id(&self) -> Option<UserId> {
        self.self_id
    }

    /// The user for `data.id`, created on first sight. A known user picks
    /// up a changed name.
    pub fn get_or_create(&self, data: &AuthorData) -> Arc<User> {
        let user = self.get_or_insert(data.id);
        if *user.name.read() != data.username {
            *user.name.write() = data.username.clone();
        }
        user.bot.store(data.bot, Ordering::Relaxed);
        user
    }

    /// The user for `id`, created with no name if unknown.
    pub fn get_or_insert(&self, id: UserId) -> Arc<User> {
        self.users
            .entry(id)
            .or_insert_with(|| {
                Arc::new(User {
                    id,
                    name: RwLock::new(String::new()),
                    bot: AtomicBool::new(false),
                    yourself: self.self_id == Some(id),
                    listeners: ListenerRegistry::new(),
                })
            })
            .clone()
    }

    pub fn get(&self, id: UserId) -> Option<Arc<User>> {
        self.users.get(&id).map(|u| Arc::clone(u.value()))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

//! Per-entity listener registry.
//!
//! Listeners are grouped by a closed set of kinds. Within a kind they are
//! called in registration order. Dispatch works on a snapshot of the
//! registry taken under the read lock and calls listeners with no lock
//! held, so a listener may register or remove listeners (or call back into
//! the store) while it runs. Listeners added during a dispatch pass are not
//! part of that pass.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::event::MessageEvent;
use crate::message::MessageSnapshot;

/// What a listener wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    Delete,
    Edit,
    ReactionAdd,
    ReactionRemove,
}

impl ListenerKind {
    pub const ALL: [ListenerKind; 4] = [
        ListenerKind::Delete,
        ListenerKind::Edit,
        ListenerKind::ReactionAdd,
        ListenerKind::ReactionRemove,
    ];

    const fn slot(self) -> usize {
        match self {
            ListenerKind::Delete => 0,
            ListenerKind::Edit => 1,
            ListenerKind::ReactionAdd => 2,
            ListenerKind::ReactionRemove => 3,
        }
    }

    /// Registering a listener of this kind keeps the message cached until
    /// it is deleted.
    pub const fn pins(self) -> bool {
        matches!(self, ListenerKind::Delete)
    }
}

/// Token returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Callback for message events.
///
/// Receives the message as it was right after the event was applied, and
/// the event itself. Any `Fn(&MessageSnapshot, &MessageEvent)` closure is a
/// listener.
pub trait MessageListener: Send + Sync {
    fn on_event(&self, message: &MessageSnapshot, event: &MessageEvent);
}

impl<F> MessageListener for F
where
    F: Fn(&MessageSnapshot, &MessageEvent) + Send + Sync,
{
    fn on_event(&self, message: &MessageSnapshot, event: &MessageEvent) {
        self(message, event)
    }
}

pub type ListenerHandle = Arc<dyn MessageListener>;

/// Wrap a closure as a [`ListenerHandle`].
pub fn listener<F>(f: F) -> ListenerHandle
where
    F: Fn(&MessageSnapshot, &MessageEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

type Slot = Vec<(ListenerId, ListenerHandle)>;

#[derive(Default)]
pub struct ListenerRegistry {
    slots: RwLock<[Slot; 4]>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: ListenerKind, handle: ListenerHandle) -> ListenerId {
        let id = ListenerId::next();
        self.slots.write()[kind.slot()].push((id, handle));
        id
    }

    /// Returns false if `id` was not registered under `kind`.
    pub fn unregister(&self, kind: ListenerKind, id: ListenerId) -> bool {
        let mut slots = self.slots.write();
        let slot = &mut slots[kind.slot()];
        let before = slot.len();
        slot.retain(|(existing, _)| *existing != id);
        slot.len() != before
    }

    /// Listeners of `kind` in call order.
    pub fn snapshot(&self, kind: ListenerKind) -> Vec<ListenerHandle> {
        self.slots.read()[kind.slot()]
            .iter()
            .map(|(_, handle)| Arc::clone(handle))
            .collect()
    }

    pub fn len(&self, kind: ListenerKind) -> usize {
        self.slots.read()[kind.slot()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().iter().all(Vec::is_empty)
    }

    /// Call every listener of `event.kind()`. A panicking listener is
    /// logged and the rest still run. Returns how many were called.
    pub fn dispatch(&self, message: &MessageSnapshot, event: &MessageEvent) -> usize {
        let kind = event.kind();
        let listeners = self.snapshot(kind);
        for handle in &listeners {
            let result = catch_unwind(AssertUnwindSafe(|| handle.on_event(message, event)));
            if result.is_err() {
                tracing::error!(message = %message.id, ?kind, "listener panicked");
            }
        }
        listeners.len()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read();
        f.debug_struct("ListenerRegistry")
            .field("delete", &slots[0].len())
            .field("edit", &slots[1].len())
            .field("reaction_add", &slots[2].len())
            .field("reaction_remove", &slots[3].len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ChannelId, MessageId};
    use parking_lot::Mutex;

    fn snapshot() -> MessageSnapshot {
        MessageSnapshot::placeholder(MessageId::new(1), ChannelId::new(2))
    }

    fn delete_event() -> MessageEvent {
        MessageEvent::Delete {
            message_id: MessageId::new(1),
        }
    }

    #[test]
    fn dispatch_in_registration_order() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let calls = Arc::clone(&calls);
            registry.register(
                ListenerKind::Delete,
                listener(move |_, _| calls.lock().push(n)),
            );
        }

        assert_eq!(registry.dispatch(&snapshot(), &delete_event()), 3);
        assert_eq!(*calls.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn kinds_are_independent() {
        let registry = ListenerRegistry::new();
        registry.register(ListenerKind::Edit, listener(|_, _| {}));
        assert_eq!(registry.len(ListenerKind::Edit), 1);
        assert_eq!(registry.len(ListenerKind::Delete), 0);
        assert_eq!(registry.dispatch(&snapshot(), &delete_event()), 0);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let registry = ListenerRegistry::new();
        let id = registry.register(ListenerKind::Edit, listener(|_, _| {}));
        assert!(!registry.unregister(ListenerKind::Delete, id));
        assert!(registry.unregister(ListenerKind::Edit, id));
        assert!(!registry.unregister(ListenerKind::Edit, id));
        assert!(registry.is_empty());
    }

    #[test]
    fn listener_may_register_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let inner = Arc::clone(&registry);
        registry.register(
            ListenerKind::Delete,
            listener(move |_, _| {
                inner.register(ListenerKind::Delete, listener(|_, _| {}));
            }),
        );

        // The listener added mid-pass is not called in that pass.
        assert_eq!(registry.dispatch(&snapshot(), &delete_event()), 1);
        assert_eq!(registry.len(ListenerKind::Delete), 2);
    }

    #[test]
    fn panicking_listener_does_not_skip_others() {
        let registry = ListenerRegistry::new();
        let reached = Arc::new(Mutex::new(false));
        registry.register(ListenerKind::Delete, listener(|_, _| panic!("boom")));
        let flag = Arc::clone(&reached);
        registry.register(
            ListenerKind::Delete,
            listener(move |_, _| *flag.lock() = true),
        );

        registry.dispatch(&snapshot(), &delete_event());
        assert!(*reached.lock());
    }

    #[test]
    fn concurrent_register_and_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    registry.register(ListenerKind::Delete, listener(|_, _| {}));
                }
            })
        };
        let mut last = 0;
        for _ in 0..500 {
            let called = registry.dispatch(&snapshot(), &delete_event());
            assert!(called >= last);
            last = called;
        }
        writer.join().unwrap();
        assert_eq!(registry.len(ListenerKind::Delete), 500);
    }
}

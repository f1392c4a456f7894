//! End-to-end tests of the event application layer.
//!
//! Tests cover:
//! - cache bounds through the store (capacity, disabled caches, pinning)
//! - delete listeners pinning their message
//! - edits and reactions after deletion, under both late-delta policies
//! - placeholder synthesis and tombstones
//! - malformed deltas staying isolated
//! - the async ingestion loop

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Duration;
use murmur_core::config::ChannelOverride;
use murmur_core::embed::EmbedData;
use murmur_core::event::{MessageCreate, MessageDelete, MessageEdit, ReactionDelta};
use murmur_core::user::AuthorData;
use murmur_core::{
    CacheConfig, CacheError, ChannelId, Emoji, GatewayEvent, LateDeltaPolicy, ListenerKind,
    ManualClock, MessageEvent, MessageId, MessageStore, StoreConfig, UserId, listener,
};
use parking_lot::Mutex;

const CHANNEL: ChannelId = ChannelId::new(381_870_553_235_193_857);

fn store_with(config: StoreConfig) -> (MessageStore, ManualClock) {
    let clock = ManualClock::default();
    (MessageStore::with_clock(config, Arc::new(clock.clone())), clock)
}

fn store(capacity: i64, max_age: i64) -> (MessageStore, ManualClock) {
    store_with(StoreConfig {
        cache: CacheConfig::new(capacity, max_age).unwrap(),
        ..StoreConfig::default()
    })
}

fn id(n: u64) -> MessageId {
    MessageId::new(n)
}

fn create(n: u64) -> GatewayEvent {
    GatewayEvent::MessageCreate(MessageCreate {
        id: id(n),
        channel_id: CHANNEL,
        content: format!("message {n}"),
        author: Some(AuthorData {
            id: UserId::new(9),
            username: "ana".to_string(),
            bot: false,
        }),
        webhook_id: None,
        embeds: vec![EmbedData {
            title: Some(format!("embed {n}")),
            ..EmbedData::default()
        }],
        reactions: Vec::new(),
    })
}

fn edit(n: u64, content: &str, embeds: Vec<EmbedData>) -> GatewayEvent {
    GatewayEvent::MessageEdit(MessageEdit {
        id: id(n),
        channel_id: CHANNEL,
        content: content.to_string(),
        embeds,
    })
}

fn delete(n: u64) -> GatewayEvent {
    GatewayEvent::MessageDelete(MessageDelete {
        id: id(n),
        channel_id: CHANNEL,
    })
}

fn reaction(n: u64, emoji: &str, user: u64, is_self: bool) -> ReactionDelta {
    ReactionDelta {
        id: id(n),
        channel_id: CHANNEL,
        emoji: Emoji::unicode(emoji),
        user_id: UserId::new(user),
        is_self,
    }
}

fn cached_ids(store: &MessageStore) -> Vec<u64> {
    store
        .channel(CHANNEL)
        .messages()
        .iter()
        .map(|m| m.id().get())
        .collect()
}

/// Counts calls per listener kind.
#[derive(Default)]
struct Calls {
    delete: AtomicUsize,
    edit: AtomicUsize,
    reaction_add: AtomicUsize,
    reaction_remove: AtomicUsize,
}

impl Calls {
    fn watch(self: &Arc<Self>, store: &MessageStore, message: MessageId) {
        for kind in ListenerKind::ALL {
            let calls = Arc::clone(self);
            store
                .register_listener(
                    message,
                    kind,
                    listener(move |_, event| {
                        let counter = match event.kind() {
                            ListenerKind::Delete => &calls.delete,
                            ListenerKind::Edit => &calls.edit,
                            ListenerKind::ReactionAdd => &calls.reaction_add,
                            ListenerKind::ReactionRemove => &calls.reaction_remove,
                        };
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
        }
    }

    fn get(&self, counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[test]
fn capacity_example() {
    let (store, _) = store(2, 3600);
    for n in [1, 2, 3] {
        store.apply(create(n)).unwrap();
    }
    assert_eq!(cached_ids(&store), vec![2, 3]);
}

#[test]
fn pinned_example() {
    let (store, _) = store(2, 3600);
    store.apply(create(1)).unwrap();
    store.apply(create(2)).unwrap();
    store.set_cached_forever(id(1), true).unwrap();
    store.apply(create(3)).unwrap();
    assert_eq!(cached_ids(&store), vec![1, 2, 3]);
}

#[test]
fn disabled_cache_retains_nothing() {
    for (capacity, age) in [(0, 3600), (50, 0)] {
        let (store, _) = store(capacity, age);
        for n in 1..=20 {
            store.apply(create(n)).unwrap();
            assert!(store.channel(CHANNEL).is_empty());
        }
        assert_eq!(
            store.get_reactions(id(1)),
            Err(CacheError::NotFound(id(1)))
        );
    }
}

#[test]
fn channel_override_applies() {
    let other = ChannelId::new(1);
    let (store, _) = store_with(StoreConfig {
        channels: vec![ChannelOverride {
            channel: CHANNEL,
            cache: CacheConfig::disabled(),
        }],
        ..StoreConfig::default()
    });
    store.apply(create(1)).unwrap();
    assert!(store.channel(CHANNEL).is_empty());
    assert!(store.channel(other).config().is_enabled());
}

#[test]
fn delete_listener_pins_through_capacity_pressure() {
    let (store, _) = store(3, 3600);
    store.apply(create(1)).unwrap();
    store
        .register_listener(id(1), ListenerKind::Delete, listener(|_, _| {}))
        .unwrap();
    assert!(store.message(id(1)).unwrap().is_cached_forever());

    for n in 2..200 {
        store.apply(create(n)).unwrap();
    }
    assert!(store.channel(CHANNEL).contains(id(1)));
    assert_eq!(store.channel(CHANNEL).len(), 4);
}

#[test]
fn delete_listener_pins_through_age() {
    let (store, clock) = store(10, 60);
    store.apply(create(1)).unwrap();
    store
        .register_listener(id(1), ListenerKind::Delete, listener(|_, _| {}))
        .unwrap();
    clock.advance(Duration::days(3));
    store.apply(create(2)).unwrap();
    assert_eq!(cached_ids(&store), vec![1, 2]);
}

#[test]
fn other_listener_kinds_do_not_pin() {
    let (store, _) = store(1, 3600);
    store.apply(create(1)).unwrap();
    for kind in [
        ListenerKind::Edit,
        ListenerKind::ReactionAdd,
        ListenerKind::ReactionRemove,
    ] {
        store
            .register_listener(id(1), kind, listener(|_, _| {}))
            .unwrap();
    }
    assert!(!store.message(id(1)).unwrap().is_cached_forever());
    store.apply(create(2)).unwrap();
    assert_eq!(cached_ids(&store), vec![2]);
}

#[test]
fn edit_replaces_content_and_notifies() {
    let (store, _) = store(10, 3600);
    store.apply(create(1)).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store
        .register_listener(
            id(1),
            ListenerKind::Edit,
            listener(move |snapshot, event| {
                if let MessageEvent::Edit {
                    previous_content, ..
                } = event
                {
                    sink.lock()
                        .push((previous_content.clone(), snapshot.content.clone()));
                }
            }),
        )
        .unwrap();

    store.apply(edit(1, "changed", Vec::new())).unwrap();
    assert_eq!(
        *seen.lock(),
        vec![("message 1".to_string(), "changed".to_string())]
    );
    assert!(store.get_embeds(id(1)).unwrap().is_empty());
}

#[test]
fn edit_after_delete_changes_nothing() {
    let (store, _) = store(10, 3600);
    store.apply(create(1)).unwrap();
    let calls = Arc::new(Calls::default());
    calls.watch(&store, id(1));

    store.apply(delete(1)).unwrap();
    store
        .apply(edit(1, "too late", vec![EmbedData::default(), EmbedData::default()]))
        .unwrap();

    let message = store.message(id(1)).unwrap();
    assert!(message.is_deleted());
    assert_eq!(message.content(), "message 1");
    assert_eq!(message.embeds()[0].title.as_deref(), Some("embed 1"));
    assert_eq!(calls.get(&calls.delete), 1);
    assert_eq!(calls.get(&calls.edit), 0);
}

#[test]
fn double_delete_dispatches_twice_without_error() {
    let (store, _) = store(10, 3600);
    store.apply(create(1)).unwrap();
    let calls = Arc::new(Calls::default());
    calls.watch(&store, id(1));

    store.apply(delete(1)).unwrap();
    store.apply(delete(1)).unwrap();
    assert_eq!(calls.get(&calls.delete), 2);
    assert!(store.message(id(1)).unwrap().is_deleted());
}

#[test]
fn deletion_releases_the_pin() {
    let (store, _) = store(1, 3600);
    store.apply(create(1)).unwrap();
    let calls = Arc::new(Calls::default());
    calls.watch(&store, id(1));

    store.apply(create(2)).unwrap();
    assert_eq!(cached_ids(&store), vec![1, 2]);

    store.apply(delete(1)).unwrap();
    assert!(!store.message(id(1)).unwrap().is_cached_forever());
    store.apply(create(3)).unwrap();
    assert_eq!(cached_ids(&store), vec![3]);
}

#[test]
fn late_reactions_are_dropped_by_default() {
    let (store, _) = store(10, 3600);
    store.apply(create(1)).unwrap();
    store.reaction_add(reaction(1, "👍", 5, false)).unwrap();
    let calls = Arc::new(Calls::default());
    calls.watch(&store, id(1));

    store.apply(delete(1)).unwrap();
    store.reaction_add(reaction(1, "👍", 6, false)).unwrap();
    store.reaction_remove(reaction(1, "👍", 5, false)).unwrap();

    let reactions = store.get_reactions(id(1)).unwrap();
    assert_eq!(reactions[0].count, 1);
    assert_eq!(calls.get(&calls.reaction_add), 0);
    assert_eq!(calls.get(&calls.reaction_remove), 0);
}

#[test]
fn late_reactions_fold_when_configured() {
    let (store, _) = store_with(StoreConfig {
        late_delta_policy: LateDeltaPolicy::FoldFrozen,
        ..StoreConfig::default()
    });
    store.apply(create(1)).unwrap();
    let calls = Arc::new(Calls::default());
    calls.watch(&store, id(1));

    store.apply(delete(1)).unwrap();
    store.reaction_add(reaction(1, "🎉", 6, false)).unwrap();
    store.apply(edit(1, "nope", Vec::new())).unwrap();

    assert_eq!(store.get_reactions(id(1)).unwrap()[0].count, 1);
    assert_eq!(store.message(id(1)).unwrap().content(), "message 1");
    assert_eq!(calls.get(&calls.reaction_add), 0);
    assert_eq!(calls.get(&calls.edit), 0);
}

#[test]
fn reaction_folding_through_store() {
    let (store, _) = store(10, 3600);
    store.apply(create(1)).unwrap();

    store.reaction_add(reaction(1, "👍", 5, false)).unwrap();
    store.reaction_add(reaction(1, "👍", 6, false)).unwrap();
    store.reaction_remove(reaction(1, "👍", 5, false)).unwrap();
    store.reaction_remove(reaction(1, "🎉", 7, true)).unwrap();

    let reactions = store.get_reactions(id(1)).unwrap();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].emoji, Emoji::unicode("👍"));
    assert_eq!(reactions[0].count, 1);
    assert!(!reactions[0].self_reacted);
}

#[test]
fn out_of_order_reaction_remove_then_add() {
    let (store, _) = store(10, 3600);
    store.apply(create(1)).unwrap();

    store.reaction_remove(reaction(1, "👍", 5, false)).unwrap();
    assert!(store.get_reactions(id(1)).unwrap().is_empty());
    store.reaction_add(reaction(1, "👍", 5, false)).unwrap();
    assert_eq!(store.get_reactions(id(1)).unwrap()[0].count, 1);
}

#[test]
fn reaction_listeners_get_counts_and_user_listeners_fire() {
    let (store, _) = store(10, 3600);
    store.apply(create(1)).unwrap();

    let counts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&counts);
    store
        .register_listener(
            id(1),
            ListenerKind::ReactionRemove,
            listener(move |_, event| {
                if let MessageEvent::ReactionRemove { count, .. } = event {
                    sink.lock().push(*count);
                }
            }),
        )
        .unwrap();

    // The author is known to the directory, so their reactions reach them.
    let author = store.users().get(UserId::new(9)).unwrap();
    let by_author = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&by_author);
    author.add_reaction_add_listener(listener(move |_, _| {
        hits.fetch_add(1, Ordering::SeqCst);
    }));

    store.reaction_add(reaction(1, "👍", 9, false)).unwrap();
    store.reaction_add(reaction(1, "👍", 5, false)).unwrap();
    store.reaction_remove(reaction(1, "👍", 9, false)).unwrap();
    store.reaction_remove(reaction(1, "👍", 5, false)).unwrap();

    assert_eq!(*counts.lock(), vec![1, 0]);
    assert_eq!(by_author.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_ids_get_placeholders() {
    let (store, _) = store(10, 3600);
    store.apply(edit(42, "first seen in an edit", Vec::new())).unwrap();
    let message = store.message(id(42)).unwrap();
    assert_eq!(message.content(), "first seen in an edit");
    assert!(message.author().is_none());

    store.reaction_add(reaction(43, "👍", 5, false)).unwrap();
    assert_eq!(store.get_reactions(id(43)).unwrap()[0].count, 1);
}

#[test]
fn tombstones_stop_resurrection() {
    let (store, _) = store(1, 3600);
    store.apply(create(1)).unwrap();
    store.apply(delete(1)).unwrap();
    store.apply(create(2)).unwrap();
    assert!(store.message(id(1)).is_none());

    store.apply(edit(1, "ghost", Vec::new())).unwrap();
    store.reaction_add(reaction(1, "👍", 5, false)).unwrap();
    store.apply(create(1)).unwrap();
    assert!(store.message(id(1)).is_none());
    assert!(store.is_tombstoned(id(1)));
}

#[test]
fn late_create_fills_reaction_placeholder() {
    let (store, _) = store(10, 3600);
    let created = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&created);
    store.add_create_listener(Arc::new(move |_: &Arc<murmur_core::Message>| {
        hits.fetch_add(1, Ordering::SeqCst);
    }));

    store.reaction_add(reaction(5, "👍", 3, false)).unwrap();
    assert!(store.message(id(5)).unwrap().is_placeholder());

    store.apply(create(5)).unwrap();
    let message = store.message(id(5)).unwrap();
    assert!(!message.is_placeholder());
    assert_eq!(message.content(), "message 5");
    assert_eq!(message.author().unwrap().id(), UserId::new(9));
    assert_eq!(message.embeds()[0].title.as_deref(), Some("embed 5"));
    assert_eq!(store.get_reactions(id(5)).unwrap()[0].count, 1);
    assert_eq!(created.load(Ordering::SeqCst), 1);

    // A second create is a real duplicate.
    store.apply(create(5)).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[test]
fn late_create_keeps_an_earlier_edit() {
    let (store, _) = store(10, 3600);
    store.apply(edit(6, "edited first", Vec::new())).unwrap();
    store.apply(create(6)).unwrap();

    let message = store.message(id(6)).unwrap();
    assert_eq!(message.content(), "edited first");
    assert!(message.embeds().is_empty());
    assert!(message.author().is_some());
}

#[test]
fn delete_listener_after_delete_does_not_pin() {
    let (store, _) = store(1, 3600);
    store.apply(create(1)).unwrap();
    store.apply(delete(1)).unwrap();
    store
        .register_listener(id(1), ListenerKind::Delete, listener(|_, _| {}))
        .unwrap();
    assert!(!store.message(id(1)).unwrap().is_cached_forever());

    for n in 2..50 {
        store.apply(create(n)).unwrap();
    }
    assert_eq!(cached_ids(&store), vec![49]);
}

#[test]
fn tombstone_window_is_bounded() {
    let (store, _) = store_with(StoreConfig {
        cache: CacheConfig::new(1, 3600).unwrap(),
        tombstone_capacity: 1,
        ..StoreConfig::default()
    });
    store.apply(create(1)).unwrap();
    store.apply(delete(1)).unwrap();
    store.apply(create(2)).unwrap();
    store.apply(delete(2)).unwrap();
    store.apply(create(3)).unwrap();

    // 2 is still remembered, 1 has left the window.
    store.reaction_add(reaction(2, "👍", 5, false)).unwrap();
    assert!(store.message(id(2)).is_none());
    store.reaction_add(reaction(1, "👍", 5, false)).unwrap();
    assert!(store.message(id(1)).unwrap().is_placeholder());
}

#[test]
fn reaction_only_users_can_take_listeners() {
    let (store, _) = store(10, 3600);
    store.apply(create(1)).unwrap();
    store.reaction_add(reaction(1, "👍", 40, false)).unwrap();

    let user = store.users().get(UserId::new(40)).unwrap();
    let removed = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&removed);
    user.add_reaction_remove_listener(listener(move |_, _| {
        hits.fetch_add(1, Ordering::SeqCst);
    }));
    store.reaction_remove(reaction(1, "👍", 40, false)).unwrap();
    assert_eq!(removed.load(Ordering::SeqCst), 1);
}

#[test]
fn malformed_embed_keeps_old_embeds_but_applies_content() {
    let (store, _) = store(10, 3600);
    store.apply(create(1)).unwrap();
    store.apply(create(2)).unwrap();

    let bad = EmbedData {
        color: Some(-1),
        ..EmbedData::default()
    };
    let result = store.apply(edit(1, "new text", vec![EmbedData::default(), bad]));
    assert!(matches!(result, Err(CacheError::MalformedDelta(_))));

    let message = store.message(id(1)).unwrap();
    assert_eq!(message.content(), "new text");
    assert_eq!(message.embeds()[0].title.as_deref(), Some("embed 1"));

    // Later deltas and other messages are unaffected.
    store.apply(edit(2, "fine", Vec::new())).unwrap();
    assert_eq!(store.message(id(2)).unwrap().content(), "fine");
}

#[test]
fn apply_all_counts_failures_and_continues() {
    let (store, _) = store(10, 3600);
    let bad = EmbedData {
        timestamp: Some("not a time".to_string()),
        ..EmbedData::default()
    };
    let failures = store.apply_all(vec![
        create(1),
        edit(1, "x", vec![bad]),
        create(2),
        delete(2),
    ]);
    assert_eq!(failures, 1);
    assert!(store.message(id(2)).unwrap().is_deleted());
}

#[test]
fn webhook_messages_have_no_author() {
    let (store, _) = store(10, 3600);
    let GatewayEvent::MessageCreate(mut event) = create(1) else {
        unreachable!()
    };
    event.webhook_id = Some(murmur_core::Snowflake::new(77));
    store.create(event).unwrap();
    assert!(store.message(id(1)).unwrap().author().is_none());
}

#[test]
fn unregister_listener() {
    let (store, _) = store(10, 3600);
    store.apply(create(1)).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&calls);
    let listener_id = store
        .register_listener(
            id(1),
            ListenerKind::Edit,
            listener(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    assert!(store.unregister_listener(id(1), ListenerKind::Edit, listener_id).unwrap());
    assert!(!store.unregister_listener(id(1), ListenerKind::Edit, listener_id).unwrap());
    store.apply(edit(1, "quiet", Vec::new())).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn listener_can_read_store_during_dispatch() {
    let (store, _) = store(10, 3600);
    let store = Arc::new(store);
    store.apply(create(1)).unwrap();

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let inner = Arc::clone(&store);
    store
        .register_listener(
            id(1),
            ListenerKind::ReactionAdd,
            listener(move |snapshot, _| {
                *sink.lock() = Some(inner.get_reactions(snapshot.id).unwrap().len());
            }),
        )
        .unwrap();
    store.reaction_add(reaction(1, "👍", 5, false)).unwrap();
    assert_eq!(*seen.lock(), Some(1));
}

#[test]
fn concurrent_ingest_and_reads() {
    let (store, _) = store(1000, 3600);
    let store = Arc::new(store);
    store.apply(create(1)).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for n in 0..500u64 {
                store.reaction_add(reaction(1, "👍", n, false)).unwrap();
                if n % 2 == 1 {
                    store.reaction_remove(reaction(1, "👍", n, false)).unwrap();
                }
            }
        })
    };
    for _ in 0..200 {
        store
            .register_listener(id(1), ListenerKind::ReactionAdd, listener(|_, _| {}))
            .unwrap();
        for r in store.get_reactions(id(1)).unwrap() {
            assert!(r.count > 0);
        }
    }
    writer.join().unwrap();
    assert_eq!(store.get_reactions(id(1)).unwrap()[0].count, 250);
}

#[tokio::test]
async fn run_drains_channel_in_order() {
    let (store, _) = store(10, 3600);
    let store = Arc::new(store);
    let (tx, rx) = tokio::sync::mpsc::channel(8);

    let runner = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.run(rx).await })
    };
    tx.send(create(1)).await.unwrap();
    tx.send(edit(1, "second", Vec::new())).await.unwrap();
    tx.send(edit(1, "third", vec![EmbedData {
        color: Some(0x1_00_00_00),
        ..EmbedData::default()
    }]))
    .await
    .unwrap();
    tx.send(delete(1)).await.unwrap();
    drop(tx);

    assert_eq!(runner.await.unwrap(), 4);
    let message = store.message(id(1)).unwrap();
    assert_eq!(message.content(), "third");
    assert!(message.is_deleted());
}

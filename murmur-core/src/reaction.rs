//! Per-message reaction counters.
//!
//! The remote service reports reactions as independent add/remove events,
//! one per user. [`ReactionAggregator`] folds them into one counter per
//! emoji. Counts never go below zero and an emoji whose count reaches zero
//! is dropped, so duplicate or reordered removes cannot corrupt the state.

use serde::{Deserialize, Serialize};

use crate::emoji::Emoji;

/// Aggregate state of one emoji on one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reaction {
    pub emoji: Emoji,
    pub count: u32,
    /// The local account is among the reactors.
    pub self_reacted: bool,
}

/// A reaction as it appears in a message snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionData {
    pub emoji: Emoji,
    pub count: i64,
    #[serde(default)]
    pub me: bool,
}

/// Emoji → counter, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionAggregator {
    entries: Vec<Reaction>,
}

impl ReactionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a snapshot. Non-positive counts are skipped and repeated
    /// emoji are merged.
    pub fn from_snapshot(reactions: impl IntoIterator<Item = ReactionData>) -> Self {
        let mut aggregator = Self::new();
        for data in reactions {
            if data.count <= 0 {
                continue;
            }
            let count = u32::try_from(data.count).unwrap_or(u32::MAX);
            match aggregator.position(&data.emoji) {
                Some(i) => {
                    let entry = &mut aggregator.entries[i];
                    entry.count = entry.count.saturating_add(count);
                    entry.self_reacted |= data.me;
                }
                None => aggregator.entries.push(Reaction {
                    emoji: data.emoji,
                    count,
                    self_reacted: data.me,
                }),
            }
        }
        aggregator
    }

    /// Fold in a snapshot taken for the same message. Deltas counted
    /// before the snapshot arrived may already be part of it, so each
    /// counter keeps the larger of the two values rather than summing.
    pub fn absorb(&mut self, snapshot: ReactionAggregator) {
        for reaction in snapshot.entries {
            match self.position(&reaction.emoji) {
                Some(i) => {
                    let entry = &mut self.entries[i];
                    entry.count = entry.count.max(reaction.count);
                    entry.self_reacted |= reaction.self_reacted;
                }
                None => self.entries.push(reaction),
            }
        }
    }

    fn position(&self, emoji: &Emoji) -> Option<usize> {
        self.entries.iter().position(|r| &r.emoji == emoji)
    }

    /// One user reacted with `emoji`. Returns the counter afterwards.
    pub fn add(&mut self, emoji: &Emoji, is_self: bool) -> Reaction {
        match self.position(emoji) {
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.count = entry.count.saturating_add(1);
                if is_self {
                    entry.self_reacted = true;
                }
                entry.clone()
            }
            None => {
                let entry = Reaction {
                    emoji: emoji.clone(),
                    count: 1,
                    self_reacted: is_self,
                };
                self.entries.push(entry.clone());
                entry
            }
        }
    }

    /// One user took back `emoji`. Returns the remaining count, which is
    /// zero when the emoji is gone or was never there.
    pub fn remove(&mut self, emoji: &Emoji, is_self: bool) -> u32 {
        let Some(i) = self.position(emoji) else {
            return 0;
        };
        let entry = &mut self.entries[i];
        entry.count = entry.count.saturating_sub(1);
        if is_self {
            entry.self_reacted = false;
        }
        let remaining = entry.count;
        if remaining == 0 {
            self.entries.remove(i);
        }
        remaining
    }

    pub fn get(&self, emoji: &Emoji) -> Option<&Reaction> {
        self.entries.iter().find(|r| &r.emoji == emoji)
    }

    pub fn snapshot(&self) -> Vec<Reaction> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

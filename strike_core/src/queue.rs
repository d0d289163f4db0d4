use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// What a due entry resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DueKind {
    Impact,
    Mission,
}

/// Idempotency key for one scheduled resolution: the entity plus the time it
/// was scheduled for. Re-scheduling the same key is a no-op, so a resolver
/// invoked twice for the same due event performs its transition once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DueKey {
    pub kind: DueKind,
    pub entity: u64,
    pub due_at: u64,
}

/// Time-ordered work queue consumed by the external scheduler trigger.
///
/// The core owns no timer thread; callers ask "what is due now?" and feed
/// the answers back into the resolvers with an explicit clock.
#[derive(Debug, Default)]
pub struct DueQueue {
    pending: BinaryHeap<Reverse<DueKey>>,
    seen: HashSet<DueKey>,
}

impl DueQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a due entry. Returns false when the key was already
    /// scheduled or already drained.
    pub fn push(&mut self, kind: DueKind, entity: u64, due_at: u64) -> bool {
        let key = DueKey {
            kind,
            entity,
            due_at,
        };
        if !self.seen.insert(key) {
            return false;
        }
        self.pending.push(Reverse(key));
        true
    }

    /// Pop every entry due at-or-before `now`, oldest first. Each key is
    /// delivered exactly once for the queue's lifetime.
    pub fn drain_due(&mut self, now: u64) -> Vec<DueKey> {
        let mut due = Vec::new();
        while let Some(Reverse(key)) = self.pending.peek().copied() {
            if key.due_at > now {
                break;
            }
            self.pending.pop();
            due.push(key);
        }
        due
    }

    /// Peek entity ids of a given kind due at-or-before `now` without
    /// consuming them (the `dueImpacts`/`dueMissions` collaborator surface).
    pub fn due_entities(&self, kind: DueKind, now: u64) -> Vec<u64> {
        let mut entities: Vec<(u64, u64)> = self
            .pending
            .iter()
            .filter(|Reverse(key)| key.kind == kind && key.due_at <= now)
            .map(|Reverse(key)| (key.due_at, key.entity))
            .collect();
        entities.sort_unstable();
        entities.into_iter().map(|(_, entity)| entity).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

//! Bounded, ordered, deduplicated history.
//!
//! A [`RollingWindow`] keeps the `capacity` highest-ranked distinct entries
//! it has been offered, independent of the order they arrive in. Entries are
//! indexed by identity, so a late or repeated insert is checked against what
//! the window already holds instead of trusting arrival order.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use crate::models::{BlockSummary, ExtrinsicId, ExtrinsicSummary};

/// An entry that can live in a [`RollingWindow`].
pub trait Windowed: Clone {
    /// Identity used for duplicate detection.
    type Id: Eq + Hash + Clone;
    /// Ordering key. Higher ranks are newer and survive eviction.
    type Rank: Ord + Clone;

    fn id(&self) -> Self::Id;
    fn rank(&self) -> Self::Rank;
}

impl Windowed for BlockSummary {
    type Id = u64;
    type Rank = u64;

    fn id(&self) -> u64 {
        self.number
    }

    fn rank(&self) -> u64 {
        self.number
    }
}

impl Windowed for ExtrinsicSummary {
    type Id = ExtrinsicId;
    /// Observation time first, then block number and ordinal index.
    type Rank = (chrono::DateTime<chrono::Utc>, u64, u32);

    fn id(&self) -> ExtrinsicId {
        self.id
    }

    fn rank(&self) -> Self::Rank {
        (self.observed_at, self.id.block_number, self.id.index)
    }
}

/// Outcome of [`RollingWindow::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission<T> {
    /// Inserted. Carries the entry evicted to make room, if any.
    Inserted { evicted: Option<T> },
    /// An entry with the same identity is already present.
    Duplicate,
    /// The window is full and the entry ranks at or below its oldest entry.
    Stale,
}

impl<T> Admission<T> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }

    /// Label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Inserted { .. } => "inserted",
            Self::Duplicate => "duplicate",
            Self::Stale => "stale",
        }
    }
}

/// Fixed-capacity history, iterated newest first.
#[derive(Debug, Clone)]
pub struct RollingWindow<T: Windowed> {
    capacity: usize,
    entries: BTreeMap<T::Rank, T>,
    ids: HashSet<T::Id>,
}

impl<T: Windowed> RollingWindow<T> {
    /// Create an empty window. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: BTreeMap::new(),
            ids: HashSet::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.ids.contains(id)
    }

    /// Lowest rank currently retained.
    pub fn min_rank(&self) -> Option<&T::Rank> {
        self.entries.keys().next()
    }

    /// Check an entry with this identity and rank against the window.
    ///
    /// Returns the rejection [`insert`](Self::insert) would produce, or
    /// `None` if the entry would be inserted.
    pub fn screen(&self, id: &T::Id, rank: &T::Rank) -> Option<Admission<T>> {
        if self.ids.contains(id) || self.entries.contains_key(rank) {
            return Some(Admission::Duplicate);
        }
        if self.is_full() && self.min_rank().is_some_and(|min| rank <= min) {
            return Some(Admission::Stale);
        }
        None
    }

    /// Insert `entry` unless it duplicates a retained identity or would only
    /// extend the tail of a full window.
    pub fn insert(&mut self, entry: T) -> Admission<T> {
        let id = entry.id();
        let rank = entry.rank();

        if let Some(rejected) = self.screen(&id, &rank) {
            return rejected;
        }

        self.entries.insert(rank, entry);
        self.ids.insert(id);

        let evicted = if self.entries.len() > self.capacity {
            self.entries.pop_first().map(|(_, old)| {
                self.ids.remove(&old.id());
                old
            })
        } else {
            None
        };

        Admission::Inserted { evicted }
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values().rev()
    }

    /// Newest entry.
    pub fn newest(&self) -> Option<&T> {
        self.entries.values().next_back()
    }

    /// Owned copy of the entries, newest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockHash, ExtrinsicHash, ExtrinsicOutcome};
    use chrono::{Duration, TimeZone, Utc};

    fn block(number: u64) -> BlockSummary {
        BlockSummary {
            number,
            hash: BlockHash([number as u8; 32]),
            extrinsic_count: 2,
            author: None,
            observed_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn numbers(window: &RollingWindow<BlockSummary>) -> Vec<u64> {
        window.iter().map(|b| b.number).collect()
    }

    fn extrinsic(block_number: u64, index: u32, offset_secs: i64) -> ExtrinsicSummary {
        ExtrinsicSummary {
            id: ExtrinsicId { block_number, index },
            block_number,
            hash: ExtrinsicHash([index as u8; 32]),
            action: "Timestamp.set".into(),
            outcome: ExtrinsicOutcome::Success,
            observed_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap()
                + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_out_of_order_completion_keeps_descending_order() {
        let mut window = RollingWindow::new(10);
        window.insert(block(5));
        window.insert(block(7));
        // 6 arrive après 7: accepté, mais ne réordonne jamais 7 sous 6
        assert!(window.insert(block(6)).is_inserted());
        assert_eq!(numbers(&window), vec![7, 6, 5]);
    }

    #[test]
    fn test_duplicate_leaves_window_unchanged() {
        let mut window = RollingWindow::new(10);
        window.insert(block(1));
        window.insert(block(2));
        let before = window.to_vec();

        assert_eq!(window.insert(block(2)), Admission::Duplicate);
        assert_eq!(window.to_vec(), before);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut window = RollingWindow::new(3);
        for n in 1..=3 {
            window.insert(block(n));
        }
        let admission = window.insert(block(4));
        assert_eq!(
            admission,
            Admission::Inserted {
                evicted: Some(block(1))
            }
        );
        assert_eq!(numbers(&window), vec![4, 3, 2]);
        // L'identité évincée est libérée
        assert!(!window.contains(&1));
    }

    // Test critique: une queue de fenêtre pleine n'est jamais étendue
    #[test]
    fn test_full_window_rejects_tail_entries() {
        let mut window = RollingWindow::new(3);
        for n in [10, 11, 12] {
            window.insert(block(n));
        }
        assert_eq!(window.insert(block(9)), Admission::Stale);
        assert_eq!(window.insert(block(10)), Admission::Duplicate);
        assert_eq!(window.screen(&8, &8), Some(Admission::Stale));
        assert_eq!(window.screen(&12, &12), Some(Admission::Duplicate));
        assert_eq!(numbers(&window), vec![12, 11, 10]);

        // A gap fill above the minimum is still accepted
        let mut window = RollingWindow::new(3);
        for n in [10, 12, 13] {
            window.insert(block(n));
        }
        assert_eq!(window.screen(&11, &11), None);
        assert!(window.insert(block(11)).is_inserted());
        assert_eq!(numbers(&window), vec![13, 12, 11]);
    }

    #[test]
    fn test_invariants_hold_for_arbitrary_arrival_order() {
        let arrivals = [3u64, 9, 1, 9, 4, 15, 2, 14, 14, 7, 20, 5, 19, 18, 1, 16];
        let mut window = RollingWindow::new(4);
        for n in arrivals {
            window.insert(block(n));
            let seen = numbers(&window);
            assert!(seen.len() <= 4);
            assert!(seen.windows(2).all(|pair| pair[0] > pair[1]));
        }
        assert_eq!(numbers(&window), vec![20, 19, 18, 16]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut window = RollingWindow::new(0);
        assert_eq!(window.capacity(), 1);
        window.insert(block(1));
        window.insert(block(2));
        assert_eq!(numbers(&window), vec![2]);
    }

    #[test]
    fn test_extrinsics_ordered_by_observation_then_index() {
        let mut window = RollingWindow::new(5);
        window.insert(extrinsic(7, 0, 0));
        window.insert(extrinsic(7, 1, 0));
        window.insert(extrinsic(8, 0, 6));
        window.insert(extrinsic(8, 1, 6));

        let ids: Vec<String> = window.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(ids, vec!["8-1", "8-0", "7-1", "7-0"]);

        // Same composite id re-delivered later is still a duplicate
        assert_eq!(window.insert(extrinsic(7, 1, 30)), Admission::Duplicate);
        assert_eq!(window.newest().map(|e| e.id.to_string()), Some("8-1".into()));
    }
}

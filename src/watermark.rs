//! Commit watermark tracking
//!
//! Workers complete records out of order, but offsets may only be
//! committed up to the lowest contiguous completed position per partition,
//! otherwise a crash between two concurrently-processed records could
//! commit past a record that never finished. `OffsetTracker` keeps the
//! delivery order per partition and folds completions into a watermark.
//!
//! Contiguity is defined by delivery order, not offset arithmetic, so
//! offset gaps (compacted topics, control records) cannot stall the
//! watermark.

use crate::broker::OffsetMark;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Default)]
struct PartitionState {
    /// Offsets in the order the reader delivered them, watermark exclusive
    delivered_order: VecDeque<i64>,

    /// Delivered offsets still being processed
    outstanding: HashSet<i64>,

    /// Completed offsets not yet folded into the watermark
    completed: HashSet<i64>,

    /// Last offset below which everything delivered has completed
    watermark: Option<i64>,

    /// Watermark moved since the last `committable` drain
    advanced: bool,
}

impl PartitionState {
    /// Fold completed offsets at the front of the delivery queue into the
    /// watermark
    fn advance(&mut self) {
        while let Some(&front) = self.delivered_order.front() {
            if !self.completed.remove(&front) {
                break;
            }
            self.delivered_order.pop_front();
            self.watermark = Some(front);
            self.advanced = true;
        }
    }
}

/// Per-partition completion tracker feeding the batch committer
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, PartitionState>,
    pending: usize,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the reader handed a record to the workers
    ///
    /// Must be called before the record can complete; the call order per
    /// partition defines commit contiguity.
    pub fn record_delivered(&mut self, partition: i32, offset: i64) {
        let state = self.partitions.entry(partition).or_default();
        if state.outstanding.insert(offset) {
            state.delivered_order.push_back(offset);
        }
    }

    /// Record that a worker finished a record (successfully or not)
    ///
    /// Completions for offsets never delivered, and duplicate completions,
    /// are ignored.
    pub fn record_completed(&mut self, partition: i32, offset: i64) {
        let Some(state) = self.partitions.get_mut(&partition) else {
            return;
        };
        if !state.outstanding.remove(&offset) {
            return;
        }
        state.completed.insert(offset);
        state.advance();
        self.pending += 1;
    }

    /// Completions recorded since the last `committable` drain
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Records delivered but not yet completed, across partitions
    pub fn in_flight(&self) -> usize {
        self.partitions.values().map(|s| s.outstanding.len()).sum()
    }

    /// Drain commit marks for every partition whose watermark advanced
    ///
    /// Marks carry the *next* offset to read (Kafka commit semantics).
    /// Resets the pending-completion counter even when some completions
    /// are still held back behind a gap; those commit once the gap closes.
    pub fn committable(&mut self) -> Vec<OffsetMark> {
        self.pending = 0;
        let mut marks: Vec<OffsetMark> = self
            .partitions
            .iter_mut()
            .filter(|(_, state)| state.advanced)
            .map(|(&partition, state)| {
                state.advanced = false;
                OffsetMark {
                    partition,
                    next_offset: state.watermark.unwrap_or(0) + 1,
                }
            })
            .collect();
        marks.sort_by_key(|m| m.partition);
        marks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marks(tracker: &mut OffsetTracker) -> Vec<(i32, i64)> {
        tracker
            .committable()
            .into_iter()
            .map(|m| (m.partition, m.next_offset))
            .collect()
    }

    #[test]
    fn test_in_order_completion_advances() {
        let mut tracker = OffsetTracker::new();
        for offset in 0..3 {
            tracker.record_delivered(0, offset);
        }
        tracker.record_completed(0, 0);
        tracker.record_completed(0, 1);

        assert_eq!(tracker.pending(), 2);
        assert_eq!(marks(&mut tracker), vec![(0, 2)]);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_out_of_order_completion_holds_watermark() {
        let mut tracker = OffsetTracker::new();
        for offset in 0..3 {
            tracker.record_delivered(0, offset);
        }

        // Offsets 1 and 2 finish while 0 is still in flight
        tracker.record_completed(0, 1);
        tracker.record_completed(0, 2);
        assert_eq!(marks(&mut tracker), vec![]);

        // Once 0 completes, the whole run commits
        tracker.record_completed(0, 0);
        assert_eq!(marks(&mut tracker), vec![(0, 3)]);
    }

    #[test]
    fn test_offset_gaps_do_not_stall() {
        let mut tracker = OffsetTracker::new();
        for offset in [5, 7, 9] {
            tracker.record_delivered(0, offset);
        }
        tracker.record_completed(0, 5);
        tracker.record_completed(0, 7);

        // 6 and 8 were never delivered; contiguity follows delivery order
        assert_eq!(marks(&mut tracker), vec![(0, 8)]);
    }

    #[test]
    fn test_duplicate_and_unknown_completions_ignored() {
        let mut tracker = OffsetTracker::new();
        tracker.record_delivered(0, 0);
        tracker.record_completed(0, 0);
        tracker.record_completed(0, 0);
        tracker.record_completed(0, 99);
        tracker.record_completed(3, 0);

        assert_eq!(tracker.pending(), 1);
        assert_eq!(marks(&mut tracker), vec![(0, 1)]);
    }

    #[test]
    fn test_duplicate_delivery_ignored() {
        let mut tracker = OffsetTracker::new();
        tracker.record_delivered(0, 4);
        tracker.record_delivered(0, 4);
        tracker.record_completed(0, 4);
        assert_eq!(marks(&mut tracker), vec![(0, 5)]);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_partitions_tracked_independently() {
        let mut tracker = OffsetTracker::new();
        tracker.record_delivered(0, 0);
        tracker.record_delivered(0, 1);
        tracker.record_delivered(1, 10);

        tracker.record_completed(1, 10);
        tracker.record_completed(0, 1);

        // Partition 1 commits; partition 0 is blocked on offset 0
        assert_eq!(marks(&mut tracker), vec![(1, 11)]);

        tracker.record_completed(0, 0);
        assert_eq!(marks(&mut tracker), vec![(0, 2)]);
    }

    #[test]
    fn test_committable_only_reports_advancement_once() {
        let mut tracker = OffsetTracker::new();
        tracker.record_delivered(0, 0);
        tracker.record_completed(0, 0);

        assert_eq!(marks(&mut tracker), vec![(0, 1)]);
        assert_eq!(marks(&mut tracker), vec![]);
    }

    #[test]
    fn test_in_flight_counts_outstanding() {
        let mut tracker = OffsetTracker::new();
        tracker.record_delivered(0, 0);
        tracker.record_delivered(0, 1);
        tracker.record_delivered(1, 0);
        assert_eq!(tracker.in_flight(), 3);

        tracker.record_completed(0, 1);
        assert_eq!(tracker.in_flight(), 2);
    }
}

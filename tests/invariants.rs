//! Property tests for the pipeline's quantified invariants, run over
//! small finite queue capacities and operation sequences rather than
//! hand-picked example cases.

use logxpy::queue::{BackpressurePolicy, BoundedQueue, EnqueueOutcome, QueueItem};
use proptest::prelude::*;

fn rec(tag: u32) -> QueueItem {
    QueueItem::Record(bytes::Bytes::from(tag.to_le_bytes().to_vec()))
}

proptest! {
    /// Invariant: `enqueued == written + dropped + pending` at every
    /// point in time, for any capacity and any run of `DropOldest`
    /// enqueues with no consumer draining concurrently (so "written"
    /// is zero and everything left in the queue is "pending").
    #[test]
    fn drop_oldest_preserves_enqueued_write_drop_pending(
        capacity in 1usize..16,
        n_items in 0u32..64,
    ) {
        let q = BoundedQueue::new(capacity, BackpressurePolicy::DropOldest);
        let mut dropped = 0u32;
        for i in 0..n_items {
            if q.enqueue(rec(i)) == EnqueueOutcome::EnqueuedAfterEvicting {
                dropped += 1;
            }
        }
        let pending = q.len() as u32;
        prop_assert_eq!(n_items, dropped + pending);
        prop_assert!(pending <= capacity as u32);
    }

    /// Invariant: under `DropNewest`/`Warn`, the queue never exceeds its
    /// configured capacity and every rejected enqueue leaves the queue
    /// contents untouched (length never decreases on a `Rejected`
    /// outcome).
    #[test]
    fn reject_policies_never_exceed_capacity(
        capacity in 1usize..16,
        n_items in 0u32..64,
        use_warn in any::<bool>(),
    ) {
        let policy = if use_warn { BackpressurePolicy::Warn } else { BackpressurePolicy::DropNewest };
        let q = BoundedQueue::new(capacity, policy);
        for i in 0..n_items {
            let before = q.len();
            let outcome = q.enqueue(rec(i));
            let after = q.len();
            prop_assert!(after <= capacity);
            if outcome == EnqueueOutcome::Rejected {
                prop_assert_eq!(before, after);
            } else {
                prop_assert_eq!(after, before + 1);
            }
        }
    }

    /// Invariant: `DropOldest` always keeps the most-recently-enqueued
    /// `capacity` items, in arrival order, regardless of how many total
    /// items were pushed.
    #[test]
    fn drop_oldest_keeps_newest_tail(
        capacity in 1usize..16,
        n_items in 0u32..64,
    ) {
        let q = BoundedQueue::new(capacity, BackpressurePolicy::DropOldest);
        for i in 0..n_items {
            q.enqueue(rec(i));
        }
        let mut survivors = Vec::new();
        while let Some(QueueItem::Record(b)) = q.try_pop() {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&b[..4]);
            survivors.push(u32::from_le_bytes(buf));
        }
        let expected_len = n_items.min(capacity as u32);
        let expected: Vec<u32> = ((n_items.saturating_sub(expected_len))..n_items).collect();
        prop_assert_eq!(survivors, expected);
    }
}

proptest! {
    /// Invariant: a root action's task_level is always `[1]`,
    /// and every nested child appends exactly one more step than its
    /// parent, regardless of how many siblings preceded it.
    #[test]
    fn nested_action_levels_always_extend_parent_by_one(depth in 1usize..6) {
        use logxpy::record::ActionStatus;

        let mut scopes = Vec::new();
        let mut expected_level = Vec::new();
        for _ in 0..depth {
            let scope = logxpy::context::start_action("nested");
            expected_level.push(1u32);
            prop_assert_eq!(scope.task_level().to_vec(), expected_level.clone());
            scopes.push(scope);
        }
        while let Some(scope) = scopes.pop() {
            let _ = scope.finish(ActionStatus::Succeeded);
        }
    }
}

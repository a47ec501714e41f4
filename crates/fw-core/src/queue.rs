use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::types::TaskId;

// ---------------------------------------------------------------------------
// TaskQueue trait
// ---------------------------------------------------------------------------

/// Per-agent container of pending task ids.
///
/// Priorities follow the submission contract: a LOWER number is MORE urgent.
pub trait TaskQueue: Send + Sync {
    /// Implementation name as registered in the component registry.
    fn kind(&self) -> &str;

    fn enqueue(&mut self, item: TaskId, priority: i64);

    fn dequeue(&mut self) -> Option<TaskId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// PriorityQueue
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
struct Entry {
    /// Negated caller priority, so the max-heap pops the smallest number.
    key: i64,
    /// Insertion order; earlier entries win ties.
    seq: Reverse<u64>,
    item: TaskId,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Heap-backed queue: most urgent (lowest priority number) first, FIFO
/// among equal priorities.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskQueue for PriorityQueue {
    fn kind(&self) -> &str {
        "priority"
    }

    fn enqueue(&mut self, item: TaskId, priority: i64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            key: priority.saturating_neg(),
            seq: Reverse(seq),
            item,
        });
    }

    fn dequeue(&mut self) -> Option<TaskId> {
        self.heap.pop().map(|e| e.item)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn drain(q: &mut PriorityQueue) -> Vec<TaskId> {
        std::iter::from_fn(|| q.dequeue()).collect()
    }

    #[test]
    fn lower_number_dequeues_first() {
        let mut q = PriorityQueue::new();
        let ids: Vec<TaskId> = (0..3).map(|_| Uuid::new_v4()).collect();
        q.enqueue(ids[0], 5);
        q.enqueue(ids[1], 1);
        q.enqueue(ids[2], 3);
        assert_eq!(drain(&mut q), vec![ids[1], ids[2], ids[0]]);
    }

    #[test]
    fn equal_priorities_are_fifo() {
        let mut q = PriorityQueue::new();
        let ids: Vec<TaskId> = (0..4).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            q.enqueue(*id, 0);
        }
        assert_eq!(drain(&mut q), ids);
    }

    #[test]
    fn negative_and_extreme_priorities() {
        let mut q = PriorityQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        q.enqueue(a, i64::MAX);
        q.enqueue(b, i64::MIN);
        q.enqueue(c, -1);
        assert_eq!(q.len(), 3);
        assert_eq!(drain(&mut q), vec![b, c, a]);
        assert!(q.is_empty());
    }
}

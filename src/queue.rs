//! Bounded queues with non-blocking insert/remove.
//!
//! A full queue and an empty queue are normal conditions: `insert` reports
//! `false` and `remove` reports `None`, neither ever blocks. The buffer and its
//! size sit behind one mutex so two racing callers can never both take the
//! last free slot or the last item.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
/// Which end of the buffer `remove` takes from
pub enum QueueOrder {
    /// First in, first out
    #[default]
    Fifo,
    /// Last in, first out (a stack)
    Lifo,
}

/// A fixed-capacity queue shared by reference between threads
/// # Example
/// ```
/// use node_harness::{BoundedQueue, QueueOrder};
/// let stack = BoundedQueue::with_order(3, QueueOrder::Lifo);
/// stack.insert('a');
/// stack.insert('b');
/// assert_eq!(stack.remove(), Some('b'));
/// ```
#[derive(Debug)]
pub struct BoundedQueue<T> {
    capacity: usize,
    order: QueueOrder,
    items: Mutex<VecDeque<T>>,
}

impl<T> BoundedQueue<T> {
    /// Create a FIFO queue holding at most `capacity` items
    /// # Panics
    /// * If `capacity` is zero
    pub fn new(capacity: usize) -> Self {
        Self::with_order(capacity, QueueOrder::Fifo)
    }

    /// Create a queue with an explicit removal order
    /// # Panics
    /// * If `capacity` is zero
    pub fn with_order(capacity: usize, order: QueueOrder) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            capacity,
            order,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Add `item` at the tail
    /// # Returns
    /// * `true` if there was room, `false` (and nothing changes) if the queue was full
    pub fn insert(&self, item: T) -> bool {
        let mut items = self.items();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(item);
        true
    }

    /// Take the next item according to the queue order
    /// # Returns
    /// * `Some(item)`, or `None` (and nothing changes) if the queue was empty
    pub fn remove(&self) -> Option<T> {
        let mut items = self.items();
        match self.order {
            QueueOrder::Fifo => items.pop_front(),
            QueueOrder::Lifo => items.pop_back(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.items().len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn size(&self) -> usize {
        self.items().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn order(&self) -> QueueOrder {
        self.order
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned lock is still safe to use.
    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Insert values into `queue` until it reports full
///
/// The value only advances after a successful insert, so a failed attempt
/// (another thread took the last slot) never loses or duplicates a value.
/// # Arguments
/// * `queue` - The queue to fill
/// * `seed` - The first value to insert
/// * `advance` - Produces the next value from the one just inserted
/// # Returns
/// * The number of values this caller inserted
/// # Example
/// ```
/// use node_harness::{fill_until_full, BoundedQueue};
/// let queue = BoundedQueue::new(3);
/// let inserted = fill_until_full(&queue, 0, |n| n + 1);
/// assert_eq!(inserted, 3);
/// assert!(queue.is_full());
/// ```
pub fn fill_until_full<T, F>(queue: &BoundedQueue<T>, seed: T, mut advance: F) -> usize
where
    T: Clone,
    F: FnMut(&T) -> T,
{
    let mut current = seed;
    let mut inserted = 0;
    while !queue.is_full() {
        if queue.insert(current.clone()) {
            current = advance(&current);
            inserted += 1;
        } else {
            std::thread::yield_now();
        }
    }
    inserted
}

/// Remove values from `queue` until it reports empty
/// # Returns
/// * Every value this caller removed, in removal order
/// # Example
/// ```
/// use node_harness::{drain_until_empty, BoundedQueue};
/// let queue = BoundedQueue::new(3);
/// queue.insert("a");
/// queue.insert("b");
/// assert_eq!(drain_until_empty(&queue), vec!["a", "b"]);
/// ```
pub fn drain_until_empty<T>(queue: &BoundedQueue<T>) -> Vec<T> {
    let mut drained = Vec::with_capacity(queue.size());
    while !queue.is_empty() {
        match queue.remove() {
            Some(item) => drained.push(item),
            None => std::thread::yield_now(),
        }
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_insert_fails_when_full_without_mutation() {
        let queue = BoundedQueue::new(10);
        for i in 0..10 {
            assert!(queue.insert(i));
        }
        assert!(queue.is_full());
        assert!(!queue.insert(99));
        assert_eq!(queue.size(), 10);
        assert_eq!(drain_until_empty(&queue), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_remove_on_empty_returns_none() {
        let queue: BoundedQueue<String> = BoundedQueue::new(1);
        assert!(queue.is_empty());
        assert_eq!(queue.remove(), None);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_fifo_order_is_preserved_across_interleaving() {
        let queue = BoundedQueue::new(3);
        assert!(queue.insert(1));
        assert!(queue.insert(2));
        assert_eq!(queue.remove(), Some(1));
        assert!(queue.insert(3));
        assert!(queue.insert(4));
        assert!(!queue.insert(5));
        assert_eq!(drain_until_empty(&queue), vec![2, 3, 4]);
    }

    #[test]
    fn test_lifo_removes_newest_first() {
        let queue = BoundedQueue::with_order(3, QueueOrder::Lifo);
        fill_until_full(&queue, 0, |n| n + 1);
        assert_eq!(drain_until_empty(&queue), vec![2, 1, 0]);
    }

    #[test]
    fn test_observers_are_idempotent() {
        let queue = BoundedQueue::new(4);
        queue.insert('x');
        for _ in 0..5 {
            assert_eq!(queue.size(), 1);
            assert!(!queue.is_full());
            assert!(!queue.is_empty());
        }
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_is_rejected() {
        let _ = BoundedQueue::<u8>::new(0);
    }

    #[test]
    fn test_fill_with_booleans_alternates() {
        let queue = BoundedQueue::new(10);
        fill_until_full(&queue, false, |b| !b);
        let mut drained = drain_until_empty(&queue);
        assert_eq!(drained[..4], [false, true, false, true]);
        drained.sort();
        assert_eq!(drained, [vec![false; 5], vec![true; 5]].concat());
    }

    #[test]
    fn test_fill_with_strings_appends() {
        let queue = BoundedQueue::new(4);
        fill_until_full(&queue, String::new(), |s| format!("{s}A"));
        assert_eq!(drain_until_empty(&queue), vec!["", "A", "AA", "AAA"]);
    }

    #[test]
    fn test_racing_producers_never_overfill() {
        let queue = BoundedQueue::new(64);
        let inserted: usize = (0..8)
            .into_par_iter()
            .map(|worker| fill_until_full(&queue, worker * 1000, |n| n + 1))
            .sum();
        assert_eq!(inserted, 64);
        assert_eq!(queue.size(), 64);
    }

    #[test]
    fn test_racing_consumers_take_each_item_once() {
        let queue = BoundedQueue::new(500);
        fill_until_full(&queue, 0usize, |n| n + 1);
        let taken = AtomicUsize::new(0);
        let mut all: Vec<usize> = (0..6)
            .into_par_iter()
            .flat_map(|_| {
                let mine = drain_until_empty(&queue);
                taken.fetch_add(mine.len(), Ordering::SeqCst);
                mine
            })
            .collect();
        all.sort_unstable();
        assert_eq!(taken.load(Ordering::SeqCst), 500);
        assert_eq!(all, (0..500).collect::<Vec<_>>());
    }
}

//! Fixed-capacity sliding buffer with FIFO eviction.

use std::collections::VecDeque;

/// A bounded sequence that drops its oldest element once full.
///
/// `len() <= capacity()` holds after every operation.
#[derive(Debug, Clone)]
pub struct SlidingBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> SlidingBuffer<T> {
    /// Create an empty buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a value, evicting the oldest one if the buffer is full.
    pub fn push(&mut self, value: T) {
        self.items.push_back(value);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Most recently pushed value.
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Number of retained values matching `predicate`.
    pub fn count_where(&self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        self.items.iter().filter(|item| predicate(item)).count()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> SlidingBuffer<T> {
    /// Copy of the retained values, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

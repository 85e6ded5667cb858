//! Fixed-capacity, insertion-ordered record storage

use std::collections::VecDeque;

/// Bounded history: pushing beyond capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Newest `n` entries, oldest first (insertion order preserved)
    pub fn recent(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut history = BoundedHistory::new(3);
        for i in 1..=5 {
            history.push(i);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.recent(10), vec![3, 4, 5]);
    }

    #[test]
    fn recent_clamps_to_length() {
        let mut history = BoundedHistory::new(10);
        history.push("a");
        history.push("b");
        assert_eq!(history.recent(5), vec!["a", "b"]);
        assert_eq!(history.recent(1), vec!["b"]);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut history: BoundedHistory<u8> = BoundedHistory::new(0);
        history.push(1);
        assert!(history.is_empty());
    }
}

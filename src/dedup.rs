//! Bounded window of recently seen ids.

use std::collections::{HashSet, VecDeque};

/// Remembers the last `capacity` ids; older ids are forgotten in FIFO order.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `id`. Returns `false` if it was already in the window.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_repeats() {
        let mut window = DedupWindow::new(4);
        assert!(window.insert("a"));
        assert!(!window.insert("a"));
        assert!(window.contains("a"));
    }

    #[test]
    fn forgets_oldest_past_capacity() {
        let mut window = DedupWindow::new(2);
        window.insert("a");
        window.insert("b");
        window.insert("c");
        assert_eq!(window.len(), 2);
        assert!(!window.contains("a"));
        assert!(window.insert("a"));
    }
}

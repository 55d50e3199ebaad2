//! Fixed-capacity sliding window.
//!
//! Storage is allocated once at construction and never grows. Pushing into a
//! full window overwrites the oldest slot.

/// Circular buffer holding the most recent `capacity` values.
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    slots: Box<[Option<T>]>,
    /// Index of the oldest item.
    head: usize,
    len: usize,
}

impl<T> SlidingWindow<T> {
    /// Create an empty window. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Append an item, evicting the oldest one when full.
    pub fn push(&mut self, item: T) {
        let cap = self.slots.len();
        let tail = (self.head + self.len) % cap;
        self.slots[tail] = Some(item);
        if self.len == cap {
            self.head = (self.head + 1) % cap;
        } else {
            self.len += 1;
        }
    }

    /// Oldest item, without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.get(0)
    }

    /// Most recent item.
    pub fn latest(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Item at position `index`, counting from the oldest.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.slots[(self.head + index) % self.slots.len()].as_ref()
    }

    /// Item `age` steps back from the most recent (0 = newest).
    pub fn recent(&self, age: usize) -> Option<&T> {
        if age >= self.len {
            return None;
        }
        self.get(self.len - 1 - age)
    }

    /// Number of filled slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Empty the window, keeping its allocation.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    /// Items from newest to oldest.
    pub fn iter_recent(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |age| self.recent(age))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_peek() {
        let mut window = SlidingWindow::new(3);
        assert!(window.is_empty());
        assert_eq!(window.peek(), None);

        window.push(1);
        window.push(2);
        assert_eq!(window.peek(), Some(&1));
        assert_eq!(window.latest(), Some(&2));
        assert_eq!(window.len(), 2);
        assert!(!window.is_full());
    }

    #[test]
    fn test_overwrites_oldest_when_full() {
        let mut window = SlidingWindow::new(3);
        for v in 1..=5 {
            window.push(v);
        }
        assert!(window.is_full());
        assert_eq!(window.len(), 3);
        assert_eq!(window.capacity(), 3);
        assert_eq!(window.get(0), Some(&3));
        assert_eq!(window.get(1), Some(&4));
        assert_eq!(window.get(2), Some(&5));
        assert_eq!(window.get(3), None);
    }

    #[test]
    fn test_recent_order() {
        let mut window = SlidingWindow::new(4);
        for v in [10, 20, 30, 40, 50] {
            window.push(v);
        }
        let recent: Vec<i32> = window.iter_recent().copied().collect();
        assert_eq!(recent, vec![50, 40, 30, 20]);
        assert_eq!(window.recent(0), Some(&50));
        assert_eq!(window.recent(4), None);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut window = SlidingWindow::new(2);
        window.push("a");
        window.push("b");
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.capacity(), 2);
        window.push("c");
        assert_eq!(window.peek(), Some(&"c"));
    }

    #[test]
    fn test_zero_capacity_is_one() {
        let mut window = SlidingWindow::new(0);
        window.push(7);
        window.push(8);
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.latest(), Some(&8));
    }
}

/// Fixed-capacity history where slot 0 is always the most recent entry.
///
/// Pushing moves the head back one slot and overwrites the oldest entry, so
/// `get(k)` is `slots[(head + k) % capacity]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ring<T> {
    slots: Vec<T>,
    head: usize,
}

impl<T: Clone> Ring<T> {
    /// Capacity is clamped to at least 1.
    pub fn new(capacity: usize, fill: T) -> Self {
        Self {
            slots: vec![fill; capacity.max(1)],
            head: 0,
        }
    }
}

impl<T> Ring<T> {
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Make room for a new most-recent entry and return it for overwriting in place.
    pub fn advance(&mut self) -> &mut T {
        let cap = self.slots.len();
        self.head = (self.head + cap - 1) % cap;
        &mut self.slots[self.head]
    }

    pub fn push(&mut self, v: T) {
        *self.advance() = v;
    }

    /// Entry `k` pushes ago; `k` wraps at capacity.
    pub fn get(&self, k: usize) -> &T {
        &self.slots[(self.head + k) % self.slots.len()]
    }
}

//! Admission control for operations that fan out parallel requests.

#[derive(Debug, Clone)]
/// Counts in-flight requests of one operation and caps them at `max`.
///
/// Operations acquire a slot per request they send, release it once the request
/// resolved, and consider themselves finished once the stack [drained](Self::is_drained)
/// and there is nothing left to send.
pub struct MaxStack {
    max: usize,
    count: usize,
}

impl MaxStack {
    pub fn new(max: usize) -> Self {
        Self { max, count: 0 }
    }

    // === Getters ===

    pub fn max(&self) -> usize {
        self.max
    }

    /// Number of slots currently taken.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn has_free(&self) -> bool {
        self.count < self.max
    }

    pub fn is_drained(&self) -> bool {
        self.count == 0
    }

    // === Public Methods ===

    /// Takes a slot, returns `false` if none is free.
    pub fn acquire(&mut self) -> bool {
        if self.has_free() {
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// Gives back up to `count` slots and returns how many are still taken.
    pub fn release(&mut self, count: usize) -> usize {
        self.count = self.count.saturating_sub(count);
        self.count
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn caps_at_max() {
        let mut stack = MaxStack::new(2);

        assert!(stack.acquire());
        assert!(stack.acquire());
        assert!(!stack.acquire());
        assert_eq!(stack.count(), 2);
        assert!(!stack.has_free());
    }

    #[test]
    fn release_frees_slots() {
        let mut stack = MaxStack::new(1);

        assert!(stack.acquire());
        assert!(!stack.acquire());

        assert_eq!(stack.release(1), 0);
        assert!(stack.has_free());
        assert!(stack.is_drained());
    }

    #[test]
    fn release_saturates() {
        let mut stack = MaxStack::new(4);
        stack.acquire();

        assert_eq!(stack.release(3), 0);
        assert!(stack.is_drained());
    }
}

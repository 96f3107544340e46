use std::num::NonZeroUsize;

use lru::LruCache;

use crate::common::MessageId;

#[derive(Debug)]
/// Message ids of the most recent responses, to reject replays.
pub(crate) struct ResponseHistory {
    seen: LruCache<MessageId, ()>,
}

impl ResponseHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Returns `false` if this message id was seen before.
    pub fn check(&mut self, message_id: &MessageId) -> bool {
        if self.seen.contains(message_id) {
            return false;
        }

        self.seen.put(*message_id, ());
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_replays_within_capacity() {
        let mut history = ResponseHistory::new(2);
        let a = MessageId::random();
        let b = MessageId::random();
        let c = MessageId::random();

        assert!(history.check(&a));
        assert!(!history.check(&a));

        assert!(history.check(&b));
        assert!(history.check(&c));

        // `a` was evicted.
        assert!(history.check(&a));
    }
}

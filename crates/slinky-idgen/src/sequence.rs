use slinky_core::{IdPoll, IdSource};
use std::sync::atomic::{AtomicI64, Ordering};

/// An in-process counter handing out consecutive ids.
///
/// Unique within one instance only; suited to tests and single-node tooling.
#[derive(Debug)]
pub struct SequenceIdSource {
    next: AtomicI64,
    /// Exclusive upper bound; the source reports closed once it is reached.
    end: i64,
}

impl SequenceIdSource {
    /// Starts at `first`; `first` must be positive.
    pub fn starting_at(first: i64) -> Self {
        Self::bounded(first, i64::MAX)
    }

    /// Hands out `first..end`, then reports [`IdPoll::Closed`].
    pub fn bounded(first: i64, end: i64) -> Self {
        Self {
            next: AtomicI64::new(first.max(1)),
            end,
        }
    }
}

impl Default for SequenceIdSource {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdSource for SequenceIdSource {
    fn try_next(&self) -> IdPoll {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        if id >= self.end || id < 1 {
            IdPoll::Closed
        } else {
            IdPoll::Ready(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_consecutive_ids() {
        let source = SequenceIdSource::starting_at(10);
        assert_eq!(source.try_next(), IdPoll::Ready(10));
        assert_eq!(source.try_next(), IdPoll::Ready(11));
    }

    #[test]
    fn bounded_source_closes() {
        let source = SequenceIdSource::bounded(1, 3);
        assert_eq!(source.try_next(), IdPoll::Ready(1));
        assert_eq!(source.try_next(), IdPoll::Ready(2));
        assert_eq!(source.try_next(), IdPoll::Closed);
        assert_eq!(source.try_next(), IdPoll::Closed);
    }

    #[test]
    fn never_hands_out_zero() {
        let source = SequenceIdSource::starting_at(0);
        assert_eq!(source.try_next(), IdPoll::Ready(1));
    }
}

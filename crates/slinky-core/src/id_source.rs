/// Outcome of a single non-blocking poll of an [`IdSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPoll {
    /// A globally unique id, delivered at most once.
    Ready(i64),
    /// Nothing buffered right now; the producer may still deliver later.
    Empty,
    /// The producer has shut down and nothing remains buffered.
    Closed,
}

/// A shared stream of globally unique ids.
///
/// Implementations synchronize internally; callers poll concurrently without
/// any locking of their own and rely on each value being delivered at most once.
pub trait IdSource: Send + Sync + 'static {
    fn try_next(&self) -> IdPoll;
}

impl<T: IdSource + ?Sized> IdSource for std::sync::Arc<T> {
    fn try_next(&self) -> IdPoll {
        (**self).try_next()
    }
}

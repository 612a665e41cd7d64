use crate::{error::Error, Tinyflake, TinyflakeSettings};
use parking_lot::Mutex;
use slinky_core::{Clock, IdPoll, IdSource};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// The consuming end of a single-producer id stream.
///
/// Every consumer shares the same receiver, so each id is delivered to
/// exactly one caller.
#[derive(Debug)]
pub struct ChannelIdSource {
    rx: Mutex<mpsc::Receiver<i64>>,
}

impl ChannelIdSource {
    pub fn new(rx: mpsc::Receiver<i64>) -> Self {
        Self { rx: Mutex::new(rx) }
    }

    /// A source fed by hand through the returned sender.
    pub fn channel(capacity: usize) -> (mpsc::Sender<i64>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

impl IdSource for ChannelIdSource {
    fn try_next(&self) -> IdPoll {
        match self.rx.lock().try_recv() {
            Ok(id) => IdPoll::Ready(id),
            Err(TryRecvError::Empty) => IdPoll::Empty,
            Err(TryRecvError::Disconnected) => IdPoll::Closed,
        }
    }
}

/// Starts a system-clock tinyflake producer and returns its consuming end.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_tinyflake_stream(
    settings: TinyflakeSettings,
    capacity: usize,
) -> Result<(ChannelIdSource, JoinHandle<()>), Error> {
    let generator = Tinyflake::new(settings)?;
    Ok(spawn_id_stream(generator, capacity))
}

/// Runs `generator` on a blocking thread, pushing ids into a bounded channel.
///
/// The producer stops once every consumer is gone or the generator fails;
/// consumers then observe [`IdPoll::Closed`] after draining the buffer.
/// An id of zero is never emitted.
pub fn spawn_id_stream<C: Clock>(
    generator: Tinyflake<C>,
    capacity: usize,
) -> (ChannelIdSource, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::task::spawn_blocking(move || loop {
        let id = match generator.next_id() {
            Ok(id) => id.as_i64(),
            Err(e) => {
                error!(error = %e, "Id generator failed, closing id stream");
                return;
            }
        };
        if id == 0 {
            continue;
        }
        if tx.blocking_send(id).is_err() {
            debug!("Id stream consumer dropped, stopping producer");
            return;
        }
    });

    (ChannelIdSource::new(rx), handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;
    use slinky_core::ManualClock;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn polls_report_ready_empty_and_closed() {
        let (tx, source) = ChannelIdSource::channel(4);
        assert_eq!(source.try_next(), IdPoll::Empty);

        tx.try_send(7).unwrap();
        assert_eq!(source.try_next(), IdPoll::Ready(7));
        assert_eq!(source.try_next(), IdPoll::Empty);

        tx.try_send(8).unwrap();
        drop(tx);
        // buffered values drain before the close is reported
        assert_eq!(source.try_next(), IdPoll::Ready(8));
        assert_eq!(source.try_next(), IdPoll::Closed);
    }

    #[test]
    fn concurrent_consumers_never_share_an_id() {
        let (tx, source) = ChannelIdSource::channel(1024);
        for id in 1..=1000 {
            tx.try_send(id).unwrap();
        }
        drop(tx);

        let source = Arc::new(source);
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let source = Arc::clone(&source);
                std::thread::spawn(move || {
                    let mut seen = vec![];
                    while let IdPoll::Ready(id) = source.try_next() {
                        seen.push(id);
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for worker in workers {
            for id in worker.join().unwrap() {
                assert!(all.insert(id), "id {id} delivered twice");
            }
        }
        assert_eq!(all.len(), 1000);
    }

    #[tokio::test]
    async fn tinyflake_stream_skips_zero_and_stays_unique() {
        let epoch = Timestamp::from_second(1_000).unwrap();
        let settings = TinyflakeSettings::builder()
            .node_id(0)
            .start_epoch(epoch)
            .build();
        // clock sits on the epoch, so the very first id would be zero
        let generator = Tinyflake::with_clock(settings, ManualClock::new(epoch)).unwrap();
        let (source, _producer) = spawn_id_stream(generator, 16);

        let mut seen = HashSet::new();
        while seen.len() < 300 {
            match source.try_next() {
                IdPoll::Ready(id) => {
                    assert_ne!(id, 0);
                    assert!(seen.insert(id));
                }
                IdPoll::Empty => tokio::task::yield_now().await,
                IdPoll::Closed => panic!("stream closed early"),
            }
        }
    }

    #[tokio::test]
    async fn producer_stops_when_source_is_dropped() {
        let settings = TinyflakeSettings::builder()
            .node_id(2)
            .start_epoch(Timestamp::from_second(0).unwrap())
            .build();
        let generator =
            Tinyflake::with_clock(settings, ManualClock::new(Timestamp::from_second(5).unwrap()))
                .unwrap();
        let (source, producer) = spawn_id_stream(generator, 4);

        drop(source);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn failing_generator_closes_the_stream() {
        let settings = TinyflakeSettings::builder()
            .node_id(0)
            .start_epoch(Timestamp::from_second(0).unwrap())
            .build();
        let past_limit = Timestamp::from_second(1 << 31).unwrap();
        let generator = Tinyflake::with_clock(settings, ManualClock::new(past_limit)).unwrap();
        let (source, producer) = spawn_id_stream(generator, 4);

        producer.await.unwrap();
        assert_eq!(source.try_next(), IdPoll::Closed);
    }
}

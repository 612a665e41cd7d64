use crate::{error::Error, TinyId};
use jiff::Timestamp;
use parking_lot::Mutex;
use slinky_core::{Clock, SystemClock};
use typed_builder::TypedBuilder;

const MAX_ELAPSED_SECONDS: u32 = (1 << 30) - 1;
const MAX_NODE_ID: u8 = 0b11;

/// Node identity and epoch for a [`Tinyflake`].
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct TinyflakeSettings {
    /// `0..=3`; two generators sharing a node id may collide.
    pub node_id: u8,
    /// Zero point of the timestamp field. Whole seconds only.
    pub start_epoch: Timestamp,
}

/// The last `(second, sequence)` pair handed out.
#[derive(Debug, Default)]
struct Slot {
    second: Option<i64>,
    sequence: u8,
}

/// A 40-bit id generator: 256 ids per second per node.
///
/// A second whose sequence is used up, or a clock that stepped backwards,
/// makes [`next_id`](Tinyflake::next_id) block on the clock until a fresh
/// slot exists.
pub struct Tinyflake<C: Clock = SystemClock> {
    epoch: i64,
    node_id: u8,
    clock: C,
    slot: Mutex<Slot>,
}

impl<C: Clock> std::fmt::Debug for Tinyflake<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tinyflake")
            .field("epoch", &self.epoch)
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl Tinyflake<SystemClock> {
    pub fn new(settings: TinyflakeSettings) -> Result<Self, Error> {
        Self::with_clock(settings, SystemClock)
    }
}

impl<C: Clock> Tinyflake<C> {
    pub fn with_clock(settings: TinyflakeSettings, clock: C) -> Result<Self, Error> {
        if settings.node_id > MAX_NODE_ID {
            return Err(Error::InvalidNodeId {
                node_id: settings.node_id,
                max_node_id: MAX_NODE_ID,
            });
        }
        let now = clock.now();
        if settings.start_epoch > now {
            return Err(Error::EpochAhead {
                epoch: settings.start_epoch,
                now,
            });
        }

        Ok(Self {
            epoch: settings.start_epoch.as_second(),
            node_id: settings.node_id,
            clock,
            slot: Mutex::new(Slot::default()),
        })
    }

    pub fn next_id(&self) -> Result<TinyId, Error> {
        let mut slot = self.slot.lock();
        let second = self.advance(&mut slot)?;

        let elapsed = u32::try_from(second - self.epoch)
            .ok()
            .filter(|elapsed| *elapsed <= MAX_ELAPSED_SECONDS)
            .ok_or(Error::OverTimeLimit)?;

        Ok(TinyId::new()
            .with_timestamp(elapsed)
            .with_sequence(slot.sequence)
            .with_node_id(self.node_id))
    }

    /// Moves `slot` to the next unused pair and returns its second.
    fn advance(&self, slot: &mut Slot) -> Result<i64, Error> {
        let now = self.clock.now().as_second();
        let Some(last) = slot.second else {
            *slot = Slot {
                second: Some(now),
                sequence: 0,
            };
            return Ok(now);
        };

        let second = if now > last {
            slot.sequence = 0;
            now
        } else if now < last {
            // pairs up to `last` may already be out
            let now = self.wait_for(last)?;
            if now > last {
                slot.sequence = 0;
                now
            } else {
                self.bump(slot, last)?
            }
        } else {
            self.bump(slot, last)?
        };

        slot.second = Some(second);
        Ok(second)
    }

    /// Next sequence within `last`, or sequence 0 of the following second.
    fn bump(&self, slot: &mut Slot, last: i64) -> Result<i64, Error> {
        match slot.sequence.checked_add(1) {
            Some(sequence) => {
                slot.sequence = sequence;
                Ok(last)
            }
            None => {
                slot.sequence = 0;
                self.wait_for(last + 1)
            }
        }
    }

    fn wait_for(&self, second: i64) -> Result<i64, Error> {
        let target = Timestamp::from_second(second).map_err(|_| Error::OverTimeLimit)?;
        self.clock.wait_until(target);
        Ok(self.clock.now().as_second().max(second))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slinky_core::ManualClock;
    use std::collections::HashSet;

    fn at(second: i64) -> Timestamp {
        Timestamp::from_second(second).unwrap()
    }

    fn flake(node_id: u8, now: i64) -> (Tinyflake<ManualClock>, ManualClock) {
        let settings = TinyflakeSettings::builder()
            .node_id(node_id)
            .start_epoch(at(0))
            .build();
        let clock = ManualClock::new(at(now));
        (Tinyflake::with_clock(settings, clock.clone()).unwrap(), clock)
    }

    #[test]
    fn ids_within_a_second_count_up() {
        let (gen, _) = flake(1, 500);
        let sequences: Vec<_> = (0..4).map(|_| gen.next_id().unwrap().sequence()).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
    }

    #[test]
    fn new_second_resets_sequence() {
        let (gen, clock) = flake(0, 500);
        gen.next_id().unwrap();
        gen.next_id().unwrap();
        clock.set(at(502));
        let id = gen.next_id().unwrap();
        assert_eq!((id.timestamp(), id.sequence()), (502, 0));
    }

    #[test]
    fn exhausted_second_rolls_over() {
        let (gen, _) = flake(0, 500);
        let ids: HashSet<_> = (0..600).map(|_| gen.next_id().unwrap().as_i64()).collect();
        assert_eq!(ids.len(), 600);

        let id = gen.next_id().unwrap();
        assert_eq!(id.timestamp(), 502);
    }

    #[test]
    fn clock_step_back_never_reuses_a_pair() {
        let (gen, clock) = flake(2, 900);
        let before = gen.next_id().unwrap();
        clock.set(at(850));
        let after = gen.next_id().unwrap();

        assert_eq!(after.timestamp(), 900);
        assert_eq!(after.node_id(), 2);
        assert!(after.as_i64() > before.as_i64());
    }

    #[test]
    fn rejects_bad_settings() {
        let settings = TinyflakeSettings::builder()
            .node_id(4)
            .start_epoch(at(0))
            .build();
        assert!(matches!(
            Tinyflake::with_clock(settings, ManualClock::new(at(1))).unwrap_err(),
            Error::InvalidNodeId { node_id: 4, .. }
        ));

        let settings = TinyflakeSettings::builder()
            .node_id(0)
            .start_epoch(at(60))
            .build();
        assert!(matches!(
            Tinyflake::with_clock(settings, ManualClock::new(at(1))).unwrap_err(),
            Error::EpochAhead { .. }
        ));
    }

    #[test]
    fn elapsed_beyond_thirty_bits_fails() {
        let (gen, _) = flake(0, i64::from(MAX_ELAPSED_SECONDS) + 1);
        assert_eq!(gen.next_id(), Err(Error::OverTimeLimit));
    }
}

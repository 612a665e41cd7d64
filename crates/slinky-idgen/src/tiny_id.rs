use modular_bitfield::prelude::*;
use std::fmt;

/// A 40-bit id: seconds since a custom epoch, a per-second sequence and a node.
#[bitfield]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TinyId {
    /// 30 bits for timestamp (seconds since a custom epoch).
    pub timestamp: B30,
    /// 8 bits for sequence number (resets every second).
    pub sequence: B8,
    /// 2 bits for node ID (allows up to 4 nodes).
    pub node_id: B2,
}

impl TinyId {
    /// Packs the fields as `timestamp | sequence | node` from high to low
    /// bits, so ids from one node grow with time.
    pub fn as_i64(&self) -> i64 {
        (i64::from(self.timestamp()) << 10)
            | (i64::from(self.sequence()) << 2)
            | i64::from(self.node_id())
    }

    /// The 40-bit value in big-endian byte order.
    pub fn to_be_bytes(&self) -> [u8; 5] {
        let raw = (self.as_i64() as u64).to_be_bytes();
        [raw[3], raw[4], raw[5], raw[6], raw[7]]
    }
}

impl fmt::Debug for TinyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TinyId")
            .field("timestamp", &self.timestamp())
            .field("sequence", &self.sequence())
            .field("node_id", &self.node_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_fields_high_to_low() {
        let id = TinyId::new()
            .with_timestamp(1)
            .with_sequence(2)
            .with_node_id(3);
        assert_eq!(id.as_i64(), (1 << 10) | (2 << 2) | 3);
    }

    #[test]
    fn max_fields_fit_in_40_bits() {
        let id = TinyId::new()
            .with_timestamp((1 << 30) - 1)
            .with_sequence(u8::MAX)
            .with_node_id(0b11);
        assert_eq!(id.as_i64(), (1_i64 << 40) - 1);
        assert_eq!(id.to_be_bytes(), [0xFF; 5]);
    }

    #[test]
    fn later_seconds_sort_after_earlier_ones() {
        let early = TinyId::new().with_timestamp(10).with_sequence(255);
        let late = TinyId::new().with_timestamp(11);
        assert!(late.as_i64() > early.as_i64());
    }
}

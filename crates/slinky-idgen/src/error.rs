use jiff::Timestamp;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("node id {node_id} out of range 0..={max_node_id}")]
    InvalidNodeId { node_id: u8, max_node_id: u8 },
    #[error("epoch {epoch} is later than the clock ({now})")]
    EpochAhead { epoch: Timestamp, now: Timestamp },
    #[error("seconds since epoch no longer fit in 30 bits")]
    OverTimeLimit,
}

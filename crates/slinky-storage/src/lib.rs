//! Durable storage for short-link records and their outbox messages.
//!
//! Both backends follow the local outbox pattern: the record write and the
//! "new mapping" message commit in one transaction, and a separate relay
//! loop later delivers pending messages and marks them sent.

pub mod memory;
pub mod mysql;

pub use memory::{InMemoryRelay, InMemoryStore, MemoryTx};
pub use mysql::{MySqlRelay, MySqlStore, MySqlTx};

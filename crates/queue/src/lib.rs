//! Message queue ports and the in-process broker.
//!
//! Producers go through [`Publisher`]; consumers implement
//! [`MessageHandler`] and signal a retry by returning an error.

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::QueueError;
pub use memory::{DEFAULT_MAX_ATTEMPTS, MemoryBroker};
pub use traits::{MessageHandler, Publisher};
pub use types::{DeadLetter, Delivery};

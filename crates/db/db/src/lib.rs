//! Metadata database ports: artifacts, retention policies and the locks
//! that keep schedulers and workers from stepping on each other.

pub mod database;
pub mod error;
pub mod testing;

pub use database::{Database, Transaction, advisory_lock_key};
pub use error::DbError;

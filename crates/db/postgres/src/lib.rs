pub mod config;
mod database;
pub mod migrations;

pub use config::PostgresConfig;
pub use database::{PostgresDatabase, PostgresTransaction};
pub use migrations::run_migrations;

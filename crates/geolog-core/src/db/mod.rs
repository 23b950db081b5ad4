//! Database layer for the local sample queue

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{LibSqlSampleRepository, QueueCounts, QueueEntry};

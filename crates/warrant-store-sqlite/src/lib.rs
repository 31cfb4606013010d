//! SQLite engine for compiled warrant artifacts.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every assertion or retraction runs its
//! whole cascade inside one transaction.

mod cascade;
mod encode;
mod read;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{Limits, SqliteEngine};

#[cfg(test)]
mod tests;

//! Backend implementations
//!
//! [`InMemory`] keeps everything in process memory; [`SqlxBackend`] stores it
//! in SQLite or PostgreSQL.

#[cfg(test)]
pub(crate) mod flaky;
mod in_memory;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sql;

pub use in_memory::InMemory;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub use sql::{DbKind, SqlxBackend};
#[cfg(feature = "postgres")]
pub use sql::Postgres;
#[cfg(feature = "sqlite")]
pub use sql::Sqlite;

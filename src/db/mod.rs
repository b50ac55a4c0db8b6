//! Database module: row models and SQL repositories.
//!
//! - `model`: raw row structs and their conversion into domain entities.
//! - `repo`: SQL-only functions for users and the job store.
//!
//! The work queue's SQLite backend lives in `crate::queue::sqlite` and shares
//! the same pool, but no operation here touches queue tables.

pub mod model;
pub mod repo;

pub use repo::*;

//! Persistence model for a job-application tracker: users, their tracked
//! applications, and their job-search preferences, stored in SQLite.

pub mod db;
pub mod error;
pub mod models;

pub use db::Database;
pub use error::{Constraint, StoreError, StoreResult};

//! Database layer for storyquest
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - The achievement ledger used after completions

pub mod repo;
pub mod schema;

pub use repo::Database;

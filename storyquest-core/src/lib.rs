//! # storyquest-core
//!
//! Core library for storyquest - a branching story traversal engine for
//! therapeutic children's stories.
//!
//! This library provides:
//! - Story content types and a validated story graph
//! - The reading-session state machine
//! - Achievement rules evaluated on completion
//! - Database storage layer with SQLite
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! The engine is layered so the traversal rules stay pure:
//! - **Content:** [`StoryGraph`] validates authored JSON once, at load time
//! - **Engine:** [`SessionTracker`] maps `(graph, session, op)` to a new session
//! - **Service:** [`ReadingService`] loads, applies, and persists through [`Database`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use storyquest_core::{Config, Database, ReadingService};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let service = ReadingService::new(db, &config);
//! let session = service
//!     .start_session("child-id", "finding-safe-place")
//!     .expect("failed to start session");
//! println!("now reading {}", session.current_node_id);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use graph::{ContentDefect, Node, StoryGraph};
pub use service::{CompletionOutcome, ReadingService, SessionView};
pub use session::{Clock, ManualClock, SessionTracker, SystemClock};
pub use types::*;

// Public modules
pub mod achievements;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod graph;
pub mod logging;
pub mod progress;
pub mod service;
pub mod session;
pub mod types;

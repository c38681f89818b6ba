//! Error types for storyquest-core

use crate::graph::ContentDefect;
use thiserror::Error;

/// Main error type for the storyquest-core library
///
/// The first five variants are the traversal taxonomy: they come from the
/// story graph, the session tracker, or the reading service. The rest are
/// infrastructure failures from the store, config, and filesystem.
#[derive(Error, Debug)]
pub enum Error {
    /// A node id resolved to neither a scene nor an ending.
    ///
    /// Indicates broken authored content; callers should not continue the
    /// traversal.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// The choice id is not offered by the session's current scene
    #[error("choice {choice_id} is not available on node {node_id}")]
    UnknownChoice { node_id: String, choice_id: String },

    /// Operation attempted in the wrong lifecycle stage
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Child or story id not recognized by the store
    #[error("unknown {kind}: {id}")]
    InvalidReference { kind: &'static str, id: String },

    /// Story content failed load-time validation
    #[error("invalid story content: {0}")]
    InvalidContent(#[from] ContentDefect),

    /// Malformed progress or completion payload
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Session not found in the store
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl Error {
    /// Unknown child id.
    pub fn unknown_child(id: impl Into<String>) -> Self {
        Error::InvalidReference {
            kind: "child",
            id: id.into(),
        }
    }

    /// Unknown story id or slug.
    pub fn unknown_story(id: impl Into<String>) -> Self {
        Error::InvalidReference {
            kind: "story",
            id: id.into(),
        }
    }

    /// Whether the caller can recover by changing its request.
    ///
    /// `NodeNotFound` and `InvalidContent` point at broken content and
    /// infrastructure errors are outside the caller's control.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnknownChoice { .. }
                | Error::InvalidState(_)
                | Error::InvalidReference { .. }
                | Error::InvalidInput(_)
                | Error::SessionNotFound(_)
        )
    }
}

/// Result type alias for storyquest-core
pub type Result<T> = std::result::Result<T, Error>;

//! Session tracker: the reading-session state machine
//!
//! ```text
//!   (no record) ──start──► InProgress ──complete──► Completed
//!                           │    ▲
//!                    choose │    │ go_back
//!                           ▼    │
//!                         InProgress
//! ```
//!
//! Every operation takes the current session by reference and returns a new
//! snapshot, so a failed operation can never leave a half-applied
//! transition behind. Persisting the snapshot is the caller's job.
//!
//! Reaching an ending through [`SessionTracker::choose`] does not complete
//! the session. The caller invokes [`SessionTracker::complete`] explicitly,
//! then runs achievement evaluation as its own step.

use crate::error::{Error, Result};
use crate::graph::{Node, StoryGraph};
use crate::types::{ChoiceRecord, CompletionRequest, ReadingSession};
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of timestamps for session transitions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to (for tests and replays)
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drives reading sessions through one story graph.
///
/// The tracker borrows the graph and holds no session state of its own;
/// one tracker can serve any number of sessions for the same story.
pub struct SessionTracker<'a> {
    graph: &'a StoryGraph,
    clock: &'a dyn Clock,
}

impl<'a> SessionTracker<'a> {
    /// Tracker using wall-clock time
    pub fn new(graph: &'a StoryGraph) -> Self {
        Self {
            graph,
            clock: &SystemClock,
        }
    }

    pub fn with_clock(graph: &'a StoryGraph, clock: &'a dyn Clock) -> Self {
        Self { graph, clock }
    }

    pub fn graph(&self) -> &'a StoryGraph {
        self.graph
    }

    /// Begin a new session at the graph's root.
    ///
    /// The calling layer checks that the child and story exist; empty ids
    /// are rejected here as unknown references.
    pub fn start(&self, child_id: &str, story_id: &str) -> Result<ReadingSession> {
        if child_id.is_empty() {
            return Err(Error::unknown_child(child_id));
        }
        if story_id.is_empty() {
            return Err(Error::unknown_story(story_id));
        }

        let root = self.graph.resolve_node(self.graph.root_id())?;
        if root.is_terminal() {
            return Err(Error::InvalidState(format!(
                "root {} is an ending",
                root.id()
            )));
        }

        let session = ReadingSession {
            id: uuid::Uuid::new_v4().to_string(),
            child_id: child_id.to_string(),
            story_id: story_id.to_string(),
            story_digest: Some(self.graph.digest().to_string()),
            started_at: self.clock.now(),
            current_node_id: root.id().to_string(),
            choices_made: Vec::new(),
            nodes_visited: vec![root.id().to_string()],
            completed_at: None,
            duration: None,
            ending_reached: None,
            emotional_response: None,
            helpful_rating: None,
        };

        tracing::info!(
            session_id = %session.id,
            child_id,
            story_id,
            "Reading session started"
        );

        Ok(session)
    }

    /// Take `choice_id` from the current scene.
    pub fn choose(&self, session: &ReadingSession, choice_id: &str) -> Result<ReadingSession> {
        self.ensure_in_progress(session, "choose")?;

        let scene = match self.graph.resolve_node(&session.current_node_id)? {
            Node::Scene(scene) => scene,
            Node::Ending(ending) => {
                return Err(Error::InvalidState(format!(
                    "cursor is on ending {}; no choices remain",
                    ending.id
                )))
            }
        };

        let choice = scene
            .choices
            .iter()
            .find(|c| c.id == choice_id)
            .ok_or_else(|| Error::UnknownChoice {
                node_id: scene.id.clone(),
                choice_id: choice_id.to_string(),
            })?;

        let target = self.graph.resolve_node(&choice.next_node)?;

        let mut next = session.clone();
        next.choices_made.push(ChoiceRecord {
            node_id: scene.id.clone(),
            choice_id: choice.id.clone(),
            timestamp: self.clock.now(),
        });
        next.current_node_id = target.id().to_string();
        if !next.has_visited(target.id()) {
            next.nodes_visited.push(target.id().to_string());
        }

        tracing::debug!(
            session_id = %session.id,
            from = %scene.id,
            choice = choice_id,
            to = target.id(),
            at_ending = target.is_terminal(),
            "Choice recorded"
        );

        Ok(next)
    }

    /// Undo the most recent choice.
    ///
    /// With no choices to undo the session comes back unchanged. The visited
    /// set keeps every node already seen.
    pub fn go_back(&self, session: &ReadingSession) -> Result<ReadingSession> {
        self.ensure_in_progress(session, "go back")?;

        let mut next = session.clone();
        let Some(last) = next.choices_made.pop() else {
            tracing::debug!(session_id = %session.id, "Nothing to go back to");
            return Ok(next);
        };

        let previous = self.graph.resolve_node(&last.node_id)?;
        next.current_node_id = previous.id().to_string();

        tracing::debug!(
            session_id = %session.id,
            from = %session.current_node_id,
            to = previous.id(),
            "Went back"
        );

        Ok(next)
    }

    /// Finish the session at `ending_id`.
    pub fn complete(&self, session: &ReadingSession, ending_id: &str) -> Result<ReadingSession> {
        self.complete_with(session, &CompletionRequest::new(ending_id))
    }

    /// Finish the session, also recording the reader's feedback.
    pub fn complete_with(
        &self,
        session: &ReadingSession,
        request: &CompletionRequest,
    ) -> Result<ReadingSession> {
        if session.is_completed() {
            return Err(Error::InvalidState(format!(
                "session {} is already completed",
                session.id
            )));
        }
        self.ensure_same_story(session)?;

        let ending_id = request.ending_reached.as_str();
        if !self.graph.is_terminal(ending_id) {
            return Err(Error::InvalidState(format!(
                "{} is not an ending",
                ending_id
            )));
        }

        if let Some(rating) = request.helpful_rating {
            if !(1..=5).contains(&rating) {
                return Err(Error::InvalidInput(format!(
                    "helpful rating must be between 1 and 5, got {}",
                    rating
                )));
            }
        }

        if session.current_node_id != ending_id {
            tracing::warn!(
                session_id = %session.id,
                cursor = %session.current_node_id,
                ending = ending_id,
                "Completing at an ending the cursor is not on"
            );
        }

        let completed_at = self.clock.now();
        let duration = completed_at
            .signed_duration_since(session.started_at)
            .num_seconds()
            .max(0);

        let mut next = session.clone();
        next.completed_at = Some(completed_at);
        next.duration = Some(duration);
        next.ending_reached = Some(ending_id.to_string());
        next.emotional_response = request.emotional_response;
        next.helpful_rating = request.helpful_rating;

        tracing::info!(
            session_id = %session.id,
            child_id = %session.child_id,
            ending = ending_id,
            duration_secs = duration,
            scenes_visited = next.scenes_visited(),
            "Reading session completed"
        );

        Ok(next)
    }

    /// The ending under the cursor, if the reader has arrived at one
    pub fn pending_ending(&self, session: &ReadingSession) -> Option<&'a str> {
        if session.is_completed() {
            return None;
        }
        self.graph
            .ending(&session.current_node_id)
            .map(|ending| ending.id.as_str())
    }

    fn ensure_in_progress(&self, session: &ReadingSession, action: &str) -> Result<()> {
        if session.is_completed() {
            return Err(Error::InvalidState(format!(
                "cannot {} in completed session {}",
                action, session.id
            )));
        }
        self.ensure_same_story(session)
    }

    fn ensure_same_story(&self, session: &ReadingSession) -> Result<()> {
        match &session.story_digest {
            Some(digest) if digest != self.graph.digest() => Err(Error::InvalidState(format!(
                "story {} changed since session {} started",
                session.story_id, session.id
            ))),
            _ => Ok(()),
        }
    }
}

//! Client progress snapshots
//!
//! Reading clients save `{choicesMade, nodesVisited, currentNodeId}` on an
//! interval and send it back when a reader resumes on another device. A
//! snapshot is only accepted if it describes a walk the graph actually
//! allows from the root, so a stored session is always one the tracker
//! could have produced itself.

use crate::error::{Error, Result};
use crate::graph::StoryGraph;
use crate::types::{ProgressUpdate, ReadingSession};
use std::collections::HashSet;

/// Replace a session's progress with a client snapshot after validating it.
///
/// Rules:
/// - choice records form a path from the root: each record's node is the
///   previous record's target and names a choice that scene offers
/// - `currentNodeId`, when present, is where that path ends
/// - every visited id resolves, the path's nodes are all included, and no
///   node the session already counted is dropped
/// - record timestamps never go backwards
///
/// The input session is not modified.
pub fn apply_progress(
    graph: &StoryGraph,
    session: &ReadingSession,
    update: &ProgressUpdate,
) -> Result<ReadingSession> {
    if session.is_completed() {
        return Err(Error::InvalidState(format!(
            "cannot save progress in completed session {}",
            session.id
        )));
    }

    let mut cursor = graph.root_id();
    let mut path: Vec<&str> = vec![cursor];
    let mut last_timestamp = None;

    for (i, record) in update.choices_made.iter().enumerate() {
        if record.node_id != cursor {
            return Err(Error::InvalidInput(format!(
                "choice #{} was made on {} but the reader was on {}",
                i + 1,
                record.node_id,
                cursor
            )));
        }
        if graph.is_terminal(cursor) {
            return Err(Error::InvalidInput(format!(
                "choice #{} was made on ending {}",
                i + 1,
                cursor
            )));
        }
        let choice = graph.choice(cursor, &record.choice_id).ok_or_else(|| {
            Error::InvalidInput(format!(
                "choice #{} ({}) is not offered on {}",
                i + 1,
                record.choice_id,
                cursor
            ))
        })?;

        if last_timestamp.is_some_and(|prev| record.timestamp < prev) {
            return Err(Error::InvalidInput(format!(
                "choice #{} is timestamped before the previous choice",
                i + 1
            )));
        }
        last_timestamp = Some(record.timestamp);

        cursor = choice.next_node.as_str();
        path.push(cursor);
    }

    if let Some(current) = update.current_node_id.as_deref() {
        if current != cursor {
            return Err(Error::InvalidInput(format!(
                "current node {} does not match the end of the recorded path ({})",
                current, cursor
            )));
        }
    }

    if let Some(unknown) = update.nodes_visited.iter().find(|id| !graph.contains(id)) {
        return Err(Error::InvalidInput(format!(
            "visited node {} is not part of this story",
            unknown
        )));
    }

    let reported: HashSet<&str> = update.nodes_visited.iter().map(String::as_str).collect();
    if let Some(missing) = path.iter().find(|id| !reported.contains(*id)) {
        return Err(Error::InvalidInput(format!(
            "visited nodes omit {} on the recorded path",
            missing
        )));
    }
    if let Some(dropped) = session
        .nodes_visited
        .iter()
        .find(|id| !reported.contains(id.as_str()))
    {
        return Err(Error::InvalidInput(format!(
            "visited nodes drop {}, which was already counted",
            dropped
        )));
    }

    let mut next = session.clone();
    for id in &update.nodes_visited {
        if !next.has_visited(id) {
            next.nodes_visited.push(id.clone());
        }
    }
    next.choices_made = update.choices_made.clone();
    next.current_node_id = cursor.to_string();

    tracing::debug!(
        session_id = %session.id,
        choices = next.choices_made.len(),
        visited = next.nodes_visited.len(),
        cursor = %next.current_node_id,
        "Progress snapshot applied"
    );

    Ok(next)
}

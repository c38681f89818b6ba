//! Core domain types for storyquest
//!
//! These types cover both sides of the traversal engine: the authored story
//! content (JSON documents written by content authors) and the reading
//! session records produced while a child moves through a story.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Scene** | A non-terminal narrative node offering choices |
//! | **Ending** | A terminal narrative node with no outgoing choices |
//! | **Choice** | A labeled edge from a scene to another node |
//! | **Session** | One child's in-progress or completed traversal of one story |
//! | **Cursor** | The session's `current_node_id`, the node presented to the reader |
//!
//! All JSON-facing types use camelCase keys so authored content and client
//! payloads keep their established wire shape.

use crate::graph::StoryGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================
// Story content
// ============================================

/// Type tag carried by every entry of the `nodes` array
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Scene,
    Ending,
}

/// Narrative tone hint for a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalTone {
    Calm,
    Hopeful,
    Reflective,
    Joyful,
    Serious,
}

/// A labeled edge from a scene to another node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub id: String,
    /// Text shown on the choice button
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Target scene or ending id
    pub next_node: String,
    /// Guidance for professionals; ignored by traversal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub therapeutic_note: Option<String>,
}

/// A non-terminal narrative node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneNode {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: NodeKind,
    /// Narrative text. Older documents call this field `content`.
    #[serde(alias = "content")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_tone: Option<EmotionalTone>,
}

/// A terminal narrative node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndingNode {
    pub id: String,
    #[serde(alias = "content")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Achievement awarded for reaching this ending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achievement: Option<String>,
    /// Positive reinforcement message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The JSON content document for one story: `{ "nodes": [...], "endings": [...] }`
///
/// This is the unvalidated wire form. Build a [`StoryGraph`] from it to get
/// lookups and the structural guarantees traversal relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryContent {
    #[serde(default)]
    pub nodes: Vec<SceneNode>,
    #[serde(default)]
    pub endings: Vec<EndingNode>,
}

impl StoryContent {
    /// Parse a content document from JSON text
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json.trim_start_matches('\u{feff}'))?)
    }

    /// Render the document as pretty-printed JSON
    pub fn to_json_pretty(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ============================================
// Reading sessions
// ============================================

/// Lifecycle stage of a reading session.
///
/// A session that has not been started has no record at all, so only the
/// two stages a stored session can be in are modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    InProgress,
    Completed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::InProgress => "in_progress",
            SessionState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the child felt after finishing a story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalResponse {
    Happy,
    Sad,
    Confused,
    Scared,
    Hopeful,
    Proud,
}

impl EmotionalResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionalResponse::Happy => "happy",
            EmotionalResponse::Sad => "sad",
            EmotionalResponse::Confused => "confused",
            EmotionalResponse::Scared => "scared",
            EmotionalResponse::Hopeful => "hopeful",
            EmotionalResponse::Proud => "proud",
        }
    }
}

impl std::fmt::Display for EmotionalResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EmotionalResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "happy" => Ok(EmotionalResponse::Happy),
            "sad" => Ok(EmotionalResponse::Sad),
            "confused" => Ok(EmotionalResponse::Confused),
            "scared" => Ok(EmotionalResponse::Scared),
            "hopeful" => Ok(EmotionalResponse::Hopeful),
            "proud" => Ok(EmotionalResponse::Proud),
            _ => Err(format!("unknown emotional response: {}", s)),
        }
    }
}

/// One transition taken by the reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceRecord {
    /// Scene the choice was made on
    pub node_id: String,
    pub choice_id: String,
    pub timestamp: DateTime<Utc>,
}

/// One child's traversal of one story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingSession {
    pub id: String,
    pub child_id: String,
    pub story_id: String,
    /// Digest of the story graph this session was started against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_digest: Option<String>,
    pub started_at: DateTime<Utc>,
    pub current_node_id: String,
    /// Audit trail of transitions, oldest first
    pub choices_made: Vec<ChoiceRecord>,
    /// Every node ever presented, in first-visit order
    pub nodes_visited: Vec<String>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Whole seconds between start and completion
    pub duration: Option<i64>,
    pub ending_reached: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_response: Option<EmotionalResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helpful_rating: Option<u8>,
}

impl ReadingSession {
    /// Current lifecycle stage
    pub fn state(&self) -> SessionState {
        if self.completed_at.is_some() {
            SessionState::Completed
        } else {
            SessionState::InProgress
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Number of distinct scenes and endings the reader has seen
    pub fn scenes_visited(&self) -> usize {
        self.nodes_visited.len()
    }

    pub fn has_visited(&self, node_id: &str) -> bool {
        self.nodes_visited.iter().any(|id| id == node_id)
    }

    /// Snapshot suitable for the periodic progress save
    pub fn progress(&self) -> ProgressUpdate {
        ProgressUpdate {
            choices_made: self.choices_made.clone(),
            nodes_visited: self.nodes_visited.clone(),
            current_node_id: Some(self.current_node_id.clone()),
        }
    }
}

// ============================================
// Client payloads
// ============================================

/// Periodic progress payload sent by a reading client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub choices_made: Vec<ChoiceRecord>,
    pub nodes_visited: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
}

/// Completion payload sent when the reader arrives at an ending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub ending_reached: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_response: Option<EmotionalResponse>,
    /// 1 (not helpful) to 5 (very helpful)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helpful_rating: Option<u8>,
}

impl CompletionRequest {
    pub fn new(ending_reached: impl Into<String>) -> Self {
        Self {
            ending_reached: ending_reached.into(),
            emotional_response: None,
            helpful_rating: None,
        }
    }
}

// ============================================
// Stored records
// ============================================

/// A child profile known to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Child {
    pub id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl Child {
    /// Create a child profile with a fresh id
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.into(),
            created_at: Utc::now(),
        }
    }
}

/// A published story: metadata plus its validated graph
#[derive(Debug, Clone)]
pub struct Story {
    pub id: String,
    /// URL-friendly unique name
    pub slug: String,
    pub title: String,
    pub graph: StoryGraph,
    /// Narration files keyed by node id, used when a node has no `audio`
    pub audio_files: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Story {
    /// Create a story record with a fresh id
    pub fn new(slug: impl Into<String>, title: impl Into<String>, graph: StoryGraph) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            slug: slug.into(),
            title: title.into(),
            graph,
            audio_files: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

/// An achievement definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    /// Unique display name, e.g. "First Story"
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
}

/// An achievement held by a child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardedAchievement {
    pub child_id: String,
    pub name: String,
    /// Session whose completion earned it
    pub session_id: Option<String>,
    pub awarded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_accepts_legacy_content_field() {
        let json = r#"{"id": "start", "type": "scene", "content": "Once upon a time",
                       "choices": [{"id": "c1", "text": "Go", "nextNode": "end"}]}"#;
        let scene: SceneNode = serde_json::from_str(json).unwrap();
        assert_eq!(scene.text, "Once upon a time");
        assert_eq!(scene.kind, NodeKind::Scene);
        assert_eq!(scene.choices[0].next_node, "end");
    }

    #[test]
    fn test_content_strips_byte_order_mark() {
        let content = StoryContent::from_json("\u{feff}{\"nodes\": [], \"endings\": []}").unwrap();
        assert!(content.nodes.is_empty());
    }

    #[test]
    fn test_choice_serializes_camel_case() {
        let choice = Choice {
            id: "c1".to_string(),
            text: "Hide under the blanket".to_string(),
            icon: None,
            next_node: "blanket-fort".to_string(),
            therapeutic_note: Some("Self-soothing".to_string()),
        };
        let value = serde_json::to_value(&choice).unwrap();
        assert_eq!(value["nextNode"], "blanket-fort");
        assert_eq!(value["therapeuticNote"], "Self-soothing");
        assert!(value.get("icon").is_none());
    }

    #[test]
    fn test_emotional_response_round_trip() {
        for response in [
            EmotionalResponse::Happy,
            EmotionalResponse::Scared,
            EmotionalResponse::Proud,
        ] {
            assert_eq!(response.as_str().parse::<EmotionalResponse>(), Ok(response));
        }
        assert!("angry".parse::<EmotionalResponse>().is_err());
    }

    #[test]
    fn test_completion_request_payload_shape() {
        let json = r#"{"endingReached": "ending-a", "emotionalResponse": "hopeful", "helpfulRating": 4}"#;
        let request: CompletionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.ending_reached, "ending-a");
        assert_eq!(request.emotional_response, Some(EmotionalResponse::Hopeful));
        assert_eq!(request.helpful_rating, Some(4));
    }
}

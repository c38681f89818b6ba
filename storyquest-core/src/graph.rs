//! Story graph: validated, read-only view over authored story content
//!
//! A [`StoryGraph`] is built once from a [`StoryContent`] document and then
//! shared by every session reading that story. Construction checks the
//! structural invariants traversal depends on, so a graph that exists is a
//! graph the session tracker can walk without meeting a dangling edge.
//!
//! ```text
//!   start ──choice──► scene ──choice──► ending-a
//!     │                 └────choice──► ending-b
//!     └────choice─────────────────────► scene ...
//! ```

use crate::types::{Choice, EndingNode, NodeKind, SceneNode, StoryContent};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Conventional id of the node every traversal starts from
pub const DEFAULT_ROOT_ID: &str = "start";

/// A structural problem in authored content.
///
/// These are authoring defects: the content has to be fixed, nothing at
/// runtime can work around them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentDefect {
    #[error("a node has an empty id")]
    EmptyNodeId,

    #[error("duplicate scene id: {0}")]
    DuplicateScene(String),

    #[error("duplicate ending id: {0}")]
    DuplicateEnding(String),

    #[error("id {0} is used by both a scene and an ending")]
    IdCollision(String),

    #[error("root scene {0} not found")]
    MissingRoot(String),

    #[error("root {0} is an ending")]
    RootIsEnding(String),

    #[error("entry {0} in nodes is tagged as an ending")]
    MisplacedEnding(String),

    #[error("scene {scene} has a choice with an empty id")]
    EmptyChoiceId { scene: String },

    #[error("scene {scene} offers choice {choice} more than once")]
    DuplicateChoice { scene: String, choice: String },

    #[error("choice {choice} on scene {scene} leads to unknown node {target}")]
    DanglingChoice {
        scene: String,
        choice: String,
        target: String,
    },

    #[error("scene {0} has no choices and is not an ending")]
    DeadEndScene(String),
}

impl StoryContent {
    /// Every structural defect in this document, in document order.
    ///
    /// An empty result means [`StoryGraph::from_content_with_root`] will
    /// accept the document.
    pub fn defects(&self, root_id: &str) -> Vec<ContentDefect> {
        let mut defects = Vec::new();
        let mut scene_ids = HashSet::new();
        let mut ending_ids = HashSet::new();

        for scene in &self.nodes {
            if scene.id.is_empty() {
                defects.push(ContentDefect::EmptyNodeId);
            } else if !scene_ids.insert(scene.id.as_str()) {
                defects.push(ContentDefect::DuplicateScene(scene.id.clone()));
            }
            if scene.kind == NodeKind::Ending {
                defects.push(ContentDefect::MisplacedEnding(scene.id.clone()));
            }
        }

        for ending in &self.endings {
            if ending.id.is_empty() {
                defects.push(ContentDefect::EmptyNodeId);
            } else if !ending_ids.insert(ending.id.as_str()) {
                defects.push(ContentDefect::DuplicateEnding(ending.id.clone()));
            } else if scene_ids.contains(ending.id.as_str()) {
                defects.push(ContentDefect::IdCollision(ending.id.clone()));
            }
        }

        if !scene_ids.contains(root_id) {
            if ending_ids.contains(root_id) {
                defects.push(ContentDefect::RootIsEnding(root_id.to_string()));
            } else {
                defects.push(ContentDefect::MissingRoot(root_id.to_string()));
            }
        }

        for scene in &self.nodes {
            if scene.choices.is_empty() {
                defects.push(ContentDefect::DeadEndScene(scene.id.clone()));
                continue;
            }

            let mut choice_ids = HashSet::new();
            for choice in &scene.choices {
                if choice.id.is_empty() {
                    defects.push(ContentDefect::EmptyChoiceId {
                        scene: scene.id.clone(),
                    });
                } else if !choice_ids.insert(choice.id.as_str()) {
                    defects.push(ContentDefect::DuplicateChoice {
                        scene: scene.id.clone(),
                        choice: choice.id.clone(),
                    });
                }

                let target = choice.next_node.as_str();
                if !scene_ids.contains(target) && !ending_ids.contains(target) {
                    defects.push(ContentDefect::DanglingChoice {
                        scene: scene.id.clone(),
                        choice: choice.id.clone(),
                        target: choice.next_node.clone(),
                    });
                }
            }
        }

        defects
    }
}

/// A node looked up by id: either a scene or an ending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node<'a> {
    Scene(&'a SceneNode),
    Ending(&'a EndingNode),
}

impl<'a> Node<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            Node::Scene(scene) => &scene.id,
            Node::Ending(ending) => &ending.id,
        }
    }

    pub fn text(&self) -> &'a str {
        match self {
            Node::Scene(scene) => &scene.text,
            Node::Ending(ending) => &ending.text,
        }
    }

    pub fn image(&self) -> Option<&'a str> {
        match self {
            Node::Scene(scene) => scene.image.as_deref(),
            Node::Ending(ending) => ending.image.as_deref(),
        }
    }

    pub fn audio(&self) -> Option<&'a str> {
        match self {
            Node::Scene(scene) => scene.audio.as_deref(),
            Node::Ending(ending) => ending.audio.as_deref(),
        }
    }

    /// Outgoing choices; always empty for an ending
    pub fn choices(&self) -> &'a [Choice] {
        match self {
            Node::Scene(scene) => &scene.choices,
            Node::Ending(_) => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Node::Ending(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Scene(usize),
    Ending(usize),
}

/// A validated story graph.
///
/// Serializes as the [`StoryContent`] JSON format plus a `rootNode` key, so a
/// graph with a non-default root survives a round-trip. Documents without
/// `rootNode` are rooted at [`DEFAULT_ROOT_ID`]. Deserializing runs the same
/// validation as [`StoryGraph::from_content_with_root`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RootedContent", into = "RootedContent")]
pub struct StoryGraph {
    content: StoryContent,
    root_id: String,
    index: HashMap<String, Slot>,
    digest: String,
}

impl StoryGraph {
    /// Build a graph rooted at [`DEFAULT_ROOT_ID`].
    pub fn from_content(content: StoryContent) -> Result<Self, ContentDefect> {
        Self::from_content_with_root(content, DEFAULT_ROOT_ID)
    }

    /// Build a graph rooted at `root_id`, rejecting the first structural defect.
    pub fn from_content_with_root(
        content: StoryContent,
        root_id: &str,
    ) -> Result<Self, ContentDefect> {
        if let Some(defect) = content.defects(root_id).into_iter().next() {
            return Err(defect);
        }

        let mut index = HashMap::with_capacity(content.nodes.len() + content.endings.len());
        for (i, scene) in content.nodes.iter().enumerate() {
            index.insert(scene.id.clone(), Slot::Scene(i));
        }
        for (i, ending) in content.endings.iter().enumerate() {
            index.insert(ending.id.clone(), Slot::Ending(i));
        }

        let digest = content_digest(root_id, &content);

        Ok(Self {
            content,
            root_id: root_id.to_string(),
            index,
            digest,
        })
    }

    /// Parse and validate a JSON content document.
    pub fn from_json(json: &str, root_id: &str) -> crate::error::Result<Self> {
        let content = StoryContent::from_json(json)?;
        Ok(Self::from_content_with_root(content, root_id)?)
    }

    /// Id of the scene traversal starts from
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Look up a node by id across scenes and endings.
    ///
    /// Fails with [`Error::NodeNotFound`](crate::Error::NodeNotFound) when the
    /// id is in neither collection.
    pub fn resolve_node(&self, id: &str) -> crate::error::Result<Node<'_>> {
        match self.index.get(id) {
            Some(Slot::Scene(i)) => Ok(Node::Scene(&self.content.nodes[*i])),
            Some(Slot::Ending(i)) => Ok(Node::Ending(&self.content.endings[*i])),
            None => Err(crate::error::Error::NodeNotFound(id.to_string())),
        }
    }

    /// True iff `id` names an ending
    pub fn is_terminal(&self, id: &str) -> bool {
        matches!(self.index.get(id), Some(Slot::Ending(_)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn scene(&self, id: &str) -> Option<&SceneNode> {
        match self.index.get(id) {
            Some(Slot::Scene(i)) => Some(&self.content.nodes[*i]),
            _ => None,
        }
    }

    pub fn ending(&self, id: &str) -> Option<&EndingNode> {
        match self.index.get(id) {
            Some(Slot::Ending(i)) => Some(&self.content.endings[*i]),
            _ => None,
        }
    }

    /// Find a choice offered by a scene
    pub fn choice(&self, scene_id: &str, choice_id: &str) -> Option<&Choice> {
        self.scene(scene_id)?
            .choices
            .iter()
            .find(|c| c.id == choice_id)
    }

    pub fn scenes(&self) -> &[SceneNode] {
        &self.content.nodes
    }

    pub fn endings(&self) -> &[EndingNode] {
        &self.content.endings
    }

    /// Total number of scenes and endings
    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    pub fn content(&self) -> &StoryContent {
        &self.content
    }

    pub fn into_content(self) -> StoryContent {
        self.content
    }

    /// SHA-256 of the canonical JSON encoding, hex encoded.
    ///
    /// Identifies one version of the story as a whole.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Narration for a node: its own `audio`, else the story-level map entry
    pub fn audio_for<'a>(
        &'a self,
        id: &str,
        audio_files: &'a HashMap<String, String>,
    ) -> Option<&'a str> {
        self.resolve_node(id)
            .ok()
            .and_then(|node| node.audio())
            .or_else(|| audio_files.get(id).map(String::as_str))
    }

    /// Ids of nodes that no path from the root reaches, in document order.
    pub fn unreachable_nodes(&self) -> Vec<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([self.root_id.as_str()]);
        seen.insert(self.root_id.as_str());

        while let Some(id) = queue.pop_front() {
            if let Some(scene) = self.scene(id) {
                for choice in &scene.choices {
                    if seen.insert(choice.next_node.as_str()) {
                        queue.push_back(choice.next_node.as_str());
                    }
                }
            }
        }

        self.content
            .nodes
            .iter()
            .map(|s| s.id.as_str())
            .chain(self.content.endings.iter().map(|e| e.id.as_str()))
            .filter(|id| !seen.contains(id))
            .collect()
    }
}

impl TryFrom<StoryContent> for StoryGraph {
    type Error = ContentDefect;

    fn try_from(content: StoryContent) -> Result<Self, Self::Error> {
        Self::from_content(content)
    }
}

impl From<StoryGraph> for StoryContent {
    fn from(graph: StoryGraph) -> Self {
        graph.content
    }
}

/// Serialized form of a [`StoryGraph`]: the content document and its root
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RootedContent {
    #[serde(default = "default_root_id")]
    root_node: String,
    #[serde(flatten)]
    content: StoryContent,
}

fn default_root_id() -> String {
    DEFAULT_ROOT_ID.to_string()
}

impl TryFrom<RootedContent> for StoryGraph {
    type Error = ContentDefect;

    fn try_from(repr: RootedContent) -> Result<Self, Self::Error> {
        Self::from_content_with_root(repr.content, &repr.root_node)
    }
}

impl From<StoryGraph> for RootedContent {
    fn from(graph: StoryGraph) -> Self {
        Self {
            root_node: graph.root_id,
            content: graph.content,
        }
    }
}

/// SHA-256 over the root id and the serialized content
fn content_digest(root_id: &str, content: &StoryContent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root_id.as_bytes());
    hasher.update([0u8]);
    // Serializing plain structs with string keys cannot fail.
    hasher.update(serde_json::to_vec(content).unwrap_or_default());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn scene(id: &str, choices: &[(&str, &str)]) -> SceneNode {
        SceneNode {
            id: id.to_string(),
            kind: NodeKind::Scene,
            text: format!("Scene {}", id),
            image: None,
            audio: None,
            choices: choices
                .iter()
                .map(|(choice, target)| Choice {
                    id: choice.to_string(),
                    text: format!("Go to {}", target),
                    icon: None,
                    next_node: target.to_string(),
                    therapeutic_note: None,
                })
                .collect(),
            emotional_tone: None,
        }
    }

    fn ending(id: &str) -> EndingNode {
        EndingNode {
            id: id.to_string(),
            text: format!("Ending {}", id),
            image: None,
            audio: None,
            achievement: None,
            message: None,
        }
    }

    fn branching() -> StoryContent {
        StoryContent {
            nodes: vec![
                scene("start", &[("c-forest", "forest"), ("c-home", "ending-a")]),
                scene("forest", &[("c-back", "start"), ("c-on", "ending-b")]),
            ],
            endings: vec![ending("ending-a"), ending("ending-b")],
        }
    }

    #[test]
    fn test_root_resolves_to_scene() {
        let graph = StoryGraph::from_content(branching()).unwrap();
        let root = graph.resolve_node(graph.root_id()).unwrap();
        assert!(!root.is_terminal());
        assert_eq!(root.id(), "start");
        assert_eq!(root.choices().len(), 2);
    }

    #[test]
    fn test_resolve_across_collections() {
        let graph = StoryGraph::from_content(branching()).unwrap();
        assert!(matches!(graph.resolve_node("forest"), Ok(Node::Scene(_))));
        assert!(matches!(graph.resolve_node("ending-b"), Ok(Node::Ending(_))));
        assert!(matches!(
            graph.resolve_node("cellar"),
            Err(Error::NodeNotFound(id)) if id == "cellar"
        ));
        assert!(graph.is_terminal("ending-a"));
        assert!(!graph.is_terminal("forest"));
        assert!(!graph.is_terminal("cellar"));
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn test_dangling_choice_rejected() {
        let mut content = branching();
        content.nodes[1].choices[1].next_node = "nowhere".to_string();
        let err = StoryGraph::from_content(content).unwrap_err();
        assert_eq!(
            err,
            ContentDefect::DanglingChoice {
                scene: "forest".to_string(),
                choice: "c-on".to_string(),
                target: "nowhere".to_string(),
            }
        );
    }

    #[test]
    fn test_dead_end_scene_rejected() {
        let mut content = branching();
        content.nodes.push(scene("quiet-room", &[]));
        let defects = content.defects(DEFAULT_ROOT_ID);
        assert_eq!(
            defects,
            vec![ContentDefect::DeadEndScene("quiet-room".to_string())]
        );
    }

    #[test]
    fn test_root_defects() {
        let mut content = branching();
        content.nodes.remove(0);
        assert!(content
            .defects(DEFAULT_ROOT_ID)
            .contains(&ContentDefect::MissingRoot("start".to_string())));

        let content = branching();
        assert_eq!(
            content.defects("ending-a"),
            vec![ContentDefect::RootIsEnding("ending-a".to_string())]
        );
    }

    #[test]
    fn test_id_defects_reported_together() {
        let mut content = branching();
        content.nodes.push(scene("forest", &[("c-x", "start")]));
        content.endings.push(ending("start"));
        let repeated = content.nodes[0].choices[0].clone();
        content.nodes[0].choices.push(repeated);

        let defects = content.defects(DEFAULT_ROOT_ID);
        assert!(defects.contains(&ContentDefect::DuplicateScene("forest".to_string())));
        assert!(defects.contains(&ContentDefect::IdCollision("start".to_string())));
        assert!(defects.contains(&ContentDefect::DuplicateChoice {
            scene: "start".to_string(),
            choice: "c-forest".to_string(),
        }));
    }

    #[test]
    fn test_misplaced_ending_tag() {
        let mut content = branching();
        content.nodes[1].kind = NodeKind::Ending;
        assert_eq!(
            StoryGraph::from_content(content).unwrap_err(),
            ContentDefect::MisplacedEnding("forest".to_string())
        );
    }

    #[test]
    fn test_json_round_trip_preserves_lookups() {
        let graph = StoryGraph::from_content(branching()).unwrap();
        let json = serde_json::to_string(&graph).unwrap();
        let parsed: StoryGraph = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, graph);
        for id in ["start", "forest", "ending-a", "ending-b", "missing"] {
            assert_eq!(
                parsed.resolve_node(id).ok(),
                graph.resolve_node(id).ok(),
                "lookup for {} changed",
                id
            );
        }
        assert_eq!(parsed.digest(), graph.digest());
    }

    #[test]
    fn test_round_trip_keeps_custom_root() {
        let mut content = branching();
        content.nodes[0].id = "prologue".to_string();
        content.nodes[1].choices[0].next_node = "prologue".to_string();
        let graph = StoryGraph::from_content_with_root(content, "prologue").unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        assert!(json.contains(r#""rootNode":"prologue""#));
        let parsed: StoryGraph = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, graph);
        assert_eq!(parsed.root_id(), "prologue");
        assert!(parsed.resolve_node("prologue").is_ok());
    }

    #[test]
    fn test_deserialize_without_root_uses_default() {
        let json = r#"{"nodes": [{"id": "start", "text": "Hi",
            "choices": [{"id": "go", "text": "Go", "nextNode": "end"}]}],
            "endings": [{"id": "end", "text": "Bye"}]}"#;
        let graph: StoryGraph = serde_json::from_str(json).unwrap();
        assert_eq!(graph.root_id(), DEFAULT_ROOT_ID);
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"nodes": [{"id": "start", "text": "Hi", "choices": []}], "endings": []}"#;
        let err = serde_json::from_str::<StoryGraph>(json).unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[test]
    fn test_digest_tracks_content() {
        let graph = StoryGraph::from_content(branching()).unwrap();
        assert_eq!(graph.digest().len(), 64);

        let mut edited = branching();
        edited.endings[0].message = Some("You did it!".to_string());
        let edited = StoryGraph::from_content(edited).unwrap();
        assert_ne!(graph.digest(), edited.digest());
    }

    #[test]
    fn test_digest_tracks_root() {
        let from_start = StoryGraph::from_content_with_root(branching(), "start").unwrap();
        let from_forest = StoryGraph::from_content_with_root(branching(), "forest").unwrap();
        assert_ne!(from_start.digest(), from_forest.digest());
    }

    #[test]
    fn test_unreachable_nodes() {
        let mut content = branching();
        content.nodes.push(scene("attic", &[("c-down", "ending-c")]));
        content.endings.push(ending("ending-c"));
        let graph = StoryGraph::from_content(content).unwrap();
        assert_eq!(graph.unreachable_nodes(), vec!["attic", "ending-c"]);
    }

    #[test]
    fn test_audio_fallback() {
        let mut content = branching();
        content.nodes[0].audio = Some("/audio/start.mp3".to_string());
        let graph = StoryGraph::from_content(content).unwrap();

        let mut files = HashMap::new();
        files.insert("start".to_string(), "/audio/ignored.mp3".to_string());
        files.insert("forest".to_string(), "/audio/forest.mp3".to_string());

        assert_eq!(graph.audio_for("start", &files), Some("/audio/start.mp3"));
        assert_eq!(graph.audio_for("forest", &files), Some("/audio/forest.mp3"));
        assert_eq!(graph.audio_for("ending-a", &files), None);
    }
}

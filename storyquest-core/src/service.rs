//! Reading service: the engine wired to the store
//!
//! Each call loads the session and its story, applies one pure tracker
//! operation, and persists the resulting snapshot. A failed operation
//! writes nothing.

use crate::achievements::{create_default_evaluator, AchievementEvaluator, AchievementLedger};
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::graph::{Node, StoryGraph};
use crate::progress::apply_progress;
use crate::session::{Clock, SessionTracker, SystemClock};
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of completing a session
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub session: ReadingSession,
    /// Achievements newly earned by this completion
    pub awarded: Vec<String>,
    /// Evaluation failed after the session was saved; retry with
    /// [`ReadingService::evaluate_achievements`]
    pub achievements_pending: bool,
}

/// What a reading client renders for a session's current position
#[derive(Debug, Clone)]
pub struct SessionView {
    pub session: ReadingSession,
    pub story_title: String,
    pub node_id: String,
    pub text: String,
    pub image: Option<String>,
    pub audio: Option<String>,
    /// Choices offered at the cursor; empty on an ending
    pub choices: Vec<Choice>,
    pub is_ending: bool,
    /// Closing message of the ending under the cursor
    pub ending_message: Option<String>,
    pub can_go_back: bool,
}

pub struct ReadingService {
    db: Database,
    clock: Arc<dyn Clock>,
    evaluator: AchievementEvaluator,
    root_node: String,
}

impl ReadingService {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
            evaluator: create_default_evaluator(&config.achievements),
            root_node: config.story.root_node.clone(),
        }
    }

    /// Replace the clock used to stamp transitions
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the achievement rules run on completion
    pub fn with_evaluator(mut self, evaluator: AchievementEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Validate a content document and store it under `slug`.
    ///
    /// Re-importing a slug replaces its content but keeps the story id and
    /// its narration map.
    pub fn import_story(&self, slug: &str, title: &str, json: &str) -> Result<Story> {
        self.import_story_with_audio(slug, title, json, None)
    }

    /// Like [`import_story`](Self::import_story), also setting the story-level
    /// narration map (node id to audio file).
    ///
    /// `None` keeps whatever map is already stored for the slug.
    pub fn import_story_with_audio(
        &self,
        slug: &str,
        title: &str,
        json: &str,
        audio_files: Option<HashMap<String, String>>,
    ) -> Result<Story> {
        if slug.trim().is_empty() {
            return Err(Error::InvalidInput("story slug must not be empty".to_string()));
        }

        let graph = StoryGraph::from_json(json, &self.root_node)?;
        let unreachable = graph.unreachable_nodes();
        if !unreachable.is_empty() {
            tracing::warn!(
                slug,
                nodes = ?unreachable,
                "Story has nodes no path reaches"
            );
        }

        let audio_files = match audio_files {
            Some(files) => files,
            None => self
                .db
                .get_story_by_slug(slug)?
                .map(|existing| existing.audio_files)
                .unwrap_or_default(),
        };
        let mut orphaned: Vec<&str> = audio_files
            .keys()
            .filter(|id| !graph.contains(id))
            .map(String::as_str)
            .collect();
        if !orphaned.is_empty() {
            orphaned.sort_unstable();
            tracing::warn!(slug, nodes = ?orphaned, "Narration map names unknown nodes");
        }

        let mut story = Story::new(slug, title, graph);
        story.audio_files = audio_files;
        story.id = self.db.upsert_story(&story)?;

        tracing::info!(
            story_id = %story.id,
            slug,
            nodes = story.graph.node_count(),
            digest = %story.graph.digest(),
            "Story imported"
        );

        Ok(story)
    }

    /// Create a child profile
    pub fn add_child(&self, display_name: &str) -> Result<Child> {
        if display_name.trim().is_empty() {
            return Err(Error::InvalidInput("display name must not be empty".to_string()));
        }
        let mut child = Child::new(display_name.trim());
        child.created_at = self.clock.now();
        self.db.insert_child(&child)?;
        tracing::info!(child_id = %child.id, "Child added");
        Ok(child)
    }

    /// Start a session for a known child on a story given by id or slug
    pub fn start_session(&self, child_id: &str, story_ref: &str) -> Result<ReadingSession> {
        let child = self
            .db
            .get_child(child_id)?
            .ok_or_else(|| Error::unknown_child(child_id))?;
        let story = self
            .db
            .find_story(story_ref)?
            .ok_or_else(|| Error::unknown_story(story_ref))?;

        let session = self.tracker(&story.graph).start(&child.id, &story.id)?;
        self.db.insert_session(&session)?;
        Ok(session)
    }

    pub fn choose(&self, session_id: &str, choice_id: &str) -> Result<ReadingSession> {
        let (session, story) = self.load(session_id)?;
        let next = self.tracker(&story.graph).choose(&session, choice_id)?;
        self.db.update_session(&next)?;
        Ok(next)
    }

    pub fn go_back(&self, session_id: &str) -> Result<ReadingSession> {
        let (session, story) = self.load(session_id)?;
        let next = self.tracker(&story.graph).go_back(&session)?;
        if next != session {
            self.db.update_session(&next)?;
        }
        Ok(next)
    }

    /// Accept a client progress snapshot
    pub fn save_progress(
        &self,
        session_id: &str,
        update: &ProgressUpdate,
    ) -> Result<ReadingSession> {
        let (session, story) = self.load(session_id)?;
        if session
            .story_digest
            .as_deref()
            .is_some_and(|d| d != story.graph.digest())
        {
            return Err(Error::InvalidState(format!(
                "story {} changed since session {} started",
                story.id, session.id
            )));
        }

        let next = apply_progress(&story.graph, &session, update)?;
        self.db.update_session(&next)?;

        tracing::debug!(
            session_id,
            choices = next.choices_made.len(),
            visited = next.nodes_visited.len(),
            "Progress saved"
        );
        Ok(next)
    }

    /// Complete a session, persist it, then evaluate achievements.
    ///
    /// The completion stands even if evaluation fails; the outcome is then
    /// marked `achievements_pending` and no achievements are reported.
    pub fn complete(
        &self,
        session_id: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionOutcome> {
        self.complete_with_ledger(session_id, request, &self.db)
    }

    /// Run the achievement rules for an already completed session.
    ///
    /// Safe to repeat: awards already held are not reported again.
    pub fn evaluate_achievements(&self, session_id: &str) -> Result<Vec<String>> {
        self.evaluate_with_ledger(session_id, &self.db)
    }

    fn complete_with_ledger(
        &self,
        session_id: &str,
        request: &CompletionRequest,
        ledger: &dyn AchievementLedger,
    ) -> Result<CompletionOutcome> {
        let (session, story) = self.load(session_id)?;
        let completed = self
            .tracker(&story.graph)
            .complete_with(&session, request)?;
        self.db.update_session(&completed)?;

        let (awarded, achievements_pending) =
            match self.evaluator.evaluate(&completed, &story.graph, ledger) {
                Ok(awarded) => (awarded, false),
                Err(e) => {
                    tracing::error!(
                        session_id,
                        error = %e,
                        "Achievement evaluation failed after completion"
                    );
                    (Vec::new(), true)
                }
            };

        Ok(CompletionOutcome {
            session: completed,
            awarded,
            achievements_pending,
        })
    }

    fn evaluate_with_ledger(
        &self,
        session_id: &str,
        ledger: &dyn AchievementLedger,
    ) -> Result<Vec<String>> {
        let (session, story) = self.load(session_id)?;
        self.evaluator.evaluate(&session, &story.graph, ledger)
    }

    /// Current node and stats for a session
    pub fn session_view(&self, session_id: &str) -> Result<SessionView> {
        let (session, story) = self.load(session_id)?;
        let node = story.graph.resolve_node(&session.current_node_id)?;

        let ending_message = match node {
            Node::Ending(ending) => ending.message.clone(),
            Node::Scene(_) => None,
        };

        Ok(SessionView {
            story_title: story.title.clone(),
            node_id: node.id().to_string(),
            text: node.text().to_string(),
            image: node.image().map(str::to_string),
            audio: story
                .graph
                .audio_for(node.id(), &story.audio_files)
                .map(str::to_string),
            choices: node.choices().to_vec(),
            is_ending: node.is_terminal(),
            ending_message,
            can_go_back: !session.is_completed() && !session.choices_made.is_empty(),
            session,
        })
    }

    fn tracker<'a>(&'a self, graph: &'a StoryGraph) -> SessionTracker<'a> {
        SessionTracker::with_clock(graph, self.clock.as_ref())
    }

    fn load(&self, session_id: &str) -> Result<(ReadingSession, Story)> {
        let session = self
            .db
            .get_session(session_id)?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        let story = self
            .db
            .get_story(&session.story_id)?
            .ok_or_else(|| Error::unknown_story(&session.story_id))?;
        Ok((session, story))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    const STORY: &str = r#"{
        "nodes": [
            {"id": "start", "text": "Mia hears thunder.", "audio": "start.mp3",
             "choices": [{"id": "hide", "text": "Hide under the blanket", "nextNode": "blanket"},
                         {"id": "ask", "text": "Ask for a hug", "nextNode": "ending-hug"}]},
            {"id": "blanket", "text": "It is cozy under here.",
             "choices": [{"id": "peek", "text": "Peek out", "nextNode": "ending-brave"}]}
        ],
        "endings": [
            {"id": "ending-hug", "text": "A warm hug.", "message": "Asking for help is brave."},
            {"id": "ending-brave", "text": "The storm passes.", "achievement": "Storm Watcher"}
        ]
    }"#;

    fn setup() -> (ReadingService, Arc<ManualClock>, Child) {
        crate::logging::init_test();

        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 19, 0, 0).unwrap(),
        ));
        let service = ReadingService::new(db, &Config::default()).with_clock(clock.clone());

        service.import_story("thunder", "The Thunderstorm", STORY).unwrap();
        let child = service.add_child("Mia").unwrap();
        (service, clock, child)
    }

    #[test]
    fn test_full_reading() {
        let (service, clock, child) = setup();

        let session = service.start_session(&child.id, "thunder").unwrap();
        assert_eq!(session.current_node_id, "start");

        clock.advance(Duration::seconds(30));
        service.choose(&session.id, "hide").unwrap();
        clock.advance(Duration::seconds(45));
        let session = service.choose(&session.id, "peek").unwrap();
        assert_eq!(session.current_node_id, "ending-brave");

        let outcome = service
            .complete(&session.id, &CompletionRequest::new("ending-brave"))
            .unwrap();
        assert_eq!(outcome.session.duration, Some(75));
        assert_eq!(
            outcome.awarded,
            vec!["First Story".to_string(), "Storm Watcher".to_string()]
        );

        let stored = service.database().get_session(&session.id).unwrap().unwrap();
        assert!(stored.is_completed());
        assert_eq!(stored.nodes_visited, vec!["start", "blanket", "ending-brave"]);
    }

    #[test]
    fn test_first_story_only_once() {
        let (service, _clock, child) = setup();

        for expected in [vec!["First Story".to_string()], vec![]] {
            let session = service.start_session(&child.id, "thunder").unwrap();
            service.choose(&session.id, "ask").unwrap();
            let outcome = service
                .complete(&session.id, &CompletionRequest::new("ending-hug"))
                .unwrap();
            assert_eq!(outcome.awarded, expected);
        }

        assert_eq!(
            service.database().list_child_achievements(&child.id).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_unknown_references() {
        let (service, _clock, child) = setup();

        assert!(matches!(
            service.start_session("nobody", "thunder"),
            Err(Error::InvalidReference { kind: "child", .. })
        ));
        assert!(matches!(
            service.start_session(&child.id, "no-such-story"),
            Err(Error::InvalidReference { kind: "story", .. })
        ));
        assert!(matches!(
            service.choose("missing-session", "hide"),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_failed_choice_leaves_store_unchanged() {
        let (service, _clock, child) = setup();
        let session = service.start_session(&child.id, "thunder").unwrap();

        assert!(matches!(
            service.choose(&session.id, "fly"),
            Err(Error::UnknownChoice { .. })
        ));

        let stored = service.database().get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored, session);
    }

    #[test]
    fn test_go_back_and_view() {
        let (service, _clock, child) = setup();
        let session = service.start_session(&child.id, "thunder").unwrap();

        let view = service.session_view(&session.id).unwrap();
        assert_eq!(view.story_title, "The Thunderstorm");
        assert_eq!(view.audio.as_deref(), Some("start.mp3"));
        assert_eq!(view.choices.len(), 2);
        assert!(!view.can_go_back);

        service.choose(&session.id, "ask").unwrap();
        let view = service.session_view(&session.id).unwrap();
        assert!(view.is_ending);
        assert_eq!(view.ending_message.as_deref(), Some("Asking for help is brave."));
        assert!(view.choices.is_empty());

        let back = service.go_back(&session.id).unwrap();
        assert_eq!(back.current_node_id, "start");
        assert_eq!(back.nodes_visited, vec!["start", "ending-hug"]);
    }

    #[test]
    fn test_save_progress_from_another_device() {
        let (service, clock, child) = setup();
        let session = service.start_session(&child.id, "thunder").unwrap();

        clock.advance(Duration::seconds(10));
        let update = ProgressUpdate {
            choices_made: vec![ChoiceRecord {
                node_id: "start".to_string(),
                choice_id: "hide".to_string(),
                timestamp: clock.now(),
            }],
            nodes_visited: vec!["start".to_string(), "blanket".to_string()],
            current_node_id: Some("blanket".to_string()),
        };

        let saved = service.save_progress(&session.id, &update).unwrap();
        assert_eq!(saved.current_node_id, "blanket");

        let next = service.choose(&session.id, "peek").unwrap();
        assert_eq!(next.current_node_id, "ending-brave");
    }

    #[test]
    fn test_reimport_invalidates_running_sessions() {
        let (service, _clock, child) = setup();
        let session = service.start_session(&child.id, "thunder").unwrap();

        let revised = STORY.replace("Mia hears thunder.", "Mia hears rain.");
        let story = service.import_story("thunder", "The Thunderstorm", &revised).unwrap();
        assert_eq!(story.id, session.story_id);

        assert!(matches!(
            service.choose(&session.id, "hide"),
            Err(Error::InvalidState(_))
        ));
    }

    /// Passes counts through to the store but refuses awards while offline
    struct OfflineLedger<'a> {
        db: &'a Database,
    }

    impl AchievementLedger for OfflineLedger<'_> {
        fn count_completed_sessions(&self, child_id: &str) -> Result<u64> {
            self.db.count_completed_sessions(child_id)
        }

        fn award(&self, _: &str, _: &str, _: Option<&str>) -> Result<bool> {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "achievement store offline",
            )))
        }
    }

    #[test]
    fn test_failed_evaluation_can_be_retried() {
        let (service, _clock, child) = setup();
        let session = service.start_session(&child.id, "thunder").unwrap();
        service.choose(&session.id, "ask").unwrap();

        let offline = OfflineLedger {
            db: service.database(),
        };
        let outcome = service
            .complete_with_ledger(&session.id, &CompletionRequest::new("ending-hug"), &offline)
            .unwrap();
        assert!(outcome.achievements_pending);
        assert!(outcome.awarded.is_empty());
        assert!(outcome.session.is_completed());
        assert!(service
            .database()
            .list_child_achievements(&child.id)
            .unwrap()
            .is_empty());

        let awarded = service.evaluate_achievements(&session.id).unwrap();
        assert_eq!(awarded, vec!["First Story".to_string()]);
        assert!(service.evaluate_achievements(&session.id).unwrap().is_empty());
        assert_eq!(
            service.database().list_child_achievements(&child.id).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_evaluate_requires_completed_session() {
        let (service, _clock, child) = setup();
        let session = service.start_session(&child.id, "thunder").unwrap();

        assert!(matches!(
            service.evaluate_achievements(&session.id),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            service.evaluate_achievements("missing-session"),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_narration_map_survives_reimport() {
        let (service, _clock, child) = setup();

        let mut files = HashMap::new();
        files.insert("blanket".to_string(), "blanket.mp3".to_string());
        let story = service
            .import_story_with_audio("thunder", "The Thunderstorm", STORY, Some(files.clone()))
            .unwrap();
        assert_eq!(story.audio_files, files);

        let revised = STORY.replace("It is cozy under here.", "It is warm under here.");
        service.import_story("thunder", "The Thunderstorm", &revised).unwrap();
        let stored = service.database().get_story_by_slug("thunder").unwrap().unwrap();
        assert_eq!(stored.audio_files, files);

        let session = service.start_session(&child.id, "thunder").unwrap();
        service.choose(&session.id, "hide").unwrap();
        let view = service.session_view(&session.id).unwrap();
        assert_eq!(view.audio.as_deref(), Some("blanket.mp3"));

        let cleared = Some(HashMap::new());
        service
            .import_story_with_audio("thunder", "The Thunderstorm", &revised, cleared)
            .unwrap();
        let stored = service.database().get_story_by_slug("thunder").unwrap().unwrap();
        assert!(stored.audio_files.is_empty());
    }

    #[test]
    fn test_import_rejects_invalid_content() {
        let (service, _clock, _child) = setup();
        let broken = STORY.replace("\"nextNode\": \"blanket\"", "\"nextNode\": \"attic\"");

        assert!(matches!(
            service.import_story("broken", "Broken", &broken),
            Err(Error::InvalidContent(_))
        ));
        assert!(service.database().find_story("broken").unwrap().is_none());
    }
}

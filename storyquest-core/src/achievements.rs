//! Achievement evaluation
//!
//! Runs after a session has been completed and persisted. Each
//! [`AchievementRule`] looks at the finished session and may name one
//! achievement to award; the [`AchievementLedger`] records awards and
//! reports the counts rules depend on.
//!
//! ```text
//!   complete() ──► persist ──► AchievementEvaluator::evaluate()
//!                                 ├─ core.first_story
//!                                 └─ core.ending_badge
//!                                        │
//!                                        ▼
//!                              AchievementLedger::award()
//! ```
//!
//! Awards are idempotent: a ledger never records the same achievement
//! twice for one child, so re-running evaluation is harmless.

use crate::config::AchievementsConfig;
use crate::error::{Error, Result};
use crate::graph::StoryGraph;
use crate::types::ReadingSession;

/// Name of the achievement for a child's first completed story
pub const FIRST_STORY: &str = "First Story";

/// Storage side of achievements
pub trait AchievementLedger {
    /// Number of sessions this child has completed, across all stories
    fn count_completed_sessions(&self, child_id: &str) -> Result<u64>;

    /// Record an award. Returns `false` if the child already held it.
    fn award(&self, child_id: &str, achievement: &str, session_id: Option<&str>) -> Result<bool>;
}

/// What a rule gets to look at
pub struct AchievementContext<'a> {
    pub session: &'a ReadingSession,
    pub graph: &'a StoryGraph,
    pub ledger: &'a dyn AchievementLedger,
}

/// A single achievement rule.
///
/// Rules should be deterministic for a given session and ledger state.
pub trait AchievementRule: Send + Sync {
    /// Unique name, `namespace.rule_name` (e.g. "core.first_story")
    fn name(&self) -> &str;

    /// The achievement this session earns under the rule, if any
    fn evaluate(&self, ctx: &AchievementContext<'_>) -> Result<Option<String>>;
}

/// Awards "First Story" when the child's completed count is exactly one.
pub struct FirstStoryRule {
    achievement: String,
}

impl FirstStoryRule {
    pub fn new(achievement: impl Into<String>) -> Self {
        Self {
            achievement: achievement.into(),
        }
    }
}

impl Default for FirstStoryRule {
    fn default() -> Self {
        Self::new(FIRST_STORY)
    }
}

impl AchievementRule for FirstStoryRule {
    fn name(&self) -> &str {
        "core.first_story"
    }

    fn evaluate(&self, ctx: &AchievementContext<'_>) -> Result<Option<String>> {
        let completed = ctx
            .ledger
            .count_completed_sessions(&ctx.session.child_id)?;
        Ok((completed == 1).then(|| self.achievement.clone()))
    }
}

/// Awards the achievement named by the ending the reader reached.
#[derive(Default)]
pub struct EndingBadgeRule;

impl AchievementRule for EndingBadgeRule {
    fn name(&self) -> &str {
        "core.ending_badge"
    }

    fn evaluate(&self, ctx: &AchievementContext<'_>) -> Result<Option<String>> {
        let badge = ctx
            .session
            .ending_reached
            .as_deref()
            .and_then(|id| ctx.graph.ending(id))
            .and_then(|ending| ending.achievement.clone())
            .filter(|name| !name.is_empty());
        Ok(badge)
    }
}

/// Runs registered rules against completed sessions.
pub struct AchievementEvaluator {
    rules: Vec<Box<dyn AchievementRule>>,
}

impl AchievementEvaluator {
    /// Create an evaluator with no rules.
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register a rule.
    pub fn register(&mut self, rule: Box<dyn AchievementRule>) {
        tracing::debug!(rule = rule.name(), "Registered achievement rule");
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Evaluate every rule for a completed session.
    ///
    /// Returns the achievements newly awarded by this call, in rule order.
    pub fn evaluate(
        &self,
        session: &ReadingSession,
        graph: &StoryGraph,
        ledger: &dyn AchievementLedger,
    ) -> Result<Vec<String>> {
        if !session.is_completed() {
            return Err(Error::InvalidState(format!(
                "session {} must be completed before achievements are evaluated",
                session.id
            )));
        }

        let ctx = AchievementContext {
            session,
            graph,
            ledger,
        };

        let mut awarded = Vec::new();
        for rule in &self.rules {
            let Some(achievement) = rule.evaluate(&ctx)? else {
                continue;
            };
            if awarded.contains(&achievement) {
                continue;
            }
            if ledger.award(&session.child_id, &achievement, Some(&session.id))? {
                tracing::info!(
                    rule = rule.name(),
                    child_id = %session.child_id,
                    achievement = %achievement,
                    "Achievement awarded"
                );
                awarded.push(achievement);
            }
        }

        Ok(awarded)
    }
}

impl Default for AchievementEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Create an evaluator with the built-in rules enabled by `config`.
pub fn create_default_evaluator(config: &AchievementsConfig) -> AchievementEvaluator {
    let mut evaluator = AchievementEvaluator::new();
    evaluator.register(Box::new(FirstStoryRule::new(config.first_story.clone())));
    if config.ending_badges {
        evaluator.register(Box::new(EndingBadgeRule));
    }
    evaluator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionTracker;
    use crate::types::StoryContent;
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct MemoryLedger {
        completed: RefCell<HashMap<String, u64>>,
        held: RefCell<HashSet<(String, String)>>,
    }

    impl MemoryLedger {
        fn set_completed(&self, child: &str, count: u64) {
            self.completed.borrow_mut().insert(child.to_string(), count);
        }
    }

    impl AchievementLedger for MemoryLedger {
        fn count_completed_sessions(&self, child_id: &str) -> Result<u64> {
            Ok(self.completed.borrow().get(child_id).copied().unwrap_or(0))
        }

        fn award(&self, child_id: &str, achievement: &str, _: Option<&str>) -> Result<bool> {
            Ok(self
                .held
                .borrow_mut()
                .insert((child_id.to_string(), achievement.to_string())))
        }
    }

    const STORY: &str = r#"{
        "nodes": [{"id": "start", "text": "Two paths.",
                   "choices": [{"id": "brave", "text": "Speak up", "nextNode": "ending-brave"},
                               {"id": "quiet", "text": "Stay quiet", "nextNode": "ending-quiet"}]}],
        "endings": [{"id": "ending-brave", "text": "You spoke up!", "achievement": "Brave Voice"},
                    {"id": "ending-quiet", "text": "That's okay too."}]
    }"#;

    fn completed(graph: &StoryGraph, choice: &str, ending: &str) -> ReadingSession {
        let tracker = SessionTracker::new(graph);
        let session = tracker.start("child-1", "story-1").unwrap();
        let session = tracker.choose(&session, choice).unwrap();
        tracker.complete(&session, ending).unwrap()
    }

    fn evaluator() -> AchievementEvaluator {
        create_default_evaluator(&AchievementsConfig::default())
    }

    #[test]
    fn test_default_rules() {
        let names = evaluator().rule_names().join(",");
        assert_eq!(names, "core.first_story,core.ending_badge");

        let config = AchievementsConfig {
            ending_badges: false,
            ..Default::default()
        };
        assert_eq!(create_default_evaluator(&config).rule_names().len(), 1);
    }

    #[test]
    fn test_first_story_awarded_once() {
        let graph = StoryGraph::from_content(StoryContent::from_json(STORY).unwrap()).unwrap();
        let ledger = MemoryLedger::default();
        let session = completed(&graph, "quiet", "ending-quiet");

        ledger.set_completed("child-1", 1);
        let awarded = evaluator().evaluate(&session, &graph, &ledger).unwrap();
        assert_eq!(awarded, vec![FIRST_STORY.to_string()]);

        // Re-running is harmless
        let again = evaluator().evaluate(&session, &graph, &ledger).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_first_story_skipped_after_first() {
        let graph = StoryGraph::from_content(StoryContent::from_json(STORY).unwrap()).unwrap();
        let ledger = MemoryLedger::default();
        ledger.set_completed("child-1", 2);

        let session = completed(&graph, "quiet", "ending-quiet");
        assert!(evaluator().evaluate(&session, &graph, &ledger).unwrap().is_empty());
    }

    #[test]
    fn test_ending_badge() {
        let graph = StoryGraph::from_content(StoryContent::from_json(STORY).unwrap()).unwrap();
        let ledger = MemoryLedger::default();
        ledger.set_completed("child-1", 3);

        let session = completed(&graph, "brave", "ending-brave");
        let awarded = evaluator().evaluate(&session, &graph, &ledger).unwrap();
        assert_eq!(awarded, vec!["Brave Voice".to_string()]);
    }

    #[test]
    fn test_requires_completed_session() {
        let graph = StoryGraph::from_content(StoryContent::from_json(STORY).unwrap()).unwrap();
        let ledger = MemoryLedger::default();
        let session = SessionTracker::new(&graph).start("child-1", "story-1").unwrap();

        assert!(matches!(
            evaluator().evaluate(&session, &graph, &ledger),
            Err(Error::InvalidState(_))
        ));
    }
}

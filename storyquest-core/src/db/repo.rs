//! Database repository layer
//!
//! Provides query and insert operations for children, stories, reading
//! sessions and achievements.

use crate::achievements::AchievementLedger;
use crate::error::{Error, Result};
use crate::graph::StoryGraph;
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Database handle with connection
pub struct Database {
    conn: Mutex<Connection>,
}

/// Wrap a decoding failure for a column as a rusqlite conversion error.
fn conversion_error(
    column: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, err.into())
}

fn parse_timestamp(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let idx = row.as_ref().column_index(column)?;
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_optional_timestamp(row: &Row, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let idx = row.as_ref().column_index(column)?;
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &Row, column: &str) -> rusqlite::Result<T> {
    let idx = row.as_ref().column_index(column)?;
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        tracing::debug!(path = %path.display(), "Opened database");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn();
        super::schema::run_migrations(&conn)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Child operations
    // ============================================

    /// Insert a child profile
    pub fn insert_child(&self, child: &Child) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO children (id, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![child.id, child.display_name, child.created_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Get a child by ID
    pub fn get_child(&self, id: &str) -> Result<Option<Child>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM children WHERE id = ?",
            [id],
            Self::row_to_child,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List children, oldest profile first
    pub fn list_children(&self) -> Result<Vec<Child>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM children ORDER BY created_at, id")?;
        let children = stmt
            .query_map([], Self::row_to_child)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(children)
    }

    fn row_to_child(row: &Row) -> rusqlite::Result<Child> {
        Ok(Child {
            id: row.get("id")?,
            display_name: row.get("display_name")?,
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    // ============================================
    // Story operations
    // ============================================

    /// Insert a story, or replace the content of the story with the same slug.
    ///
    /// Returns the id of the stored row, which is the existing id when the
    /// slug was already present.
    pub fn upsert_story(&self, story: &Story) -> Result<String> {
        let content = serde_json::to_string(story.graph.content())?;
        let audio_files = serde_json::to_string(&story.audio_files)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.conn();
        let id: String = conn.query_row(
            r#"
            INSERT INTO stories (id, slug, title, root_node, content, audio_files, digest, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(slug) DO UPDATE SET
                title = excluded.title,
                root_node = excluded.root_node,
                content = excluded.content,
                audio_files = excluded.audio_files,
                digest = excluded.digest,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
            params![
                story.id,
                story.slug,
                story.title,
                story.graph.root_id(),
                content,
                audio_files,
                story.graph.digest(),
                story.created_at.to_rfc3339(),
                now,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Get a story by ID
    pub fn get_story(&self, id: &str) -> Result<Option<Story>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM stories WHERE id = ?",
            [id],
            Self::row_to_story,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Get a story by slug
    pub fn get_story_by_slug(&self, slug: &str) -> Result<Option<Story>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM stories WHERE slug = ?",
            [slug],
            Self::row_to_story,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Look a story up by ID, falling back to slug
    pub fn find_story(&self, id_or_slug: &str) -> Result<Option<Story>> {
        match self.get_story(id_or_slug)? {
            Some(story) => Ok(Some(story)),
            None => self.get_story_by_slug(id_or_slug),
        }
    }

    /// List stories ordered by title
    pub fn list_stories(&self) -> Result<Vec<Story>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM stories ORDER BY title, slug")?;
        let stories = stmt
            .query_map([], Self::row_to_story)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stories)
    }

    fn row_to_story(row: &Row) -> rusqlite::Result<Story> {
        let root_node: String = row.get("root_node")?;
        let content: StoryContent = parse_json(row, "content")?;
        let content_idx = row.as_ref().column_index("content")?;
        let graph = StoryGraph::from_content_with_root(content, &root_node)
            .map_err(|e| conversion_error(content_idx, e))?;

        Ok(Story {
            id: row.get("id")?,
            slug: row.get("slug")?,
            title: row.get("title")?,
            graph,
            audio_files: parse_json(row, "audio_files")?,
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    // ============================================
    // Reading session operations
    // ============================================

    /// Insert a newly started session
    pub fn insert_session(&self, session: &ReadingSession) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO reading_sessions (
                id, child_id, story_id, story_digest, started_at, current_node_id,
                choices_made, nodes_visited, completed_at, duration_secs,
                ending_reached, emotional_response, helpful_rating
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                session.id,
                session.child_id,
                session.story_id,
                session.story_digest,
                session.started_at.to_rfc3339(),
                session.current_node_id,
                serde_json::to_string(&session.choices_made)?,
                serde_json::to_string(&session.nodes_visited)?,
                session.completed_at.map(|t| t.to_rfc3339()),
                session.duration,
                session.ending_reached,
                session.emotional_response.map(|e| e.as_str()),
                session.helpful_rating,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the mutable fields of a stored session.
    ///
    /// Fails with [`Error::SessionNotFound`] if no row has the session's id.
    pub fn update_session(&self, session: &ReadingSession) -> Result<()> {
        let conn = self.conn();
        let updated = conn.execute(
            r#"
            UPDATE reading_sessions SET
                current_node_id = ?2,
                choices_made = ?3,
                nodes_visited = ?4,
                completed_at = ?5,
                duration_secs = ?6,
                ending_reached = ?7,
                emotional_response = ?8,
                helpful_rating = ?9
            WHERE id = ?1
            "#,
            params![
                session.id,
                session.current_node_id,
                serde_json::to_string(&session.choices_made)?,
                serde_json::to_string(&session.nodes_visited)?,
                session.completed_at.map(|t| t.to_rfc3339()),
                session.duration,
                session.ending_reached,
                session.emotional_response.map(|e| e.as_str()),
                session.helpful_rating,
            ],
        )?;

        if updated == 0 {
            return Err(Error::SessionNotFound(session.id.clone()));
        }
        Ok(())
    }

    /// Get a session by ID
    pub fn get_session(&self, id: &str) -> Result<Option<ReadingSession>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM reading_sessions WHERE id = ?",
            [id],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List a child's sessions, most recent first
    pub fn list_child_sessions(&self, child_id: &str) -> Result<Vec<ReadingSession>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM reading_sessions WHERE child_id = ? ORDER BY started_at DESC, id",
        )?;
        let sessions = stmt
            .query_map([child_id], Self::row_to_session)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Number of completed sessions for a child, across all stories
    pub fn count_completed_sessions(&self, child_id: &str) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reading_sessions WHERE child_id = ? AND completed_at IS NOT NULL",
            [child_id],
            |r| r.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<ReadingSession> {
        let emotional_response = match row.get::<_, Option<String>>("emotional_response")? {
            Some(raw) => {
                let idx = row.as_ref().column_index("emotional_response")?;
                Some(
                    raw.parse::<EmotionalResponse>()
                        .map_err(|e| conversion_error(idx, e))?,
                )
            }
            None => None,
        };

        let helpful_rating = match row.get::<_, Option<i64>>("helpful_rating")? {
            Some(raw) => {
                let idx = row.as_ref().column_index("helpful_rating")?;
                Some(u8::try_from(raw).map_err(|e| conversion_error(idx, e))?)
            }
            None => None,
        };

        Ok(ReadingSession {
            id: row.get("id")?,
            child_id: row.get("child_id")?,
            story_id: row.get("story_id")?,
            story_digest: row.get("story_digest")?,
            started_at: parse_timestamp(row, "started_at")?,
            current_node_id: row.get("current_node_id")?,
            choices_made: parse_json(row, "choices_made")?,
            nodes_visited: parse_json(row, "nodes_visited")?,
            completed_at: parse_optional_timestamp(row, "completed_at")?,
            duration: row.get("duration_secs")?,
            ending_reached: row.get("ending_reached")?,
            emotional_response,
            helpful_rating,
        })
    }

    // ============================================
    // Achievement operations
    // ============================================

    /// Insert or update an achievement definition
    pub fn define_achievement(&self, achievement: &Achievement) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO achievements (name, description, icon)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                icon = excluded.icon
            "#,
            params![achievement.name, achievement.description, achievement.icon],
        )?;
        Ok(())
    }

    /// List achievement definitions
    pub fn list_achievements(&self) -> Result<Vec<Achievement>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT name, description, icon FROM achievements ORDER BY name")?;
        let achievements = stmt
            .query_map([], |row| {
                Ok(Achievement {
                    name: row.get("name")?,
                    description: row.get("description")?,
                    icon: row.get("icon")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(achievements)
    }

    /// Record that a child holds an achievement.
    ///
    /// Unknown achievement names are defined on the fly. Returns `false`
    /// when the child already held it.
    pub fn award_achievement(
        &self,
        child_id: &str,
        name: &str,
        session_id: Option<&str>,
        awarded_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO achievements (name) VALUES (?1)",
            [name],
        )?;
        let inserted = tx.execute(
            r#"
            INSERT OR IGNORE INTO child_achievements (child_id, achievement, session_id, awarded_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![child_id, name, session_id, awarded_at.to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(inserted > 0)
    }

    /// Achievements a child holds, in the order they were earned
    pub fn list_child_achievements(&self, child_id: &str) -> Result<Vec<AwardedAchievement>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT child_id, achievement, session_id, awarded_at
            FROM child_achievements
            WHERE child_id = ?
            ORDER BY awarded_at, achievement
            "#,
        )?;
        let awarded = stmt
            .query_map([child_id], |row| {
                Ok(AwardedAchievement {
                    child_id: row.get("child_id")?,
                    name: row.get("achievement")?,
                    session_id: row.get("session_id")?,
                    awarded_at: parse_timestamp(row, "awarded_at")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(awarded)
    }
}

impl AchievementLedger for Database {
    fn count_completed_sessions(&self, child_id: &str) -> Result<u64> {
        Database::count_completed_sessions(self, child_id)
    }

    fn award(&self, child_id: &str, achievement: &str, session_id: Option<&str>) -> Result<bool> {
        self.award_achievement(child_id, achievement, session_id, Utc::now())
    }
}

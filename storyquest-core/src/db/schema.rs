//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: children, stories, reading sessions
    r#"
    CREATE TABLE IF NOT EXISTS children (
        id               TEXT PRIMARY KEY,
        display_name     TEXT NOT NULL,
        created_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS stories (
        id               TEXT PRIMARY KEY,
        slug             TEXT NOT NULL UNIQUE,
        title            TEXT NOT NULL,
        root_node        TEXT NOT NULL DEFAULT 'start',

        -- Authored content, stored as the JSON content document
        content          JSON NOT NULL,
        audio_files      JSON NOT NULL DEFAULT '{}',
        digest           TEXT NOT NULL,

        created_at       DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS reading_sessions (
        id                 TEXT PRIMARY KEY,
        child_id           TEXT NOT NULL REFERENCES children(id),
        story_id           TEXT NOT NULL REFERENCES stories(id),
        story_digest       TEXT,
        started_at         DATETIME NOT NULL,
        current_node_id    TEXT NOT NULL,
        choices_made       JSON NOT NULL,
        nodes_visited      JSON NOT NULL,
        completed_at       DATETIME,
        duration_secs      INTEGER,
        ending_reached     TEXT,
        emotional_response TEXT,
        helpful_rating     INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_child ON reading_sessions(child_id, started_at DESC);
    CREATE INDEX IF NOT EXISTS idx_sessions_story ON reading_sessions(story_id);
    CREATE INDEX IF NOT EXISTS idx_sessions_completed ON reading_sessions(child_id)
        WHERE completed_at IS NOT NULL;
    "#,
    // Version 2: achievements
    r#"
    CREATE TABLE IF NOT EXISTS achievements (
        name             TEXT PRIMARY KEY,
        description      TEXT,
        icon             TEXT
    );

    CREATE TABLE IF NOT EXISTS child_achievements (
        child_id         TEXT NOT NULL REFERENCES children(id),
        achievement      TEXT NOT NULL REFERENCES achievements(name),
        session_id       TEXT REFERENCES reading_sessions(id),
        awarded_at       DATETIME NOT NULL,

        PRIMARY KEY (child_id, achievement)
    );

    INSERT OR IGNORE INTO achievements (name, description, icon)
    VALUES ('First Story', 'Finished a first story', 'star');
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

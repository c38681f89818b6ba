//! storyquest - read branching therapeutic stories from the command line
//!
//! Imports story content, manages child profiles, and drives reading
//! sessions through the storyquest-core engine.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/storyquest/data.db (~/.local/share/storyquest/data.db)
//! - Config: $XDG_CONFIG_HOME/storyquest/config.toml (~/.config/storyquest/config.toml)
//! - Logs: $XDG_STATE_HOME/storyquest/storyquest.log.<YYYY-MM-DD>

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use storyquest_core::format::{format_duration_opt, format_relative_time};
use storyquest_core::{
    CompletionRequest, Config, Database, EmotionalResponse, ProgressUpdate, ReadingService,
    StoryContent, StoryGraph,
};

#[derive(Parser)]
#[command(name = "storyquest")]
#[command(about = "Branching story reader for children")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a story file and store it
    Import {
        /// Path to the story content JSON
        file: PathBuf,

        /// Unique URL-friendly name (default: file stem)
        #[arg(long)]
        slug: Option<String>,

        /// Display title (default: slug)
        #[arg(long)]
        title: Option<String>,

        /// JSON object mapping node IDs to narration files (default: keep the stored map)
        #[arg(long, value_name = "MAP_JSON")]
        audio: Option<PathBuf>,
    },

    /// Check a story file without storing it
    Validate {
        /// Path to the story content JSON
        file: PathBuf,
    },

    /// List stored stories
    Stories,

    /// Manage child profiles
    Child {
        #[command(subcommand)]
        command: ChildCommand,
    },

    /// Start a reading session
    Start {
        /// Child ID
        #[arg(long)]
        child: String,

        /// Story ID or slug
        #[arg(long)]
        story: String,
    },

    /// Take a choice on the current scene
    Choose { session: String, choice: String },

    /// Undo the most recent choice
    Back { session: String },

    /// Apply a progress snapshot saved by a reading client
    Progress {
        session: String,

        /// Path to the snapshot JSON ({choicesMade, nodesVisited, currentNodeId})
        file: PathBuf,
    },

    /// Finish a session at an ending
    Complete {
        session: String,

        /// Ending node ID
        #[arg(long)]
        ending: String,

        /// How the reader felt (happy, sad, confused, scared, hopeful, proud)
        #[arg(long)]
        emotion: Option<EmotionalResponse>,

        /// How helpful the story was, 1 to 5
        #[arg(long)]
        rating: Option<u8>,
    },

    /// Re-run achievement rules for a completed session
    Award { session: String },

    /// Show the current node of a session
    Show {
        session: String,

        /// Output format: text (default) or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List a child's achievements and recent sessions
    Achievements { child: String },
}

#[derive(Subcommand)]
enum ChildCommand {
    /// Add a child profile
    Add { name: String },

    /// List child profiles
    List,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        storyquest_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::debug!("storyquest starting up");

    if let Command::Validate { file } = &args.command {
        return cmd_validate(&config, file);
    }

    // Open database
    let db_path = Config::database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let service = ReadingService::new(db, &config);

    match args.command {
        Command::Import {
            file,
            slug,
            title,
            audio,
        } => cmd_import(&service, &file, slug, title, audio.as_deref()),
        Command::Validate { .. } => Ok(()),
        Command::Stories => cmd_stories(&service),
        Command::Child { command } => match command {
            ChildCommand::Add { name } => cmd_child_add(&service, &name),
            ChildCommand::List => cmd_child_list(&service),
        },
        Command::Start { child, story } => cmd_start(&service, &child, &story),
        Command::Choose { session, choice } => {
            service
                .choose(&session, &choice)
                .with_context(|| format!("failed to take choice '{}'", choice))?;
            print_view(&service, &session)
        }
        Command::Back { session } => {
            service.go_back(&session).context("failed to go back")?;
            print_view(&service, &session)
        }
        Command::Progress { session, file } => cmd_progress(&service, &session, &file),
        Command::Complete {
            session,
            ending,
            emotion,
            rating,
        } => cmd_complete(&service, &session, ending, emotion, rating),
        Command::Award { session } => cmd_award(&service, &session),
        Command::Show { session, format } => cmd_show(&service, &session, &format),
        Command::Achievements { child } => cmd_achievements(&service, &child),
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn cmd_validate(config: &Config, file: &Path) -> Result<()> {
    let json = read_file(file)?;
    let content = StoryContent::from_json(&json).context("failed to parse story content")?;

    let defects = content.defects(&config.story.root_node);
    if !defects.is_empty() {
        for defect in &defects {
            println!("  ✗ {}", defect);
        }
        anyhow::bail!("{} has {} defect(s)", file.display(), defects.len());
    }

    let graph = StoryGraph::from_content_with_root(content, &config.story.root_node)?;
    println!(
        "✓ {} is valid: {} scene(s), {} ending(s)",
        file.display(),
        graph.scenes().len(),
        graph.endings().len()
    );
    for id in graph.unreachable_nodes() {
        println!("  ! {} is not reachable from {}", id, graph.root_id());
    }
    Ok(())
}

fn cmd_import(
    service: &ReadingService,
    file: &Path,
    slug: Option<String>,
    title: Option<String>,
    audio: Option<&Path>,
) -> Result<()> {
    let json = read_file(file)?;
    let audio_files = match audio {
        Some(path) => {
            let map: HashMap<String, String> = serde_json::from_str(&read_file(path)?)
                .with_context(|| format!("{} is not a JSON object of strings", path.display()))?;
            Some(map)
        }
        None => None,
    };
    let slug = match slug {
        Some(slug) => slug,
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .context("cannot derive a slug from the file name; pass --slug")?,
    };
    let title = title.unwrap_or_else(|| slug.clone());

    let story = service
        .import_story_with_audio(&slug, &title, &json, audio_files)
        .with_context(|| format!("failed to import {}", file.display()))?;

    println!("Imported story: {}", story.slug);
    println!("  ID:      {}", story.id);
    println!("  Title:   {}", story.title);
    println!("  Nodes:   {}", story.graph.node_count());
    println!("  Endings: {}", story.graph.endings().len());
    if !story.audio_files.is_empty() {
        println!("  Audio:   {} narrated node(s)", story.audio_files.len());
    }
    Ok(())
}

fn cmd_stories(service: &ReadingService) -> Result<()> {
    let stories = service.database().list_stories()?;
    if stories.is_empty() {
        println!("No stories found in database.");
        println!("Run 'storyquest import <file>' to add one.");
        return Ok(());
    }

    for story in stories {
        println!(
            "{:<24} {:<36} {} ({} nodes)",
            story.slug,
            story.id,
            story.title,
            story.graph.node_count()
        );
    }
    Ok(())
}

fn cmd_child_add(service: &ReadingService, name: &str) -> Result<()> {
    let child = service.add_child(name).context("failed to add child")?;
    println!("Child: {}", child.id);
    Ok(())
}

fn cmd_child_list(service: &ReadingService) -> Result<()> {
    let children = service.database().list_children()?;
    if children.is_empty() {
        println!("No children found in database.");
        return Ok(());
    }

    for child in children {
        println!(
            "{:<36} {:<20} added {}",
            child.id,
            child.display_name,
            format_relative_time(child.created_at)
        );
    }
    Ok(())
}

fn cmd_start(service: &ReadingService, child: &str, story: &str) -> Result<()> {
    let session = service
        .start_session(child, story)
        .context("failed to start reading session")?;
    println!("Session: {}", session.id);
    println!();
    print_view(service, &session.id)
}

fn cmd_progress(service: &ReadingService, session_id: &str, file: &Path) -> Result<()> {
    let json = read_file(file)?;
    let update: ProgressUpdate =
        serde_json::from_str(&json).context("failed to parse progress snapshot")?;

    let session = service
        .save_progress(session_id, &update)
        .context("failed to save progress")?;
    println!(
        "Progress saved: {} choice(s), {} node(s) visited",
        session.choices_made.len(),
        session.nodes_visited.len()
    );
    Ok(())
}

fn cmd_complete(
    service: &ReadingService,
    session_id: &str,
    ending: String,
    emotion: Option<EmotionalResponse>,
    rating: Option<u8>,
) -> Result<()> {
    let request = CompletionRequest {
        ending_reached: ending,
        emotional_response: emotion,
        helpful_rating: rating,
    };

    let outcome = service
        .complete(session_id, &request)
        .context("failed to complete session")?;

    println!("Story complete!");
    println!("  Ending:   {}", request.ending_reached);
    println!(
        "  Duration: {}",
        format_duration_opt(outcome.session.duration)
    );
    println!("  Visited:  {} node(s)", outcome.session.scenes_visited());
    for achievement in &outcome.awarded {
        println!("  🏆 Achievement unlocked: {}", achievement);
    }
    if outcome.achievements_pending {
        println!(
            "  Achievements could not be checked. Run 'storyquest award {}' to retry.",
            session_id
        );
    }
    Ok(())
}

fn cmd_award(service: &ReadingService, session_id: &str) -> Result<()> {
    let awarded = service
        .evaluate_achievements(session_id)
        .context("failed to evaluate achievements")?;

    if awarded.is_empty() {
        println!("No new achievements.");
    }
    for achievement in &awarded {
        println!("  🏆 Achievement unlocked: {}", achievement);
    }
    Ok(())
}

fn cmd_show(service: &ReadingService, session_id: &str, format: &str) -> Result<()> {
    match format {
        "json" => {
            let view = service
                .session_view(session_id)
                .context("failed to load session")?;
            println!("{}", serde_json::to_string_pretty(&view.session)?);
            Ok(())
        }
        "text" => print_view(service, session_id),
        other => anyhow::bail!("unknown format '{}' (expected text or json)", other),
    }
}

fn cmd_achievements(service: &ReadingService, child_id: &str) -> Result<()> {
    let db = service.database();
    let child = db
        .get_child(child_id)?
        .with_context(|| format!("no child with id '{}'", child_id))?;

    println!("{}", child.display_name);
    println!("{}", "=".repeat(child.display_name.chars().count()));
    println!();

    let awarded = db.list_child_achievements(&child.id)?;
    if awarded.is_empty() {
        println!("No achievements yet.");
    } else {
        println!("Achievements:");
        for achievement in awarded {
            println!(
                "  🏆 {:<24} {}",
                achievement.name,
                format_relative_time(achievement.awarded_at)
            );
        }
    }

    let sessions = db.list_child_sessions(&child.id)?;
    let completed = sessions.iter().filter(|s| s.is_completed()).count();
    println!();
    println!("Sessions: {} ({} completed)", sessions.len(), completed);
    for session in sessions.iter().take(10) {
        println!(
            "  {:<36} {:<12} {:>8}  {}",
            session.id,
            session.state().as_str(),
            format_duration_opt(session.duration),
            session.ending_reached.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn print_view(service: &ReadingService, session_id: &str) -> Result<()> {
    let view = service
        .session_view(session_id)
        .context("failed to load session")?;

    println!("{} [{}]", view.story_title, view.node_id);
    println!();
    println!("{}", view.text);
    if let Some(audio) = &view.audio {
        println!("  ♪ {}", audio);
    }
    println!();

    if view.is_ending {
        if let Some(message) = &view.ending_message {
            println!("{}", message);
            println!();
        }
        if view.session.is_completed() {
            println!("This story is finished.");
        } else {
            println!(
                "The end. Run 'storyquest complete {} --ending {}' to finish.",
                view.session.id, view.node_id
            );
        }
    } else {
        for choice in &view.choices {
            match &choice.icon {
                Some(icon) => println!("  [{}] {} {}", choice.id, icon, choice.text),
                None => println!("  [{}] {}", choice.id, choice.text),
            }
        }
    }

    if view.can_go_back {
        println!();
        println!("(Run 'storyquest back {}' to undo the last choice)", view.session.id);
    }
    Ok(())
}

//! Command-line definitions for the `basilisk` binary.

use basilisk_core::{MediaRef, MessageKind, MessageStatus, PromptKind};
use basilisk_store::{SortField, SortOrder};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

/// Scheduled video posts: queue, render, publish.
#[derive(Parser, Debug)]
#[command(name = "basilisk")]
#[command(version, about = "Schedule messages and publish them as narrated videos")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (default: $BASILISK_CONFIG, then ~/.basilisk/basilisk.toml).
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler daemon: dispatch loop, workers and auto-poster.
    Run,

    /// Create, edit and inspect messages.
    #[command(subcommand)]
    Message(MessageCommand),

    /// Manage background videos.
    #[command(subcommand)]
    Media(MediaCommand),

    /// Manage prompt configurations.
    #[command(subcommand)]
    Prompt(PromptCommand),

    /// Run the publish pipeline for one message right now, bypassing the queue.
    PostNow {
        kind: MessageKind,
        id: String,
    },

    /// Talk to the active conversational prompt; replies stream to stdout.
    Chat {
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Turn the hourly auto-poster on or off.
    #[command(subcommand)]
    Scheduler(SchedulerCommand),
}

#[derive(Subcommand, Debug)]
pub enum MessageCommand {
    Create(CreateArgs),
    Update(UpdateArgs),
    Delete {
        kind: MessageKind,
        id: String,
    },
    Show {
        kind: MessageKind,
        id: String,
    },
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    pub kind: MessageKind,

    /// Left empty, terror content is generated from the active prompt.
    #[arg(long)]
    pub content: Option<String>,

    /// RFC 3339 publish time. Implies `--status scheduled` unless given.
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,

    #[arg(long)]
    pub status: Option<MessageStatus>,

    /// Media asset id, or `random`.
    #[arg(long, value_parser = parse_media_ref, allow_hyphen_values = true, default_value = "random")]
    pub media: MediaRef,

    #[arg(long)]
    pub chapter_number: Option<u32>,

    #[arg(long)]
    pub caption: Option<String>,

    /// Generation temperature (default: random in 0.7..1.3).
    #[arg(long)]
    pub temperature: Option<f32>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub kind: MessageKind,
    pub id: String,

    #[arg(long)]
    pub content: Option<String>,

    #[arg(long, conflicts_with = "clear_at")]
    pub at: Option<DateTime<Utc>>,

    #[arg(long)]
    pub clear_at: bool,

    #[arg(long)]
    pub status: Option<MessageStatus>,

    #[arg(long, value_parser = parse_media_ref, allow_hyphen_values = true)]
    pub media: Option<MediaRef>,

    #[arg(long)]
    pub chapter_number: Option<u32>,

    #[arg(long, conflicts_with = "clear_caption")]
    pub caption: Option<String>,

    #[arg(long)]
    pub clear_caption: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    pub kind: MessageKind,

    #[arg(long)]
    pub status: Option<MessageStatus>,

    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    #[arg(long)]
    pub to: Option<DateTime<Utc>>,

    #[arg(long, value_parser = parse_media_ref, allow_hyphen_values = true)]
    pub media: Option<MediaRef>,

    #[arg(long)]
    pub search: Option<String>,

    /// created_at | scheduled_at | status | id
    #[arg(long, default_value = "created_at")]
    pub sort: SortField,

    #[arg(long, default_value = "desc")]
    pub order: SortOrder,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}

#[derive(Subcommand, Debug)]
pub enum MediaCommand {
    /// Register a background video by its stored path.
    Add {
        kind: MessageKind,
        /// Stored path, e.g. `media-file/forest.mp4`.
        filepath: String,
        /// Display name (default: last path segment).
        #[arg(long)]
        name: Option<String>,
    },
    List {
        #[arg(long)]
        kind: Option<MessageKind>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    Delete {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum PromptCommand {
    Add {
        kind: PromptKind,
        #[arg(long)]
        system: String,
        #[arg(long)]
        greeting: Option<String>,
        /// Make this the active prompt of its kind.
        #[arg(long)]
        active: bool,
    },
    List {
        #[arg(long)]
        kind: Option<PromptKind>,
    },
    Activate {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum SchedulerCommand {
    Enable,
    Disable,
    /// Switch state and queued jobs.
    Status,
}

fn parse_media_ref(s: &str) -> Result<MediaRef, String> {
    if s.eq_ignore_ascii_case("random") {
        return Ok(MediaRef::Random);
    }
    s.parse::<i64>()
        .map(MediaRef::from)
        .map_err(|_| format!("expected a media id or `random`, got {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn media_ref_accepts_sentinel_forms() {
        assert_eq!(parse_media_ref("random"), Ok(MediaRef::Random));
        assert_eq!(parse_media_ref("-1"), Ok(MediaRef::Random));
        assert_eq!(parse_media_ref("12"), Ok(MediaRef::Asset(12)));
        assert!(parse_media_ref("forest").is_err());
    }

    #[test]
    fn create_with_time() {
        let cli = Cli::try_parse_from([
            "basilisk",
            "message",
            "create",
            "terror",
            "--at",
            "2026-10-17T01:00:00Z",
            "--media",
            "-1",
        ])
        .unwrap();
        let Command::Message(MessageCommand::Create(args)) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.kind, MessageKind::Terror);
        assert_eq!(args.media, MediaRef::Random);
        assert!(args.at.is_some());
        assert!(args.status.is_none());
    }
}

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use basilisk_agent::{random_temperature, ChatMessage, StreamEvent};
use basilisk_core::{ChapterMeta, MessageKind, MessageStatus};
use basilisk_messages::{AutoPoster, MessageDraft, MessagePatch};
use basilisk_scheduler::{JobState, SchedulerEngine, WorkerPool};
use basilisk_store::{MediaQuery, MessageQuery, NewPrompt};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::app::App;
use crate::cli::{
    CreateArgs, ListArgs, MediaCommand, MessageCommand, PromptCommand, SchedulerCommand,
    UpdateArgs,
};

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Daemon: reconcile, then run the dispatch loop, the worker pool and the
/// auto-poster until ctrl-c.
pub async fn run(app: App) -> anyhow::Result<()> {
    let executor = Arc::new(app.pipeline().context("pipeline configuration")?);

    let report = app.messages.reconcile()?;
    info!(
        enqueued = report.enqueued,
        removed = report.removed,
        overdue = report.overdue,
        "startup reconcile done"
    );

    let sched = &app.config.scheduler;
    let (dispatch_tx, dispatch_rx) = mpsc::channel(sched.workers);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = WorkerPool::new(app.queue.clone(), executor, sched.workers);
    let stats = pool.stats();
    let ready = pool.ready();
    let workers = pool.spawn(dispatch_rx);

    let engine = SchedulerEngine::new(
        app.queue.clone(),
        dispatch_tx,
        Duration::from_millis(sched.poll_interval_ms),
    )
    .with_ready_workers(ready);
    let engine_task = tokio::spawn(engine.run(shutdown_rx.clone()));

    let poster = AutoPoster::new(
        Arc::clone(&app.messages),
        Arc::clone(&app.switch),
        sched.autopost.clone(),
    );
    let poster_task = tokio::spawn(poster.run(shutdown_rx));

    info!(
        workers = sched.workers,
        autopost = app.switch.is_enabled()?,
        "basilisk running, ctrl-c to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    engine_task.await?;
    poster_task.await?;
    // the engine owned the sender; workers finish their current job and exit
    for w in workers {
        w.await?;
    }
    info!(
        completed = stats.completed(),
        failed = stats.failed(),
        retried = stats.retried(),
        "basilisk stopped"
    );
    Ok(())
}

pub async fn message(app: &App, cmd: MessageCommand) -> anyhow::Result<()> {
    match cmd {
        MessageCommand::Create(args) => {
            let m = app.messages.create(draft_from(args)).await?;
            print_json(&m)
        }
        MessageCommand::Update(args) => {
            let (kind, id, patch) = patch_from(args);
            let m = app.messages.update(kind, &id, patch).await?;
            print_json(&m)
        }
        MessageCommand::Delete { kind, id } => {
            app.messages.delete(kind, &id)?;
            println!("deleted {kind} message {id}");
            Ok(())
        }
        MessageCommand::Show { kind, id } => print_json(&app.messages.find(kind, &id)?),
        MessageCommand::List(args) => {
            let kind = args.kind;
            let page = app.messages.list(kind, &query_from(args))?;
            print_json(&page)
        }
    }
}

fn draft_from(args: CreateArgs) -> MessageDraft {
    let status = args.status.unwrap_or(if args.at.is_some() {
        MessageStatus::Scheduled
    } else {
        MessageStatus::Draft
    });
    let chapter = (args.chapter_number.is_some() || args.caption.is_some()).then(|| ChapterMeta {
        number: args.chapter_number.unwrap_or(0),
        caption: args.caption,
    });
    MessageDraft {
        kind: args.kind,
        content: args.content,
        media_ref: args.media,
        scheduled_at: args.at,
        status,
        chapter,
        temperature: args.temperature,
    }
}

fn patch_from(args: UpdateArgs) -> (MessageKind, String, MessagePatch) {
    let scheduled_at = if args.clear_at {
        Some(None)
    } else {
        args.at.map(Some)
    };
    let caption = if args.clear_caption {
        Some(None)
    } else {
        args.caption.map(Some)
    };
    let patch = MessagePatch {
        content: args.content,
        media_ref: args.media,
        scheduled_at,
        status: args.status,
        chapter_number: args.chapter_number,
        caption,
    };
    (args.kind, args.id, patch)
}

fn query_from(args: ListArgs) -> MessageQuery {
    MessageQuery {
        status: args.status,
        scheduled_from: args.from,
        scheduled_to: args.to,
        media_ref: args.media,
        search: args.search,
        sort: args.sort,
        order: args.order,
        page: args.page,
        limit: args.limit,
    }
}

pub fn media(app: &App, cmd: MediaCommand) -> anyhow::Result<()> {
    match cmd {
        MediaCommand::Add {
            kind,
            filepath,
            name,
        } => {
            let filename = name.unwrap_or_else(|| {
                Path::new(&filepath.replace('\\', "/"))
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| filepath.clone())
            });
            print_json(&app.store.add_media(&filename, &filepath, kind)?)
        }
        MediaCommand::List {
            kind,
            search,
            page,
            limit,
        } => print_json(&app.store.list_media(&MediaQuery {
            kind,
            search,
            page,
            limit,
        })?),
        MediaCommand::Delete { id } => {
            app.store.delete_media(id)?;
            println!("deleted media {id}");
            Ok(())
        }
    }
}

pub fn prompt(app: &App, cmd: PromptCommand) -> anyhow::Result<()> {
    match cmd {
        PromptCommand::Add {
            kind,
            system,
            greeting,
            active,
        } => print_json(&app.store.add_prompt(&NewPrompt {
            system_prompt: system,
            greeting,
            kind,
            is_active: active,
        })?),
        PromptCommand::List { kind } => print_json(&app.store.prompts(kind)?),
        PromptCommand::Activate { id } => print_json(&app.store.set_active_prompt(id)?),
    }
}

/// Run the pipeline inline. A pending job for the message is dropped once
/// the post exists so it cannot publish twice.
pub async fn post_now(app: &App, kind: MessageKind, id: &str) -> anyhow::Result<()> {
    let executor = app.pipeline().context("pipeline configuration")?;
    let message = app.messages.find(kind, id)?;
    let outcome = executor.run(&message).await?;
    app.messages.scheduler().cancel(id)?;
    print_json(&outcome)
}

/// Line-oriented chat on stdin; each reply is printed as it streams.
pub async fn chat(app: &App, temperature: Option<f32>) -> anyhow::Result<()> {
    let generator = app
        .generator
        .clone()
        .context("chat needs a configured [completion] provider")?;

    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        history.push(ChatMessage::user(line));

        let temp = temperature.unwrap_or_else(random_temperature);
        let mut rx = generator.stream_conversation(history.clone(), temp).await?;
        let mut reply = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    print!("{text}");
                    stdout.flush()?;
                    reply.push_str(&text);
                }
                StreamEvent::Done { .. } => break,
                StreamEvent::Error { message } => {
                    eprintln!("\n[error] {message}");
                    break;
                }
            }
        }
        println!();
        if reply.is_empty() {
            // keep user/assistant turns alternating
            history.pop();
        } else {
            history.push(ChatMessage::assistant(reply));
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct SchedulerStatus {
    autopost_enabled: bool,
    delayed: usize,
    active: usize,
    failed: usize,
}

pub fn scheduler(app: &App, cmd: SchedulerCommand) -> anyhow::Result<()> {
    match cmd {
        SchedulerCommand::Enable => {
            app.switch.enable()?;
            println!("auto-post enabled");
        }
        SchedulerCommand::Disable => {
            app.switch.disable()?;
            println!("auto-post disabled");
        }
        SchedulerCommand::Status => {
            let jobs = app.queue.jobs(None)?;
            let count = |state: JobState| jobs.iter().filter(|j| j.state == state).count();
            print_json(&SchedulerStatus {
                autopost_enabled: app.switch.is_enabled()?,
                delayed: count(JobState::Delayed),
                active: count(JobState::Active),
                failed: count(JobState::Failed),
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::cli::{Cli, Command};

    #[test]
    fn create_without_time_is_a_draft() {
        let cli = Cli::try_parse_from(["basilisk", "message", "create", "chapter", "--caption", "Ch. 1"])
            .unwrap();
        let Command::Message(MessageCommand::Create(args)) = cli.command else {
            panic!("wrong command");
        };
        let draft = draft_from(args);
        assert_eq!(draft.status, MessageStatus::Draft);
        assert_eq!(
            draft.chapter,
            Some(ChapterMeta {
                number: 0,
                caption: Some("Ch. 1".into())
            })
        );
    }

    #[test]
    fn update_flags_map_to_patch() {
        let cli = Cli::try_parse_from([
            "basilisk", "message", "update", "terror", "m-1", "--clear-at", "--status", "draft",
        ])
        .unwrap();
        let Command::Message(MessageCommand::Update(args)) = cli.command else {
            panic!("wrong command");
        };
        let (kind, id, patch) = patch_from(args);
        assert_eq!(kind, MessageKind::Terror);
        assert_eq!(id, "m-1");
        assert_eq!(patch.scheduled_at, Some(None));
        assert_eq!(patch.status, Some(MessageStatus::Draft));
        assert_eq!(patch.caption, None);
    }
}

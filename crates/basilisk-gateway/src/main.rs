use clap::Parser;
use tracing::warn;

mod app;
mod cli;
mod commands;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "basilisk_gateway=info,basilisk_scheduler=info,basilisk_pipeline=info,\
                 basilisk_messages=info,basilisk_agent=info,basilisk_store=warn"
                    .into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // explicit flag > BASILISK_CONFIG env > ~/.basilisk/basilisk.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("BASILISK_CONFIG").ok());
    let config = basilisk_core::BasiliskConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        basilisk_core::BasiliskConfig::default()
    });

    let app = app::App::open(config)?;

    match cli.command {
        Command::Run => commands::run(app).await,
        Command::Message(cmd) => commands::message(&app, cmd).await,
        Command::Media(cmd) => commands::media(&app, cmd),
        Command::Prompt(cmd) => commands::prompt(&app, cmd),
        Command::PostNow { kind, id } => commands::post_now(&app, kind, &id).await,
        Command::Chat { temperature } => commands::chat(&app, temperature).await,
        Command::Scheduler(cmd) => commands::scheduler(&app, cmd),
    }
}

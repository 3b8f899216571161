use std::path::Path;
use std::sync::Arc;

use basilisk_agent::{ContentGenerator, OpenAiCompatProvider};
use basilisk_core::BasiliskConfig;
use basilisk_messages::MessageService;
use basilisk_pipeline::PipelineExecutor;
use basilisk_scheduler::{JobQueue, PublishScheduler, RetryPolicy, SchedulerSwitch};
use basilisk_store::Store;
use rusqlite::Connection;
use tracing::{info, warn};

/// Everything the commands share, wired from one config.
pub struct App {
    pub config: BasiliskConfig,
    pub store: Arc<Store>,
    pub queue: JobQueue,
    pub switch: Arc<SchedulerSwitch>,
    pub generator: Option<Arc<ContentGenerator>>,
    pub messages: Arc<MessageService>,
}

impl App {
    /// Open the database (one file, one connection per subsystem) and build
    /// the services. Pipeline clients are built separately by [`App::pipeline`]
    /// so that commands which never publish need no credentials.
    pub fn open(config: BasiliskConfig) -> anyhow::Result<Self> {
        let db_path = config.database.path.clone();
        ensure_parent_dir(&db_path);
        info!(path = %db_path, "opening SQLite database");

        let store = Arc::new(Store::new(open_db(&db_path)?)?);
        let queue = JobQueue::new(
            open_db(&db_path)?,
            RetryPolicy::from(&config.scheduler),
        )?;
        let switch = Arc::new(SchedulerSwitch::new(
            open_db(&db_path)?,
            config.scheduler.autopost.enabled,
        )?);

        let generator = build_generator(&config, &store)?;
        let messages = Arc::new(MessageService::new(
            Arc::clone(&store),
            PublishScheduler::new(queue.clone()),
            generator.clone(),
        ));

        Ok(Self {
            config,
            store,
            queue,
            switch,
            generator,
            messages,
        })
    }

    /// Fails when speech or publisher credentials are missing.
    pub fn pipeline(&self) -> anyhow::Result<PipelineExecutor> {
        Ok(PipelineExecutor::from_config(
            Arc::clone(&self.store),
            &self.config,
        )?)
    }
}

/// No `[completion]` section means no generation. A section that cannot
/// build a provider is a startup error.
fn build_generator(
    config: &BasiliskConfig,
    store: &Arc<Store>,
) -> anyhow::Result<Option<Arc<ContentGenerator>>> {
    let Some(cfg) = &config.completion else {
        warn!("no [completion] section: empty terror content will not be generated");
        return Ok(None);
    };
    let provider = OpenAiCompatProvider::from_config(cfg)?;
    info!(model = %cfg.model, base_url = %cfg.base_url, "completion provider configured");
    Ok(Some(Arc::new(ContentGenerator::from_config(
        Arc::clone(store),
        Arc::new(provider),
        cfg,
    ))))
}

fn open_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), "cannot create database directory: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basilisk_core::config::CompletionConfig;

    fn in_memory_config() -> BasiliskConfig {
        let mut config = BasiliskConfig::default();
        config.database.path = ":memory:".into();
        config
    }

    #[test]
    fn completion_without_api_key_fails_startup() {
        let mut config = in_memory_config();
        config.completion = Some(CompletionConfig::default());
        let err = App::open(config).err().expect("open must fail");
        let err = err.downcast_ref::<basilisk_core::BasiliskError>().unwrap();
        assert_eq!(err.code(), "EXTERNAL_CONFIG_ERROR");
    }

    #[test]
    fn completion_section_is_optional() {
        let app = App::open(in_memory_config()).unwrap();
        assert!(app.generator.is_none());
    }

    #[test]
    fn completion_with_api_key_builds_generator() {
        let mut config = in_memory_config();
        config.completion = Some(CompletionConfig {
            api_key: "sk-test".into(),
            ..Default::default()
        });
        let app = App::open(config).unwrap();
        assert!(app.generator.is_some());
    }
}

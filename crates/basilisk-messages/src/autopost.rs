use std::sync::Arc;
use std::time::Duration;

use basilisk_core::config::AutopostConfig;
use basilisk_core::{Message, MessageKind, Result};
use basilisk_scheduler::SchedulerSwitch;
use chrono::{DateTime, DurationRound, FixedOffset, Offset, Timelike, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::service::{MessageDraft, MessageService};

/// Creates a scheduled terror message at the configured local hours while
/// the scheduler switch is on.
pub struct AutoPoster {
    messages: Arc<MessageService>,
    switch: Arc<SchedulerSwitch>,
    config: AutopostConfig,
}

impl AutoPoster {
    pub fn new(
        messages: Arc<MessageService>,
        switch: Arc<SchedulerSwitch>,
        config: AutopostConfig,
    ) -> Self {
        Self {
            messages,
            switch,
            config,
        }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.config.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Whether `now` falls in one of the target hours, in local time.
    pub fn is_target_hour(&self, now: DateTime<Utc>) -> bool {
        let hour = now.with_timezone(&self.offset()).hour();
        self.config.target_hours.contains(&hour)
    }

    /// Start of the hour `lead_hours` after the current one.
    pub fn next_slot(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lead = i64::from(self.config.lead_hours.max(1));
        top_of_hour(now) + chrono::Duration::hours(lead)
    }

    /// One auto-post decision. Reads the switch once.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<Option<Message>> {
        if !self.switch.is_enabled()? {
            debug!("auto-post disabled");
            return Ok(None);
        }
        if !self.is_target_hour(now) {
            return Ok(None);
        }
        let draft = MessageDraft::scheduled(MessageKind::Terror, self.next_slot(now));
        let message = self.messages.create(draft).await?;
        info!(message_id = %message.id, scheduled_at = ?message.scheduled_at, "auto-post message created");
        Ok(Some(message))
    }

    /// Tick at the top of every hour until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            hours = ?self.config.target_hours,
            utc_offset = self.config.utc_offset_hours,
            "auto-poster started"
        );
        loop {
            let wait = until_next_hour(Utc::now());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.tick_at(basilisk_core::time::now()).await {
                        error!(code = e.code(), "auto-post failed: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("auto-poster shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn top_of_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(chrono::Duration::hours(1)).unwrap_or(now)
}

/// Sleep until just past the next `:00`.
fn until_next_hour(now: DateTime<Utc>) -> Duration {
    let next = top_of_hour(now) + chrono::Duration::hours(1);
    (next - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        + Duration::from_millis(50)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn trunc_and_wait() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 3, 59, 30).unwrap();
        assert_eq!(
            top_of_hour(now),
            Utc.with_ymd_and_hms(2026, 10, 16, 3, 0, 0).unwrap()
        );
        assert_eq!(until_next_hour(now), Duration::from_millis(30_050));
    }
}

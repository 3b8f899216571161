use std::collections::HashSet;
use std::sync::Arc;

use basilisk_agent::{random_temperature, ContentGenerator};
use basilisk_core::{
    BasiliskError, ChapterMeta, MediaRef, Message, MessageKind, MessageStatus, Result,
};
use basilisk_scheduler::{JobState, PublishScheduler};
use basilisk_store::{MessageQuery, Page, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

/// Input for [`MessageService::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_ref: MediaRef,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default = "draft_status")]
    pub status: MessageStatus,
    /// Chapter messages only.
    #[serde(default)]
    pub chapter: Option<ChapterMeta>,
    /// Generation temperature; random in `[0.7, 1.3)` when unset.
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn draft_status() -> MessageStatus {
    MessageStatus::Draft
}

impl MessageDraft {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            content: None,
            media_ref: MediaRef::Random,
            scheduled_at: None,
            status: MessageStatus::Draft,
            chapter: None,
            temperature: None,
        }
    }

    pub fn scheduled(kind: MessageKind, at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: Some(at),
            status: MessageStatus::Scheduled,
            ..Self::new(kind)
        }
    }
}

/// Partial update. Outer `None` leaves a field unchanged; for clearable
/// fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub media_ref: Option<MediaRef>,
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
    pub status: Option<MessageStatus>,
    pub chapter_number: Option<u32>,
    pub caption: Option<Option<String>>,
}

/// What [`MessageService::reconcile`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Scheduled messages that had no job and got one.
    pub enqueued: usize,
    /// Jobs whose message is gone or no longer scheduled.
    pub removed: usize,
    /// Scheduled messages whose time passed without a job. Left alone.
    pub overdue: usize,
}

/// Message create / update / delete with the matching queue operations.
pub struct MessageService {
    store: Arc<Store>,
    scheduler: PublishScheduler,
    generator: Option<Arc<ContentGenerator>>,
}

impl MessageService {
    pub fn new(
        store: Arc<Store>,
        scheduler: PublishScheduler,
        generator: Option<Arc<ContentGenerator>>,
    ) -> Self {
        Self {
            store,
            scheduler,
            generator,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn scheduler(&self) -> &PublishScheduler {
        &self.scheduler
    }

    /// Persist a new message and enqueue its job when it is scheduled.
    ///
    /// Terror messages without content get generated content first. When no
    /// prompt is active the content stays empty and scheduling proceeds.
    #[instrument(skip(self, draft), fields(kind = %draft.kind, status = %draft.status))]
    pub async fn create(&self, draft: MessageDraft) -> Result<Message> {
        validate_draft(&draft)?;

        let mut message = Message::new(draft.kind);
        message.content = draft.content;
        message.media_ref = draft.media_ref;
        message.scheduled_at = draft.scheduled_at;
        message.status = draft.status;
        if draft.kind == MessageKind::Chapter {
            message.chapter = Some(draft.chapter.unwrap_or_default());
        }

        if message.kind == MessageKind::Terror && message.text().is_empty() {
            let temperature = draft.temperature.unwrap_or_else(random_temperature);
            let generated = match &self.generator {
                Some(generator) => generator.generate_message(temperature).await?,
                None => None,
            };
            message.content = Some(generated.unwrap_or_default());
        }

        let now = basilisk_core::time::now();
        if message.status == MessageStatus::Scheduled {
            check_schedulable(&message, now)?;
        }

        self.store.insert_message(&message)?;
        info!(message_id = %message.id, "message created");

        if message.status == MessageStatus::Scheduled {
            self.enqueue(&message, now)?;
        }
        Ok(message)
    }

    /// Apply `patch` and move the queue along with the status change.
    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        kind: MessageKind,
        id: &str,
        patch: MessagePatch,
    ) -> Result<Message> {
        let old = self.find(kind, id)?;
        let mut new = old.clone();

        if let Some(content) = patch.content {
            new.content = Some(content);
        }
        if let Some(media_ref) = patch.media_ref {
            new.media_ref = media_ref;
        }
        if let Some(at) = patch.scheduled_at {
            new.scheduled_at = at;
        }
        if let Some(status) = patch.status {
            if status == MessageStatus::Posted && old.status != MessageStatus::Posted {
                return Err(BasiliskError::Validation(
                    "status posted is only set by a successful publish".into(),
                ));
            }
            if !old.status.can_transition_to(status) {
                return Err(BasiliskError::Validation(format!(
                    "cannot move a {} message to {status}",
                    old.status
                )));
            }
            new.status = status;
        }
        if patch.chapter_number.is_some() || patch.caption.is_some() {
            let Some(chapter) = new.chapter.as_mut() else {
                return Err(BasiliskError::Validation(
                    "chapter fields only apply to chapter messages".into(),
                ));
            };
            if let Some(number) = patch.chapter_number {
                chapter.number = number;
            }
            if let Some(caption) = patch.caption {
                chapter.caption = caption;
            }
        }
        validate_media_ref(new.media_ref)?;

        let action = QueueAction::between(&old, &new);
        let now = basilisk_core::time::now();
        if matches!(action, QueueAction::Schedule | QueueAction::Reschedule) {
            check_schedulable(&new, now)?;
        }
        if action != QueueAction::None {
            self.scheduler.ensure_not_running(&new.id)?;
        }

        self.store.update_message(&new)?;

        match action {
            QueueAction::Schedule => self.enqueue(&new, now)?,
            QueueAction::Cancel => self.scheduler.cancel(&new.id)?,
            QueueAction::Reschedule => {
                self.scheduler.reschedule_at(&new, now)?;
            }
            QueueAction::None => {}
        }
        info!(message_id = %new.id, status = %new.status, ?action, "message updated");
        Ok(new)
    }

    /// Cancel any pending job, then delete. Refused while the message is being
    /// published.
    #[instrument(skip(self))]
    pub fn delete(&self, kind: MessageKind, id: &str) -> Result<()> {
        let message = self.find(kind, id)?;
        self.scheduler.ensure_not_running(&message.id)?;
        self.scheduler.cancel(&message.id)?;
        self.store.delete_message(kind, id)?;
        info!(message_id = %id, "message deleted");
        Ok(())
    }

    pub fn find(&self, kind: MessageKind, id: &str) -> Result<Message> {
        self.store
            .message(kind, id)?
            .ok_or_else(|| BasiliskError::not_found("message", id))
    }

    pub fn list(&self, kind: MessageKind, query: &MessageQuery) -> Result<Page<Message>> {
        Ok(self.store.messages(kind, query)?)
    }

    /// Scheduled messages that have not reached their time yet.
    pub fn find_scheduled(&self, kind: MessageKind) -> Result<Vec<Message>> {
        Ok(self
            .store
            .scheduled_messages(kind, basilisk_core::time::now())?)
    }

    pub fn find_by_status(&self, kind: MessageKind, status: MessageStatus) -> Result<Vec<Message>> {
        Ok(self.store.messages_by_status(kind, status)?)
    }

    /// Bring the queue back in line with the stores.
    ///
    /// Runs before the dispatch loop starts, so no job is active except ones
    /// left by a crash; those are skipped.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconcile_at(basilisk_core::time::now())
    }

    #[instrument(skip(self))]
    pub fn reconcile_at(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut scheduled_ids = HashSet::new();

        for kind in MessageKind::ALL {
            for message in self.store.messages_by_status(kind, MessageStatus::Scheduled)? {
                scheduled_ids.insert(message.id.clone());
                if self.scheduler.has_job(&message.id)? {
                    continue;
                }
                match message.scheduled_at {
                    Some(at) if at > now => match self.scheduler.schedule_at(&message, now) {
                        Ok(_) => report.enqueued += 1,
                        Err(e) => warn!(message_id = %message.id, "cannot enqueue: {e}"),
                    },
                    _ => {
                        warn!(message_id = %message.id, kind = %kind, "scheduled message is overdue and has no job");
                        report.overdue += 1;
                    }
                }
            }
        }

        for job in self.scheduler.queue().jobs(None)? {
            if job.state == JobState::Active || scheduled_ids.contains(&job.key) {
                continue;
            }
            if self.scheduler.queue().remove(&job.key)? {
                report.removed += 1;
            }
        }

        info!(
            enqueued = report.enqueued,
            removed = report.removed,
            overdue = report.overdue,
            "queue reconciled"
        );
        Ok(report)
    }

    /// The store already says Scheduled; a queue failure here leaves the two
    /// out of step until the next reconcile.
    fn enqueue(&self, message: &Message, now: DateTime<Utc>) -> Result<()> {
        if let Err(e) = self.scheduler.schedule_at(message, now) {
            error!(message_id = %message.id, "message stored as scheduled but not enqueued: {e}");
            return Err(e);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueAction {
    None,
    Schedule,
    Cancel,
    Reschedule,
}

impl QueueAction {
    fn between(old: &Message, new: &Message) -> Self {
        use MessageStatus::Scheduled;
        match (old.status == Scheduled, new.status == Scheduled) {
            (false, true) => QueueAction::Schedule,
            (true, false) => QueueAction::Cancel,
            (true, true) if snapshot_changed(old, new) => QueueAction::Reschedule,
            _ => QueueAction::None,
        }
    }
}

/// Fields the queued payload carries into the pipeline.
fn snapshot_changed(old: &Message, new: &Message) -> bool {
    old.scheduled_at != new.scheduled_at
        || old.content != new.content
        || old.media_ref != new.media_ref
        || old.caption() != new.caption()
}

fn validate_draft(draft: &MessageDraft) -> Result<()> {
    if draft.status == MessageStatus::Posted {
        return Err(BasiliskError::Validation(
            "status posted is only set by a successful publish".into(),
        ));
    }
    if draft.kind == MessageKind::Terror && draft.chapter.is_some() {
        return Err(BasiliskError::Validation(
            "chapter fields only apply to chapter messages".into(),
        ));
    }
    if let Some(t) = draft.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(BasiliskError::Validation(format!(
                "temperature {t} outside 0.0..=2.0"
            )));
        }
    }
    validate_media_ref(draft.media_ref)
}

fn validate_media_ref(media_ref: MediaRef) -> Result<()> {
    match media_ref {
        MediaRef::Asset(id) if id < 0 => Err(BasiliskError::Validation(format!(
            "media ref {id} is neither an asset id nor {}",
            MediaRef::SENTINEL
        ))),
        _ => Ok(()),
    }
}

/// The checks the scheduler applies, made before anything is persisted.
fn check_schedulable(message: &Message, now: DateTime<Utc>) -> Result<()> {
    let Some(at) = message.scheduled_at else {
        return Err(BasiliskError::Scheduling(
            "a scheduled message needs a scheduled time".into(),
        ));
    };
    if at <= now {
        return Err(BasiliskError::Scheduling(format!(
            "scheduled time {at} is not in the future"
        )));
    }
    if message.content.is_none() {
        return Err(BasiliskError::Scheduling(
            "a scheduled message needs content".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(status: MessageStatus) -> Message {
        let mut m = Message::new(MessageKind::Chapter);
        m.content = Some("X".into());
        m.status = status;
        m.scheduled_at = Some(basilisk_core::time::now() + chrono::Duration::hours(1));
        m
    }

    #[test]
    fn transition_table() {
        let draft = message(MessageStatus::Draft);
        let scheduled = message(MessageStatus::Scheduled);
        assert_eq!(QueueAction::between(&draft, &scheduled), QueueAction::Schedule);
        assert_eq!(QueueAction::between(&scheduled, &draft), QueueAction::Cancel);
        assert_eq!(QueueAction::between(&draft, &draft), QueueAction::None);

        let mut same = scheduled.clone();
        assert_eq!(QueueAction::between(&scheduled, &same), QueueAction::None);
        same.chapter = Some(ChapterMeta {
            number: 0,
            caption: Some("new caption".into()),
        });
        assert_eq!(QueueAction::between(&scheduled, &same), QueueAction::Reschedule);
    }

    #[test]
    fn posted_cannot_be_requested() {
        let mut d = MessageDraft::new(MessageKind::Terror);
        d.status = MessageStatus::Posted;
        assert!(matches!(validate_draft(&d), Err(BasiliskError::Validation(_))));
    }

    #[test]
    fn terror_rejects_chapter_fields() {
        let mut d = MessageDraft::new(MessageKind::Terror);
        d.chapter = Some(ChapterMeta::default());
        assert!(matches!(validate_draft(&d), Err(BasiliskError::Validation(_))));
    }

    #[test]
    fn media_ref_below_sentinel_is_invalid() {
        let mut d = MessageDraft::new(MessageKind::Chapter);
        d.media_ref = MediaRef::Asset(-7);
        assert!(matches!(validate_draft(&d), Err(BasiliskError::Validation(_))));
        d.media_ref = MediaRef::Asset(3);
        assert!(validate_draft(&d).is_ok());
    }

    #[test]
    fn schedulable_needs_future_time_and_content() {
        let now = basilisk_core::time::now();
        let mut m = message(MessageStatus::Scheduled);
        assert!(check_schedulable(&m, now).is_ok());

        m.scheduled_at = Some(now);
        assert!(matches!(check_schedulable(&m, now), Err(BasiliskError::Scheduling(_))));

        m.scheduled_at = Some(now + chrono::Duration::hours(1));
        m.content = None;
        assert!(matches!(check_schedulable(&m, now), Err(BasiliskError::Scheduling(_))));

        m.content = Some(String::new());
        assert!(check_schedulable(&m, now).is_ok());
    }
}

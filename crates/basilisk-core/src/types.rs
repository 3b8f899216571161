use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which of the two independent message stores a message lives in.
///
/// Both kinds share one shape and one state machine; the kind only decides
/// which repository a message is read from and written back to, and which
/// media assets are eligible for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Terror,
    Chapter,
}

impl MessageKind {
    pub const ALL: [MessageKind; 2] = [MessageKind::Terror, MessageKind::Chapter];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Terror => "terror",
            MessageKind::Chapter => "chapter",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "terror" => Ok(MessageKind::Terror),
            "chapter" => Ok(MessageKind::Chapter),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// Lifecycle state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Draft,
    Scheduled,
    /// Terminal. Only produced by a successful pipeline run.
    Posted,
}

impl MessageStatus {
    /// Whether `self -> next` is a legal transition.
    ///
    /// Staying in the same state is always allowed (plain field edits).
    /// `Scheduled -> Posted` is legal here but the lifecycle layer refuses it
    /// from callers; only the pipeline finalizer performs it.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Draft, Draft)
                | (Draft, Scheduled)
                | (Scheduled, Draft)
                | (Scheduled, Scheduled)
                | (Scheduled, Posted)
                | (Posted, Posted)
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::Draft => "draft",
            MessageStatus::Scheduled => "scheduled",
            MessageStatus::Posted => "posted",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(MessageStatus::Draft),
            "scheduled" => Ok(MessageStatus::Scheduled),
            "posted" => Ok(MessageStatus::Posted),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

/// Reference to a background media asset.
///
/// Serialized as a plain integer: the asset id, or `-1` for "pick one at
/// random when the pipeline runs".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum MediaRef {
    #[default]
    Random,
    Asset(i64),
}

impl MediaRef {
    pub const SENTINEL: i64 = -1;
}

impl From<i64> for MediaRef {
    fn from(v: i64) -> Self {
        if v == Self::SENTINEL {
            MediaRef::Random
        } else {
            MediaRef::Asset(v)
        }
    }
}

impl From<MediaRef> for i64 {
    fn from(r: MediaRef) -> Self {
        match r {
            MediaRef::Random => MediaRef::SENTINEL,
            MediaRef::Asset(id) => id,
        }
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaRef::Random => f.write_str("random"),
            MediaRef::Asset(id) => write!(f, "{id}"),
        }
    }
}

/// Chapter-only fields. Present iff the message kind is `Chapter`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterMeta {
    pub number: u32,
    pub caption: Option<String>,
}

/// A schedulable content unit. The `id` doubles as the scheduler job key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    /// `None` when never set; `Some("")` when generation produced nothing.
    pub content: Option<String>,
    pub media_ref: MediaRef,
    pub external_media_id: Option<String>,
    pub external_post_id: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<ChapterMeta>,
}

impl Message {
    /// Fresh draft with a time-sortable id.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            id: new_id(),
            kind,
            content: None,
            media_ref: MediaRef::Random,
            external_media_id: None,
            external_post_id: None,
            scheduled_at: None,
            status: MessageStatus::Draft,
            created_at: crate::time::now(),
            chapter: match kind {
                MessageKind::Chapter => Some(ChapterMeta::default()),
                MessageKind::Terror => None,
            },
        }
    }

    /// Content with surrounding whitespace removed, or `""` when unset.
    pub fn text(&self) -> &str {
        self.content.as_deref().map(str::trim).unwrap_or("")
    }

    pub fn caption(&self) -> Option<&str> {
        self.chapter
            .as_ref()
            .and_then(|c| c.caption.as_deref())
            .filter(|c| !c.trim().is_empty())
    }
}

/// A background video asset in the media catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub id: i64,
    pub filename: String,
    /// Path as stored by the upload side, e.g. `media-file/forest.mp4`.
    pub filepath: String,
    /// Which message kind this asset is eligible for.
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a prompt configuration is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Generates content for terror messages at creation time.
    Terror,
    /// System prompt for streamed conversations.
    Conversational,
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptKind::Terror => f.write_str("terror"),
            PromptKind::Conversational => f.write_str("conversational"),
        }
    }
}

impl std::str::FromStr for PromptKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "terror" => Ok(PromptKind::Terror),
            "conversational" => Ok(PromptKind::Conversational),
            other => Err(format!("unknown prompt kind: {other}")),
        }
    }
}

/// A stored system-prompt configuration. At most one is active per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    pub id: i64,
    pub system_prompt: String,
    /// Used as the user turn when generating content.
    pub greeting: Option<String>,
    pub kind: PromptKind,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// UUIDv7 string: sortable and traceable in logs.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

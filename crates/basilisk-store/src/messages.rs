use basilisk_core::time::to_db;
use basilisk_core::{ChapterMeta, Message, MessageKind, MessageStatus};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use tracing::{debug, instrument};

use crate::db::{like_pattern, opt_timestamp, parsed, timestamp};
use crate::error::{Result, StoreError};
use crate::query::{MessageQuery, Page};
use crate::Store;

fn table(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Terror => "terror_messages",
        MessageKind::Chapter => "chapter_messages",
    }
}

/// Column list shared by both tables. Terror rows project NULL for the
/// chapter columns so one row mapper serves both.
fn select_columns(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Terror => {
            "id, content, media_ref, external_media_id, external_post_id,
             scheduled_at, status, created_at, NULL, NULL"
        }
        MessageKind::Chapter => {
            "id, content, media_ref, external_media_id, external_post_id,
             scheduled_at, status, created_at, chapter_number, caption"
        }
    }
}

fn row_to_message(row: &rusqlite::Row<'_>, kind: MessageKind) -> rusqlite::Result<Message> {
    let chapter = match kind {
        MessageKind::Chapter => Some(ChapterMeta {
            number: row.get::<_, i64>(8)? as u32,
            caption: row.get(9)?,
        }),
        MessageKind::Terror => None,
    };
    Ok(Message {
        id: row.get(0)?,
        kind,
        content: row.get(1)?,
        media_ref: row.get::<_, i64>(2)?.into(),
        external_media_id: row.get(3)?,
        external_post_id: row.get(4)?,
        scheduled_at: opt_timestamp(row, 5)?,
        status: parsed(row, 6)?,
        created_at: timestamp(row, 7)?,
        chapter,
    })
}

/// Chapter number and caption, defaulted for chapters created without them.
fn chapter_columns(message: &Message) -> (i64, Option<String>) {
    let meta = message.chapter.clone().unwrap_or_default();
    (meta.number as i64, meta.caption)
}

impl Store {
    /// Insert a new message into the table matching its kind.
    #[instrument(skip(self, message), fields(message_id = %message.id, kind = %message.kind))]
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        if message.id.trim().is_empty() {
            return Err(StoreError::Invalid {
                field: "id",
                reason: "must not be empty".into(),
            });
        }
        let db = self.conn();
        let scheduled = message.scheduled_at.as_ref().map(to_db);
        let media_ref: i64 = message.media_ref.into();
        match message.kind {
            MessageKind::Terror => {
                db.execute(
                    "INSERT INTO terror_messages
                     (id, content, media_ref, external_media_id, external_post_id,
                      scheduled_at, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        message.id,
                        message.content,
                        media_ref,
                        message.external_media_id,
                        message.external_post_id,
                        scheduled,
                        message.status.to_string(),
                        to_db(&message.created_at),
                    ],
                )?;
            }
            MessageKind::Chapter => {
                let (number, caption) = chapter_columns(message);
                db.execute(
                    "INSERT INTO chapter_messages
                     (id, content, media_ref, external_media_id, external_post_id,
                      scheduled_at, status, chapter_number, caption, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        message.id,
                        message.content,
                        media_ref,
                        message.external_media_id,
                        message.external_post_id,
                        scheduled,
                        message.status.to_string(),
                        number,
                        caption,
                        to_db(&message.created_at),
                    ],
                )?;
            }
        }
        debug!("message inserted");
        Ok(())
    }

    /// Fetch a message by id, `None` when absent.
    pub fn message(&self, kind: MessageKind, id: &str) -> Result<Option<Message>> {
        let db = self.conn();
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            select_columns(kind),
            table(kind)
        );
        let found = db
            .query_row(&sql, params![id], |row| row_to_message(row, kind))
            .optional()?;
        Ok(found)
    }

    /// Overwrite every mutable column of an existing message.
    #[instrument(skip(self, message), fields(message_id = %message.id, kind = %message.kind))]
    pub fn update_message(&self, message: &Message) -> Result<()> {
        let db = self.conn();
        let scheduled = message.scheduled_at.as_ref().map(to_db);
        let media_ref: i64 = message.media_ref.into();
        let n = match message.kind {
            MessageKind::Terror => db.execute(
                "UPDATE terror_messages
                 SET content = ?1, media_ref = ?2, external_media_id = ?3,
                     external_post_id = ?4, scheduled_at = ?5, status = ?6
                 WHERE id = ?7",
                params![
                    message.content,
                    media_ref,
                    message.external_media_id,
                    message.external_post_id,
                    scheduled,
                    message.status.to_string(),
                    message.id,
                ],
            )?,
            MessageKind::Chapter => {
                let (number, caption) = chapter_columns(message);
                db.execute(
                    "UPDATE chapter_messages
                     SET content = ?1, media_ref = ?2, external_media_id = ?3,
                         external_post_id = ?4, scheduled_at = ?5, status = ?6,
                         chapter_number = ?7, caption = ?8
                     WHERE id = ?9",
                    params![
                        message.content,
                        media_ref,
                        message.external_media_id,
                        message.external_post_id,
                        scheduled,
                        message.status.to_string(),
                        number,
                        caption,
                        message.id,
                    ],
                )?
            }
        };
        if n == 0 {
            return Err(StoreError::not_found("message", &message.id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_message(&self, kind: MessageKind, id: &str) -> Result<()> {
        let db = self.conn();
        let n = db.execute(
            &format!("DELETE FROM {} WHERE id = ?1", table(kind)),
            params![id],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("message", id));
        }
        Ok(())
    }

    /// Filtered, sorted, paginated listing.
    pub fn messages(&self, kind: MessageKind, query: &MessageQuery) -> Result<Page<Message>> {
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = query.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.to_string()));
        }
        if let Some(from) = &query.scheduled_from {
            clauses.push("scheduled_at >= ?");
            values.push(Value::Text(to_db(from)));
        }
        if let Some(to) = &query.scheduled_to {
            clauses.push("scheduled_at <= ?");
            values.push(Value::Text(to_db(to)));
        }
        if let Some(media_ref) = query.media_ref {
            clauses.push("media_ref = ?");
            values.push(Value::Integer(media_ref.into()));
        }
        if let Some(needle) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            clauses.push(
                "(COALESCE(content, '') LIKE ? ESCAPE '\\'
                  OR COALESCE(external_post_id, '') LIKE ? ESCAPE '\\')",
            );
            let pattern = like_pattern(needle.trim());
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let db = self.conn();
        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM {} {where_sql}", table(kind)),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let (page, limit) = query.page_window();
        let order = query.order.keyword();
        let sql = format!(
            "SELECT {} FROM {} {where_sql}
             ORDER BY {} {order}, id {order}
             LIMIT ? OFFSET ?",
            select_columns(kind),
            table(kind),
            query.sort.column(),
        );
        values.push(Value::Integer(limit as i64));
        values.push(Value::Integer(((page - 1) as i64) * limit as i64));

        let mut stmt = db.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                row_to_message(row, kind)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total as u64,
            page,
            limit,
        })
    }

    /// Scheduled messages whose time is at or after `now`, soonest first.
    pub fn scheduled_messages(
        &self,
        kind: MessageKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let db = self.conn();
        let sql = format!(
            "SELECT {} FROM {}
             WHERE status = 'scheduled' AND scheduled_at >= ?1
             ORDER BY scheduled_at ASC",
            select_columns(kind),
            table(kind)
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(params![to_db(&now)], |row| row_to_message(row, kind))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All messages in `status`, ordered by schedule time.
    pub fn messages_by_status(
        &self,
        kind: MessageKind,
        status: MessageStatus,
    ) -> Result<Vec<Message>> {
        let db = self.conn();
        let sql = format!(
            "SELECT {} FROM {} WHERE status = ?1 ORDER BY scheduled_at ASC",
            select_columns(kind),
            table(kind)
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(params![status.to_string()], |row| row_to_message(row, kind))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{SortField, SortOrder};
    use basilisk_core::MediaRef;
    use chrono::Duration;

    fn scheduled(kind: MessageKind, content: &str, at: DateTime<Utc>) -> Message {
        let mut m = Message::new(kind);
        m.content = Some(content.into());
        m.status = MessageStatus::Scheduled;
        m.scheduled_at = Some(at);
        m
    }

    #[test]
    fn insert_and_fetch_terror() {
        let store = Store::open_in_memory().unwrap();
        let at = basilisk_core::time::now() + Duration::hours(1);
        let m = scheduled(MessageKind::Terror, "the end is near", at);
        store.insert_message(&m).unwrap();

        let got = store.message(MessageKind::Terror, &m.id).unwrap().unwrap();
        assert_eq!(got, m);
        assert!(store.message(MessageKind::Chapter, &m.id).unwrap().is_none());
    }

    #[test]
    fn chapter_round_trips_caption_and_number() {
        let store = Store::open_in_memory().unwrap();
        let mut m = Message::new(MessageKind::Chapter);
        m.content = Some("chapter one".into());
        m.media_ref = MediaRef::Asset(4);
        m.chapter = Some(ChapterMeta {
            number: 3,
            caption: Some("Chapter III".into()),
        });
        store.insert_message(&m).unwrap();

        let got = store.message(MessageKind::Chapter, &m.id).unwrap().unwrap();
        assert_eq!(got.chapter.as_ref().unwrap().number, 3);
        assert_eq!(got.caption(), Some("Chapter III"));
        assert_eq!(got.media_ref, MediaRef::Asset(4));
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let m = Message::new(MessageKind::Terror);
        let err = store.update_message(&m).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn update_persists_post_ids() {
        let store = Store::open_in_memory().unwrap();
        let mut m = scheduled(
            MessageKind::Terror,
            "x",
            basilisk_core::time::now() + Duration::minutes(5),
        );
        store.insert_message(&m).unwrap();

        m.status = MessageStatus::Posted;
        m.external_media_id = Some("media-1".into());
        m.external_post_id = Some("post-1".into());
        store.update_message(&m).unwrap();

        let got = store.message(MessageKind::Terror, &m.id).unwrap().unwrap();
        assert_eq!(got.status, MessageStatus::Posted);
        assert_eq!(got.external_post_id.as_deref(), Some("post-1"));
    }

    #[test]
    fn delete_twice_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let m = Message::new(MessageKind::Terror);
        store.insert_message(&m).unwrap();
        store.delete_message(MessageKind::Terror, &m.id).unwrap();
        assert!(matches!(
            store.delete_message(MessageKind::Terror, &m.id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn listing_filters_sorts_and_pages() {
        let store = Store::open_in_memory().unwrap();
        let base = basilisk_core::time::now();
        for i in 0..5 {
            let m = scheduled(
                MessageKind::Terror,
                &format!("doom {i}"),
                base + Duration::hours(i + 1),
            );
            store.insert_message(&m).unwrap();
        }
        let mut draft = Message::new(MessageKind::Terror);
        draft.content = Some("quiet draft".into());
        store.insert_message(&draft).unwrap();

        let q = MessageQuery {
            status: Some(MessageStatus::Scheduled),
            sort: SortField::ScheduledAt,
            order: SortOrder::Asc,
            limit: 2,
            page: 2,
            ..Default::default()
        };
        let page = store.messages(MessageKind::Terror, &q).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].content.as_deref(), Some("doom 2"));
        assert_eq!(page.total_pages(), 3);

        let q = MessageQuery {
            search: Some("quiet".into()),
            ..Default::default()
        };
        let page = store.messages(MessageKind::Terror, &q).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, draft.id);

        let q = MessageQuery {
            scheduled_from: Some(base + Duration::minutes(150)),
            scheduled_to: Some(base + Duration::minutes(270)),
            ..Default::default()
        };
        assert_eq!(store.messages(MessageKind::Terror, &q).unwrap().total, 2);
    }

    #[test]
    fn scheduled_excludes_past_and_drafts() {
        let store = Store::open_in_memory().unwrap();
        let now = basilisk_core::time::now();
        let future = scheduled(MessageKind::Terror, "later", now + Duration::hours(2));
        let past = scheduled(MessageKind::Terror, "missed", now - Duration::hours(2));
        store.insert_message(&future).unwrap();
        store.insert_message(&past).unwrap();
        store.insert_message(&Message::new(MessageKind::Terror)).unwrap();

        let due = store.scheduled_messages(MessageKind::Terror, now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, future.id);

        let all = store
            .messages_by_status(MessageKind::Terror, MessageStatus::Scheduled)
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, past.id);
    }
}

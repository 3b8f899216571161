use basilisk_core::time::{now, to_db};
use basilisk_core::{Media, MessageKind};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use tracing::{info, instrument};

use crate::db::{like_pattern, parsed, timestamp};
use crate::error::{Result, StoreError};
use crate::query::{MediaQuery, Page};
use crate::Store;

const MEDIA_COLUMNS: &str = "id, filename, filepath, kind, created_at, updated_at";

fn row_to_media(row: &rusqlite::Row<'_>) -> rusqlite::Result<Media> {
    Ok(Media {
        id: row.get(0)?,
        filename: row.get(1)?,
        filepath: row.get(2)?,
        kind: parsed(row, 3)?,
        created_at: timestamp(row, 4)?,
        updated_at: timestamp(row, 5)?,
    })
}

impl Store {
    /// Register a background asset. `filepath` is stored verbatim; mapping it
    /// to a local file is the pipeline's job.
    #[instrument(skip(self))]
    pub fn add_media(&self, filename: &str, filepath: &str, kind: MessageKind) -> Result<Media> {
        if filepath.trim().is_empty() {
            return Err(StoreError::Invalid {
                field: "filepath",
                reason: "must not be empty".into(),
            });
        }
        let ts = now();
        let db = self.conn();
        db.execute(
            "INSERT INTO media (filename, filepath, kind, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![filename, filepath, kind.as_str(), to_db(&ts)],
        )?;
        let id = db.last_insert_rowid();
        info!(media_id = id, %kind, "media added");
        Ok(Media {
            id,
            filename: filename.to_string(),
            filepath: filepath.to_string(),
            kind,
            created_at: ts,
            updated_at: ts,
        })
    }

    pub fn media(&self, id: i64) -> Result<Option<Media>> {
        let db = self.conn();
        let found = db
            .query_row(
                &format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = ?1"),
                params![id],
                row_to_media,
            )
            .optional()?;
        Ok(found)
    }

    /// Persist `filename`, `filepath` and `kind`; returns the row with a
    /// fresh `updated_at`.
    #[instrument(skip(self, media), fields(media_id = media.id))]
    pub fn update_media(&self, media: &Media) -> Result<Media> {
        let ts = now();
        let db = self.conn();
        let n = db.execute(
            "UPDATE media SET filename = ?1, filepath = ?2, kind = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                media.filename,
                media.filepath,
                media.kind.as_str(),
                to_db(&ts),
                media.id
            ],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("media", media.id));
        }
        Ok(Media {
            updated_at: ts,
            ..media.clone()
        })
    }

    #[instrument(skip(self))]
    pub fn delete_media(&self, id: i64) -> Result<()> {
        let db = self.conn();
        let n = db.execute("DELETE FROM media WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StoreError::not_found("media", id));
        }
        Ok(())
    }

    /// Every asset eligible for `kind`, newest first.
    pub fn media_by_kind(&self, kind: MessageKind) -> Result<Vec<Media>> {
        let db = self.conn();
        let mut stmt = db.prepare(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media WHERE kind = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params![kind.as_str()], row_to_media)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Filename search, highest id first.
    pub fn list_media(&self, query: &MediaQuery) -> Result<Page<Media>> {
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(kind) = query.kind {
            clauses.push("kind = ?");
            values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(needle) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            clauses.push("filename LIKE ? ESCAPE '\\'");
            values.push(Value::Text(like_pattern(needle.trim())));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let db = self.conn();
        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM media {where_sql}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let (page, limit) = query.page_window();
        values.push(Value::Integer(limit as i64));
        values.push(Value::Integer(((page - 1) as i64) * limit as i64));
        let mut stmt = db.prepare(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media {where_sql}
             ORDER BY id DESC LIMIT ? OFFSET ?"
        ))?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), row_to_media)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total as u64,
            page,
            limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_list_by_kind() {
        let store = Store::open_in_memory().unwrap();
        let a = store
            .add_media("forest.mp4", "media-file/forest.mp4", MessageKind::Terror)
            .unwrap();
        let b = store
            .add_media("void.mp4", "media-file/void.mp4", MessageKind::Terror)
            .unwrap();
        store
            .add_media("book.mp4", "media-file/book.mp4", MessageKind::Chapter)
            .unwrap();

        let terror = store.media_by_kind(MessageKind::Terror).unwrap();
        let ids: Vec<i64> = terror.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
        assert_eq!(store.media(a.id).unwrap().unwrap().filename, "forest.mp4");
    }

    #[test]
    fn empty_catalog_is_empty_vec() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.media_by_kind(MessageKind::Chapter).unwrap().is_empty());
    }

    #[test]
    fn update_and_delete() {
        let store = Store::open_in_memory().unwrap();
        let mut m = store
            .add_media("a.mp4", "media-file/a.mp4", MessageKind::Terror)
            .unwrap();
        m.kind = MessageKind::Chapter;
        store.update_media(&m).unwrap();
        assert_eq!(store.media(m.id).unwrap().unwrap().kind, MessageKind::Chapter);

        store.delete_media(m.id).unwrap();
        assert!(matches!(
            store.delete_media(m.id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn search_by_filename() {
        let store = Store::open_in_memory().unwrap();
        for name in ["rain.mp4", "storm.mp4", "rainbow.mp4"] {
            store
                .add_media(name, &format!("media-file/{name}"), MessageKind::Terror)
                .unwrap();
        }
        let page = store
            .list_media(&MediaQuery {
                search: Some("rain".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].filename, "rainbow.mp4");
    }
}

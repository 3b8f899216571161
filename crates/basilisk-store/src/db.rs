use rusqlite::{Connection, Result};

/// Initialise store tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_message_table(conn, "terror_messages", "")?;
    create_message_table(
        conn,
        "chapter_messages",
        "chapter_number INTEGER NOT NULL DEFAULT 0 CHECK (chapter_number >= 0),
            caption     TEXT,",
    )?;
    create_media_table(conn)?;
    create_prompts_table(conn)?;
    Ok(())
}

/// Both message kinds share one shape; chapters add two columns.
fn create_message_table(conn: &Connection, table: &str, extra_columns: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id                TEXT NOT NULL PRIMARY KEY,
            content           TEXT,
            media_ref         INTEGER NOT NULL DEFAULT -1,
            external_media_id TEXT,
            external_post_id  TEXT,
            scheduled_at      TEXT,
            status            TEXT NOT NULL DEFAULT 'draft',
            {extra_columns}
            created_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_status
            ON {table}(status, scheduled_at);"
    ))
}

fn create_media_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS media (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            filename    TEXT NOT NULL,
            filepath    TEXT NOT NULL,
            kind        TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_media_kind
            ON media(kind, created_at DESC);",
    )
}

/// Prompt configurations. At most one row per kind has `is_active = 1`;
/// `Store::set_active_prompt` maintains that.
fn create_prompts_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS prompts (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            system_prompt  TEXT NOT NULL,
            greeting       TEXT,
            kind           TEXT NOT NULL,
            is_active      INTEGER NOT NULL DEFAULT 0,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );",
    )
}

/// Read an RFC 3339 timestamp column.
pub(crate) fn timestamp(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> Result<chrono::DateTime<chrono::Utc>> {
    let raw: String = row.get(idx)?;
    basilisk_core::time::from_db(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn opt_timestamp(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) => basilisk_core::time::from_db(&raw).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

/// Parse a text column through `FromStr` (status and kind enums).
pub(crate) fn parsed<T>(row: &rusqlite::Row<'_>, idx: usize) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }

    #[test]
    fn chapter_number_cannot_be_negative() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO chapter_messages (id, chapter_number, created_at)
             VALUES ('c1', -1, '2026-01-01T00:00:00.000Z')",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}

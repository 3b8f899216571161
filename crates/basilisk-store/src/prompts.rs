use basilisk_core::time::{now, to_db};
use basilisk_core::{PromptConfig, PromptKind};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::db::{parsed, timestamp};
use crate::error::{Result, StoreError};
use crate::Store;

const PROMPT_COLUMNS: &str =
    "id, system_prompt, greeting, kind, is_active, created_at, updated_at";

/// Fields supplied when creating a prompt configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrompt {
    pub system_prompt: String,
    pub greeting: Option<String>,
    pub kind: PromptKind,
    #[serde(default)]
    pub is_active: bool,
}

fn row_to_prompt(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromptConfig> {
    Ok(PromptConfig {
        id: row.get(0)?,
        system_prompt: row.get(1)?,
        greeting: row.get(2)?,
        kind: parsed(row, 3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
    })
}

impl Store {
    /// Insert a prompt. When `is_active` is set, every other prompt of the
    /// same kind is deactivated in the same transaction.
    #[instrument(skip(self, prompt), fields(kind = %prompt.kind))]
    pub fn add_prompt(&self, prompt: &NewPrompt) -> Result<PromptConfig> {
        if prompt.system_prompt.trim().is_empty() {
            return Err(StoreError::Invalid {
                field: "system_prompt",
                reason: "must not be empty".into(),
            });
        }
        let ts = now();
        let mut db = self.conn();
        let tx = db.transaction()?;
        if prompt.is_active {
            tx.execute(
                "UPDATE prompts SET is_active = 0, updated_at = ?1 WHERE kind = ?2",
                params![to_db(&ts), prompt.kind.to_string()],
            )?;
        }
        tx.execute(
            "INSERT INTO prompts (system_prompt, greeting, kind, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                prompt.system_prompt,
                prompt.greeting,
                prompt.kind.to_string(),
                prompt.is_active as i64,
                to_db(&ts),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        info!(prompt_id = id, active = prompt.is_active, "prompt added");
        Ok(PromptConfig {
            id,
            system_prompt: prompt.system_prompt.clone(),
            greeting: prompt.greeting.clone(),
            kind: prompt.kind,
            is_active: prompt.is_active,
            created_at: ts,
            updated_at: ts,
        })
    }

    pub fn prompt(&self, id: i64) -> Result<Option<PromptConfig>> {
        let db = self.conn();
        let found = db
            .query_row(
                &format!("SELECT {PROMPT_COLUMNS} FROM prompts WHERE id = ?1"),
                params![id],
                row_to_prompt,
            )
            .optional()?;
        Ok(found)
    }

    /// Update the text fields of a prompt. Activation goes through
    /// [`Store::set_active_prompt`].
    #[instrument(skip(self, prompt), fields(prompt_id = prompt.id))]
    pub fn update_prompt(&self, prompt: &PromptConfig) -> Result<PromptConfig> {
        let ts = now();
        let db = self.conn();
        let n = db.execute(
            "UPDATE prompts SET system_prompt = ?1, greeting = ?2, updated_at = ?3
             WHERE id = ?4",
            params![prompt.system_prompt, prompt.greeting, to_db(&ts), prompt.id],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("prompt", prompt.id));
        }
        drop(db);
        self.prompt(prompt.id)?
            .ok_or_else(|| StoreError::not_found("prompt", prompt.id))
    }

    #[instrument(skip(self))]
    pub fn delete_prompt(&self, id: i64) -> Result<()> {
        let db = self.conn();
        let n = db.execute("DELETE FROM prompts WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StoreError::not_found("prompt", id));
        }
        Ok(())
    }

    /// Make `id` the only active prompt of its kind.
    #[instrument(skip(self))]
    pub fn set_active_prompt(&self, id: i64) -> Result<PromptConfig> {
        let ts = to_db(&now());
        {
            let mut db = self.conn();
            let tx = db.transaction()?;
            let kind: Option<String> = tx
                .query_row("SELECT kind FROM prompts WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })
                .optional()?;
            let Some(kind) = kind else {
                return Err(StoreError::not_found("prompt", id));
            };
            tx.execute(
                "UPDATE prompts SET is_active = 0, updated_at = ?1 WHERE kind = ?2 AND id != ?3",
                params![ts, kind, id],
            )?;
            tx.execute(
                "UPDATE prompts SET is_active = 1, updated_at = ?1 WHERE id = ?2",
                params![ts, id],
            )?;
            tx.commit()?;
        }
        info!(prompt_id = id, "prompt activated");
        self.prompt(id)?
            .ok_or_else(|| StoreError::not_found("prompt", id))
    }

    /// The active prompt for `kind`, if one is configured.
    pub fn active_prompt(&self, kind: PromptKind) -> Result<Option<PromptConfig>> {
        let db = self.conn();
        let found = db
            .query_row(
                &format!(
                    "SELECT {PROMPT_COLUMNS} FROM prompts
                     WHERE kind = ?1 AND is_active = 1
                     ORDER BY updated_at DESC LIMIT 1"
                ),
                params![kind.to_string()],
                row_to_prompt,
            )
            .optional()?;
        Ok(found)
    }

    /// Prompts newest first, optionally restricted to one kind.
    pub fn prompts(&self, kind: Option<PromptKind>) -> Result<Vec<PromptConfig>> {
        let db = self.conn();
        let rows = match kind {
            Some(kind) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {PROMPT_COLUMNS} FROM prompts WHERE kind = ?1
                     ORDER BY created_at DESC, id DESC"
                ))?;
                let rows = stmt
                    .query_map(params![kind.to_string()], row_to_prompt)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {PROMPT_COLUMNS} FROM prompts ORDER BY created_at DESC, id DESC"
                ))?;
                let rows = stmt
                    .query_map([], row_to_prompt)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_prompt(kind: PromptKind, active: bool) -> NewPrompt {
        NewPrompt {
            system_prompt: "You are an ancient intelligence.".into(),
            greeting: Some("Speak.".into()),
            kind,
            is_active: active,
        }
    }

    #[test]
    fn no_active_prompt_by_default() {
        let store = Store::open_in_memory().unwrap();
        store.add_prompt(&new_prompt(PromptKind::Terror, false)).unwrap();
        assert!(store.active_prompt(PromptKind::Terror).unwrap().is_none());
    }

    #[test]
    fn set_active_deactivates_same_kind_only() {
        let store = Store::open_in_memory().unwrap();
        let a = store.add_prompt(&new_prompt(PromptKind::Terror, true)).unwrap();
        let b = store.add_prompt(&new_prompt(PromptKind::Terror, false)).unwrap();
        let c = store
            .add_prompt(&new_prompt(PromptKind::Conversational, true))
            .unwrap();

        store.set_active_prompt(b.id).unwrap();

        assert_eq!(store.active_prompt(PromptKind::Terror).unwrap().unwrap().id, b.id);
        assert!(!store.prompt(a.id).unwrap().unwrap().is_active);
        assert!(store.prompt(c.id).unwrap().unwrap().is_active);
    }

    #[test]
    fn adding_active_prompt_replaces_previous() {
        let store = Store::open_in_memory().unwrap();
        let a = store.add_prompt(&new_prompt(PromptKind::Terror, true)).unwrap();
        let b = store.add_prompt(&new_prompt(PromptKind::Terror, true)).unwrap();
        assert!(!store.prompt(a.id).unwrap().unwrap().is_active);
        assert_eq!(store.active_prompt(PromptKind::Terror).unwrap().unwrap().id, b.id);
        assert_eq!(store.prompts(Some(PromptKind::Terror)).unwrap().len(), 2);
    }

    #[test]
    fn activating_missing_prompt_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.set_active_prompt(99),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn update_keeps_activation() {
        let store = Store::open_in_memory().unwrap();
        let mut p = store.add_prompt(&new_prompt(PromptKind::Terror, true)).unwrap();
        p.system_prompt = "Whisper.".into();
        let updated = store.update_prompt(&p).unwrap();
        assert_eq!(updated.system_prompt, "Whisper.");
        assert!(updated.is_active);
    }
}

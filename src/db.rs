use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Deserialize;

use crate::app::sync::{
    CollaboratorError, ListStatus, MutationRequest, MutationSink, RemoteEntry, RemoteLookup,
};

/// Local mirror of one list entry on the target platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ListEntry {
    pub(crate) target_id: u64,
    pub(crate) title: String,
    pub(crate) progress: u32,
    pub(crate) status: ListStatus,
    pub(crate) repeat: u32,
    pub(crate) total_episodes: Option<u32>,
    pub(crate) updated_at: String,
}

impl ListEntry {
    pub(crate) fn to_remote(&self) -> RemoteEntry {
        RemoteEntry {
            target_id: self.target_id,
            progress: self.progress,
            status: self.status,
            repeat: self.repeat,
            total_episodes: self.total_episodes,
        }
    }
}

/// One entry of a list export accepted by `anisync import`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImportedEntry {
    #[serde(alias = "media_id", alias = "mediaId", alias = "anime_id")]
    pub(crate) target_id: u64,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) progress: u32,
    pub(crate) status: ListStatus,
    #[serde(default)]
    pub(crate) repeat: u32,
    #[serde(default, alias = "episodes")]
    pub(crate) total_episodes: Option<u32>,
}

pub struct Database {
    conn: Connection,
}

type EntryRow = (i64, String, i64, String, i64, Option<i64>, String);

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS list_entries (
                target_id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                progress INTEGER NOT NULL,
                status TEXT NOT NULL,
                repeat INTEGER NOT NULL DEFAULT 0,
                total_episodes INTEGER,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_list_entries_updated_at ON list_entries(updated_at DESC);
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn upsert_entry(&self, request: &MutationRequest) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            r#"
            INSERT INTO list_entries (target_id, title, progress, status, repeat, total_episodes, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(target_id) DO UPDATE SET
                title = CASE WHEN excluded.title = '' THEN list_entries.title ELSE excluded.title END,
                progress = excluded.progress,
                status = excluded.status,
                repeat = excluded.repeat,
                total_episodes = COALESCE(excluded.total_episodes, list_entries.total_episodes),
                updated_at = excluded.updated_at
            "#,
            params![
                request.target_id as i64,
                request.title,
                request.progress,
                request.status.as_str(),
                request.repeat,
                request.total_episodes,
                now
            ],
        )?;
        Ok(())
    }

    pub(crate) fn entry(&self, target_id: u64) -> Result<Option<ListEntry>> {
        let row = self
            .conn
            .query_row(
                "SELECT target_id, title, progress, status, repeat, total_episodes, updated_at
                 FROM list_entries WHERE target_id = ?1",
                params![target_id as i64],
                read_row,
            )
            .optional()?;
        row.map(entry_from_row).transpose()
    }

    pub(crate) fn list_entries(&self) -> Result<Vec<ListEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id, title, progress, status, repeat, total_episodes, updated_at
             FROM list_entries ORDER BY updated_at DESC, title ASC",
        )?;
        let rows = stmt.query_map([], read_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(entry_from_row(row?)?);
        }
        Ok(out)
    }

    pub(crate) fn import_entries(&self, entries: &[ImportedEntry]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for entry in entries {
            self.upsert_entry(&MutationRequest {
                target_id: entry.target_id,
                progress: entry.progress,
                status: entry.status,
                repeat: entry.repeat,
                title: entry.title.clone(),
                total_episodes: entry.total_episodes,
            })
            .with_context(|| format!("failed to import entry {}", entry.target_id))?;
        }
        tx.commit()?;
        Ok(entries.len())
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn entry_from_row(row: EntryRow) -> Result<ListEntry> {
    let (target_id, title, progress, status, repeat, total_episodes, updated_at) = row;
    let status = ListStatus::parse(&status)
        .ok_or_else(|| anyhow!("unknown list status {status:?} for entry {target_id}"))?;
    Ok(ListEntry {
        target_id: u64::try_from(target_id).context("negative target id in list mirror")?,
        title,
        progress: u32::try_from(progress).unwrap_or(0),
        status,
        repeat: u32::try_from(repeat).unwrap_or(0),
        total_episodes: total_episodes.and_then(|total| u32::try_from(total).ok()),
        updated_at,
    })
}

fn collaborator_error(err: anyhow::Error) -> CollaboratorError {
    let busy = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(failure, _))
                if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    });
    if busy {
        CollaboratorError::Transient(format!("{err:#}"))
    } else {
        CollaboratorError::Permanent(format!("{err:#}"))
    }
}

impl RemoteLookup for &Database {
    fn lookup(&mut self, target_id: u64) -> Result<Option<RemoteEntry>, CollaboratorError> {
        self.entry(target_id)
            .map(|entry| entry.map(|entry| entry.to_remote()))
            .map_err(collaborator_error)
    }
}

impl MutationSink for &Database {
    fn apply(&mut self, request: &MutationRequest) -> Result<(), CollaboratorError> {
        self.upsert_entry(request).map_err(collaborator_error)
    }
}

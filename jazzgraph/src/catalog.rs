use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::models::{FileStatus, QuarantineRecord, ResolutionChange, ResolutionEvent, TaskLog};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

impl Catalog {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = config.catalog_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&config.catalog_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Initialization("catalog connection lock poisoned".to_string()))
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS task_logs (
                task_id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_name TEXT,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                status TEXT,
                details TEXT
            );
            CREATE TABLE IF NOT EXISTS ingested_files (
                file_name TEXT PRIMARY KEY,
                batch_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                ingested_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS quarantine (
                record_id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_file TEXT NOT NULL,
                reason TEXT NOT NULL,
                payload TEXT NOT NULL,
                batch_id INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS resolution_events (
                album_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL,
                batch_id INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (album_id, kind)
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn create_task_log(&self, task_name: &str) -> Result<i64> {
        let conn = self.conn()?;
        let start_time = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO task_logs (task_name, start_time, status) VALUES (?1, ?2, 'RUNNING')",
            params![task_name, start_time],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_task_log_status(&self, task_id: i64, status: &str, details: &str) -> Result<()> {
        let conn = self.conn()?;
        let end_time = chrono::Utc::now().timestamp();
        conn.execute(
            "UPDATE task_logs SET status = ?1, details = ?2, end_time = ?3 WHERE task_id = ?4",
            params![status, details, end_time, task_id],
        )?;
        Ok(())
    }

    /// Most recent task runs first.
    pub fn list_tasks(&self, limit: usize) -> Result<Vec<TaskLog>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT task_id, task_name, start_time, end_time, status, details
             FROM task_logs ORDER BY task_id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(TaskLog {
                task_id: row.get(0)?,
                task_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                status: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                details: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // --- Ingestion ledger ---

    pub fn is_ingested(&self, file_name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM ingested_files WHERE file_name = ?1",
                params![file_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// File names with their recorded status, sorted by name.
    pub fn ingested_files(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT file_name, status FROM ingested_files ORDER BY file_name")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Marks a batch of files in one transaction.
    pub fn mark_ingested(&self, files: &[(String, FileStatus)], batch_id: i64) -> Result<()> {
        self.commit_ingest(files, &[], batch_id)
    }

    /// Records the outcome of an ingest batch. Ledger entries and resolution
    /// event changes land together or not at all; a recorded event of the
    /// same album and kind is overwritten by the latest batch.
    pub fn commit_ingest(
        &self,
        files: &[(String, FileStatus)],
        changes: &[ResolutionChange],
        batch_id: i64,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO ingested_files (file_name, batch_id, status, ingested_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(file_name) DO UPDATE SET
                    batch_id = excluded.batch_id,
                    status = excluded.status,
                    ingested_at = excluded.ingested_at",
            )?;
            for (file_name, status) in files {
                stmt.execute(params![file_name, batch_id, status.as_str(), now])?;
            }
        }
        for change in changes {
            apply_resolution_change(&tx, change, batch_id, now)?;
        }
        tx.commit()?;
        Ok(())
    }

    // --- Corrupt records ---

    pub fn record_quarantine(
        &self,
        source_file: &str,
        reason: &str,
        payload: &str,
        batch_id: i64,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO quarantine (source_file, reason, payload, batch_id, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source_file,
                reason,
                payload,
                batch_id,
                chrono::Utc::now().timestamp()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_quarantine(&self) -> Result<Vec<QuarantineRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT record_id, source_file, reason, payload, batch_id, recorded_at
             FROM quarantine ORDER BY record_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(QuarantineRecord {
                record_id: row.get(0)?,
                source_file: row.get(1)?,
                reason: row.get(2)?,
                payload: row.get(3)?,
                batch_id: row.get(4)?,
                recorded_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // --- Resolution events ---

    pub fn list_resolution_events(&self, kind: Option<&str>) -> Result<Vec<ResolutionEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT album_id, kind, detail, batch_id, recorded_at
             FROM resolution_events
             WHERE ?1 IS NULL OR kind = ?1
             ORDER BY album_id, kind",
        )?;
        let rows = stmt.query_map(params![kind], |row| {
            Ok(ResolutionEvent {
                album_id: row.get(0)?,
                kind: row.get(1)?,
                detail: row.get(2)?,
                batch_id: row.get(3)?,
                recorded_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn apply_resolution_change(
    tx: &Transaction<'_>,
    change: &ResolutionChange,
    batch_id: i64,
    now: i64,
) -> Result<()> {
    match change {
        ResolutionChange::Record {
            album_id,
            kind,
            detail,
        } => {
            tx.execute(
                "INSERT INTO resolution_events (album_id, kind, detail, batch_id, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(album_id, kind) DO UPDATE SET
                    detail = excluded.detail,
                    batch_id = excluded.batch_id,
                    recorded_at = excluded.recorded_at",
                params![album_id, kind, detail, batch_id, now],
            )?;
        }
        ResolutionChange::Clear { album_id, kind } => {
            tx.execute(
                "DELETE FROM resolution_events WHERE album_id = ?1 AND kind = ?2",
                params![album_id, kind],
            )?;
        }
    }
    Ok(())
}

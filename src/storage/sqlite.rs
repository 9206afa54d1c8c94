//! SQLite storage.
//!
//! Records are stored as JSON bodies next to the columns they are looked up
//! by. All access runs on tokio's blocking pool through [`SqliteStore::call`].

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::{Storage, check_findings};
use crate::document::Document;
use crate::errors::StorageError;
use crate::findings::Finding;
use crate::sam::{AnalysisRun, PhaseOutput, PhaseOutputs};

#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<std::sync::Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory database, for tests.
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        run_migrations(&conn).context("Failed to run migrations")?;
        Ok(Self {
            inner: Arc::new(std::sync::Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&Connection) -> Result<R, StorageError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|_| StorageError::TaskPanicked)?
    }

    /// Insert documents synchronously. Used at startup before any run exists.
    pub fn seed_sync(&self, documents: &[Document]) -> anyhow::Result<()> {
        let conn = self
            .inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        for doc in documents {
            insert_document(&conn, doc)?;
        }
        Ok(())
    }
}

fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            case_id TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (case_id, id)
        );

        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL,
            status TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS findings (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            UNIQUE (run_id, id)
        );

        CREATE INDEX IF NOT EXISTS idx_findings_run ON findings(run_id, seq);

        CREATE TABLE IF NOT EXISTS phase_outputs (
            run_id TEXT NOT NULL,
            phase TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (run_id, phase)
        );
        ",
    )
}

fn insert_document(conn: &Connection, doc: &Document) -> Result<(), StorageError> {
    let body = serde_json::to_string(doc)?;
    conn.execute(
        "INSERT OR REPLACE INTO documents (case_id, id, body) VALUES (?1, ?2, ?3)",
        params![doc.case_id, doc.id, body],
    )?;
    Ok(())
}

fn decode_all<T: serde::de::DeserializeOwned>(bodies: Vec<String>) -> Result<Vec<T>, StorageError> {
    bodies
        .iter()
        .map(|b| serde_json::from_str(b).map_err(StorageError::from))
        .collect()
}

fn query_bodies(
    conn: &Connection,
    sql: &str,
    param: Option<&str>,
) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(param), |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[async_trait]
impl Storage for SqliteStore {
    async fn put_document(&self, document: Document) -> Result<(), StorageError> {
        self.call(move |conn| insert_document(conn, &document)).await
    }

    async fn get_document(
        &self,
        case_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, StorageError> {
        let (case_id, document_id) = (case_id.to_string(), document_id.to_string());
        self.call(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM documents WHERE case_id = ?1 AND id = ?2",
                    params![case_id, document_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
        })
        .await
    }

    async fn list_documents(&self, case_id: &str) -> Result<Vec<Document>, StorageError> {
        let case_id = case_id.to_string();
        self.call(move |conn| {
            decode_all(query_bodies(
                conn,
                "SELECT body FROM documents WHERE case_id = ?1 ORDER BY id",
                Some(&case_id),
            )?)
        })
        .await
    }

    async fn save_run(&self, run: &AnalysisRun) -> Result<(), StorageError> {
        let body = serde_json::to_string(run)?;
        let (id, case_id, status) = (run.id.clone(), run.case_id.clone(), run.status.to_string());
        let (created, updated) = (run.created_at.to_rfc3339(), run.updated_at.to_rfc3339());
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO runs (id, case_id, status, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    body = excluded.body,
                    updated_at = excluded.updated_at",
                params![id, case_id, status, body, created, updated],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<AnalysisRun>, StorageError> {
        let run_id = run_id.to_string();
        self.call(move |conn| {
            let body: Option<String> = conn
                .query_row("SELECT body FROM runs WHERE id = ?1", params![run_id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
        })
        .await
    }

    async fn list_runs(&self) -> Result<Vec<AnalysisRun>, StorageError> {
        self.call(|conn| {
            decode_all(query_bodies(
                conn,
                "SELECT body FROM runs ORDER BY created_at DESC",
                None,
            )?)
        })
        .await
    }

    async fn append_findings(
        &self,
        run_id: &str,
        findings: &[Finding],
    ) -> Result<(), StorageError> {
        check_findings(findings)?;
        let run_id = run_id.to_string();
        let rows: Vec<(String, String)> = findings
            .iter()
            .map(|f| Ok((f.id.clone(), serde_json::to_string(f)?)))
            .collect::<Result<_, StorageError>>()?;
        self.call(move |conn| {
            let tx = conn.unchecked_transaction()?;
            for (id, body) in &rows {
                tx.execute(
                    "INSERT OR IGNORE INTO findings (run_id, id, body) VALUES (?1, ?2, ?3)",
                    params![run_id, id, body],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_findings(&self, run_id: &str) -> Result<Vec<Finding>, StorageError> {
        let run_id = run_id.to_string();
        self.call(move |conn| {
            decode_all(query_bodies(
                conn,
                "SELECT body FROM findings WHERE run_id = ?1 ORDER BY seq",
                Some(&run_id),
            )?)
        })
        .await
    }

    async fn save_phase_output(
        &self,
        run_id: &str,
        output: &PhaseOutput,
    ) -> Result<(), StorageError> {
        let body = serde_json::to_string(output)?;
        let (run_id, phase) = (run_id.to_string(), output.phase().to_string());
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO phase_outputs (run_id, phase, body) VALUES (?1, ?2, ?3)",
                params![run_id, phase, body],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_phase_outputs(&self, run_id: &str) -> Result<PhaseOutputs, StorageError> {
        let run_id = run_id.to_string();
        let mut outputs: Vec<PhaseOutput> = self
            .call(move |conn| {
                decode_all(query_bodies(
                    conn,
                    "SELECT body FROM phase_outputs WHERE run_id = ?1",
                    Some(&run_id),
                )?)
            })
            .await?;
        let mut merged = PhaseOutputs::default();
        outputs.sort_by_key(|o| o.phase());
        for output in outputs {
            merged.apply(output);
        }
        Ok(merged)
    }
}

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use portico_config::LogConfig;
use portico_core::{Attempt, CostBreakdown, GatewayError, LogRecord, Result};

/// Durable store for usage log records, indexed by (org, time).
/// Writes are idempotent on request id, so the at-least-once pipeline
/// aggregates cleanly.
pub struct LogStore {
    db: Mutex<Connection>,
}

impl LogStore {
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening usage log store");
        let conn =
            Connection::open(path).map_err(|e| GatewayError::LogStore(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| GatewayError::LogStore(e.to_string()))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS usage_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL UNIQUE,
                org_id TEXT NOT NULL,
                project_id TEXT,
                requested_model TEXT NOT NULL,
                used_model TEXT,
                used_provider TEXT,
                prompt_tokens INTEGER NOT NULL DEFAULT 0,
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                reasoning_tokens INTEGER NOT NULL DEFAULT 0,
                cached_tokens INTEGER NOT NULL DEFAULT 0,
                input_cost REAL NOT NULL DEFAULT 0,
                output_cost REAL NOT NULL DEFAULT 0,
                cached_cost REAL NOT NULL DEFAULT 0,
                request_cost REAL NOT NULL DEFAULT 0,
                total_cost REAL NOT NULL DEFAULT 0,
                ttft_ms INTEGER,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                outcome TEXT NOT NULL,
                http_status INTEGER NOT NULL,
                attempts TEXT NOT NULL DEFAULT '[]',
                cache_hit INTEGER NOT NULL DEFAULT 0,
                byok INTEGER NOT NULL DEFAULT 0,
                prompt TEXT,
                response TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_usage_logs_org_time
                ON usage_logs(org_id, created_at);
            ",
        )
        .map_err(|e| GatewayError::LogStore(e.to_string()))?;

        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Write a batch in one transaction. `INSERT OR IGNORE` on the unique
    /// request id makes redelivery harmless.
    pub fn write_batch(&self, records: &[LogRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut db = self.db.lock();
        let tx = db
            .transaction()
            .map_err(|e| GatewayError::LogStore(e.to_string()))?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT OR IGNORE INTO usage_logs (
                        request_id, org_id, project_id, requested_model, used_model,
                        used_provider, prompt_tokens, completion_tokens, reasoning_tokens,
                        cached_tokens, input_cost, output_cost, cached_cost, request_cost,
                        total_cost, ttft_ms, duration_ms, outcome, http_status, attempts,
                        cache_hit, byok, prompt, response, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                              ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
                )
                .map_err(|e| GatewayError::LogStore(e.to_string()))?;
            for r in records {
                let attempts = serde_json::to_string(&r.attempts)?;
                stmt.execute(rusqlite::params![
                    r.request_id,
                    r.org_id,
                    r.project_id,
                    r.requested_model,
                    r.used_model,
                    r.used_provider,
                    r.prompt_tokens,
                    r.completion_tokens,
                    r.reasoning_tokens,
                    r.cached_tokens,
                    r.cost.input_cost,
                    r.cost.output_cost,
                    r.cost.cached_cost,
                    r.cost.request_cost,
                    r.cost.total,
                    r.ttft_ms.map(|v| v as i64),
                    r.duration_ms as i64,
                    r.outcome,
                    r.http_status,
                    attempts,
                    r.cache_hit,
                    r.byok,
                    r.prompt,
                    r.response,
                    r.created_at.to_rfc3339(),
                ])
                .map_err(|e| GatewayError::LogStore(e.to_string()))?;
            }
        }
        tx.commit()
            .map_err(|e| GatewayError::LogStore(e.to_string()))?;
        Ok(())
    }

    /// Most recent records for an org, newest first.
    pub fn recent(&self, org: &str, limit: usize) -> Result<Vec<LogRecord>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare_cached(
                "SELECT request_id, org_id, project_id, requested_model, used_model,
                        used_provider, prompt_tokens, completion_tokens, reasoning_tokens,
                        cached_tokens, input_cost, output_cost, cached_cost, request_cost,
                        total_cost, ttft_ms, duration_ms, outcome, http_status, attempts,
                        cache_hit, byok, prompt, response, created_at
                 FROM usage_logs WHERE org_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )
            .map_err(|e| GatewayError::LogStore(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![org, limit as i64], |row| {
                let attempts_json: String = row.get(19)?;
                let created_at: String = row.get(24)?;
                let ttft_ms: Option<i64> = row.get(15)?;
                let duration_ms: i64 = row.get(16)?;
                Ok(LogRecord {
                    request_id: row.get(0)?,
                    org_id: row.get(1)?,
                    project_id: row.get(2)?,
                    requested_model: row.get(3)?,
                    used_model: row.get(4)?,
                    used_provider: row.get(5)?,
                    prompt_tokens: row.get(6)?,
                    completion_tokens: row.get(7)?,
                    reasoning_tokens: row.get(8)?,
                    cached_tokens: row.get(9)?,
                    cost: CostBreakdown {
                        input_cost: row.get(10)?,
                        output_cost: row.get(11)?,
                        cached_cost: row.get(12)?,
                        request_cost: row.get(13)?,
                        total: row.get(14)?,
                    },
                    ttft_ms: ttft_ms.map(|v| v as u64),
                    duration_ms: duration_ms as u64,
                    outcome: row.get(17)?,
                    http_status: row.get(18)?,
                    attempts: serde_json::from_str::<Vec<Attempt>>(&attempts_json)
                        .unwrap_or_default(),
                    cache_hit: row.get(20)?,
                    byok: row.get(21)?,
                    prompt: row.get(22)?,
                    response: row.get(23)?,
                    created_at: created_at
                        .parse()
                        .unwrap_or_else(|_| chrono::Utc::now()),
                })
            })
            .map_err(|e| GatewayError::LogStore(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::LogStore(e.to_string()))
    }
}

/// Cheap handle cloned into the dispatcher. Enqueue never blocks the
/// response path; a full buffer degrades to a synchronous write instead
/// of dropping the record.
#[derive(Clone)]
pub struct LogHandle {
    tx: mpsc::Sender<LogRecord>,
    store: Arc<LogStore>,
}

impl LogHandle {
    pub fn enqueue(&self, record: LogRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record))
            | Err(mpsc::error::TrySendError::Closed(record)) => {
                warn!("log buffer unavailable, writing record synchronously");
                if let Err(e) = self.store.write_batch(std::slice::from_ref(&record)) {
                    warn!(error = %e, request_id = %record.request_id, "usage log write failed");
                }
            }
        }
    }

    pub fn store(&self) -> Arc<LogStore> {
        Arc::clone(&self.store)
    }
}

/// The background drain: one task pulling batches from the in-process
/// buffer into the store. Start before serving, shut down after the
/// server stops so the buffer flushes.
pub struct LogPipeline {
    handle: LogHandle,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl LogPipeline {
    pub fn start(store: Arc<LogStore>, cfg: &LogConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<LogRecord>(cfg.buffer_size.max(1));
        let cancel = CancellationToken::new();
        let batch_size = cfg.batch_size.max(1);
        let flush_interval = Duration::from_millis(cfg.flush_interval_ms.max(1));

        let drain_store = Arc::clone(&store);
        let drain_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut batch: Vec<LogRecord> = Vec::with_capacity(batch_size);
            loop {
                let first = tokio::select! {
                    _ = drain_cancel.cancelled() => None,
                    r = rx.recv() => r,
                };
                match first {
                    Some(record) => {
                        batch.push(record);
                        // Opportunistically fill the batch, waiting at
                        // most one flush interval.
                        let deadline = tokio::time::Instant::now() + flush_interval;
                        while batch.len() < batch_size {
                            match tokio::time::timeout_at(deadline, rx.recv()).await {
                                Ok(Some(r)) => batch.push(r),
                                Ok(None) | Err(_) => break,
                            }
                        }
                        if let Err(e) = drain_store.write_batch(&batch) {
                            warn!(error = %e, count = batch.len(), "usage log batch write failed");
                        } else {
                            debug!(count = batch.len(), "flushed usage log batch");
                        }
                        batch.clear();
                    }
                    None => break,
                }
            }
            // Shutdown: drain whatever is still buffered.
            while let Ok(record) = rx.try_recv() {
                batch.push(record);
            }
            if let Err(e) = drain_store.write_batch(&batch) {
                warn!(error = %e, count = batch.len(), "final usage log flush failed");
            }
        });

        Self {
            handle: LogHandle { tx, store },
            cancel,
            task,
        }
    }

    pub fn handle(&self) -> LogHandle {
        self.handle.clone()
    }

    /// Flush the buffer and stop the drain task.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "log drain task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(request_id: &str, org: &str) -> LogRecord {
        LogRecord {
            request_id: request_id.into(),
            org_id: org.into(),
            project_id: Some("default".into()),
            requested_model: "gpt-4o".into(),
            used_model: Some("gpt-4o".into()),
            used_provider: Some("openai".into()),
            prompt_tokens: 5,
            completion_tokens: 1,
            reasoning_tokens: 0,
            cached_tokens: 0,
            cost: CostBreakdown {
                input_cost: 0.001,
                output_cost: 0.002,
                cached_cost: 0.0,
                request_cost: 0.0,
                total: 0.003,
            },
            ttft_ms: None,
            duration_ms: 42,
            outcome: "ok".into(),
            http_status: 200,
            attempts: vec![Attempt {
                provider: "openai".into(),
                outcome: "ok".into(),
                status: Some(200),
            }],
            cache_hit: false,
            byok: false,
            prompt: None,
            response: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(&dir.path().join("logs.db")).unwrap();
        store
            .write_batch(&[record("r1", "acme"), record("r2", "acme")])
            .unwrap();
        let rows = store.recent("acme", 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].org_id, "acme");
        assert_eq!(rows[0].attempts[0].provider, "openai");
        assert!((rows[0].cost.total - 0.003).abs() < 1e-12);
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(&dir.path().join("logs.db")).unwrap();
        let r = record("r1", "acme");
        store.write_batch(&[r.clone()]).unwrap();
        store.write_batch(&[r]).unwrap();
        assert_eq!(store.recent("acme", 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pipeline_flushes_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(&dir.path().join("logs.db")).unwrap());
        let cfg = LogConfig {
            db_path: dir.path().join("logs.db"),
            buffer_size: 64,
            batch_size: 16,
            flush_interval_ms: 10_000,
            ..Default::default()
        };
        let pipeline = LogPipeline::start(Arc::clone(&store), &cfg);
        let handle = pipeline.handle();
        for i in 0..5 {
            handle.enqueue(record(&format!("r{i}"), "acme"));
        }
        pipeline.shutdown().await;
        assert_eq!(store.recent("acme", 100).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_full_buffer_degrades_to_synchronous_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(&dir.path().join("logs.db")).unwrap());
        let cfg = LogConfig {
            db_path: dir.path().join("logs.db"),
            buffer_size: 1,
            batch_size: 1,
            flush_interval_ms: 50,
            ..Default::default()
        };
        let pipeline = LogPipeline::start(Arc::clone(&store), &cfg);
        let handle = pipeline.handle();
        // Flood well past the buffer; nothing may be dropped.
        for i in 0..50 {
            handle.enqueue(record(&format!("r{i}"), "acme"));
        }
        pipeline.shutdown().await;
        assert_eq!(store.recent("acme", 100).unwrap().len(), 50);
    }
}

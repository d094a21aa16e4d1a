//! Append-only event log
//!
//! Records are kept in a bounded in-memory buffer for status queries and,
//! when enabled, appended to a JSONL file. When the active file exceeds
//! `max_file_bytes` it is renamed with a timestamp suffix and a fresh file
//! is started; the oldest rotated files are pruned beyond
//! `max_rotated_files`.
//!
//! A failed append is reported as `Error::Log`. The checkpoint downgrades
//! that to a warning; a logging fault never changes a decision.

use super::types::{EventRecord, EventTotals};
use crate::config::EventLogConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};

/// Destination for checkpoint events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, record: EventRecord) -> Result<()>;
}

/// JSONL file with size-based rotation
struct JsonlFile {
    dir: PathBuf,
    active_path: PathBuf,
    stem: String,
    max_file_bytes: u64,
    max_rotated_files: usize,
    /// Serializes writes and rotation
    lock: Mutex<()>,
}

impl JsonlFile {
    async fn open(config: &EventLogConfig) -> Result<Self> {
        let active_path = config.path.clone();
        let dir = match active_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::Log(format!(
                "Failed to create event log directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        let stem = active_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "events".to_string());

        Ok(Self {
            dir,
            active_path,
            stem,
            max_file_bytes: config.max_file_bytes,
            max_rotated_files: config.max_rotated_files,
            lock: Mutex::new(()),
        })
    }

    async fn append(&self, record: &EventRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| Error::Log(format!("Failed to serialize event: {}", e)))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        self.maybe_rotate().await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.active_path)
            .await
            .map_err(|e| {
                Error::Log(format!(
                    "Failed to open event log {}: {}",
                    self.active_path.display(),
                    e
                ))
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Log(format!("Failed to write event: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Log(format!("Failed to flush event log: {}", e)))?;
        Ok(())
    }

    async fn maybe_rotate(&self) -> Result<()> {
        let meta = match fs::metadata(&self.active_path).await {
            Ok(m) => m,
            Err(_) => return Ok(()),
        };
        if meta.len() < self.max_file_bytes {
            return Ok(());
        }

        let ts = chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f").to_string();
        let mut rotated = self.dir.join(format!("{}-{}.jsonl", self.stem, ts));
        let mut counter = 1u32;
        while fs::try_exists(&rotated).await.unwrap_or(false) {
            rotated = self
                .dir
                .join(format!("{}-{}-{}.jsonl", self.stem, ts, counter));
            counter += 1;
        }
        fs::rename(&self.active_path, &rotated)
            .await
            .map_err(|e| Error::Log(format!("Failed to rotate event log: {}", e)))?;
        tracing::debug!(rotated = %rotated.display(), "Rotated event log");

        self.prune_rotated().await
    }

    async fn prune_rotated(&self) -> Result<()> {
        let prefix = format!("{}-", self.stem);
        let mut rotated: Vec<PathBuf> = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Log(format!("Failed to read event log dir: {}", e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Log(format!("Failed to read dir entry: {}", e)))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix) && name.ends_with(".jsonl") {
                rotated.push(entry.path());
            }
        }
        rotated.sort();

        while rotated.len() > self.max_rotated_files {
            let oldest = rotated.remove(0);
            if let Err(e) = fs::remove_file(&oldest).await {
                tracing::warn!(path = %oldest.display(), "Failed to prune event log: {}", e);
            }
        }
        Ok(())
    }

    async fn load(&self, limit: usize) -> Vec<EventRecord> {
        read_jsonl(&self.active_path, limit).await
    }
}

/// Read the last `limit` parseable records from a JSONL file.
pub async fn read_jsonl(path: &Path, limit: usize) -> Vec<EventRecord> {
    let file = match fs::File::open(path).await {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };
    let mut reader = BufReader::new(file);
    let mut records = VecDeque::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), "Stopped reading event log: {}", e);
                break;
            }
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim_end(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Skipping non-UTF-8 event line: {}", e);
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<EventRecord>(line) {
            Ok(record) => {
                if records.len() == limit {
                    records.pop_front();
                }
                records.push_back(record);
            }
            Err(e) => tracing::debug!("Skipping unreadable event line: {}", e),
        }
    }
    records.into()
}

/// Event log with in-memory buffer and optional JSONL persistence
pub struct EventLog {
    buffer: RwLock<VecDeque<EventRecord>>,
    totals: RwLock<EventTotals>,
    capacity: usize,
    file: Option<JsonlFile>,
}

impl EventLog {
    /// Memory-only log
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(VecDeque::new()),
            totals: RwLock::new(EventTotals::default()),
            capacity: capacity.max(1),
            file: None,
        }
    }

    /// Open the log described by `config`, restoring recent records from
    /// the active file.
    pub async fn open(config: &EventLogConfig) -> Result<Self> {
        let mut log = Self::in_memory(config.buffer_capacity);
        if !config.enabled {
            return Ok(log);
        }

        let file = JsonlFile::open(config).await?;
        let restored = file.load(log.capacity).await;
        {
            let totals = log.totals.get_mut();
            for record in &restored {
                totals.record(record.action);
            }
        }
        if !restored.is_empty() {
            tracing::info!(
                path = %config.path.display(),
                count = restored.len(),
                "Restored events from log"
            );
        }
        *log.buffer.get_mut() = restored.into();
        log.file = Some(file);
        Ok(log)
    }

    /// Most recent records, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<EventRecord> {
        let buffer = self.buffer.read().await;
        let skip = buffer.len().saturating_sub(limit);
        buffer.iter().skip(skip).cloned().collect()
    }

    /// Buffered records for one session, in append order.
    pub async fn for_session(&self, session_id: &str) -> Vec<EventRecord> {
        self.buffer
            .read()
            .await
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }

    pub async fn totals(&self) -> EventTotals {
        self.totals.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.read().await.is_empty()
    }

    pub fn is_persistent(&self) -> bool {
        self.file.is_some()
    }
}

#[async_trait]
impl EventSink for EventLog {
    async fn append(&self, record: EventRecord) -> Result<()> {
        let persisted = match &self.file {
            Some(file) => file.append(&record).await,
            None => Ok(()),
        };

        self.totals.write().await.record(record.action);
        let mut buffer = self.buffer.write().await;
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(record);

        persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{EventAction, EventDetails, EventType, Operation};
    use tempfile::TempDir;

    fn reset_record(session_id: &str) -> EventRecord {
        EventRecord::new(
            session_id,
            Operation::ResetSession,
            EventType::AdminAction,
            EventAction::SessionReset,
            EventDetails::Reset {
                actor: Some("ops".to_string()),
                reason: None,
                was_tainted: false,
            },
        )
    }

    fn config_in(dir: &TempDir) -> EventLogConfig {
        EventLogConfig {
            enabled: true,
            path: dir.path().join("security_events.jsonl"),
            ..EventLogConfig::default()
        }
    }

    #[tokio::test]
    async fn test_in_memory_buffer_is_bounded() {
        let log = EventLog::in_memory(2);
        for id in ["a", "b", "c"] {
            log.append(reset_record(id)).await.unwrap();
        }
        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].session_id, "b");
        assert_eq!(log.totals().await.total_events, 3);
        assert!(!log.is_persistent());
    }

    #[tokio::test]
    async fn test_for_session_keeps_order() {
        let log = EventLog::in_memory(10);
        log.append(reset_record("a")).await.unwrap();
        log.append(reset_record("b")).await.unwrap();
        log.append(reset_record("a").with_risk_score(0.5)).await.unwrap();

        let records = log.for_session("a").await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].risk_score, 0.5);
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        {
            let log = EventLog::open(&config).await.unwrap();
            log.append(reset_record("s1")).await.unwrap();
            log.append(reset_record("s2")).await.unwrap();
        }

        let content = std::fs::read_to_string(&config.path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let reopened = EventLog::open(&config).await.unwrap();
        assert_eq!(reopened.len().await, 2);
        assert_eq!(
            reopened.totals().await.count(EventAction::SessionReset),
            2
        );
    }

    #[tokio::test]
    async fn test_rotation_and_pruning() {
        let dir = TempDir::new().unwrap();
        let config = EventLogConfig {
            max_file_bytes: 1,
            max_rotated_files: 2,
            ..config_in(&dir)
        };
        let log = EventLog::open(&config).await.unwrap();
        for _ in 0..5 {
            log.append(reset_record("s1")).await.unwrap();
        }

        let rotated: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with("security_events-"))
            .collect();
        assert_eq!(rotated.len(), 2);
        assert!(config.path.exists());
    }

    #[tokio::test]
    async fn test_disabled_persistence() {
        let dir = TempDir::new().unwrap();
        let config = EventLogConfig {
            enabled: false,
            ..config_in(&dir)
        };
        let log = EventLog::open(&config).await.unwrap();
        log.append(reset_record("s1")).await.unwrap();
        assert!(!config.path.exists());
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_log_error_but_buffered() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let log = EventLog::open(&config).await.unwrap();
        // A directory where the active file should be makes every open fail
        std::fs::create_dir(&config.path).unwrap();

        let err = log.append(reset_record("s1")).await.unwrap_err();
        assert!(matches!(err, Error::Log(_)));
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_read_jsonl_skips_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let good = serde_json::to_string(&reset_record("s1")).unwrap();
        std::fs::write(&path, format!("not json\n{}\n", good)).unwrap();

        let records = read_jsonl(&path, 10).await;
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_read_jsonl_skips_non_utf8_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let first = serde_json::to_string(&reset_record("s1")).unwrap();
        let second = serde_json::to_string(&reset_record("s2")).unwrap();

        let mut bytes = format!("{}\n", first).into_bytes();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        bytes.extend_from_slice(format!("{}\n", second).as_bytes());
        std::fs::write(&path, bytes).unwrap();

        let records = read_jsonl(&path, 10).await;
        let ids: Vec<&str> = records.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }
}

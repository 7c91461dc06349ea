//! Event log collaborator contract and built-in backends.
//!
//! The aggregate core only consumes this contract: an append-only store of
//! ordered events per stream, with all-or-nothing batch appends. Two
//! reference backends are provided -- [`MemoryEventLog`] for tests and
//! [`JsonlEventLog`] for simple file persistence. A production deployment
//! would implement [`EventLog`] against a real event store.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::event::StoredEvent;
use crate::storage::StreamLayout;

/// Failures reported by an [`EventLog`] backend.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The stream moved past the expected version. With an exclusive
    /// per-stream writer this cannot happen; it guards against a second
    /// writer appearing.
    #[error(
        "version conflict on {aggregate_type}/{instance_id}: \
         expected {expected}, stream is at {actual}"
    )]
    VersionConflict {
        aggregate_type: String,
        instance_id: String,
        expected: u64,
        actual: u64,
    },

    /// Underlying storage I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An event could not be serialized or a stored line could not be parsed.
    #[error("event codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Append-only durable store of ordered events, one stream per
/// `(aggregate_type, instance_id)` pair.
///
/// # Contract
///
/// - `append` is all-or-nothing for the batch: either every event in the
///   batch becomes durable, in order, or none do.
/// - `expected_version` is the number of events already in the stream; a
///   mismatch fails with [`LogError::VersionConflict`] and appends nothing.
/// - `read` returns events in stream order. Reading an unknown stream
///   yields an empty history, not an error.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a batch of events, returning the new stream version.
    async fn append(
        &self,
        aggregate_type: &str,
        instance_id: &str,
        expected_version: u64,
        events: Vec<StoredEvent>,
    ) -> Result<u64, LogError>;

    /// Read events with `stream_version >= from_version`, in order.
    async fn read(
        &self,
        aggregate_type: &str,
        instance_id: &str,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>, LogError>;
}

type StreamKey = (String, String);

/// In-memory event log, used in tests and as the contract's reference
/// semantics.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    streams: Mutex<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(
        &self,
        aggregate_type: &str,
        instance_id: &str,
        expected_version: u64,
        events: Vec<StoredEvent>,
    ) -> Result<u64, LogError> {
        let mut streams = self.streams.lock().await;
        let stream = streams
            .entry((aggregate_type.to_owned(), instance_id.to_owned()))
            .or_default();

        let actual = stream.len() as u64;
        if actual != expected_version {
            return Err(LogError::VersionConflict {
                aggregate_type: aggregate_type.to_owned(),
                instance_id: instance_id.to_owned(),
                expected: expected_version,
                actual,
            });
        }

        stream.extend(events);
        Ok(stream.len() as u64)
    }

    async fn read(
        &self,
        aggregate_type: &str,
        instance_id: &str,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>, LogError> {
        let streams = self.streams.lock().await;
        let events = streams
            .get(&(aggregate_type.to_owned(), instance_id.to_owned()))
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.stream_version >= from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(events)
    }
}

/// File-backed event log: one `events.jsonl` per stream under a
/// [`StreamLayout`], one JSON event per line.
///
/// Stream versions are cached after the first touch so appends do not
/// re-count lines. The whole batch is serialized before anything is
/// written, so a codec failure appends nothing.
pub struct JsonlEventLog {
    layout: StreamLayout,
    /// Cached stream lengths, also serializing writers per log instance.
    versions: Mutex<HashMap<StreamKey, u64>>,
}

impl JsonlEventLog {
    pub fn new(layout: StreamLayout) -> Self {
        Self {
            layout,
            versions: Mutex::new(HashMap::new()),
        }
    }

    fn read_stream(
        &self,
        aggregate_type: &str,
        instance_id: &str,
    ) -> Result<Vec<StoredEvent>, LogError> {
        let path = self
            .layout
            .stream_dir(aggregate_type, instance_id)
            .join("events.jsonl");

        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            events.push(serde_json::from_str::<StoredEvent>(&line)?);
        }
        Ok(events)
    }
}

#[async_trait]
impl EventLog for JsonlEventLog {
    async fn append(
        &self,
        aggregate_type: &str,
        instance_id: &str,
        expected_version: u64,
        events: Vec<StoredEvent>,
    ) -> Result<u64, LogError> {
        let key = (aggregate_type.to_owned(), instance_id.to_owned());
        let mut versions = self.versions.lock().await;

        let actual = match versions.get(&key) {
            Some(v) => *v,
            None => {
                // First touch of this stream: establish the version from disk.
                let existing = self.read_stream(aggregate_type, instance_id)?;
                existing.len() as u64
            }
        };

        if actual != expected_version {
            return Err(LogError::VersionConflict {
                aggregate_type: aggregate_type.to_owned(),
                instance_id: instance_id.to_owned(),
                expected: expected_version,
                actual,
            });
        }

        // Serialize the whole batch up front; on codec failure nothing is
        // written.
        let mut buf = String::new();
        for event in &events {
            buf.push_str(&serde_json::to_string(event)?);
            buf.push('\n');
        }

        let dir = self.layout.ensure_stream(aggregate_type, instance_id)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("events.jsonl"))?;
        file.write_all(buf.as_bytes())?;
        file.sync_data()?;

        let new_version = actual + events.len() as u64;
        versions.insert(key, new_version);
        Ok(new_version)
    }

    async fn read(
        &self,
        aggregate_type: &str,
        instance_id: &str,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>, LogError> {
        let mut events = self.read_stream(aggregate_type, instance_id)?;
        events.retain(|e| e.stream_version >= from_version);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandContext;
    use crate::event::encode_domain_event;
    use crate::portfolio::{PortfolioEvent, PortfolioState};
    use rust_decimal_macros::dec;

    fn stored(event: &PortfolioEvent, version: u64) -> StoredEvent {
        encode_domain_event::<PortfolioState>(event, &CommandContext::default(), "p-1", version)
            .expect("encode should succeed")
    }

    fn sample_batch() -> Vec<StoredEvent> {
        vec![
            stored(
                &PortfolioEvent::Opened {
                    name: "alice".into(),
                },
                0,
            ),
            stored(&PortfolioEvent::FundsCredited { amount: dec!(50) }, 1),
        ]
    }

    #[tokio::test]
    async fn memory_append_then_read_roundtrips() {
        let log = MemoryEventLog::new();
        let version = log
            .append("portfolio", "p-1", 0, sample_batch())
            .await
            .expect("append should succeed");
        assert_eq!(version, 2);

        let events = log
            .read("portfolio", "p-1", 0)
            .await
            .expect("read should succeed");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "Opened");
        assert_eq!(events[1].event_type, "FundsCredited");
    }

    #[tokio::test]
    async fn memory_append_stale_version_conflicts() {
        let log = MemoryEventLog::new();
        log.append("portfolio", "p-1", 0, sample_batch())
            .await
            .expect("append should succeed");

        let err = log
            .append("portfolio", "p-1", 0, sample_batch())
            .await
            .expect_err("stale expected version must conflict");
        assert!(matches!(
            err,
            LogError::VersionConflict {
                expected: 0,
                actual: 2,
                ..
            }
        ));

        // Nothing was appended by the failed call.
        let events = log.read("portfolio", "p-1", 0).await.expect("read");
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn memory_read_from_version_filters() {
        let log = MemoryEventLog::new();
        log.append("portfolio", "p-1", 0, sample_batch())
            .await
            .expect("append");

        let events = log.read("portfolio", "p-1", 1).await.expect("read");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stream_version, 1);
    }

    #[tokio::test]
    async fn memory_unknown_stream_reads_empty() {
        let log = MemoryEventLog::new();
        let events = log.read("portfolio", "nope", 0).await.expect("read");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn memory_streams_are_independent() {
        let log = MemoryEventLog::new();
        log.append("portfolio", "p-1", 0, sample_batch())
            .await
            .expect("append p-1");
        // p-2 starts at version 0 regardless of p-1's history.
        log.append("portfolio", "p-2", 0, sample_batch())
            .await
            .expect("append p-2");

        assert_eq!(log.read("portfolio", "p-1", 0).await.expect("read").len(), 2);
        assert_eq!(log.read("portfolio", "p-2", 0).await.expect("read").len(), 2);
    }

    #[tokio::test]
    async fn jsonl_append_then_read_roundtrips() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let log = JsonlEventLog::new(StreamLayout::new(tmp.path()));

        let version = log
            .append("portfolio", "p-1", 0, sample_batch())
            .await
            .expect("append should succeed");
        assert_eq!(version, 2);

        let events = log.read("portfolio", "p-1", 0).await.expect("read");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stream_version, 0);
        assert_eq!(events[1].stream_version, 1);
    }

    #[tokio::test]
    async fn jsonl_survives_reopen() {
        let tmp = tempfile::tempdir().expect("temp dir");
        {
            let log = JsonlEventLog::new(StreamLayout::new(tmp.path()));
            log.append("portfolio", "p-1", 0, sample_batch())
                .await
                .expect("append");
        }

        // A fresh log instance over the same directory sees the history
        // and continues from the right version.
        let log = JsonlEventLog::new(StreamLayout::new(tmp.path()));
        let events = log.read("portfolio", "p-1", 0).await.expect("read");
        assert_eq!(events.len(), 2);

        let version = log
            .append(
                "portfolio",
                "p-1",
                2,
                vec![stored(&PortfolioEvent::LiquidationStarted, 2)],
            )
            .await
            .expect("append after reopen");
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn jsonl_stale_version_conflicts() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let log = JsonlEventLog::new(StreamLayout::new(tmp.path()));
        log.append("portfolio", "p-1", 0, sample_batch())
            .await
            .expect("append");

        let err = log
            .append("portfolio", "p-1", 1, sample_batch())
            .await
            .expect_err("stale expected version must conflict");
        assert!(matches!(err, LogError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn jsonl_unknown_stream_reads_empty() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let log = JsonlEventLog::new(StreamLayout::new(tmp.path()));
        let events = log.read("portfolio", "nope", 0).await.expect("read");
        assert!(events.is_empty());
    }
}

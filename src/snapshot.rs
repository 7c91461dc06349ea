//! File-based snapshot persistence for aggregate state.
//!
//! Snapshots are an advisory cache of folded state: they bound replay cost
//! but never change observable command outcomes. Deleting a snapshot (or
//! failing to read one) only forces a full replay. Writes are atomic via a
//! temp-rename pattern to prevent corruption from crashes mid-write.

use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::aggregate::Aggregate;
use crate::storage::StreamLayout;

/// A point-in-time snapshot of an aggregate's state and stream version.
///
/// The `stream_version` records how many events have been folded into the
/// `state`, so catch-up can resume from that version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "A: Serialize", deserialize = "A: DeserializeOwned"))]
pub struct Snapshot<A> {
    /// The aggregate state at the time of the snapshot.
    pub state: A,
    /// The stream version (number of events applied) at snapshot time.
    pub stream_version: u64,
}

/// Save an aggregate snapshot atomically to disk.
///
/// Writes to a temporary file (`snapshot.json.tmp`) in the same directory,
/// then renames it into place, so readers never see a partially-written
/// file.
///
/// # Errors
///
/// Returns `io::Error` if directory creation, file writing, or renaming fails.
pub fn save_snapshot<A: Aggregate>(
    layout: &StreamLayout,
    instance_id: &str,
    snapshot: &Snapshot<A>,
) -> io::Result<()> {
    let path = layout.snapshot_path(A::AGGREGATE_TYPE, instance_id);
    let dir = path
        .parent()
        .expect("snapshot path always has a parent directory");
    std::fs::create_dir_all(dir)?;

    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Load an aggregate snapshot from disk.
///
/// # Returns
///
/// - `Ok(Some(snapshot))` if the file exists and deserializes successfully.
/// - `Ok(None)` if the file does not exist or contains invalid JSON.
///   Deserialization failures are logged as warnings and treated as a
///   cache miss, never an error -- the snapshot is advisory.
///
/// # Errors
///
/// Returns `io::Error` only for unexpected I/O failures (e.g. permission
/// denied).
pub fn load_snapshot<A: Aggregate>(
    layout: &StreamLayout,
    instance_id: &str,
) -> io::Result<Option<Snapshot<A>>> {
    let path = layout.snapshot_path(A::AGGREGATE_TYPE, instance_id);
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    match serde_json::from_slice::<Snapshot<A>>(&bytes) {
        Ok(snap) => Ok(Some(snap)),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to deserialize snapshot; treating as cache miss"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::{PortfolioEvent, PortfolioState};

    fn opened(name: &str) -> PortfolioState {
        PortfolioState::default().apply(&PortfolioEvent::Opened { name: name.into() })
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let layout = StreamLayout::new(dir.path());
        let snap = Snapshot {
            state: opened("alice"),
            stream_version: 7,
        };

        save_snapshot::<PortfolioState>(&layout, "p-1", &snap).expect("save should succeed");

        let loaded = load_snapshot::<PortfolioState>(&layout, "p-1")
            .expect("load should succeed")
            .expect("snapshot should exist");
        assert_eq!(loaded.state, snap.state);
        assert_eq!(loaded.stream_version, 7);
    }

    #[test]
    fn load_nonexistent_returns_none() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let layout = StreamLayout::new(dir.path());
        let result =
            load_snapshot::<PortfolioState>(&layout, "no-such-id").expect("load should succeed");
        assert!(result.is_none());
    }

    #[test]
    fn load_corrupt_json_returns_none() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let layout = StreamLayout::new(dir.path());
        let path = layout.snapshot_path("portfolio", "p-bad");
        std::fs::create_dir_all(path.parent().unwrap()).expect("create dir");
        std::fs::write(&path, b"this is not valid json!!!").expect("write corrupt file");

        let result =
            load_snapshot::<PortfolioState>(&layout, "p-bad").expect("load should succeed");
        assert!(
            result.is_none(),
            "corrupt JSON should be a cache miss, not an error"
        );
    }

    #[test]
    fn save_uses_atomic_temp_rename() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let layout = StreamLayout::new(dir.path());
        let snap = Snapshot {
            state: opened("alice"),
            stream_version: 3,
        };

        save_snapshot::<PortfolioState>(&layout, "p-atomic", &snap).expect("save should succeed");

        let final_path = layout.snapshot_path("portfolio", "p-atomic");
        let tmp_path = final_path.with_extension("json.tmp");

        assert!(final_path.exists(), "final snapshot file should exist");
        assert!(
            !tmp_path.exists(),
            "temp file should not exist after successful save"
        );
    }
}

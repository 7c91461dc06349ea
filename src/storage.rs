//! On-disk directory layout for streams and snapshots.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Manages the on-disk directory layout for aggregate event streams.
///
/// The layout follows this structure:
/// ```text
/// <base_dir>/
///     streams/
///         <aggregate_type>/
///             <instance_id>/
///                 events.jsonl
///     snapshots/
///         <aggregate_type>/
///             <instance_id>/
///                 snapshot.json
///     meta/
///         streams.jsonl           -- stream registry
/// ```
///
/// `StreamLayout` is cheap to clone (it wraps a single `PathBuf`) and
/// provides path helpers plus stream lifecycle management (creation and
/// listing).
#[derive(Debug, Clone)]
pub struct StreamLayout {
    base_dir: PathBuf,
}

impl StreamLayout {
    /// Create a new `StreamLayout` rooted at the given base directory.
    ///
    /// The directory does not need to exist yet; it is created lazily when
    /// [`ensure_stream`](StreamLayout::ensure_stream) is called.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the root directory of this layout.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base_dir>/streams/<aggregate_type>/<instance_id>`
    pub fn stream_dir(&self, aggregate_type: &str, instance_id: &str) -> PathBuf {
        self.base_dir
            .join("streams")
            .join(aggregate_type)
            .join(instance_id)
    }

    /// `<base_dir>/snapshots/<aggregate_type>/<instance_id>/snapshot.json`
    pub fn snapshot_path(&self, aggregate_type: &str, instance_id: &str) -> PathBuf {
        self.base_dir
            .join("snapshots")
            .join(aggregate_type)
            .join(instance_id)
            .join("snapshot.json")
    }

    /// `<base_dir>/meta`
    pub fn meta_dir(&self) -> PathBuf {
        self.base_dir.join("meta")
    }

    /// Ensures that the stream directory and registry entry exist for the
    /// given aggregate type and instance ID.
    ///
    /// Idempotent: repeated calls with the same arguments do not create
    /// duplicate directory trees or registry entries.
    ///
    /// # Returns
    ///
    /// The stream directory path on success.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if directory creation or file I/O fails.
    pub fn ensure_stream(
        &self,
        aggregate_type: &str,
        instance_id: &str,
    ) -> std::io::Result<PathBuf> {
        let dir = self.stream_dir(aggregate_type, instance_id);
        fs::create_dir_all(&dir)?;

        let meta = self.meta_dir();
        fs::create_dir_all(&meta)?;

        let registry_path = meta.join("streams.jsonl");

        if !self.is_registered(&registry_path, aggregate_type, instance_id)? {
            let ts = SystemTime::UNIX_EPOCH
                .elapsed()
                .expect("system clock is before Unix epoch")
                .as_secs();

            let entry = serde_json::json!({
                "type": aggregate_type,
                "id": instance_id,
                "ts": ts,
            });

            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&registry_path)?;
            writeln!(file, "{entry}")?;
        }

        Ok(dir)
    }

    /// Checks whether a registry entry already exists for `(type, id)`.
    ///
    /// Entries are compared structurally (parsed JSON) rather than by
    /// string matching, which would be fragile if field ordering changed.
    fn is_registered(
        &self,
        registry_path: &Path,
        aggregate_type: &str,
        instance_id: &str,
    ) -> std::io::Result<bool> {
        let file = match fs::File::open(registry_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<serde_json::Value>(&line)
                && entry.get("type").and_then(|v| v.as_str()) == Some(aggregate_type)
                && entry.get("id").and_then(|v| v.as_str()) == Some(instance_id)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Lists all instance IDs registered for the given aggregate type,
    /// sorted.
    ///
    /// Reads the `meta/streams.jsonl` registry written by
    /// [`ensure_stream`](StreamLayout::ensure_stream); only streams that
    /// went through stream creation are listed. Returns an empty vector if
    /// no stream has been registered yet.
    pub fn list_streams(&self, aggregate_type: &str) -> std::io::Result<Vec<String>> {
        let registry_path = self.meta_dir().join("streams.jsonl");

        let file = match fs::File::open(&registry_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<serde_json::Value>(&line)
                && entry.get("type").and_then(|v| v.as_str()) == Some(aggregate_type)
                && let Some(id) = entry.get("id").and_then(|v| v.as_str())
            {
                ids.push(id.to_owned());
            }
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

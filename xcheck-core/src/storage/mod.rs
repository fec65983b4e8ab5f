//! Baseline storage
//!
//! A baseline is a recorded, well-nested stream that later runs are
//! compared against. Baselines carry a header with a run id, recording
//! time, record counts and a SHA-256 digest of the stream so that a
//! truncated or edited baseline is detected on load.
//!
//! # Example
//!
//! ```rust
//! use xcheck::storage::{BaselineStore, InMemoryBaselineStore};
//! use xcheck::record::{ChecksumRecord, RecordStream};
//!
//! let store = InMemoryBaselineStore::new();
//! let mut stream = RecordStream::new();
//! stream.push(0, ChecksumRecord::entry(1));
//! stream.push(0, ChecksumRecord::exit(1));
//!
//! store.save("run-a", &stream).unwrap();
//! assert_eq!(store.load("run-a").unwrap().stream, stream);
//! ```
//!
//! ## File format
//!
//! [`FileBaselineStore`] writes newline-delimited JSON: the first line is
//! the [`BaselineHeader`], each following line one [`ThreadRecord`].

use std::collections::HashMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, XCheckError};
use crate::record::{RecordStream, ThreadRecord};

/// Version written into every baseline header
pub const BASELINE_FORMAT_VERSION: &str = "1.0";

/// Metadata stored ahead of a baseline's records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineHeader {
    pub format_version: String,
    pub name: String,
    /// Unique id of the recording
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    pub record_count: usize,
    pub thread_count: usize,
    /// Hex SHA-256 of the stream's canonical text form
    pub digest: String,
}

impl BaselineHeader {
    pub fn for_stream(name: &str, stream: &RecordStream) -> Self {
        Self {
            format_version: BASELINE_FORMAT_VERSION.to_string(),
            name: name.to_string(),
            run_id: uuid::Uuid::new_v4().to_string(),
            recorded_at: Utc::now(),
            record_count: stream.len(),
            thread_count: stream.thread_count(),
            digest: stream_digest(stream),
        }
    }

    /// Check that `stream` is the one this header was written for
    pub fn verify(&self, stream: &RecordStream) -> Result<()> {
        let actual = stream_digest(stream);
        if actual != self.digest {
            return Err(XCheckError::BaselineIntegrity {
                name: self.name.clone(),
                expected: self.digest.clone(),
                actual,
            });
        }
        if stream.len() != self.record_count {
            return Err(XCheckError::BaselineIntegrity {
                name: self.name.clone(),
                expected: format!("{} records", self.record_count),
                actual: format!("{} records", stream.len()),
            });
        }
        Ok(())
    }
}

/// A stored baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub header: BaselineHeader,
    pub stream: RecordStream,
}

/// SHA-256 over the thread-tagged text rendering of a stream
pub fn stream_digest(stream: &RecordStream) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stream.to_text(true).as_bytes());
    hex::encode(hasher.finalize())
}

/// Storage backend for baselines
///
/// All methods take `&self`; implementations use interior mutability.
pub trait BaselineStore: Send + Sync {
    /// Persist a stream under `name`, replacing any previous baseline
    fn save(&self, name: &str, stream: &RecordStream) -> Result<BaselineHeader>;

    /// Load and integrity-check a baseline
    fn load(&self, name: &str) -> Result<Baseline>;

    fn exists(&self, name: &str) -> Result<bool>;

    /// Names of stored baselines, sorted
    fn list(&self) -> Result<Vec<String>>;

    fn delete(&self, name: &str) -> Result<()>;

    /// Backend name (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// In-memory baseline store
#[derive(Debug, Default)]
pub struct InMemoryBaselineStore {
    baselines: RwLock<HashMap<String, Baseline>>,
}

impl InMemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        if let Ok(mut baselines) = self.baselines.write() {
            baselines.clear();
        }
    }
}

impl BaselineStore for InMemoryBaselineStore {
    fn save(&self, name: &str, stream: &RecordStream) -> Result<BaselineHeader> {
        let header = BaselineHeader::for_stream(name, stream);
        let mut baselines = self.baselines.write().map_err(|_| XCheckError::StorageLocked)?;
        baselines.insert(
            name.to_string(),
            Baseline {
                header: header.clone(),
                stream: stream.clone(),
            },
        );
        Ok(header)
    }

    fn load(&self, name: &str) -> Result<Baseline> {
        let baselines = self.baselines.read().map_err(|_| XCheckError::StorageLocked)?;
        let baseline = baselines
            .get(name)
            .cloned()
            .ok_or_else(|| XCheckError::BaselineNotFound {
                name: name.to_string(),
            })?;
        baseline.header.verify(&baseline.stream)?;
        Ok(baseline)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let baselines = self.baselines.read().map_err(|_| XCheckError::StorageLocked)?;
        Ok(baselines.contains_key(name))
    }

    fn list(&self) -> Result<Vec<String>> {
        let baselines = self.baselines.read().map_err(|_| XCheckError::StorageLocked)?;
        let mut names: Vec<String> = baselines.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut baselines = self.baselines.write().map_err(|_| XCheckError::StorageLocked)?;
        baselines.remove(name);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Write a baseline file at `path`
pub fn write_baseline(path: impl AsRef<Path>, name: &str, stream: &RecordStream) -> Result<BaselineHeader> {
    let path = path.as_ref();
    let header = BaselineHeader::for_stream(name, stream);

    let file = std::fs::File::create(path).map_err(|e| XCheckError::IoError {
        message: format!("Failed to create baseline {}: {}", path.display(), e),
    })?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", serde_json::to_string(&header)?)?;
    for record in stream.to_records() {
        writeln!(writer, "{}", serde_json::to_string(&record)?)?;
    }
    writer.flush()?;

    tracing::debug!(
        path = %path.display(),
        records = header.record_count,
        digest = %header.digest,
        "Baseline written"
    );
    Ok(header)
}

/// Read and integrity-check a baseline file
pub fn read_baseline(path: impl AsRef<Path>) -> Result<Baseline> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| XCheckError::IoError {
        message: format!("Failed to open baseline {}: {}", path.display(), e),
    })?;
    let mut lines = BufReader::new(file).lines();

    let header_line = lines.next().ok_or_else(|| XCheckError::MalformedRecord {
        line: 1,
        reason: "baseline is empty".to_string(),
    })??;
    let header: BaselineHeader = serde_json::from_str(&header_line)?;

    let mut records = Vec::with_capacity(header.record_count);
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ThreadRecord = serde_json::from_str(&line)?;
        records.push(record);
    }

    let stream = RecordStream::from_records(records);
    header.verify(&stream)?;
    Ok(Baseline { header, stream })
}

/// Baseline store keeping one JSONL file per baseline in a directory
#[derive(Debug)]
pub struct FileBaselineStore {
    directory: PathBuf,
}

impl FileBaselineStore {
    /// Create a store in `directory`, creating it if needed
    pub fn new<P: Into<PathBuf>>(directory: P) -> Result<Self> {
        let dir = directory.into();
        std::fs::create_dir_all(&dir).map_err(|e| XCheckError::IoError {
            message: format!("Failed to create baseline directory: {}", e),
        })?;
        Ok(Self { directory: dir })
    }

    fn baseline_file(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(XCheckError::InvalidConfig {
                reason: format!("invalid baseline name '{}'", name),
            });
        }
        Ok(self.directory.join(format!("{}.xcheck.jsonl", name)))
    }
}

impl BaselineStore for FileBaselineStore {
    fn save(&self, name: &str, stream: &RecordStream) -> Result<BaselineHeader> {
        write_baseline(self.baseline_file(name)?, name, stream)
    }

    fn load(&self, name: &str) -> Result<Baseline> {
        let path = self.baseline_file(name)?;
        if !path.exists() {
            return Err(XCheckError::BaselineNotFound {
                name: name.to_string(),
            });
        }
        read_baseline(path)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.baseline_file(name)?.exists())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let file_name = entry?.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".xcheck.jsonl")) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.baseline_file(name)?;
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| XCheckError::IoError {
                message: format!("Failed to delete baseline: {}", e),
            })?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Store that keeps nothing
///
/// Useful when a run is compared live and no baseline is wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBaselineStore;

impl BaselineStore for NullBaselineStore {
    fn save(&self, name: &str, stream: &RecordStream) -> Result<BaselineHeader> {
        Ok(BaselineHeader::for_stream(name, stream))
    }

    fn load(&self, name: &str) -> Result<Baseline> {
        Err(XCheckError::BaselineNotFound {
            name: name.to_string(),
        })
    }

    fn exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn delete(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ChecksumRecord;

    fn sample() -> RecordStream {
        let mut s = RecordStream::new();
        s.push(0, ChecksumRecord::entry(0x7c9a_7f6a));
        s.push(0, ChecksumRecord::exit(0x7c9a_7f6a));
        s.push(0, ChecksumRecord::ret(0x7878_7878_7878_7876));
        s.push(1, ChecksumRecord::entry(3));
        s.push(1, ChecksumRecord::exit(3));
        s
    }

    fn temp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("xcheck-{}-{}", label, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryBaselineStore::new();
        let header = store.save("a", &sample()).unwrap();
        assert_eq!(header.record_count, 5);
        assert_eq!(header.thread_count, 2);
        assert_eq!(store.load("a").unwrap().stream, sample());
        assert_eq!(store.list().unwrap(), vec!["a".to_string()]);

        store.delete("a").unwrap();
        assert!(!store.exists("a").unwrap());
        assert_eq!(store.load("a").unwrap_err().error_code(), "BASELINE_NOT_FOUND");
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = temp_dir("store");
        let store = FileBaselineStore::new(&dir).unwrap();
        let header = store.save("run", &sample()).unwrap();

        let loaded = store.load("run").unwrap();
        assert_eq!(loaded.header, header);
        assert_eq!(loaded.stream, sample());
        assert_eq!(store.list().unwrap(), vec!["run".to_string()]);

        store.delete("run").unwrap();
        assert!(!store.exists("run").unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_tampered_file_detected() {
        let dir = temp_dir("tamper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("b.jsonl");
        write_baseline(&path, "b", &sample()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = content.lines().collect();
        lines.pop();
        std::fs::write(&path, lines.join("\n")).unwrap();

        let err = read_baseline(&path).unwrap_err();
        assert_eq!(err.error_code(), "BASELINE_INTEGRITY");
        assert_eq!(err.exit_code(), 4);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = temp_dir("names");
        let store = FileBaselineStore::new(&dir).unwrap();
        assert!(store.save("../escape", &sample()).is_err());
        assert!(store.save("", &sample()).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_null_store() {
        let store = NullBaselineStore;
        store.save("x", &sample()).unwrap();
        assert!(!store.exists("x").unwrap());
        assert!(store.load("x").is_err());
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(stream_digest(&sample()), stream_digest(&sample()));
        assert_eq!(stream_digest(&sample()).len(), 64);
        assert_ne!(stream_digest(&sample()), stream_digest(&RecordStream::new()));
    }
}

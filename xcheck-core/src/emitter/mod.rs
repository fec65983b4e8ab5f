//! Stream emitter
//!
//! Serializes records to a sink without blocking the instrumented thread
//! on I/O.
//!
//! ```text
//! emit() ──► crossbeam channel ──► worker thread ──► RecordSink
//!   │                                   │
//!   │                                   ├─► WriterSink (stderr/stdout/file)
//!   │                                   ├─► MemorySink (tests, recorder)
//!   │                                   └─► NullSink
//!   │
//!   └─ returns immediately
//! ```
//!
//! The worker flushes when a batch reaches `buffer_size`, when
//! `flush_interval_ms` passes, on explicit [`StreamEmitter::flush`] and on
//! shutdown. In synchronous mode records are written and flushed on the
//! calling thread, which is slower but keeps records in step with a
//! debugger.

mod buffered;
mod sink;

pub use buffered::StreamEmitter;
pub use sink::{MemorySink, NullSink, RecordSink, WriterSink};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Result, XCheckError};
use crate::record::StreamFormat;

/// Environment variable selecting the sink (`stderr`, `stdout` or a path)
pub const ENV_OUTPUT: &str = "XCHECK_OUTPUT";
/// Environment variable selecting the wire format (`text` or `binary`)
pub const ENV_FORMAT: &str = "XCHECK_FORMAT";
/// Environment variable enabling `[t<n>]` line prefixes
pub const ENV_THREAD_TAGS: &str = "XCHECK_THREAD_TAGS";
/// Environment variable enabling synchronous writes
pub const ENV_SYNC: &str = "XCHECK_SYNC";

/// Where emitted records go
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTarget {
    #[default]
    Stderr,
    Stdout,
    File(PathBuf),
    /// Discard records (instrumentation compiled in but disabled)
    Null,
}

impl std::str::FromStr for OutputTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "" => Err("empty output target".to_string()),
            "stderr" => Ok(OutputTarget::Stderr),
            "stdout" => Ok(OutputTarget::Stdout),
            "null" | "none" => Ok(OutputTarget::Null),
            path => Ok(OutputTarget::File(PathBuf::from(path))),
        }
    }
}

impl std::fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputTarget::Stderr => write!(f, "stderr"),
            OutputTarget::Stdout => write!(f, "stdout"),
            OutputTarget::File(path) => write!(f, "{}", path.display()),
            OutputTarget::Null => write!(f, "null"),
        }
    }
}

/// Configuration for the stream emitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Sink selection
    pub output: OutputTarget,
    /// Text lines or binary frames
    pub format: StreamFormat,
    /// Records buffered before the worker writes a batch
    pub buffer_size: usize,
    /// Maximum time a record waits in the worker's buffer
    pub flush_interval_ms: u64,
    /// Prefix text lines with `[t<ordinal>] `
    pub thread_tags: bool,
    /// Write on the calling thread instead of the worker
    pub synchronous: bool,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            output: OutputTarget::Stderr,
            format: StreamFormat::Text,
            buffer_size: 256,
            flush_interval_ms: 50,
            thread_tags: false,
            synchronous: false,
        }
    }
}

impl EmitterConfig {
    /// Small buffers and a short interval (for testing)
    pub fn minimal() -> Self {
        Self {
            buffer_size: 4,
            flush_interval_ms: 10,
            ..Self::default()
        }
    }

    /// Defaults overridden by `XCHECK_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(output) = lookup(ENV_OUTPUT) {
            self.output = output
                .parse()
                .map_err(|reason| XCheckError::InvalidConfig { reason })?;
        }
        if let Some(format) = lookup(ENV_FORMAT) {
            self.format = format
                .parse()
                .map_err(|reason| XCheckError::InvalidConfig { reason })?;
        }
        if let Some(tags) = lookup(ENV_THREAD_TAGS) {
            self.thread_tags = parse_flag(ENV_THREAD_TAGS, &tags)?;
        }
        if let Some(sync) = lookup(ENV_SYNC) {
            self.synchronous = parse_flag(ENV_SYNC, &sync)?;
        }
        Ok(self)
    }

    pub fn with_output(mut self, output: OutputTarget) -> Self {
        self.output = output;
        self
    }

    pub fn with_format(mut self, format: StreamFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_flush_interval(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }

    pub fn with_thread_tags(mut self, enabled: bool) -> Self {
        self.thread_tags = enabled;
        self
    }

    pub fn with_synchronous(mut self, enabled: bool) -> Self {
        self.synchronous = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(XCheckError::InvalidConfig {
                reason: "emitter buffer_size must be at least 1".to_string(),
            });
        }
        if self.flush_interval_ms == 0 {
            return Err(XCheckError::InvalidConfig {
                reason: "emitter flush_interval_ms must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Open the sink named by `output`
    pub fn open_sink(&self) -> Result<Box<dyn RecordSink>> {
        let sink: Box<dyn RecordSink> = match &self.output {
            OutputTarget::Stderr => Box::new(WriterSink::stderr(self.format, self.thread_tags)),
            OutputTarget::Stdout => Box::new(WriterSink::stdout(self.format, self.thread_tags)),
            OutputTarget::File(path) => {
                Box::new(WriterSink::file(path, self.format, self.thread_tags)?)
            }
            OutputTarget::Null => Box::new(NullSink),
        };
        Ok(sink)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(XCheckError::InvalidConfig {
            reason: format!("{} must be a boolean, got '{}'", key, other),
        }),
    }
}

/// Emitter counters, shared with the worker thread
#[derive(Debug, Default)]
pub struct EmitterStats {
    records_emitted: AtomicU64,
    records_written: AtomicU64,
    batches_written: AtomicU64,
    write_failures: AtomicU64,
}

impl EmitterStats {
    pub(crate) fn record_emitted(&self) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_written(&self, records: usize) {
        self.records_written.fetch_add(records as u64, Ordering::Relaxed);
        self.batches_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EmitterStatsSnapshot {
        EmitterStatsSnapshot {
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EmitterStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmitterStatsSnapshot {
    pub records_emitted: u64,
    pub records_written: u64,
    pub batches_written: u64,
    pub write_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let config = EmitterConfig::default()
            .with_env_overrides(vars(&[
                (ENV_OUTPUT, "/tmp/run.xcheck"),
                (ENV_FORMAT, "binary"),
                (ENV_THREAD_TAGS, "1"),
            ]))
            .unwrap();
        assert_eq!(config.output, OutputTarget::File(PathBuf::from("/tmp/run.xcheck")));
        assert_eq!(config.format, StreamFormat::Binary);
        assert!(config.thread_tags);
        assert!(!config.synchronous);
    }

    #[test]
    fn test_env_defaults_to_stderr_text() {
        let config = EmitterConfig::default().with_env_overrides(vars(&[])).unwrap();
        assert_eq!(config.output, OutputTarget::Stderr);
        assert_eq!(config.format, StreamFormat::Text);
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let err = EmitterConfig::default()
            .with_env_overrides(vars(&[(ENV_FORMAT, "xml")]))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");

        let err = EmitterConfig::default()
            .with_env_overrides(vars(&[(ENV_SYNC, "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_SYNC));
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        assert!(EmitterConfig::default().with_buffer_size(0).validate().is_err());
        assert!(EmitterConfig::minimal().validate().is_ok());
    }

    #[test]
    fn test_output_target_parse() {
        assert_eq!("stdout".parse::<OutputTarget>().unwrap(), OutputTarget::Stdout);
        assert_eq!("null".parse::<OutputTarget>().unwrap(), OutputTarget::Null);
        assert!("".parse::<OutputTarget>().is_err());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: EmitterConfig = serde_json::from_str(r#"{"format": "binary"}"#).unwrap();
        assert_eq!(config.format, StreamFormat::Binary);
        assert_eq!(config.buffer_size, 256);
    }
}

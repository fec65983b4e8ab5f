//! Record destinations

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Result, XCheckError};
use crate::record::{encode_binary, encode_text, StreamFormat, ThreadRecord};

/// Destination for batches of emitted records
///
/// Sinks run on the emitter's worker thread (or under its lock in
/// synchronous mode), so they only need to be `Send`.
pub trait RecordSink: Send + 'static {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// Write a batch of records, preserving order
    fn write(&mut self, records: &[ThreadRecord]) -> Result<()>;

    /// Flush any pending writes
    fn flush(&mut self) -> Result<()>;
}

impl RecordSink for Box<dyn RecordSink> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&mut self, records: &[ThreadRecord]) -> Result<()> {
        (**self).write(records)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// In-memory sink for tests and the recorder
///
/// Clones share storage, so keep a clone to inspect what the emitter wrote.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<ThreadRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ThreadRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&mut self, records: &[ThreadRecord]) -> Result<()> {
        let mut storage = self.records.lock().map_err(|_| XCheckError::StorageLocked)?;
        storage.extend_from_slice(records);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink that serializes records to any writer (stderr, stdout, a file)
pub struct WriterSink {
    name: String,
    writer: Box<dyn Write + Send>,
    format: StreamFormat,
    tag_threads: bool,
    scratch: Vec<u8>,
}

impl WriterSink {
    pub fn new(
        name: impl Into<String>,
        writer: Box<dyn Write + Send>,
        format: StreamFormat,
        tag_threads: bool,
    ) -> Self {
        Self {
            name: name.into(),
            writer,
            format,
            tag_threads,
            scratch: Vec::new(),
        }
    }

    pub fn stderr(format: StreamFormat, tag_threads: bool) -> Self {
        Self::new("stderr", Box::new(std::io::stderr()), format, tag_threads)
    }

    pub fn stdout(format: StreamFormat, tag_threads: bool) -> Self {
        Self::new("stdout", Box::new(std::io::stdout()), format, tag_threads)
    }

    /// Append to `path`, creating it if missing
    pub fn file(path: impl AsRef<Path>, format: StreamFormat, tag_threads: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(
            path.display().to_string(),
            Box::new(BufWriter::new(file)),
            format,
            tag_threads,
        ))
    }

    fn sink_error(&self, err: std::io::Error) -> XCheckError {
        XCheckError::SinkError {
            sink: self.name.clone(),
            reason: err.to_string(),
        }
    }
}

impl RecordSink for WriterSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, records: &[ThreadRecord]) -> Result<()> {
        self.scratch.clear();
        match self.format {
            StreamFormat::Text => {
                for rec in records {
                    self.scratch
                        .extend_from_slice(encode_text(rec, self.tag_threads).as_bytes());
                    self.scratch.push(b'\n');
                }
            }
            StreamFormat::Binary => {
                for rec in records {
                    encode_binary(rec, &mut self.scratch);
                }
            }
        }
        let result = self.writer.write_all(&self.scratch);
        result.map_err(|e| self.sink_error(e))
    }

    fn flush(&mut self) -> Result<()> {
        let result = self.writer.flush();
        result.map_err(|e| self.sink_error(e))
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RecordSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn write(&mut self, _records: &[ThreadRecord]) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use super::{EmitterConfig, EmitterStats, EmitterStatsSnapshot, RecordSink};
use crate::error::{Result, XCheckError};
use crate::record::ThreadRecord;

/// Commands sent to the worker thread
enum EmitCommand {
    Record(ThreadRecord),
    /// Write everything buffered, flush the sink, then acknowledge
    Flush(Sender<()>),
    Shutdown,
}

enum Mode {
    Buffered {
        sender: Sender<EmitCommand>,
        worker: Option<JoinHandle<()>>,
    },
    Direct {
        sink: Mutex<Box<dyn RecordSink>>,
    },
}

/// Emitter feeding a [`RecordSink`]
///
/// `emit` never performs I/O in buffered mode: records travel over an
/// unbounded channel to a worker thread. All records from one thread go
/// through the same channel, so per-thread order is preserved.
pub struct StreamEmitter {
    mode: Mode,
    stats: Arc<EmitterStats>,
    sink_name: String,
}

impl std::fmt::Debug for StreamEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEmitter")
            .field("sink", &self.sink_name)
            .field("synchronous", &self.is_synchronous())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl StreamEmitter {
    /// Create an emitter writing to `sink`
    pub fn new<S: RecordSink>(config: &EmitterConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let stats = Arc::new(EmitterStats::default());
        let sink_name = sink.name().to_string();

        let mode = if config.synchronous {
            Mode::Direct {
                sink: Mutex::new(Box::new(sink)),
            }
        } else {
            let (sender, receiver) = channel::unbounded::<EmitCommand>();
            let worker_stats = Arc::clone(&stats);
            let worker_config = config.clone();
            let worker = thread::Builder::new()
                .name("xcheck-emitter".to_string())
                .spawn(move || {
                    let mut sink = sink;
                    flush_loop(receiver, &mut sink, &worker_config, &worker_stats);
                })
                .map_err(|e| XCheckError::InternalError {
                    reason: format!("failed to spawn emitter worker: {}", e),
                })?;
            Mode::Buffered {
                sender,
                worker: Some(worker),
            }
        };

        tracing::debug!(sink = %sink_name, synchronous = config.synchronous, "Emitter started");
        Ok(Self {
            mode,
            stats,
            sink_name,
        })
    }

    /// Create an emitter for the sink named in `config`
    pub fn from_config(config: &EmitterConfig) -> Result<Self> {
        let sink = config.open_sink()?;
        Self::new(config, sink)
    }

    /// Queue a record (or write it, in synchronous mode)
    pub fn emit(&self, record: ThreadRecord) {
        self.stats.record_emitted();
        match &self.mode {
            Mode::Buffered { sender, .. } => {
                if sender.send(EmitCommand::Record(record)).is_err() {
                    self.stats.write_failed();
                }
            }
            Mode::Direct { sink } => {
                let mut sink = match sink.lock() {
                    Ok(sink) => sink,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let batch = [record];
                write_batch(sink.as_mut(), &batch, &self.stats);
                if let Err(e) = sink.flush() {
                    tracing::warn!(sink = %self.sink_name, error = %e, "Failed to flush sink");
                }
            }
        }
    }

    /// Block until every record emitted so far has reached the sink
    pub fn flush(&self) {
        match &self.mode {
            Mode::Buffered { sender, .. } => {
                let (ack_tx, ack_rx) = channel::bounded(1);
                if sender.send(EmitCommand::Flush(ack_tx)).is_ok() {
                    let _ = ack_rx.recv();
                }
            }
            Mode::Direct { sink } => {
                if let Ok(mut sink) = sink.lock() {
                    if let Err(e) = sink.flush() {
                        tracing::warn!(sink = %self.sink_name, error = %e, "Failed to flush sink");
                    }
                }
            }
        }
    }

    /// Flush and stop the worker
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        match &mut self.mode {
            Mode::Buffered { sender, worker } => {
                if let Some(handle) = worker.take() {
                    let _ = sender.send(EmitCommand::Shutdown);
                    let _ = handle.join();
                    tracing::debug!(sink = %self.sink_name, "Emitter stopped");
                }
            }
            Mode::Direct { sink } => {
                if let Ok(mut sink) = sink.lock() {
                    let _ = sink.flush();
                }
            }
        }
    }

    pub fn stats(&self) -> EmitterStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }

    pub fn is_synchronous(&self) -> bool {
        matches!(self.mode, Mode::Direct { .. })
    }
}

impl Drop for StreamEmitter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_batch(sink: &mut dyn RecordSink, batch: &[ThreadRecord], stats: &EmitterStats) {
    if batch.is_empty() {
        return;
    }
    match sink.write(batch) {
        Ok(()) => stats.batch_written(batch.len()),
        Err(e) => {
            stats.write_failed();
            tracing::warn!(sink = sink.name(), records = batch.len(), error = %e, "Failed to write records");
        }
    }
}

/// Worker loop: batch records and write on size, interval, flush or shutdown
fn flush_loop<S: RecordSink>(
    receiver: Receiver<EmitCommand>,
    sink: &mut S,
    config: &EmitterConfig,
    stats: &EmitterStats,
) {
    let mut buffer: Vec<ThreadRecord> = Vec::with_capacity(config.buffer_size);
    let interval = Duration::from_millis(config.flush_interval_ms);

    loop {
        match receiver.recv_timeout(interval) {
            Ok(EmitCommand::Record(record)) => {
                buffer.push(record);
                if buffer.len() >= config.buffer_size {
                    write_batch(sink, &buffer, stats);
                    buffer.clear();
                }
            }
            Ok(EmitCommand::Flush(ack)) => {
                write_batch(sink, &buffer, stats);
                buffer.clear();
                if let Err(e) = sink.flush() {
                    tracing::warn!(sink = sink.name(), error = %e, "Failed to flush sink");
                }
                let _ = ack.send(());
            }
            Ok(EmitCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                // Records queued behind the shutdown command are still written.
                while let Ok(EmitCommand::Record(record)) = receiver.try_recv() {
                    buffer.push(record);
                }
                write_batch(sink, &buffer, stats);
                let _ = sink.flush();
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !buffer.is_empty() {
                    write_batch(sink, &buffer, stats);
                    buffer.clear();
                    let _ = sink.flush();
                }
            }
        }
    }
}

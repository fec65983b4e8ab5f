//! # Cross-check runtime
//!
//! Ties the registration table, the hash engine and the emitter together
//! and enforces the record grammar on every thread.
//!
//! ```text
//! enter("foo") ──► Registry::resolve ──► ThreadState (thread-local stack)
//!                                              │
//!       CallGuard::arg / ret / drop ───────────┤
//!                                              ▼
//!                                   StreamEmitter ──► RecordSink
//! ```
//!
//! Every thread owns its call stack and sequence counter. A thread gets
//! its ordinal the first time it emits a record. Grammar violations
//! (mismatched Exit, orphan Exit, misplaced Arg/Return) are returned as
//! protocol errors and logged; they are never repaired.
//!
//! One runtime may be installed globally with [`install`] for code that
//! cannot thread a reference through, notably C callers of the `ffi`
//! module.

mod guard;
pub(crate) mod thread;

pub use guard::CallGuard;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::config::XCheckConfig;
use crate::emitter::{EmitterStatsSnapshot, RecordSink, StreamEmitter};
use crate::error::{Result, XCheckError};
use crate::hash::combiner::FieldCombiner;
use crate::hash::CrossCheckHash;
use crate::identity::SymbolTable;
use crate::record::ThreadRecord;
use crate::registry::{FunctionSpec, Registry, RegistryBuilder};

use self::thread::{Step, ThreadState};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(0);

/// One runtime's protocol state on one thread
///
/// `alive` dies with the runtime, so entries left on threads other than the
/// one that dropped it can be swept.
struct ThreadEntry {
    alive: Weak<()>,
    state: ThreadState,
}

thread_local! {
    /// Per-thread protocol state, keyed by runtime id
    static THREADS: RefCell<HashMap<u64, ThreadEntry>> = RefCell::new(HashMap::new());
}

/// Builder for [`XCheckRuntime`]
pub struct RuntimeBuilder {
    registry: RegistryBuilder,
    emitter_config: crate::emitter::EmitterConfig,
    sink: Option<Box<dyn RecordSink>>,
}

impl RuntimeBuilder {
    /// Register an instrumented function
    pub fn function(mut self, spec: FunctionSpec) -> Self {
        self.registry.function(spec);
        self
    }

    /// Declare a named type as hashable
    pub fn register_type(mut self, type_name: impl Into<String>) -> Self {
        self.registry.register_type(type_name);
        self
    }

    /// Make a user combiner available to per-type assignments
    pub fn combiner(mut self, combiner: Arc<dyn FieldCombiner>) -> Self {
        self.registry.combiner(combiner);
        self
    }

    /// Write to `sink` instead of the sink named by the emitter config
    pub fn sink<S: RecordSink>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Validate the registration table and start the emitter
    pub fn build(self) -> Result<XCheckRuntime> {
        let registry = self.registry.build()?;
        let emitter = match self.sink {
            Some(sink) => StreamEmitter::new(&self.emitter_config, sink)?,
            None => StreamEmitter::from_config(&self.emitter_config)?,
        };

        tracing::info!(
            functions = registry.len(),
            sink = emitter.sink_name(),
            format = %self.emitter_config.format,
            "XCheck runtime initialized"
        );

        Ok(XCheckRuntime {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
            registry,
            emitter,
            next_ordinal: AtomicU32::new(0),
        })
    }
}

/// The cross-check runtime
pub struct XCheckRuntime {
    id: u64,
    alive: Arc<()>,
    registry: Registry,
    emitter: StreamEmitter,
    next_ordinal: AtomicU32,
}

impl std::fmt::Debug for XCheckRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XCheckRuntime")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("emitter", &self.emitter)
            .finish()
    }
}

impl XCheckRuntime {
    pub fn builder(config: XCheckConfig) -> RuntimeBuilder {
        let emitter_config = config.emitter.clone();
        RuntimeBuilder {
            registry: Registry::builder(config),
            emitter_config,
            sink: None,
        }
    }

    /// Runtime without registered functions, writing to the configured sink
    pub fn new(config: XCheckConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Runtime configured from `XCHECK_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(XCheckConfig::from_env()?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Tag → name table for diagnostics
    pub fn symbols(&self) -> &SymbolTable {
        self.registry.symbols()
    }

    /// Hash a value with the configured limits and combiners
    pub fn hash<T: CrossCheckHash + ?Sized>(&self, value: &T) -> u64 {
        value.cross_check_hash(&self.registry.hash_context())
    }

    /// Start an instrumented call of `function`, emitting its Entry record
    pub fn enter(&self, function: &str) -> Result<CallGuard<'_>> {
        let site = self.registry.resolve(function)?;
        let (tag, enabled) = (site.tag, site.enabled);
        self.apply(|state| state.enter(tag, enabled))?;
        Ok(CallGuard::new(self, site))
    }

    /// Entry by tag (C callers)
    pub fn entry_tag(&self, tag: u32) -> Result<()> {
        let enabled = self.registry.tag_enabled(tag);
        self.apply(|state| state.enter(tag, enabled))
    }

    /// Arg hash for the innermost call (C callers)
    pub fn arg_hash(&self, hash: u64) -> Result<()> {
        self.record_arg(None, None, hash, true)
    }

    /// Exit by tag; the tag must match the innermost open Entry
    pub fn exit_tag(&self, tag: u32) -> Result<()> {
        self.apply(|state| state.exit(tag))
    }

    /// Return hash directly after an Exit (C callers)
    pub fn return_hash(&self, hash: u64) -> Result<()> {
        self.record_return(hash, true)
    }

    pub(crate) fn record_arg(
        &self,
        index: Option<usize>,
        arity: Option<usize>,
        hash: u64,
        emit: bool,
    ) -> Result<()> {
        self.apply(|state| state.arg(index, arity, hash, emit))
    }

    pub(crate) fn record_return(&self, hash: u64, emit: bool) -> Result<()> {
        self.apply(|state| state.ret(hash, emit))
    }

    /// Run one grammar step on this thread's state and emit its record
    fn apply<F>(&self, step: F) -> Result<()>
    where
        F: FnOnce(&mut ThreadState) -> Step,
    {
        THREADS.with(|threads| {
            let mut threads = threads.borrow_mut();
            if !threads.contains_key(&self.id) {
                // First use on this thread: sweep runtimes dropped elsewhere.
                threads.retain(|_, entry| entry.alive.strong_count() > 0);
            }
            let state = &mut threads
                .entry(self.id)
                .or_insert_with(|| ThreadEntry {
                    alive: Arc::downgrade(&self.alive),
                    state: ThreadState::default(),
                })
                .state;
            match step(state) {
                Ok(Some(record)) => {
                    let thread = state.ordinal_or_assign(&self.next_ordinal);
                    let sequence = state.next_sequence();
                    self.emitter.emit(ThreadRecord::new(thread, sequence, record));
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(violation) => {
                    let thread = state.ordinal_or_assign(&self.next_ordinal);
                    let err = violation.into_error(thread, state.sequence() as usize);
                    tracing::error!(thread, code = err.error_code(), "{}", err);
                    Err(err)
                }
            }
        })
    }

    /// Open calls on the current thread
    pub fn depth(&self) -> usize {
        THREADS.with(|threads| threads.borrow().get(&self.id).map(|e| e.state.depth()).unwrap_or(0))
    }

    /// Ordinal of the current thread, if it has emitted anything
    pub fn thread_ordinal(&self) -> Option<u32> {
        THREADS.with(|threads| threads.borrow().get(&self.id).and_then(|e| e.state.ordinal()))
    }

    /// Block until every emitted record has reached the sink
    pub fn flush(&self) {
        self.emitter.flush();
    }

    pub fn stats(&self) -> EmitterStatsSnapshot {
        self.emitter.stats()
    }

    /// Flush and stop the emitter
    pub fn shutdown(self) {
        self.emitter.flush();
    }
}

/// Removes the dropping thread's state at once; state on other threads is
/// swept when they next start using any runtime, or freed when they exit.
impl Drop for XCheckRuntime {
    fn drop(&mut self) {
        let _ = THREADS.try_with(|threads| {
            if let Ok(mut threads) = threads.try_borrow_mut() {
                threads.remove(&self.id);
            }
        });
    }
}

static GLOBAL: OnceLock<XCheckRuntime> = OnceLock::new();

/// Flush the global runtime when the process exits
///
/// The global runtime is never dropped, so without this hook records still
/// buffered when `main` returns or `exit` is called would be lost.
extern "C" fn flush_global_at_exit() {
    if let Some(runtime) = GLOBAL.get() {
        runtime.flush();
    }
}

fn register_exit_hook() {
    // SAFETY: the hook is a plain extern "C" fn with no captured state.
    if unsafe { libc::atexit(flush_global_at_exit) } != 0 {
        tracing::warn!("Failed to register exit hook; call flush before exiting");
    }
}

/// Install the process-wide runtime
///
/// Its buffered records are flushed at process exit.
pub fn install(runtime: XCheckRuntime) -> Result<&'static XCheckRuntime> {
    GLOBAL
        .set(runtime)
        .map_err(|_| XCheckError::RuntimeAlreadyInstalled)?;
    register_exit_hook();
    global().ok_or_else(|| XCheckError::InternalError {
        reason: "global runtime missing after install".to_string(),
    })
}

/// The installed runtime, if any
pub fn global() -> Option<&'static XCheckRuntime> {
    GLOBAL.get()
}

/// The installed runtime, installing one from the environment if needed
pub fn global_or_init() -> Result<&'static XCheckRuntime> {
    if let Some(runtime) = GLOBAL.get() {
        return Ok(runtime);
    }
    let runtime = XCheckRuntime::from_env()?;
    // Losing an install race is fine; the winner is used.
    if GLOBAL.set(runtime).is_ok() {
        register_exit_hook();
    }
    global().ok_or_else(|| XCheckError::InternalError {
        reason: "global runtime missing after init".to_string(),
    })
}

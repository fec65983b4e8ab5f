//! Error types for XCheck operations
//!
//! Every failure the runtime or the comparator can surface maps to one
//! variant of [`XCheckError`]. Each variant carries:
//! - A human-readable message with enough context to localize the problem
//! - A stable error code for programmatic handling
//! - A category for grouping
//!
//! Comparison divergences are *not* errors: two well-formed streams that
//! disagree produce a [`CompareReport`](crate::compare::CompareReport).
//! Errors are reserved for configuration mistakes, protocol corruption and
//! infrastructure failures.
//!
//! # Example
//!
//! ```rust
//! use xcheck::error::{XCheckError, ErrorCategory};
//!
//! fn handle_error(err: XCheckError) {
//!     match err.category() {
//!         ErrorCategory::Configuration => println!("fix the registration table"),
//!         ErrorCategory::Protocol => println!("instrumentation is corrupt"),
//!         _ => println!("other error"),
//!     }
//!
//!     // Stable exit status for the external harness
//!     let status = err.exit_code();
//!     assert!(status >= 2);
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for XCheck operations
pub type Result<T> = std::result::Result<T, XCheckError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Registration table or hashing configuration is invalid
    Configuration,
    /// Record stream violates the Entry/Exit nesting grammar
    Protocol,
    /// Stream or baseline could not be decoded
    Format,
    /// Persisted data failed an integrity check
    Integrity,
    /// I/O or sink failure
    External,
    /// Internal error
    Internal,
}

/// Errors that can occur in XCheck operations
#[derive(Error, Debug)]
pub enum XCheckError {
    // ═══════════════════════════════════════════════════════════════════════
    // Configuration errors (raised once, at registration time)
    // ═══════════════════════════════════════════════════════════════════════

    /// A parameter or return type has no hashing strategy and no opt-out
    #[error("Unsupported type '{type_name}' for {location}. Register a hasher for the type or opt the value out of cross-checking.")]
    UnsupportedType { type_name: String, location: String },

    /// A per-type combiner name does not resolve to a known combiner
    #[error("Unknown combiner '{combiner}' configured for type '{type_name}'")]
    UnknownCombiner { type_name: String, combiner: String },

    /// Two distinct function names produce the same identity tag
    #[error("Identity tag collision: '{first}' and '{second}' both hash to {tag:#010x}. Rename one function or disable it.")]
    TagCollision { tag: u32, first: String, second: String },

    /// A function was registered twice
    #[error("Function already registered: '{name}'")]
    DuplicateFunction { name: String },

    /// A call names a function missing from the registration table while
    /// unregistered functions are disallowed
    #[error("Function not registered: '{name}'")]
    UnregisteredFunction { name: String },

    /// Configuration value is out of range or malformed
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A global runtime was already installed for this process
    #[error("Runtime already installed. install() may only be called once per process.")]
    RuntimeAlreadyInstalled,

    // ═══════════════════════════════════════════════════════════════════════
    // Protocol errors (instrumentation corruption, never recovered)
    // ═══════════════════════════════════════════════════════════════════════

    /// Exit tag does not match the innermost open Entry
    #[error("Protocol nesting error on thread {thread} at depth {depth}: Exit tag {actual:#010x} does not match open Entry {expected:#010x}")]
    NestingMismatch {
        thread: u32,
        depth: usize,
        expected: u32,
        actual: u32,
    },

    /// Exit with no open Entry on the thread
    #[error("Protocol nesting error on thread {thread}: Exit {tag:#010x} without a matching Entry")]
    OrphanExit { thread: u32, tag: u32 },

    /// Record appears where the grammar does not allow it
    #[error("Protocol error on thread {thread} at position {position}: {reason}")]
    MisplacedRecord {
        thread: u32,
        position: usize,
        reason: String,
    },

    /// Stream ended while calls were still open
    #[error("Protocol nesting error on thread {thread}: stream ended with {open_frames} open call(s), innermost {innermost:#010x}")]
    UnclosedFrames {
        thread: u32,
        open_frames: usize,
        innermost: u32,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Stream format and baseline errors
    // ═══════════════════════════════════════════════════════════════════════

    /// A line or frame of a record stream could not be parsed
    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// Baseline does not exist in the store
    #[error("Baseline not found: '{name}'. Record one with `xcheck record` first.")]
    BaselineNotFound { name: String },

    /// Baseline content does not match its recorded digest
    #[error("Baseline integrity failure for '{name}': expected digest {expected}, computed {actual}")]
    BaselineIntegrity {
        name: String,
        expected: String,
        actual: String,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors
    // ═══════════════════════════════════════════════════════════════════════

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// I/O operation failed
    #[error("IO error: {message}")]
    IoError { message: String },

    /// Sink rejected a batch of records
    #[error("Sink '{sink}' failed: {reason}")]
    SinkError { sink: String, reason: String },

    /// Store lock is poisoned (panic occurred while holding lock)
    #[error("Store lock poisoned. This is a bug; please report it.")]
    StorageLocked,

    /// Internal error that shouldn't happen
    #[error("Internal error: {reason}. This is a bug; please report it.")]
    InternalError { reason: String },
}

impl From<std::io::Error> for XCheckError {
    fn from(err: std::io::Error) -> Self {
        XCheckError::IoError {
            message: err.to_string(),
        }
    }
}

impl XCheckError {
    /// Returns true if retrying the operation might succeed
    ///
    /// Protocol and configuration errors are never recoverable: they point
    /// at broken instrumentation, not at a transient condition.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            XCheckError::IoError { .. }
                | XCheckError::SinkError { .. }
                | XCheckError::StorageLocked
        )
    }

    /// Returns true if this error indicates corrupted instrumentation
    pub fn is_protocol_error(&self) -> bool {
        self.category() == ErrorCategory::Protocol
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            XCheckError::UnsupportedType { .. }
            | XCheckError::UnknownCombiner { .. }
            | XCheckError::TagCollision { .. }
            | XCheckError::DuplicateFunction { .. }
            | XCheckError::UnregisteredFunction { .. }
            | XCheckError::InvalidConfig { .. }
            | XCheckError::RuntimeAlreadyInstalled => ErrorCategory::Configuration,

            XCheckError::NestingMismatch { .. }
            | XCheckError::OrphanExit { .. }
            | XCheckError::MisplacedRecord { .. }
            | XCheckError::UnclosedFrames { .. } => ErrorCategory::Protocol,

            XCheckError::MalformedRecord { .. }
            | XCheckError::BaselineNotFound { .. }
            | XCheckError::JsonError(_) => ErrorCategory::Format,

            XCheckError::BaselineIntegrity { .. } => ErrorCategory::Integrity,

            XCheckError::IoError { .. } | XCheckError::SinkError { .. } => {
                ErrorCategory::External
            }

            XCheckError::StorageLocked | XCheckError::InternalError { .. } => {
                ErrorCategory::Internal
            }
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            XCheckError::UnsupportedType { .. } => "UNSUPPORTED_TYPE",
            XCheckError::UnknownCombiner { .. } => "UNKNOWN_COMBINER",
            XCheckError::TagCollision { .. } => "TAG_COLLISION",
            XCheckError::DuplicateFunction { .. } => "DUPLICATE_FUNCTION",
            XCheckError::UnregisteredFunction { .. } => "UNREGISTERED_FUNCTION",
            XCheckError::InvalidConfig { .. } => "INVALID_CONFIG",
            XCheckError::RuntimeAlreadyInstalled => "RUNTIME_ALREADY_INSTALLED",
            XCheckError::NestingMismatch { .. } => "NESTING_MISMATCH",
            XCheckError::OrphanExit { .. } => "ORPHAN_EXIT",
            XCheckError::MisplacedRecord { .. } => "MISPLACED_RECORD",
            XCheckError::UnclosedFrames { .. } => "UNCLOSED_FRAMES",
            XCheckError::MalformedRecord { .. } => "MALFORMED_RECORD",
            XCheckError::BaselineNotFound { .. } => "BASELINE_NOT_FOUND",
            XCheckError::BaselineIntegrity { .. } => "BASELINE_INTEGRITY",
            XCheckError::JsonError(_) => "JSON_ERROR",
            XCheckError::IoError { .. } => "IO_ERROR",
            XCheckError::SinkError { .. } => "SINK_ERROR",
            XCheckError::StorageLocked => "STORAGE_LOCKED",
            XCheckError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Process exit status the CLI reports for this error
    ///
    /// `0` and `1` are reserved for "streams match" and "divergence found".
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Protocol => 3,
            ErrorCategory::Integrity => 4,
            _ => 2,
        }
    }

    /// Converts this error to a JSON-serializable response object
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                category: self.category(),
                recoverable: self.is_recoverable(),
            },
        }
    }
}

/// JSON-serializable error envelope for the CLI's `--json` output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail for JSON responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code (e.g., "NESTING_MISMATCH")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Error category
    pub category: ErrorCategory,
    /// Whether retry might succeed
    pub recoverable: bool,
}

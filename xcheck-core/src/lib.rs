//! # XCheck - cross-checking checksum runtime
//!
//! XCheck lets two variants of the same program (a C original and its Rust
//! port, two compiler builds, two optimization levels) prove they execute
//! the same way. Each instrumented function emits a small stream of
//! checksum records:
//!
//! - **Entry / Exit**: a 32-bit identity tag of the function
//! - **Arg / Return**: a 64-bit structural hash of each argument and of the
//!   return value
//!
//! Running both variants on the same input and comparing their streams
//! record by record pinpoints the first call where they disagree.
//!
//! ## Core Principle
//!
//! > Equal values hash equally in every variant; any difference in a stream
//! > is a difference in behavior.
//!
//! ## Example
//!
//! ```rust
//! use xcheck::{
//!     cross_check_struct, Comparator, FunctionSpec, MemorySink, RecordStream, XCheckConfig,
//!     XCheckRuntime,
//! };
//!
//! struct Pair { a: i32, b: i32 }
//! cross_check_struct!(Pair { a, b });
//!
//! fn run(sink: MemorySink, b: i32) -> RecordStream {
//!     let runtime = XCheckRuntime::builder(XCheckConfig::default())
//!         .function(FunctionSpec::new("sum").param::<Pair>("p").returns::<i32>())
//!         .sink(sink.clone())
//!         .build()
//!         .unwrap();
//!
//!     let p = Pair { a: 1, b };
//!     let call = runtime.enter("sum").unwrap();
//!     call.arg(0, &p).unwrap();
//!     call.ret(&(p.a + p.b)).unwrap();
//!
//!     runtime.flush();
//!     sink.records().into_iter().collect()
//! }
//!
//! let expected = run(MemorySink::new(), 2);
//! let actual = run(MemorySink::new(), 3);
//!
//! let report = Comparator::default().compare(&expected, &actual).unwrap();
//! assert!(!report.is_match());
//! assert_eq!(report.first_divergence().unwrap().index, 1);
//! ```

pub mod compare;
pub mod config;
pub mod emitter;
pub mod error;
pub mod hash;
pub mod identity;
pub mod record;
pub mod registry;
pub mod runtime;
pub mod storage;

#[cfg(feature = "ffi")]
pub mod ffi;

// Re-export main types
pub use compare::{
    CompareMode, CompareOptions, CompareReport, Comparator, Divergence, DivergenceKind,
    NestingVerification, NestingVerifier, Recorder,
};
pub use config::{ArgSelector, FunctionRule, XCheckConfig};
pub use emitter::{
    EmitterConfig, MemorySink, NullSink, OutputTarget, RecordSink, StreamEmitter, WriterSink,
};
pub use error::{ErrorCategory, ErrorDetail, ErrorResponse, Result, XCheckError};
pub use hash::combiner::{FieldCombiner, JodyCombiner, RotateXorCombiner};
pub use hash::{hash_value, hash_value_with, CrossCheckHash, HashContext, HashLimits};
pub use identity::{tag_of, SymbolTable};
pub use record::{ChecksumRecord, RecordKind, RecordStream, StreamFormat, ThreadRecord};
pub use registry::{FunctionSpec, Registry, RegistryBuilder};
pub use runtime::{CallGuard, RuntimeBuilder, XCheckRuntime};
pub use storage::{
    BaselineStore, FileBaselineStore, InMemoryBaselineStore, NullBaselineStore,
};

//! Comparator and recorder
//!
//! Record mode checks that a stream is well nested and stores it as a
//! baseline. Compare mode walks two streams thread by thread and reports
//! where they first disagree, together with the enclosing call recovered
//! by replaying the call stack.

mod comparator;
mod nesting;
mod recorder;

pub use comparator::{
    CompareMode, CompareOptions, CompareReport, Comparator, Divergence, DivergenceKind, StreamSide,
};
pub use nesting::{NestingErrorType, NestingVerification, NestingVerifier};
pub use recorder::Recorder;

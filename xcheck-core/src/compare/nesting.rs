//! Nesting verification
//!
//! Replays each thread's records through the same grammar the runtime
//! enforces while emitting: every Exit matches the innermost open Entry,
//! Args directly follow their Entry, a Return directly follows an Exit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XCheckError};
use crate::record::{ChecksumRecord, RecordKind, RecordStream};
use crate::runtime::thread::ThreadState;

/// Result of verifying a stream's nesting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestingVerification {
    /// Whether the stream is well nested
    pub is_valid: bool,

    pub threads_checked: usize,

    pub records_checked: usize,

    /// Thread of the first violation (if any)
    pub thread: Option<u32>,

    /// Index of the offending record within its thread
    pub position: Option<usize>,

    pub error_type: Option<NestingErrorType>,

    pub error_message: Option<String>,

    /// Calls left open at the end of each thread, outermost first
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub open_frames: BTreeMap<u32, Vec<u32>>,
}

impl NestingVerification {
    pub fn valid(
        threads_checked: usize,
        records_checked: usize,
        open_frames: BTreeMap<u32, Vec<u32>>,
    ) -> Self {
        Self {
            is_valid: true,
            threads_checked,
            records_checked,
            thread: None,
            position: None,
            error_type: None,
            error_message: None,
            open_frames,
        }
    }

    pub fn invalid(
        threads_checked: usize,
        records_checked: usize,
        thread: u32,
        position: usize,
        error: &XCheckError,
    ) -> Self {
        Self {
            is_valid: false,
            threads_checked,
            records_checked,
            thread: Some(thread),
            position: Some(position),
            error_type: NestingErrorType::from_error(error),
            error_message: Some(error.to_string()),
            open_frames: BTreeMap::new(),
        }
    }

    /// Valid result for a stream without records
    pub fn empty() -> Self {
        Self::valid(0, 0, BTreeMap::new())
    }

    /// Whether some thread ended inside a call
    pub fn is_truncated(&self) -> bool {
        !self.open_frames.is_empty()
    }
}

/// Types of nesting errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestingErrorType {
    /// Exit tag differs from the innermost open Entry
    TagMismatch,
    /// Exit with no open Entry
    OrphanExit,
    /// Arg or Return where the grammar forbids it
    MisplacedRecord,
    /// Stream ended with open calls
    UnclosedFrames,
}

impl NestingErrorType {
    fn from_error(err: &XCheckError) -> Option<Self> {
        match err {
            XCheckError::NestingMismatch { .. } => Some(NestingErrorType::TagMismatch),
            XCheckError::OrphanExit { .. } => Some(NestingErrorType::OrphanExit),
            XCheckError::MisplacedRecord { .. } => Some(NestingErrorType::MisplacedRecord),
            XCheckError::UnclosedFrames { .. } => Some(NestingErrorType::UnclosedFrames),
            _ => None,
        }
    }
}

impl std::fmt::Display for NestingErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NestingErrorType::TagMismatch => write!(f, "tag_mismatch"),
            NestingErrorType::OrphanExit => write!(f, "orphan_exit"),
            NestingErrorType::MisplacedRecord => write!(f, "misplaced_record"),
            NestingErrorType::UnclosedFrames => write!(f, "unclosed_frames"),
        }
    }
}

/// Nesting verifier
pub struct NestingVerifier;

impl NestingVerifier {
    /// Verify a complete stream: every call must be closed
    pub fn verify(stream: &RecordStream) -> NestingVerification {
        Self::verify_with(stream, true)
    }

    /// Verify a possibly truncated stream: open calls at the end are
    /// reported in `open_frames` but are not an error
    pub fn verify_prefix(stream: &RecordStream) -> NestingVerification {
        Self::verify_with(stream, false)
    }

    /// [`verify`](Self::verify) as a `Result`
    pub fn check(stream: &RecordStream) -> Result<()> {
        Self::walk_all(stream, true).map(|_| ()).map_err(|(_, _, err)| err)
    }

    /// [`verify_prefix`](Self::verify_prefix) as a `Result`
    pub fn check_prefix(stream: &RecordStream) -> Result<()> {
        Self::walk_all(stream, false).map(|_| ()).map_err(|(_, _, err)| err)
    }

    fn verify_with(stream: &RecordStream, require_closed: bool) -> NestingVerification {
        if stream.is_empty() {
            return NestingVerification::empty();
        }
        match Self::walk_all(stream, require_closed) {
            Ok(open_frames) => {
                NestingVerification::valid(stream.thread_count(), stream.len(), open_frames)
            }
            Err((thread, position, err)) => {
                NestingVerification::invalid(stream.thread_count(), stream.len(), thread, position, &err)
            }
        }
    }

    fn walk_all(
        stream: &RecordStream,
        require_closed: bool,
    ) -> std::result::Result<BTreeMap<u32, Vec<u32>>, (u32, usize, XCheckError)> {
        let mut open_frames = BTreeMap::new();
        for (thread, records) in stream.threads() {
            let open = Self::walk(thread, records, require_closed)?;
            if !open.is_empty() {
                open_frames.insert(thread, open);
            }
        }
        Ok(open_frames)
    }

    /// Replay one thread, returning the tags still open at its end
    fn walk(
        thread: u32,
        records: &[ChecksumRecord],
        require_closed: bool,
    ) -> std::result::Result<Vec<u32>, (u32, usize, XCheckError)> {
        let mut state = ThreadState::default();
        for (position, rec) in records.iter().enumerate() {
            let step = match rec.kind {
                RecordKind::Entry => state.enter(rec.value as u32, true),
                RecordKind::Arg => state.arg(None, None, rec.value, true),
                RecordKind::Exit => state.exit(rec.value as u32),
                RecordKind::Return => state.ret(rec.value, true),
            };
            if let Err(violation) = step {
                return Err((thread, position, violation.into_error(thread, position)));
            }
        }

        let open = state.open_tags();
        if require_closed {
            if let Some(&innermost) = open.last() {
                return Err((
                    thread,
                    records.len(),
                    XCheckError::UnclosedFrames {
                        thread,
                        open_frames: open.len(),
                        innermost,
                    },
                ));
            }
        }
        Ok(open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(records: &[ChecksumRecord]) -> RecordStream {
        let mut s = RecordStream::new();
        for r in records {
            s.push(0, *r);
        }
        s
    }

    #[test]
    fn test_well_nested() {
        let s = stream(&[
            ChecksumRecord::entry(1),
            ChecksumRecord::arg(9),
            ChecksumRecord::entry(2),
            ChecksumRecord::exit(2),
            ChecksumRecord::ret(5),
            ChecksumRecord::exit(1),
        ]);
        let v = NestingVerifier::verify(&s);
        assert!(v.is_valid);
        assert_eq!(v.records_checked, 6);
        assert!(NestingVerifier::check(&s).is_ok());
    }

    #[test]
    fn test_empty_stream_valid() {
        assert!(NestingVerifier::verify(&RecordStream::new()).is_valid);
    }

    #[test]
    fn test_mismatch_located() {
        let s = stream(&[
            ChecksumRecord::entry(1),
            ChecksumRecord::entry(2),
            ChecksumRecord::exit(1),
        ]);
        let v = NestingVerifier::verify(&s);
        assert!(!v.is_valid);
        assert_eq!(v.position, Some(2));
        assert_eq!(v.error_type, Some(NestingErrorType::TagMismatch));
        assert_eq!(
            NestingVerifier::check(&s).unwrap_err().error_code(),
            "NESTING_MISMATCH"
        );
    }

    #[test]
    fn test_orphan_exit() {
        let v = NestingVerifier::verify(&stream(&[ChecksumRecord::exit(3)]));
        assert_eq!(v.error_type, Some(NestingErrorType::OrphanExit));
    }

    #[test]
    fn test_return_without_exit() {
        let v = NestingVerifier::verify(&stream(&[ChecksumRecord::entry(1), ChecksumRecord::ret(0)]));
        assert_eq!(v.error_type, Some(NestingErrorType::MisplacedRecord));
        assert_eq!(v.position, Some(1));
    }

    #[test]
    fn test_arg_after_nested_call() {
        let v = NestingVerifier::verify(&stream(&[
            ChecksumRecord::entry(1),
            ChecksumRecord::entry(2),
            ChecksumRecord::exit(2),
            ChecksumRecord::arg(0),
        ]));
        assert_eq!(v.error_type, Some(NestingErrorType::MisplacedRecord));
    }

    #[test]
    fn test_truncation_complete_vs_prefix() {
        let s = stream(&[ChecksumRecord::entry(1), ChecksumRecord::entry(2)]);

        let complete = NestingVerifier::verify(&s);
        assert_eq!(complete.error_type, Some(NestingErrorType::UnclosedFrames));
        assert_eq!(NestingVerifier::check(&s).unwrap_err().exit_code(), 3);

        let prefix = NestingVerifier::verify_prefix(&s);
        assert!(prefix.is_valid);
        assert!(prefix.is_truncated());
        assert_eq!(prefix.open_frames[&0], vec![1, 2]);
    }

    #[test]
    fn test_threads_independent() {
        let mut s = RecordStream::new();
        s.push(0, ChecksumRecord::entry(1));
        s.push(1, ChecksumRecord::entry(2));
        s.push(1, ChecksumRecord::exit(2));
        s.push(0, ChecksumRecord::exit(1));
        assert!(NestingVerifier::verify(&s).is_valid);
    }
}

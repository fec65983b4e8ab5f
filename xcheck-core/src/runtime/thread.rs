//! Per-thread call stack and record grammar
//!
//! Each thread walks the state machine
//! `Idle → Entered → Args* → Running → Exited → Returned → Idle` for every
//! call. Operations return the record to emit (if any) or the violation
//! that made the operation illegal; the runtime attaches the thread
//! ordinal and reports it.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::XCheckError;
use crate::record::ChecksumRecord;

#[derive(Debug, Clone)]
struct Frame {
    tag: u32,
    /// Records for this call reach the emitter
    emit: bool,
    /// A nested call has started, so arguments are closed
    running: bool,
    next_arg: usize,
}

/// Grammar violation detected on one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Violation {
    Mismatch { depth: usize, expected: u32, actual: u32 },
    Orphan { tag: u32 },
    Misplaced { reason: String },
}

impl Violation {
    pub(crate) fn into_error(self, thread: u32, position: usize) -> XCheckError {
        match self {
            Violation::Mismatch {
                depth,
                expected,
                actual,
            } => XCheckError::NestingMismatch {
                thread,
                depth,
                expected,
                actual,
            },
            Violation::Orphan { tag } => XCheckError::OrphanExit { thread, tag },
            Violation::Misplaced { reason } => XCheckError::MisplacedRecord {
                thread,
                position,
                reason,
            },
        }
    }
}

pub(crate) type Step = std::result::Result<Option<ChecksumRecord>, Violation>;

#[derive(Debug, Default)]
pub(crate) struct ThreadState {
    ordinal: Option<u32>,
    sequence: u64,
    stack: Vec<Frame>,
    /// Set directly after an Exit: whether a Return may follow and be emitted
    pending_return: Option<bool>,
}

impl ThreadState {
    pub(crate) fn ordinal(&self) -> Option<u32> {
        self.ordinal
    }

    pub(crate) fn ordinal_or_assign(&mut self, counter: &AtomicU32) -> u32 {
        *self
            .ordinal
            .get_or_insert_with(|| counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Sequence index for the next emitted record
    pub(crate) fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Tags of calls still open, outermost first
    pub(crate) fn open_tags(&self) -> Vec<u32> {
        self.stack.iter().map(|f| f.tag).collect()
    }

    pub(crate) fn enter(&mut self, tag: u32, emit: bool) -> Step {
        if let Some(parent) = self.stack.last_mut() {
            parent.running = true;
        }
        self.pending_return = None;
        self.stack.push(Frame {
            tag,
            emit,
            running: false,
            next_arg: 0,
        });
        Ok(emit.then(|| ChecksumRecord::entry(tag)))
    }

    /// Arg for the innermost call. `index` enforces declaration order and
    /// `arity` the declared parameter count when known.
    pub(crate) fn arg(
        &mut self,
        index: Option<usize>,
        arity: Option<usize>,
        hash: u64,
        emit: bool,
    ) -> Step {
        self.pending_return = None;
        let frame = self.stack.last_mut().ok_or_else(|| Violation::Misplaced {
            reason: "Arg outside of any call".to_string(),
        })?;
        if frame.running {
            return Err(Violation::Misplaced {
                reason: format!("Arg for {:#010x} after its body started", frame.tag),
            });
        }
        match index {
            Some(i) => {
                if i < frame.next_arg {
                    return Err(Violation::Misplaced {
                        reason: format!(
                            "argument {} of {:#010x} emitted after argument {}",
                            i,
                            frame.tag,
                            frame.next_arg - 1
                        ),
                    });
                }
                if let Some(n) = arity {
                    if i >= n {
                        return Err(Violation::Misplaced {
                            reason: format!(
                                "argument {} of {:#010x} out of range ({} parameters)",
                                i, frame.tag, n
                            ),
                        });
                    }
                }
                frame.next_arg = i + 1;
            }
            None => frame.next_arg += 1,
        }
        Ok((frame.emit && emit).then(|| ChecksumRecord::arg(hash)))
    }

    pub(crate) fn exit(&mut self, tag: u32) -> Step {
        self.pending_return = None;
        let frame = self.stack.pop().ok_or(Violation::Orphan { tag })?;
        if frame.tag != tag {
            let expected = frame.tag;
            self.stack.push(frame);
            return Err(Violation::Mismatch {
                depth: self.stack.len(),
                expected,
                actual: tag,
            });
        }
        self.pending_return = Some(frame.emit);
        Ok(frame.emit.then(|| ChecksumRecord::exit(tag)))
    }

    pub(crate) fn ret(&mut self, hash: u64, emit: bool) -> Step {
        match self.pending_return.take() {
            Some(frame_emit) => Ok((frame_emit && emit).then(|| ChecksumRecord::ret(hash))),
            None => Err(Violation::Misplaced {
                reason: "Return without a directly preceding Exit".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_shape() {
        let mut s = ThreadState::default();
        assert_eq!(s.enter(1, true).unwrap(), Some(ChecksumRecord::entry(1)));
        assert_eq!(s.arg(Some(0), Some(2), 10, true).unwrap(), Some(ChecksumRecord::arg(10)));
        assert_eq!(s.arg(Some(1), Some(2), 11, true).unwrap(), Some(ChecksumRecord::arg(11)));
        assert_eq!(s.exit(1).unwrap(), Some(ChecksumRecord::exit(1)));
        assert_eq!(s.ret(12, true).unwrap(), Some(ChecksumRecord::ret(12)));
        assert_eq!(s.depth(), 0);
    }

    #[test]
    fn test_exit_mismatch_keeps_stack() {
        let mut s = ThreadState::default();
        s.enter(1, true).unwrap();
        s.enter(2, true).unwrap();
        let err = s.exit(1).unwrap_err();
        assert_eq!(
            err,
            Violation::Mismatch {
                depth: 1,
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(s.depth(), 2);
    }

    #[test]
    fn test_orphan_exit() {
        let mut s = ThreadState::default();
        assert_eq!(s.exit(7).unwrap_err(), Violation::Orphan { tag: 7 });
    }

    #[test]
    fn test_arg_after_nested_call() {
        let mut s = ThreadState::default();
        s.enter(1, true).unwrap();
        s.enter(2, true).unwrap();
        s.exit(2).unwrap();
        assert!(matches!(
            s.arg(Some(0), None, 0, true),
            Err(Violation::Misplaced { .. })
        ));
    }

    #[test]
    fn test_arg_out_of_order() {
        let mut s = ThreadState::default();
        s.enter(1, true).unwrap();
        s.arg(Some(1), None, 0, true).unwrap();
        assert!(s.arg(Some(0), None, 0, true).is_err());
    }

    #[test]
    fn test_arg_out_of_range() {
        let mut s = ThreadState::default();
        s.enter(1, true).unwrap();
        assert!(s.arg(Some(2), Some(2), 0, true).is_err());
    }

    #[test]
    fn test_skipped_arg_keeps_order() {
        let mut s = ThreadState::default();
        s.enter(1, true).unwrap();
        assert_eq!(s.arg(Some(0), None, 0, false).unwrap(), None);
        assert!(s.arg(Some(1), None, 0, true).unwrap().is_some());
    }

    #[test]
    fn test_return_requires_exit() {
        let mut s = ThreadState::default();
        assert!(s.ret(0, true).is_err());
        s.enter(1, true).unwrap();
        s.exit(1).unwrap();
        s.ret(0, true).unwrap();
        assert!(s.ret(0, true).is_err());
    }

    #[test]
    fn test_disabled_frame_suppresses_records() {
        let mut s = ThreadState::default();
        assert_eq!(s.enter(1, false).unwrap(), None);
        assert_eq!(s.arg(Some(0), None, 5, true).unwrap(), None);
        assert_eq!(s.exit(1).unwrap(), None);
        assert_eq!(s.ret(5, true).unwrap(), None);
    }

    #[test]
    fn test_ordinal_assigned_once() {
        let counter = AtomicU32::new(3);
        let mut s = ThreadState::default();
        assert_eq!(s.ordinal(), None);
        assert_eq!(s.ordinal_or_assign(&counter), 3);
        assert_eq!(s.ordinal_or_assign(&counter), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_violation_into_error() {
        let err = Violation::Misplaced {
            reason: "x".to_string(),
        }
        .into_error(2, 9);
        assert_eq!(err.error_code(), "MISPLACED_RECORD");
        assert!(err.to_string().contains("position 9"));
    }
}

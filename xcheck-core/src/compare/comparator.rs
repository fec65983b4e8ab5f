//! Lockstep stream comparison

use serde::{Deserialize, Serialize};

use super::nesting::NestingVerifier;
use crate::error::Result;
use crate::identity::SymbolTable;
use crate::record::{ChecksumRecord, RecordKind, RecordStream};

/// How far the comparator scans after the first divergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    /// Stop at the first divergence
    #[default]
    Strict,
    /// Keep scanning, up to `max_divergences`
    Diagnostic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    pub mode: CompareMode,
    /// Divergences collected before diagnostic mode gives up
    pub max_divergences: usize,
    /// Reject streams that violate the record grammar
    pub verify_nesting: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            mode: CompareMode::Strict,
            max_divergences: 64,
            verify_nesting: true,
        }
    }
}

impl CompareOptions {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn diagnostic() -> Self {
        Self {
            mode: CompareMode::Diagnostic,
            ..Self::default()
        }
    }

    pub fn with_max_divergences(mut self, max: usize) -> Self {
        self.max_divergences = max;
        self
    }

    pub fn with_verify_nesting(mut self, verify: bool) -> Self {
        self.verify_nesting = verify;
        self
    }
}

/// Which of the two streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSide {
    Expected,
    Actual,
}

impl std::fmt::Display for StreamSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamSide::Expected => write!(f, "expected"),
            StreamSide::Actual => write!(f, "actual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// Same record kind, different tag or hash
    ValueMismatch,
    /// Different record kinds at the same position
    KindMismatch,
    /// One stream ended before the other
    PrematureEnd,
}

/// One point where the streams disagree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub thread: u32,
    /// Position within the thread's sub-stream
    pub index: usize,
    pub kind: DivergenceKind,
    pub expected: Option<ChecksumRecord>,
    pub actual: Option<ChecksumRecord>,
    /// Stream that ended, for premature ends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended: Option<StreamSide>,
    /// Function whose call contains the record
    pub enclosing_tag: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing_name: Option<String>,
    /// Call depth of the record
    pub depth: usize,
}

fn describe_record(rec: &Option<ChecksumRecord>) -> String {
    match rec {
        Some(r) if r.kind.carries_tag() => format!("{} {:#010x}", r.kind, r.value),
        Some(r) => format!("{} {:#018x}", r.kind, r.value),
        None => "end of stream".to_string(),
    }
}

impl std::fmt::Display for Divergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "thread {}, record {}: ", self.thread, self.index)?;
        match self.kind {
            DivergenceKind::ValueMismatch | DivergenceKind::KindMismatch => write!(
                f,
                "expected {}, got {}",
                describe_record(&self.expected),
                describe_record(&self.actual)
            )?,
            DivergenceKind::PrematureEnd => {
                let ended = self.ended.unwrap_or(StreamSide::Actual);
                let pending = match ended {
                    StreamSide::Actual => &self.expected,
                    StreamSide::Expected => &self.actual,
                };
                write!(f, "{} stream ended early, other has {}", ended, describe_record(pending))?
            }
        }
        match (&self.enclosing_name, self.enclosing_tag) {
            (Some(name), Some(tag)) => write!(f, " in {} ({:#010x})", name, tag)?,
            (None, Some(tag)) => write!(f, " in {:#010x}", tag)?,
            _ => write!(f, " at top level")?,
        }
        write!(f, " at depth {}", self.depth)
    }
}

/// Outcome of comparing two streams
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareReport {
    pub matched: bool,
    pub mode: CompareMode,
    pub threads_compared: usize,
    /// Positions compared in lockstep
    pub records_compared: usize,
    pub expected_records: usize,
    pub actual_records: usize,
    pub divergences: Vec<Divergence>,
    /// Scanning stopped at `max_divergences`
    pub limit_reached: bool,
}

impl CompareReport {
    pub fn is_match(&self) -> bool {
        self.matched
    }

    pub fn first_divergence(&self) -> Option<&Divergence> {
        self.divergences.first()
    }

    /// CLI status: 0 when the streams match, 1 on divergence
    pub fn exit_code(&self) -> i32 {
        if self.matched {
            0
        } else {
            1
        }
    }
}

impl std::fmt::Display for CompareReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.matched {
            return write!(
                f,
                "streams match: {} records across {} thread(s)",
                self.records_compared, self.threads_compared
            );
        }
        writeln!(
            f,
            "streams diverge: {} divergence(s) after {} records compared",
            self.divergences.len(),
            self.records_compared
        )?;
        for d in &self.divergences {
            writeln!(f, "  {}", d)?;
        }
        if self.limit_reached {
            write!(f, "  (stopped after {} divergences)", self.divergences.len())?;
        }
        Ok(())
    }
}

/// Enclosing call of `records[index]` and its depth, by stack replay
fn enclosing_call(records: &[ChecksumRecord], index: usize) -> (Option<u32>, usize) {
    let mut stack: Vec<u32> = Vec::new();
    let mut last_exit = None;
    for rec in &records[..index.min(records.len())] {
        match rec.kind {
            RecordKind::Entry => stack.push(rec.value as u32),
            RecordKind::Exit => {
                stack.pop();
                last_exit = Some(rec.value as u32);
            }
            RecordKind::Arg | RecordKind::Return => {}
        }
    }
    match records.get(index).map(|r| r.kind) {
        // A Return belongs to the call that just exited.
        Some(RecordKind::Return) => (last_exit, stack.len() + 1),
        _ => (stack.last().copied(), stack.len()),
    }
}

/// Stream comparator
#[derive(Debug, Clone, Default)]
pub struct Comparator {
    options: CompareOptions,
    symbols: SymbolTable,
}

impl Comparator {
    pub fn new(options: CompareOptions) -> Self {
        Self {
            options,
            symbols: SymbolTable::new(),
        }
    }

    /// Resolve tags to names in diagnostics
    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn options(&self) -> &CompareOptions {
        &self.options
    }

    /// Compare `actual` against `expected`, thread by thread
    ///
    /// Returns `Err` only when a stream violates the record grammar;
    /// disagreements are reported in the [`CompareReport`].
    pub fn compare(&self, expected: &RecordStream, actual: &RecordStream) -> Result<CompareReport> {
        if self.options.verify_nesting {
            NestingVerifier::check_prefix(expected)?;
            NestingVerifier::check_prefix(actual)?;
        }

        let limit = match self.options.mode {
            CompareMode::Strict => 1,
            CompareMode::Diagnostic => self.options.max_divergences.max(1),
        };

        let mut threads: Vec<u32> = expected.thread_ids().chain(actual.thread_ids()).collect();
        threads.sort_unstable();
        threads.dedup();

        let mut divergences = Vec::new();
        let mut records_compared = 0;
        // Set only when the cap cut the scan short with records still unseen.
        let mut stopped_early = false;

        'threads: for (pos, &thread) in threads.iter().enumerate() {
            let more_threads = pos + 1 < threads.len();
            let exp = expected.thread(thread);
            let act = actual.thread(thread);
            let common = exp.len().min(act.len());

            for index in 0..common {
                records_compared += 1;
                if exp[index] == act[index] {
                    continue;
                }
                let kind = if exp[index].kind == act[index].kind {
                    DivergenceKind::ValueMismatch
                } else {
                    DivergenceKind::KindMismatch
                };
                divergences.push(self.divergence(thread, index, kind, exp, act, None));
                if divergences.len() >= limit {
                    stopped_early = index + 1 < exp.len().max(act.len()) || more_threads;
                    break 'threads;
                }
            }

            if exp.len() != act.len() {
                let ended = if exp.len() < act.len() {
                    StreamSide::Expected
                } else {
                    StreamSide::Actual
                };
                divergences.push(self.divergence(
                    thread,
                    common,
                    DivergenceKind::PrematureEnd,
                    exp,
                    act,
                    Some(ended),
                ));
                if divergences.len() >= limit {
                    stopped_early = more_threads;
                    break 'threads;
                }
            }
        }

        let matched = divergences.is_empty();
        let limit_reached = self.options.mode == CompareMode::Diagnostic && stopped_early;
        if !matched {
            tracing::debug!(
                divergences = divergences.len(),
                first = %divergences[0],
                "Streams diverge"
            );
        }

        Ok(CompareReport {
            matched,
            mode: self.options.mode,
            threads_compared: threads.len(),
            records_compared,
            expected_records: expected.len(),
            actual_records: actual.len(),
            divergences,
            limit_reached,
        })
    }

    fn divergence(
        &self,
        thread: u32,
        index: usize,
        kind: DivergenceKind,
        exp: &[ChecksumRecord],
        act: &[ChecksumRecord],
        ended: Option<StreamSide>,
    ) -> Divergence {
        let context = if index < exp.len() { exp } else { act };
        let (enclosing_tag, depth) = enclosing_call(context, index);
        Divergence {
            thread,
            index,
            kind,
            expected: exp.get(index).copied(),
            actual: act.get(index).copied(),
            ended,
            enclosing_tag,
            enclosing_name: enclosing_tag
                .and_then(|t| self.symbols.resolve(t))
                .map(str::to_string),
            depth,
        }
    }
}

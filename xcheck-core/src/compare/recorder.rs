//! Record and Compare modes over a baseline store

use std::sync::Arc;

use super::comparator::{CompareReport, Comparator};
use super::nesting::NestingVerifier;
use crate::error::Result;
use crate::record::RecordStream;
use crate::storage::{BaselineHeader, BaselineStore};

/// Persists reference runs and compares later runs against them
pub struct Recorder {
    store: Arc<dyn BaselineStore>,
    comparator: Comparator,
}

impl Recorder {
    pub fn new(store: Arc<dyn BaselineStore>) -> Self {
        Self {
            store,
            comparator: Comparator::default(),
        }
    }

    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn store(&self) -> &Arc<dyn BaselineStore> {
        &self.store
    }

    /// Record mode: verify `stream` is complete and well nested, then
    /// persist it under `name`
    pub fn record(&self, name: &str, stream: &RecordStream) -> Result<BaselineHeader> {
        NestingVerifier::check(stream)?;
        let header = self.store.save(name, stream)?;
        tracing::info!(
            baseline = name,
            store = self.store.name(),
            records = header.record_count,
            threads = header.thread_count,
            "Baseline recorded"
        );
        Ok(header)
    }

    /// Compare mode: load the baseline `name` and compare `actual` to it
    pub fn compare(&self, name: &str, actual: &RecordStream) -> Result<CompareReport> {
        let baseline = self.store.load(name)?;
        let report = self.comparator.compare(&baseline.stream, actual)?;
        tracing::info!(
            baseline = name,
            run_id = %baseline.header.run_id,
            matched = report.matched,
            divergences = report.divergences.len(),
            "Compared against baseline"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{CompareOptions, DivergenceKind};
    use crate::record::ChecksumRecord;
    use crate::storage::InMemoryBaselineStore;

    fn run(ret: u64) -> RecordStream {
        let mut s = RecordStream::new();
        s.push(0, ChecksumRecord::entry(1));
        s.push(0, ChecksumRecord::arg(10));
        s.push(0, ChecksumRecord::exit(1));
        s.push(0, ChecksumRecord::ret(ret));
        s
    }

    #[test]
    fn test_record_then_compare_identical() {
        let recorder = Recorder::new(Arc::new(InMemoryBaselineStore::new()));
        let header = recorder.record("base", &run(7)).unwrap();
        assert_eq!(header.record_count, 4);
        assert!(recorder.compare("base", &run(7)).unwrap().is_match());
    }

    #[test]
    fn test_compare_reports_divergence() {
        let recorder = Recorder::new(Arc::new(InMemoryBaselineStore::new()))
            .with_comparator(Comparator::new(CompareOptions::diagnostic()));
        recorder.record("base", &run(7)).unwrap();
        let report = recorder.compare("base", &run(8)).unwrap();
        let d = report.first_divergence().unwrap();
        assert_eq!(d.index, 3);
        assert_eq!(d.kind, DivergenceKind::ValueMismatch);
    }

    #[test]
    fn test_record_rejects_open_calls() {
        let store = Arc::new(InMemoryBaselineStore::new());
        let recorder = Recorder::new(store.clone());
        let mut open = RecordStream::new();
        open.push(0, ChecksumRecord::entry(1));
        let err = recorder.record("base", &open).unwrap_err();
        assert_eq!(err.error_code(), "UNCLOSED_FRAMES");
        assert!(!store.exists("base").unwrap());
    }

    #[test]
    fn test_missing_baseline() {
        let recorder = Recorder::new(Arc::new(InMemoryBaselineStore::new()));
        let err = recorder.compare("nope", &run(1)).unwrap_err();
        assert_eq!(err.error_code(), "BASELINE_NOT_FOUND");
    }
}

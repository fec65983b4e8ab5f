//! A complete run, partitioned by thread

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::codec::{encode_binary, encode_text};
use super::{ChecksumRecord, ThreadRecord};

/// Records of one run grouped by thread ordinal, each thread in emission
/// order
///
/// The comparator walks each thread independently, so this is the unit
/// both the parsers and the baseline store produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStream {
    threads: BTreeMap<u32, Vec<ChecksumRecord>>,
}

impl RecordStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from annotated records, ordering each thread by sequence
    pub fn from_records<I: IntoIterator<Item = ThreadRecord>>(records: I) -> Self {
        let mut sorted: Vec<ThreadRecord> = records.into_iter().collect();
        sorted.sort_by_key(|r| (r.thread, r.sequence));

        let mut stream = Self::new();
        for rec in sorted {
            stream.push(rec.thread, rec.record);
        }
        stream
    }

    /// Append a record to a thread's sub-stream
    pub fn push(&mut self, thread: u32, record: ChecksumRecord) {
        self.threads.entry(thread).or_default().push(record);
    }

    /// Records of one thread (empty if the thread never emitted)
    pub fn thread(&self, thread: u32) -> &[ChecksumRecord] {
        self.threads.get(&thread).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Thread ordinals present, ascending
    pub fn thread_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.threads.keys().copied()
    }

    pub fn threads(&self) -> impl Iterator<Item = (u32, &[ChecksumRecord])> {
        self.threads.iter().map(|(t, recs)| (*t, recs.as_slice()))
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Total number of records across threads
    pub fn len(&self) -> usize {
        self.threads.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten to annotated records, thread by thread
    pub fn to_records(&self) -> Vec<ThreadRecord> {
        self.threads
            .iter()
            .flat_map(|(thread, recs)| {
                recs.iter()
                    .enumerate()
                    .map(move |(seq, rec)| ThreadRecord::new(*thread, seq as u64, *rec))
            })
            .collect()
    }

    /// Render as text, one line per record, threads in ascending order
    pub fn to_text(&self, tag_threads: bool) -> String {
        let mut out = String::new();
        for rec in self.to_records() {
            out.push_str(&encode_text(&rec, tag_threads));
            out.push('\n');
        }
        out
    }

    /// Render as binary frames
    pub fn to_binary(&self) -> Vec<u8> {
        let records = self.to_records();
        let mut out = Vec::with_capacity(records.len() * super::FRAME_LEN);
        for rec in &records {
            encode_binary(rec, &mut out);
        }
        out
    }
}

impl FromIterator<ThreadRecord> for RecordStream {
    fn from_iter<I: IntoIterator<Item = ThreadRecord>>(iter: I) -> Self {
        Self::from_records(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{decode_binary, decode_text};

    fn sample() -> RecordStream {
        let mut s = RecordStream::new();
        s.push(0, ChecksumRecord::entry(1));
        s.push(1, ChecksumRecord::entry(2));
        s.push(0, ChecksumRecord::exit(1));
        s.push(1, ChecksumRecord::exit(2));
        s
    }

    #[test]
    fn test_partitioned_by_thread() {
        let s = sample();
        assert_eq!(s.thread_count(), 2);
        assert_eq!(s.len(), 4);
        assert_eq!(s.thread(1), &[ChecksumRecord::entry(2), ChecksumRecord::exit(2)]);
        assert!(s.thread(9).is_empty());
    }

    #[test]
    fn test_from_records_orders_by_sequence() {
        let s = RecordStream::from_records(vec![
            ThreadRecord::new(0, 1, ChecksumRecord::exit(1)),
            ThreadRecord::new(0, 0, ChecksumRecord::entry(1)),
        ]);
        assert_eq!(s.thread(0), &[ChecksumRecord::entry(1), ChecksumRecord::exit(1)]);
    }

    #[test]
    fn test_tagged_text_reparses() {
        let s = sample();
        assert_eq!(decode_text(&s.to_text(true)).unwrap(), s);
    }

    #[test]
    fn test_binary_reparses() {
        let s = sample();
        assert_eq!(decode_binary(&s.to_binary()).unwrap(), s);
    }
}

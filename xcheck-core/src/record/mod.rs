//! Checksum records
//!
//! One record is emitted per instrumentation point. Entry/Exit records carry
//! the function's identity tag, Arg/Return records a value hash:
//!
//! ```text
//! XCHECK(Ent):2090499946/0x7c9a7f6a
//! XCHECK(Arg):10299485932124136304/0x8eef1fe2e1646370
//! ```
//!
//! Records are immutable once built. [`ThreadRecord`] adds the emitting
//! thread's ordinal and per-thread sequence index; [`RecordStream`] groups a
//! whole run by thread.

mod codec;
mod stream;

pub use codec::{decode, decode_binary, decode_text, encode_binary, encode_text, parse_line, StreamFormat, FRAME_LEN, LINE_MARKER};
pub use stream::RecordStream;

use serde::{Deserialize, Serialize};

/// The four kinds of instrumentation point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Entry,
    Exit,
    Arg,
    Return,
}

impl RecordKind {
    /// Three-letter name used by the line format
    pub fn short_name(&self) -> &'static str {
        match self {
            RecordKind::Entry => "Ent",
            RecordKind::Exit => "Exi",
            RecordKind::Arg => "Arg",
            RecordKind::Return => "Ret",
        }
    }

    /// Kind byte used by the binary frame format
    pub fn code(&self) -> u8 {
        match self {
            RecordKind::Entry => 0,
            RecordKind::Exit => 1,
            RecordKind::Arg => 2,
            RecordKind::Return => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RecordKind::Entry),
            1 => Some(RecordKind::Exit),
            2 => Some(RecordKind::Arg),
            3 => Some(RecordKind::Return),
            _ => None,
        }
    }

    /// Whether the record's value is a function identity tag
    pub fn carries_tag(&self) -> bool {
        matches!(self, RecordKind::Entry | RecordKind::Exit)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ent" | "entry" => Ok(RecordKind::Entry),
            "Exi" | "exit" => Ok(RecordKind::Exit),
            "Arg" | "arg" => Ok(RecordKind::Arg),
            "Ret" | "return" => Ok(RecordKind::Return),
            _ => Err(format!("Unknown record kind: {}", s)),
        }
    }
}

/// A single emitted checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChecksumRecord {
    pub kind: RecordKind,
    /// Identity tag (Entry/Exit, 32-bit range) or value hash (Arg/Return)
    pub value: u64,
}

impl ChecksumRecord {
    pub fn new(kind: RecordKind, value: u64) -> Self {
        Self { kind, value }
    }

    pub fn entry(tag: u32) -> Self {
        Self::new(RecordKind::Entry, tag as u64)
    }

    pub fn exit(tag: u32) -> Self {
        Self::new(RecordKind::Exit, tag as u64)
    }

    pub fn arg(hash: u64) -> Self {
        Self::new(RecordKind::Arg, hash)
    }

    pub fn ret(hash: u64) -> Self {
        Self::new(RecordKind::Return, hash)
    }

    /// Identity tag of an Entry/Exit record
    pub fn tag(&self) -> Option<u32> {
        if self.kind.carries_tag() {
            Some(self.value as u32)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ChecksumRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.kind.carries_tag() {
            write!(f, "{}({}):{}/{:#010x}", LINE_MARKER, self.kind, self.value, self.value)
        } else {
            write!(f, "{}({}):{}/{:#018x}", LINE_MARKER, self.kind, self.value, self.value)
        }
    }
}

/// A record together with where it was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    /// Ordinal of the emitting thread (0 for the first emitting thread)
    pub thread: u32,
    /// Position within the thread's stream
    pub sequence: u64,
    #[serde(flatten)]
    pub record: ChecksumRecord,
}

impl ThreadRecord {
    pub fn new(thread: u32, sequence: u64, record: ChecksumRecord) -> Self {
        Self {
            thread,
            sequence,
            record,
        }
    }
}

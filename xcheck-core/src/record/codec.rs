//! Text and binary encodings of the record stream
//!
//! Text lines look like `XCHECK(Ret):8680820740569198935/0x7878787878787157`,
//! optionally prefixed by `[t<ordinal>] ` when thread tagging is enabled.
//! Lines without the `XCHECK(` marker are program output sharing the same
//! descriptor and are skipped by the parser.
//!
//! Binary frames are fixed 13-byte records:
//!
//! ```text
//! +------+---------------+-------------------------------+
//! | kind | thread u32 LE |          value u64 LE         |
//! +------+---------------+-------------------------------+
//!    1           4                        8
//! ```

use serde::{Deserialize, Serialize};

use super::{ChecksumRecord, RecordKind, RecordStream, ThreadRecord};
use crate::error::{Result, XCheckError};

/// Marker every text record starts with
pub const LINE_MARKER: &str = "XCHECK";

/// Size of one binary frame in bytes
pub const FRAME_LEN: usize = 13;

/// Wire format of a record stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormat {
    #[default]
    Text,
    Binary,
}

impl StreamFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamFormat::Text => "text",
            StreamFormat::Binary => "binary",
        }
    }

    /// Guess the format of captured output
    ///
    /// Anything containing a text marker is text. Otherwise a non-empty
    /// buffer made of whole frames with a valid leading kind byte is binary.
    pub fn detect(bytes: &[u8]) -> Self {
        let marker = b"XCHECK(";
        if bytes.windows(marker.len()).any(|w| w == marker) {
            return StreamFormat::Text;
        }
        match bytes.first() {
            Some(&kind) if bytes.len() % FRAME_LEN == 0 && RecordKind::from_code(kind).is_some() => {
                StreamFormat::Binary
            }
            _ => StreamFormat::Text,
        }
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StreamFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(StreamFormat::Text),
            "binary" | "bin" => Ok(StreamFormat::Binary),
            _ => Err(format!("Unknown stream format: {}", s)),
        }
    }
}

/// Render one record as a text line (without the trailing newline)
pub fn encode_text(rec: &ThreadRecord, tag_threads: bool) -> String {
    if tag_threads {
        format!("[t{}] {}", rec.thread, rec.record)
    } else {
        rec.record.to_string()
    }
}

/// Append one binary frame to `out`
pub fn encode_binary(rec: &ThreadRecord, out: &mut Vec<u8>) {
    out.push(rec.record.kind.code());
    out.extend_from_slice(&rec.thread.to_le_bytes());
    out.extend_from_slice(&rec.record.value.to_le_bytes());
}

fn malformed(line: usize, reason: impl Into<String>) -> XCheckError {
    XCheckError::MalformedRecord {
        line,
        reason: reason.into(),
    }
}

/// Parse one text line
///
/// Returns `Ok(None)` for lines that carry no record. `line_no` is 1-based
/// and only used for error messages.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<(u32, ChecksumRecord)>> {
    let line = line.trim();
    let start = match line.find("XCHECK(") {
        Some(start) => start,
        None => return Ok(None),
    };

    let prefix = line[..start].trim_end();
    let thread = if prefix.is_empty() {
        0
    } else {
        prefix
            .strip_prefix("[t")
            .and_then(|p| p.strip_suffix(']'))
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| malformed(line_no, format!("unexpected prefix '{}'", prefix)))?
    };

    let body = &line[start + LINE_MARKER.len() + 1..];
    let (kind, rest) = body
        .split_once(')')
        .ok_or_else(|| malformed(line_no, "missing ')' after record kind"))?;
    let kind: RecordKind = kind.parse().map_err(|e: String| malformed(line_no, e))?;

    let rest = rest
        .strip_prefix(':')
        .ok_or_else(|| malformed(line_no, "missing ':' after record kind"))?;
    let (decimal, hex) = rest
        .split_once('/')
        .ok_or_else(|| malformed(line_no, "missing '/' between decimal and hex value"))?;

    let value: u64 = decimal
        .parse()
        .map_err(|_| malformed(line_no, format!("invalid decimal value '{}'", decimal)))?;
    let hex_digits = hex
        .strip_prefix("0x")
        .ok_or_else(|| malformed(line_no, "hex value must start with 0x"))?;
    let hex_value = u64::from_str_radix(hex_digits, 16)
        .map_err(|_| malformed(line_no, format!("invalid hex value '{}'", hex)))?;

    if value != hex_value {
        return Err(malformed(
            line_no,
            format!("decimal {} and hex {} disagree", decimal, hex),
        ));
    }
    if kind.carries_tag() && value > u32::MAX as u64 {
        return Err(malformed(
            line_no,
            format!("{} tag {} exceeds 32 bits", kind, value),
        ));
    }

    Ok(Some((thread, ChecksumRecord::new(kind, value))))
}

/// Parse a captured text stream
///
/// A final line with no newline that fails to parse means the writer
/// stopped mid-record; like a partial binary frame it is dropped so the
/// comparator can report the truncation. Malformed interior lines are errors.
pub fn decode_text(input: &str) -> Result<RecordStream> {
    let mut stream = RecordStream::new();
    let unterminated = !input.is_empty() && !input.ends_with('\n');
    let mut lines = input.lines().enumerate().peekable();
    while let Some((idx, line)) = lines.next() {
        match parse_line(idx + 1, line) {
            Ok(Some((thread, record))) => stream.push(thread, record),
            Ok(None) => {}
            Err(e) if unterminated && lines.peek().is_none() => {
                tracing::warn!(line = idx + 1, error = %e, "Dropping truncated final line");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(stream)
}

/// Parse a captured binary stream
///
/// A trailing partial frame means the writer stopped mid-record; it is
/// dropped so the comparator can report the truncation.
pub fn decode_binary(bytes: &[u8]) -> Result<RecordStream> {
    let mut stream = RecordStream::new();
    let mut frames = bytes.chunks_exact(FRAME_LEN);
    for (idx, frame) in frames.by_ref().enumerate() {
        let kind = RecordKind::from_code(frame[0])
            .ok_or_else(|| malformed(idx + 1, format!("unknown kind byte {}", frame[0])))?;
        let mut thread = [0u8; 4];
        thread.copy_from_slice(&frame[1..5]);
        let mut value = [0u8; 8];
        value.copy_from_slice(&frame[5..FRAME_LEN]);

        let record = ChecksumRecord::new(kind, u64::from_le_bytes(value));
        if kind.carries_tag() && record.value > u32::MAX as u64 {
            return Err(malformed(idx + 1, format!("{} tag exceeds 32 bits", kind)));
        }
        stream.push(u32::from_le_bytes(thread), record);
    }

    let remainder = frames.remainder();
    if !remainder.is_empty() {
        tracing::warn!(
            bytes = remainder.len(),
            "Dropping truncated trailing frame"
        );
    }
    Ok(stream)
}

/// Parse a captured stream in the given format
pub fn decode(bytes: &[u8], format: StreamFormat) -> Result<RecordStream> {
    match format {
        StreamFormat::Text => decode_text(&String::from_utf8_lossy(bytes)),
        StreamFormat::Binary => decode_binary(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_untagged_line() {
        let (thread, rec) = parse_line(1, "XCHECK(Ent):2090499946/0x7c9a7f6a")
            .unwrap()
            .unwrap();
        assert_eq!(thread, 0);
        assert_eq!(rec, ChecksumRecord::entry(0x7c9a_7f6a));
    }

    #[test]
    fn test_parse_tagged_line() {
        let line = "[t3] XCHECK(Ret):8680820740569198935/0x7878787878787157";
        let (thread, rec) = parse_line(1, line).unwrap().unwrap();
        assert_eq!(thread, 3);
        assert_eq!(rec, ChecksumRecord::ret(0x7878_7878_7878_7157));
    }

    #[test]
    fn test_noise_lines_skipped() {
        assert!(parse_line(1, "hello from the program").unwrap().is_none());
        assert!(parse_line(2, "").unwrap().is_none());
    }

    #[test]
    fn test_decimal_hex_disagreement() {
        let err = parse_line(7, "XCHECK(Arg):1/0x2").unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_RECORD");
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(parse_line(1, "XCHECK(Foo):1/0x1").is_err());
    }

    #[test]
    fn test_wide_tag_rejected() {
        assert!(parse_line(1, "XCHECK(Ent):4294967296/0x100000000").is_err());
    }

    #[test]
    fn test_encode_text_with_thread_tag() {
        let rec = ThreadRecord::new(2, 0, ChecksumRecord::exit(0x0b88_7389));
        assert_eq!(encode_text(&rec, true), "[t2] XCHECK(Exi):193491849/0x0b887389");
        assert_eq!(encode_text(&rec, false), "XCHECK(Exi):193491849/0x0b887389");
    }

    #[test]
    fn test_binary_frame_layout() {
        let rec = ThreadRecord::new(1, 0, ChecksumRecord::arg(0x0102_0304_0506_0708));
        let mut out = Vec::new();
        encode_binary(&rec, &mut out);
        assert_eq!(out.len(), FRAME_LEN);
        assert_eq!(out[0], 2);
        assert_eq!(&out[1..5], &[1, 0, 0, 0]);
        assert_eq!(&out[5..], &[8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_truncated_binary_frame_dropped() {
        let mut out = Vec::new();
        encode_binary(&ThreadRecord::new(0, 0, ChecksumRecord::entry(5)), &mut out);
        encode_binary(&ThreadRecord::new(0, 1, ChecksumRecord::exit(5)), &mut out);
        out.truncate(FRAME_LEN + 4);

        let stream = decode_binary(&out).unwrap();
        assert_eq!(stream.thread(0), &[ChecksumRecord::entry(5)]);
    }

    #[test]
    fn test_cut_final_line_dropped() {
        let text = "XCHECK(Ent):5/0x00000005\nXCHECK(Arg):10299485932124136304/0x8eef";
        let stream = decode_text(text).unwrap();
        assert_eq!(stream.thread(0), &[ChecksumRecord::entry(5)]);

        // The same damage with a newline after it was written in full.
        let terminated = format!("{}\n", text);
        assert!(decode_text(&terminated).is_err());
    }

    #[test]
    fn test_malformed_interior_line_still_rejected() {
        let text = "XCHECK(Arg):1/0x2\nXCHECK(Ent):5/0x00000005";
        let err = decode_text(text).unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_RECORD");
    }

    #[test]
    fn test_bad_kind_byte() {
        let mut frame = vec![9u8];
        frame.extend_from_slice(&[0; 12]);
        assert!(decode_binary(&frame).is_err());
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            StreamFormat::detect(b"noise\nXCHECK(Ent):1/0x00000001\n"),
            StreamFormat::Text
        );
        let mut out = Vec::new();
        encode_binary(&ThreadRecord::new(0, 0, ChecksumRecord::entry(1)), &mut out);
        assert_eq!(StreamFormat::detect(&out), StreamFormat::Binary);
        assert_eq!(StreamFormat::detect(b""), StreamFormat::Text);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("binary".parse::<StreamFormat>().unwrap(), StreamFormat::Binary);
        assert_eq!("TEXT".parse::<StreamFormat>().unwrap(), StreamFormat::Text);
        assert!("xml".parse::<StreamFormat>().is_err());
    }
}

//! A text stream cut off mid-line compares as a premature end

use xcheck::compare::{Comparator, DivergenceKind, NestingVerifier, StreamSide};
use xcheck::record::{decode, StreamFormat};

const GOLDEN: &str = include_str!("golden/struct2.xcheck");

fn golden() -> xcheck::RecordStream {
    decode(GOLDEN.as_bytes(), StreamFormat::Text).expect("Golden stream parses")
}

/// The golden text cut inside the hex digits of its Arg line
fn cut_inside_arg() -> &'static str {
    let arg = GOLDEN.find("XCHECK(Arg)").expect("Golden has an Arg line");
    let hex = arg + GOLDEN[arg..].find("0x").expect("Arg line has a hex value");
    &GOLDEN[..hex + 6]
}

#[test]
fn cut_text_stream_decodes_to_prefix() {
    let text = cut_inside_arg();
    assert!(!text.ends_with('\n'));

    let stream = decode(text.as_bytes(), StreamFormat::Text).expect("Cut stream decodes");
    assert_eq!(stream.len(), 2);
    assert!(NestingVerifier::verify_prefix(&stream).is_truncated());
}

#[test]
fn cut_text_stream_is_premature_end() {
    let actual = decode(cut_inside_arg().as_bytes(), StreamFormat::Text)
        .expect("Cut stream decodes");

    let report = Comparator::default()
        .compare(&golden(), &actual)
        .expect("Truncated streams are comparable");
    assert_eq!(report.exit_code(), 1);

    let d = report.first_divergence().expect("Expected a divergence");
    assert_eq!(d.kind, DivergenceKind::PrematureEnd);
    assert_eq!(d.ended, Some(StreamSide::Actual));
    assert_eq!(d.index, 2);
}

#[test]
fn cut_at_line_boundary_matches_same_prefix() {
    // Cut right after a complete line: nothing is dropped.
    let end_of_second = GOLDEN.match_indices('\n').nth(1).expect("Golden has lines").0;
    let stream = decode(GOLDEN[..end_of_second].as_bytes(), StreamFormat::Text)
        .expect("Cut stream decodes");
    assert_eq!(stream.len(), 2);
}

//! Two variants of one program, compared record by record

use xcheck::compare::{CompareOptions, Comparator, DivergenceKind, NestingVerifier, StreamSide};
use xcheck::record::{decode, StreamFormat};
use xcheck::{FunctionSpec, MemorySink, RecordStream, Result, XCheckConfig, XCheckRuntime};

/// Variant of a small program: `main` calls `scale(x, k)` for a few inputs
/// and `clamp(v)` on each result
struct Variant {
    factor: i32,
    clamp_at: i32,
    /// Stop after this many iterations (simulates a crash)
    crash_after: Option<usize>,
}

impl Variant {
    fn reference() -> Self {
        Self {
            factor: 3,
            clamp_at: 100,
            crash_after: None,
        }
    }
}

fn scale(rt: &XCheckRuntime, x: i32, k: i32) -> Result<i32> {
    let call = rt.enter("scale")?;
    call.arg(0, &x)?;
    call.arg(1, &k)?;
    call.returning(x * k)
}

fn clamp(rt: &XCheckRuntime, v: i32, max: i32) -> Result<i32> {
    let call = rt.enter("clamp")?;
    call.arg(0, &v)?;
    call.returning(v.min(max))
}

fn run(variant: &Variant) -> RecordStream {
    let sink = MemorySink::new();
    let rt = XCheckRuntime::builder(XCheckConfig::default())
        .function(FunctionSpec::new("main").returns::<i32>())
        .function(
            FunctionSpec::new("scale")
                .param::<i32>("x")
                .param::<i32>("k")
                .returns::<i32>(),
        )
        .function(FunctionSpec::new("clamp").param::<i32>("v").returns::<i32>())
        .sink(sink.clone())
        .build()
        .expect("Failed to build runtime");

    let main = rt.enter("main").expect("Failed to enter main");
    let mut total = 0;
    for (i, x) in [5, 20, 40].into_iter().enumerate() {
        if variant.crash_after == Some(i) {
            // Leave main open: the process died mid-call.
            std::mem::forget(main);
            rt.flush();
            return sink.records().into_iter().collect();
        }
        let v = scale(&rt, x, variant.factor).expect("Protocol error");
        total += clamp(&rt, v, variant.clamp_at).expect("Protocol error");
    }
    main.returning(total).expect("Protocol error");
    rt.flush();
    sink.records().into_iter().collect()
}

fn comparator(options: CompareOptions) -> Comparator {
    let symbols = xcheck::SymbolTable::from_names(["main", "scale", "clamp"])
        .expect("No tag collisions");
    Comparator::new(options).with_symbols(symbols)
}

#[test]
fn argument_change_detected_at_arg_record() {
    let expected = run(&Variant::reference());
    let actual = run(&Variant {
        factor: 4,
        ..Variant::reference()
    });

    let report = comparator(CompareOptions::strict())
        .compare(&expected, &actual)
        .expect("Streams are well nested");
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.divergences.len(), 1);

    let d = report.first_divergence().unwrap();
    // Ent main, Ent scale, Arg x, Arg k
    assert_eq!(d.index, 3);
    assert_eq!(d.kind, DivergenceKind::ValueMismatch);
    assert_eq!(d.enclosing_name.as_deref(), Some("scale"));
    assert_eq!(d.depth, 2);
}

#[test]
fn return_change_attributed_to_returning_function() {
    let expected = run(&Variant::reference());
    let actual = run(&Variant {
        clamp_at: 50,
        ..Variant::reference()
    });

    let report = comparator(CompareOptions::strict())
        .compare(&expected, &actual)
        .expect("Streams are well nested");
    let d = report.first_divergence().unwrap();
    // The second clamp (60) is the first result the smaller cap changes.
    assert_eq!(d.enclosing_name.as_deref(), Some("clamp"));
    let rec = d.expected.expect("Expected record present");
    assert_eq!(rec.kind, xcheck::RecordKind::Return);
}

#[test]
fn diagnostic_mode_reports_later_divergences() {
    let expected = run(&Variant::reference());
    let actual = run(&Variant {
        factor: 4,
        ..Variant::reference()
    });

    let report = comparator(CompareOptions::diagnostic())
        .compare(&expected, &actual)
        .expect("Streams are well nested");
    assert!(report.divergences.len() > 1);
    assert!(report
        .divergences
        .windows(2)
        .all(|w| w[0].index < w[1].index));
    assert!(!report.limit_reached);
}

#[test]
fn crash_reported_as_premature_end() {
    let expected = run(&Variant::reference());
    let actual = run(&Variant {
        crash_after: Some(1),
        ..Variant::reference()
    });

    assert!(!NestingVerifier::verify(&actual).is_valid);
    assert!(NestingVerifier::verify_prefix(&actual).is_truncated());

    let report = comparator(CompareOptions::strict())
        .compare(&expected, &actual)
        .expect("Truncated streams are comparable");
    let d = report.first_divergence().unwrap();
    assert_eq!(d.kind, DivergenceKind::PrematureEnd);
    assert_eq!(d.ended, Some(StreamSide::Actual));
    // main entry plus one scale call and one clamp call
    assert_eq!(d.index, 1 + 5 + 4);
}

#[test]
fn text_streams_from_two_builds_compare() {
    let reference = run(&Variant::reference());
    let text = reference.to_text(false);

    let mut edited: Vec<String> = text.lines().map(str::to_string).collect();
    // A second "build" whose log carries unrelated output between records.
    edited.insert(2, "progress: 33%".to_string());
    let parsed = decode(edited.join("\n").as_bytes(), StreamFormat::Text)
        .expect("Non-record lines are skipped");

    let report = comparator(CompareOptions::strict())
        .compare(&reference, &parsed)
        .expect("Streams are well nested");
    assert!(report.is_match());
}

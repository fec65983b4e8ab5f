//! Record-then-compare of identical runs never diverges

use std::sync::Arc;

use xcheck::compare::{CompareOptions, Comparator, DivergenceKind, Recorder};
use xcheck::storage::{read_baseline, write_baseline, FileBaselineStore, InMemoryBaselineStore};
use xcheck::{
    cross_check_struct, FunctionSpec, MemorySink, RecordStream, Result, XCheckConfig,
    XCheckRuntime,
};

#[derive(Clone)]
struct Node {
    value: i64,
    children: Vec<Node>,
}

cross_check_struct!(Node { value, children });

fn tree(depth: u32, seed: i64) -> Node {
    Node {
        value: seed,
        children: if depth == 0 {
            Vec::new()
        } else {
            (0..2).map(|i| tree(depth - 1, seed * 2 + i)).collect()
        },
    }
}

fn sum(rt: &XCheckRuntime, node: &Node) -> Result<i64> {
    let call = rt.enter("sum")?;
    call.arg(0, node)?;
    let mut total = node.value;
    for child in &node.children {
        total += sum(rt, child)?;
    }
    call.returning(total)
}

fn run(input: &Node) -> RecordStream {
    let sink = MemorySink::new();
    let rt = XCheckRuntime::builder(XCheckConfig::default())
        .function(FunctionSpec::new("sum").param::<Node>("node").returns::<i64>())
        .sink(sink.clone())
        .build()
        .expect("Failed to build runtime");
    sum(&rt, input).expect("Protocol error");
    rt.shutdown();
    sink.records().into_iter().collect()
}

#[test]
fn identical_runs_match() {
    let input = tree(3, 1);
    let first = run(&input);
    let second = run(&input);

    // 15 calls, each Entry, Arg, Exit, Return.
    assert_eq!(first.len(), 15 * 4);

    let report = Comparator::default()
        .compare(&first, &second)
        .expect("Streams are well nested");
    assert!(report.is_match());
    assert_eq!(report.records_compared, 60);
}

#[test]
fn recorder_round_trip_in_memory() {
    let recorder = Recorder::new(Arc::new(InMemoryBaselineStore::new()));
    let input = tree(2, 5);
    recorder.record("tree", &run(&input)).expect("Failed to record");

    let report = recorder.compare("tree", &run(&input)).expect("Failed to compare");
    assert!(report.is_match());
}

#[test]
fn recorder_round_trip_on_disk() {
    let dir = std::env::temp_dir().join(format!("xcheck-rt-{}", uuid::Uuid::new_v4()));
    let store = FileBaselineStore::new(&dir).expect("Failed to open store");
    let recorder = Recorder::new(Arc::new(store));

    let input = tree(2, 7);
    let header = recorder.record("tree", &run(&input)).expect("Failed to record");
    assert_eq!(header.record_count, 28);

    let same = recorder.compare("tree", &run(&input)).expect("Failed to compare");
    assert!(same.is_match());

    let mut changed = input.clone();
    changed.children[1].children[0].value += 1;
    let report = recorder
        .compare("tree", &run(&changed))
        .expect("Failed to compare");
    assert!(!report.is_match());
    let d = report.first_divergence().expect("Expected a divergence");
    // The root argument hash already covers the changed leaf.
    assert_eq!(d.index, 1);
    assert_eq!(d.kind, DivergenceKind::ValueMismatch);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn baseline_file_survives_reload() {
    let path = std::env::temp_dir().join(format!("xcheck-base-{}.jsonl", uuid::Uuid::new_v4()));
    let stream = run(&tree(1, 3));
    let header = write_baseline(&path, "small", &stream).expect("Failed to write");

    let baseline = read_baseline(&path).expect("Failed to read");
    assert_eq!(baseline.header, header);
    assert_eq!(baseline.stream, stream);

    let report = Comparator::new(CompareOptions::diagnostic())
        .compare(&baseline.stream, &stream)
        .expect("Failed to compare");
    assert!(report.is_match());
    let _ = std::fs::remove_file(&path);
}

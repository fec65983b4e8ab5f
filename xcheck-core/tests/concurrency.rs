//! Several threads emitting through one runtime

use crossbeam::channel;

use xcheck::compare::{Comparator, NestingVerifier};
use xcheck::emitter::{EmitterConfig, OutputTarget};
use xcheck::record::{decode, StreamFormat};
use xcheck::{FunctionSpec, RecordStream, Result, XCheckConfig, XCheckRuntime};

const WORKERS: u32 = 4;
const CALLS: u64 = 25;

fn fib(rt: &XCheckRuntime, n: u64) -> Result<u64> {
    let call = rt.enter("fib")?;
    call.arg(0, &n)?;
    let r = if n < 2 {
        n
    } else {
        fib(rt, n - 1)? + fib(rt, n - 2)?
    };
    call.returning(r)
}

fn worker(rt: &XCheckRuntime, id: u32, started: channel::Sender<()>) -> Result<()> {
    let call = rt.enter("worker")?;
    call.arg(0, &id)?;
    // Ordinals follow first emission; release the next thread only now.
    let _ = started.send(());
    for i in 0..CALLS {
        fib(rt, (i + u64::from(id)) % 8)?;
    }
    call.finish()
}

fn run(format: StreamFormat) -> RecordStream {
    let path = std::env::temp_dir().join(format!("xcheck-mt-{}.log", uuid::Uuid::new_v4()));
    let config = XCheckConfig::default().with_emitter(
        EmitterConfig::default()
            .with_output(OutputTarget::File(path.clone()))
            .with_format(format)
            .with_thread_tags(true),
    );
    let rt = XCheckRuntime::builder(config)
        .function(FunctionSpec::new("worker").param::<u32>("id"))
        .function(FunctionSpec::new("fib").param::<u64>("n").returns::<u64>())
        .build()
        .expect("Failed to build runtime");

    std::thread::scope(|scope| {
        for id in 0..WORKERS {
            let (tx, rx) = channel::bounded(1);
            let rt = &rt;
            scope.spawn(move || worker(rt, id, tx).expect("Protocol error"));
            rx.recv().expect("Worker failed before its first record");
        }
    });

    let stats = rt.stats();
    rt.shutdown();
    assert_eq!(stats.write_failures, 0);

    let bytes = std::fs::read(&path).expect("Failed to read stream file");
    let _ = std::fs::remove_file(&path);
    decode(&bytes, format).expect("Failed to decode stream")
}

#[test]
fn each_thread_substream_is_well_nested() {
    let stream = run(StreamFormat::Text);
    assert_eq!(stream.thread_count(), WORKERS as usize);

    let verification = NestingVerifier::verify(&stream);
    assert!(verification.is_valid, "{:?}", verification.error_message);
    assert_eq!(verification.threads_checked, WORKERS as usize);
}

#[test]
fn interleaved_runs_compare_per_thread() {
    let first = run(StreamFormat::Text);
    let second = run(StreamFormat::Binary);

    let report = Comparator::default()
        .compare(&first, &second)
        .expect("Streams are well nested");
    assert!(report.is_match(), "{}", report);
    assert_eq!(report.threads_compared, WORKERS as usize);
}

#[test]
fn threads_get_distinct_substreams() {
    let stream = run(StreamFormat::Text);
    let ids: Vec<u32> = stream.thread_ids().collect();
    assert_eq!(ids, (0..WORKERS).collect::<Vec<_>>());

    for (ordinal, records) in stream.threads() {
        // Ent worker, Arg id, ..., Exi worker
        assert_eq!(records[1].value, xcheck::hash_value(&ordinal));
        assert!(records.len() > 3);
    }
}

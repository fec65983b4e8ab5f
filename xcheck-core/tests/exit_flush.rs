//! Records from the C ABI reach the output file when the process exits
//!
//! The child half runs in a re-executed copy of this test binary, emits
//! `main`'s records through the buffered global runtime and exits without
//! flushing. The parent checks the file against the golden stream.
#![cfg(feature = "ffi")]

use std::process::Command;

use xcheck::ffi::{xcheck_enter, xcheck_exit, xcheck_hash_i32, xcheck_return};
use xcheck::tag_of;

const GOLDEN: &str = include_str!("golden/struct2.xcheck");

/// Set in the child's environment; names the stream file to write
const CHILD_ENV: &str = "XCHECK_EXIT_FLUSH_CHILD";

#[test]
fn exiting_child() {
    if std::env::var_os(CHILD_ENV).is_none() {
        return;
    }
    let main = tag_of("main");
    assert_eq!(xcheck_enter(main), 0);
    assert_eq!(xcheck_exit(main), 0);
    assert_eq!(xcheck_return(xcheck_hash_i32(0)), 0);
    std::process::exit(0);
}

#[test]
fn buffered_records_flushed_at_exit() {
    let path = std::env::temp_dir().join(format!("xcheck-exit-{}.log", uuid::Uuid::new_v4()));
    let exe = std::env::current_exe().expect("Failed to locate test binary");

    let status = Command::new(exe)
        .args(["--exact", "exiting_child", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .env("XCHECK_OUTPUT", &path)
        .env_remove("XCHECK_CONFIG")
        .env_remove("XCHECK_FORMAT")
        .env_remove("XCHECK_THREAD_TAGS")
        .env_remove("XCHECK_SYNC")
        .status()
        .expect("Failed to run child");
    assert!(status.success());

    let written = std::fs::read_to_string(&path).expect("Failed to read stream file");
    let _ = std::fs::remove_file(&path);

    // Ent main, Exi main, Ret 0 of the golden run, without the call to foo.
    let golden: Vec<&str> = GOLDEN.lines().collect();
    let expected = vec![golden[0], golden[5], golden[6]];
    assert_eq!(written.lines().collect::<Vec<_>>(), expected);
}

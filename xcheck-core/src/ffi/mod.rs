//! C ABI over the process-wide runtime
//!
//! Lets C builds of the same program feed the same record stream as the
//! Rust build, so the two can be cross-checked against each other.
//!
//! ## Runtime
//!
//! The first call installs a runtime configured from the environment
//! (`XCHECK_CONFIG`, `XCHECK_OUTPUT`, `XCHECK_FORMAT`, ...) unless the host
//! already installed one through [`crate::runtime::install`].
//!
//! Buffered records are flushed when the process exits normally. A program
//! that leaves through `_exit` or a signal must call `xcheck_shutdown`
//! first or lose its buffered tail.
//!
//! ## Error Handling
//!
//! - Record functions return 0 on success and -1 on error.
//! - Use `xcheck_last_error` to retrieve the message; it is thread-local.
//! - Strings returned by this API must be freed with `xcheck_free_string`.
//!
//! ```c
//! uint32_t foo_tag = xcheck_tag("foo");
//! xcheck_enter(foo_tag);
//! xcheck_arg(xcheck_hash_i32(x));
//! int r = foo_body(x);
//! xcheck_exit(foo_tag);
//! xcheck_return(xcheck_hash_i32(r));
//! /* ... */
//! xcheck_shutdown();
//! ```

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::error::Result;
use crate::hash::{hash_value, EMPTY_SEQUENCE_HASH, NULL_POINTER_HASH};
use crate::identity::tag_of;
use crate::runtime::{global_or_init, XCheckRuntime};

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_error(msg: String) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(msg);
    });
}

fn clear_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Run `f` against the global runtime, mapping the outcome to a status code
fn with_runtime<F>(f: F) -> i32
where
    F: FnOnce(&XCheckRuntime) -> Result<()>,
{
    clear_error();
    match global_or_init().and_then(f) {
        Ok(()) => 0,
        Err(e) => {
            set_error(e.to_string());
            -1
        }
    }
}

unsafe fn c_str_to_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

// ============================================================================
// Error API
// ============================================================================

/// Get the last error message of the calling thread.
///
/// Returns null if the last call succeeded.
/// The returned string must be freed with `xcheck_free_string`.
#[no_mangle]
pub extern "C" fn xcheck_last_error() -> *mut c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(msg) => CString::new(msg.as_str())
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut()),
        None => ptr::null_mut(),
    })
}

/// Free a string returned by this API.
#[no_mangle]
pub extern "C" fn xcheck_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Entry record for the function with `tag`.
#[no_mangle]
pub extern "C" fn xcheck_enter(tag: u32) -> i32 {
    with_runtime(|rt| rt.entry_tag(tag))
}

/// Arg record for the innermost open call.
#[no_mangle]
pub extern "C" fn xcheck_arg(hash: u64) -> i32 {
    with_runtime(|rt| rt.arg_hash(hash))
}

/// Exit record; `tag` must match the innermost open call.
#[no_mangle]
pub extern "C" fn xcheck_exit(tag: u32) -> i32 {
    with_runtime(|rt| rt.exit_tag(tag))
}

/// Return record; must directly follow `xcheck_exit`.
#[no_mangle]
pub extern "C" fn xcheck_return(hash: u64) -> i32 {
    with_runtime(|rt| rt.return_hash(hash))
}

/// Block until every emitted record reached the sink.
#[no_mangle]
pub extern "C" fn xcheck_flush() -> i32 {
    with_runtime(|rt| {
        rt.flush();
        Ok(())
    })
}

/// Flush every record emitted so far, at the end of the program.
///
/// Open calls on the calling thread are reported in the log; records
/// emitted afterwards are still accepted and flushed at exit.
#[no_mangle]
pub extern "C" fn xcheck_shutdown() -> i32 {
    with_runtime(|rt| {
        let depth = rt.depth();
        if depth > 0 {
            tracing::warn!(depth, "Shutting down with open calls");
        }
        rt.flush();
        Ok(())
    })
}

/// Tag of a function name. Returns 0 and sets the last error for a null or
/// non-UTF-8 name.
#[no_mangle]
pub extern "C" fn xcheck_tag(name: *const c_char) -> u32 {
    clear_error();
    match unsafe { c_str_to_str(name) } {
        Some(name) => tag_of(name),
        None => {
            set_error("Invalid function name".to_string());
            0
        }
    }
}

// ============================================================================
// Hashing
// ============================================================================

macro_rules! ffi_hash {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Cross-check hash of a `", stringify!($ty), "`.")]
            #[no_mangle]
            pub extern "C" fn $name(value: $ty) -> u64 {
                hash_value(&value)
            }
        )*
    };
}

ffi_hash! {
    xcheck_hash_i8: i8,
    xcheck_hash_i16: i16,
    xcheck_hash_i32: i32,
    xcheck_hash_i64: i64,
    xcheck_hash_u8: u8,
    xcheck_hash_u16: u16,
    xcheck_hash_u32: u32,
    xcheck_hash_u64: u64,
    xcheck_hash_f32: f32,
    xcheck_hash_f64: f64,
    xcheck_hash_bool: bool,
}

/// Hash of a null pointer.
#[no_mangle]
pub extern "C" fn xcheck_hash_null() -> u64 {
    NULL_POINTER_HASH
}

/// Hash of an empty array.
#[no_mangle]
pub extern "C" fn xcheck_hash_empty() -> u64 {
    EMPTY_SEQUENCE_HASH
}

/// Hash of an aggregate from its field hashes in declaration order, using
/// the combiner the runtime assigns to `type_name`.
///
/// Returns 0 and sets the last error when the runtime cannot be
/// initialized or the arguments are invalid.
#[no_mangle]
pub extern "C" fn xcheck_hash_aggregate(
    type_name: *const c_char,
    fields: *const u64,
    len: usize,
) -> u64 {
    clear_error();
    let type_name = match unsafe { c_str_to_str(type_name) } {
        Some(name) => name,
        None => {
            set_error("Invalid type name".to_string());
            return 0;
        }
    };
    if fields.is_null() && len > 0 {
        set_error("Null field pointer".to_string());
        return 0;
    }
    let fields: &[u64] = if len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(fields, len) }
    };

    let runtime = match global_or_init() {
        Ok(rt) => rt,
        Err(e) => {
            set_error(e.to_string());
            return 0;
        }
    };
    fields
        .iter()
        .fold(
            runtime.registry().hash_context().aggregate(type_name),
            |agg, &h| agg.field_hash(h),
        )
        .finish()
}

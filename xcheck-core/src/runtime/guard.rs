use std::marker::PhantomData;
use std::sync::Arc;

use super::XCheckRuntime;
use crate::error::Result;
use crate::hash::CrossCheckHash;
use crate::registry::FunctionSite;

/// RAII handle for one instrumented call
///
/// Created by [`XCheckRuntime::enter`], which emits the Entry record.
/// Arguments are reported with [`arg`](Self::arg) before the body runs.
/// [`ret`](Self::ret) emits Exit followed by Return; dropping the guard
/// without it emits Exit only, which is how functions without a return
/// value finish.
///
/// ```rust
/// use xcheck::runtime::XCheckRuntime;
/// use xcheck::emitter::MemorySink;
/// use xcheck::XCheckConfig;
///
/// let sink = MemorySink::new();
/// let rt = XCheckRuntime::builder(XCheckConfig::default())
///     .sink(sink.clone())
///     .build()
///     .unwrap();
///
/// fn double(rt: &XCheckRuntime, x: i32) -> i32 {
///     let call = rt.enter("double").unwrap();
///     call.arg(0, &x).unwrap();
///     call.returning(x * 2).unwrap()
/// }
///
/// assert_eq!(double(&rt, 21), 42);
/// rt.flush();
/// assert_eq!(sink.len(), 4);
/// ```
///
/// The guard is tied to the thread that created it.
#[must_use = "dropping the guard immediately emits the Exit record"]
pub struct CallGuard<'rt> {
    runtime: &'rt XCheckRuntime,
    site: Arc<FunctionSite>,
    done: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'rt> CallGuard<'rt> {
    pub(crate) fn new(runtime: &'rt XCheckRuntime, site: Arc<FunctionSite>) -> Self {
        Self {
            runtime,
            site,
            done: false,
            _not_send: PhantomData,
        }
    }

    pub fn site(&self) -> &FunctionSite {
        &self.site
    }

    pub fn tag(&self) -> u32 {
        self.site.tag
    }

    /// Report argument `index`, in declaration order
    pub fn arg<T: CrossCheckHash + ?Sized>(&self, index: usize, value: &T) -> Result<()> {
        let checked = self.site.checks_arg(index);
        let hash = if checked { self.runtime.hash(value) } else { 0 };
        self.runtime
            .record_arg(Some(index), self.site.arity(), hash, checked)
    }

    /// Emit Exit, then Return with the hash of `value`
    pub fn ret<T: CrossCheckHash + ?Sized>(mut self, value: &T) -> Result<()> {
        self.done = true;
        self.runtime.exit_tag(self.site.tag)?;
        let checked = self.site.check_return;
        let hash = if checked { self.runtime.hash(value) } else { 0 };
        self.runtime.record_return(hash, checked)
    }

    /// [`ret`](Self::ret) that hands the value back
    pub fn returning<T: CrossCheckHash>(self, value: T) -> Result<T> {
        self.ret(&value)?;
        Ok(value)
    }

    /// Emit Exit for a call without a return value
    pub fn finish(mut self) -> Result<()> {
        self.done = true;
        self.runtime.exit_tag(self.site.tag)
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(err) = self.runtime.exit_tag(self.site.tag) {
            // Out-of-order guard drops corrupt the stream; stop the program
            // unless it is already unwinding.
            if !std::thread::panicking() {
                panic!("cross-check protocol violation: {}", err);
            }
        }
    }
}

impl std::fmt::Debug for CallGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGuard")
            .field("function", &self.site.name)
            .field("tag", &format_args!("{:#010x}", self.site.tag))
            .field("done", &self.done)
            .finish()
    }
}

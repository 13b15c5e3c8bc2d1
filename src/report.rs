//! Pluggable progress reporting, grounded on the teacher's `report` module contract (visible at
//! its call sites in `examples/foundry-rs-compilers/src/compile/project.rs`: a thread-scoped
//! reporter fetched once before entering a `rayon` pool via `report::get_default`, then
//! re-installed on each worker thread with `report::set_scoped` so progress events raised inside
//! `par_iter` still reach the caller's reporter).
//!
//! A `Reporter` is a trait object rather than a concrete progress-bar type so a CLI, a test, or a
//! language-server-style host can each supply their own sink (spec's ambient stack: this is pure
//! plumbing, not a feature the spec's non-goals could exclude).

use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub trait Reporter: Send + Sync {
    fn stage_started(&self, _name: &str) {}
    fn stage_finished(&self, _name: &str) {}
    fn file_analysed(&self, _path: &Path) {}
    fn compile_spawn(&self, _path: &Path) {}
    fn compile_success(&self, _path: &Path, _elapsed: Duration) {}
    fn compile_failed(&self, _path: &Path) {}
}

/// Reports nothing; the default when no caller has installed one.
pub struct NullReporter;
impl Reporter for NullReporter {}

/// A reporter that forwards every event to `tracing`, matching the crate's ambient logging
/// convention (spec's AMBIENT STACK: structured logging everywhere, not just at stage
/// boundaries).
pub struct TracingReporter;
impl Reporter for TracingReporter {
    fn stage_started(&self, name: &str) {
        info!(stage = name, "stage started");
    }
    fn stage_finished(&self, name: &str) {
        info!(stage = name, "stage finished");
    }
    fn file_analysed(&self, path: &Path) {
        debug!(path = %path.display(), "file analysed");
    }
    fn compile_spawn(&self, path: &Path) {
        debug!(path = %path.display(), "compile started");
    }
    fn compile_success(&self, path: &Path, elapsed: Duration) {
        debug!(path = %path.display(), elapsed_ms = elapsed.as_millis() as u64, "compile succeeded");
    }
    fn compile_failed(&self, path: &Path) {
        warn!(path = %path.display(), "compile failed");
    }
}

thread_local! {
    static SCOPED: RefCell<Option<Arc<dyn Reporter>>> = const { RefCell::new(None) };
}

static DEFAULT: once_cell::sync::Lazy<std::sync::Mutex<Arc<dyn Reporter>>> =
    once_cell::sync::Lazy::new(|| std::sync::Mutex::new(Arc::new(NullReporter)));

/// Installs `reporter` as the process-wide default.
pub fn set_default(reporter: Arc<dyn Reporter>) {
    *DEFAULT.lock().unwrap() = reporter;
}

/// Reads the current default reporter, running `f` with a clone of the `Arc` — used by the
/// scheduler to capture the reporter before installing a `rayon` pool, since a freshly spawned
/// pool thread doesn't inherit the calling thread's `thread_local` (see `set_scoped`).
pub fn get_default<R>(f: impl FnOnce(&Arc<dyn Reporter>) -> R) -> R {
    f(&DEFAULT.lock().unwrap())
}

/// A guard that restores the previous thread-scoped reporter on drop.
pub struct ScopedGuard {
    previous: Option<Arc<dyn Reporter>>,
}

impl Drop for ScopedGuard {
    fn drop(&mut self) {
        SCOPED.with(|cell| *cell.borrow_mut() = self.previous.take());
    }
}

/// Installs `reporter` as this thread's reporter for the lifetime of the returned guard. Called
/// once per worker thread inside a `rayon::ThreadPool::install` closure so events raised deep in
/// a per-file compile reach the reporter the caller installed before the pool was built.
pub fn set_scoped(reporter: &Arc<dyn Reporter>) -> ScopedGuard {
    let previous = SCOPED.with(|cell| cell.borrow_mut().replace(reporter.clone()));
    ScopedGuard { previous }
}

/// The reporter callers should use: this thread's scoped reporter if one was installed, else the
/// process-wide default.
pub fn current() -> Arc<dyn Reporter> {
    SCOPED.with(|cell| cell.borrow().clone()).unwrap_or_else(|| DEFAULT.lock().unwrap().clone())
}

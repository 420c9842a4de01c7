//! Detection of multi-threaded use.
//!
//! The engine runs the same code single- and multi-threaded; this module only
//! observes which case we are in. The first thread to touch the engine is
//! remembered; the first touch from any other thread latches the process into
//! multi-threaded mode, which is never left again. The flag feeds debug
//! assertions and [`is_multi_threaded`]; the locks themselves are always real
//! (`parking_lot`'s uncontended path is the single-threaded fast path).

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

static FIRST_THREAD: AtomicU64 = AtomicU64::new(0);
static MULTI_THREADED: AtomicBool = AtomicBool::new(false);
static MODE_VERSION: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(0) };
    static REGISTERED: Cell<bool> = const { Cell::new(false) };
    static CACHED_MODE: Cell<(u32, bool)> = const { Cell::new((0, false)) };
}

fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| {
        let mut t = token.get();
        if t == 0 {
            static NEXT: AtomicU64 = AtomicU64::new(1);
            t = NEXT.fetch_add(1, Ordering::Relaxed);
            token.set(t);
        }
        t
    })
}

/// Note that the current thread is using the engine. Cheap after the first
/// call on each thread.
pub(crate) fn register_thread() {
    if REGISTERED.with(Cell::get) {
        return;
    }
    REGISTERED.with(|r| r.set(true));

    if MULTI_THREADED.load(Ordering::Relaxed) {
        return;
    }
    let token = thread_token();
    match FIRST_THREAD.compare_exchange(0, token, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {}
        Err(first) if first == token => {}
        Err(_) => enable_multi_threaded(),
    }
}

fn enable_multi_threaded() {
    if !MULTI_THREADED.swap(true, Ordering::AcqRel) {
        MODE_VERSION.fetch_add(1, Ordering::Release);
    }
}

/// Whether a second thread has ever touched the engine. Once `true`, stays
/// `true` for the lifetime of the process.
///
/// The result is cached per thread and refreshed through a version counter,
/// so calling this in hot paths is essentially free.
pub fn is_multi_threaded() -> bool {
    CACHED_MODE.with(|cached| {
        let (version, mode) = cached.get();
        let current = MODE_VERSION.load(Ordering::Relaxed);
        if version == current {
            mode
        } else {
            let mode = MULTI_THREADED.load(Ordering::Acquire);
            cached.set((current, mode));
            mode
        }
    })
}

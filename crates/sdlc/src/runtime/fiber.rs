//! Cooperative parser execution.
//!
//! Generated parsers run as fibers: resumable state machines whose resume
//! point is part of the parser value itself. A fiber suspends only at the
//! wait operations (`wait_for_input`, `wait_for_input_or_eod`,
//! `wait_for_eod`) and at explicit `yield_now`; suspension happens when the
//! requested bytes are not yet present and the input is not frozen.
//!
//! Within one parser, operations observe sequential semantics. A sink
//! serializes its sub-parsers: each resume runs to the next suspension
//! before the next sub-parser is resumed.

use std::cell::Cell;

use crate::runtime::{
    error::{ErrorKind, RtResult, RuntimeError},
    stream::{Stream, View},
};

/// Outcome of a fiber resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// The parser ran to completion.
    Done,
    /// The parser suspended waiting for more input.
    Suspended,
}

/// Outcome of a wait operation inside a parser step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// The requested bytes are available; continue.
    Ready,
    /// Not enough input yet; the step must return `Suspended`.
    Suspend,
}

/// One resumable parse routine.
///
/// `resume` runs the parser from its stored resume point until it completes,
/// suspends, or fails. Implementations must re-check their wait conditions
/// on every resume; the driver resumes fibers whenever new input arrived.
pub trait Parse {
    fn resume(&mut self, input: &mut Stream) -> RtResult<FiberStatus>;
}

/// Lifecycle of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FiberState {
    Runnable,
    Done,
    Failed,
    Aborted,
}

/// A cooperatively-scheduled parser execution context.
pub struct Fiber {
    parser: Box<dyn Parse>,
    state: FiberState,
    error: Option<RuntimeError>,
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber").field("state", &self.state).finish_non_exhaustive()
    }
}

impl Fiber {
    pub fn new(parser: Box<dyn Parse>) -> Self {
        stats::on_fiber_create();
        Self {
            parser,
            state: FiberState::Runnable,
            error: None,
        }
    }

    /// True once the fiber has concluded (completed, failed, or aborted).
    pub fn is_concluded(&self) -> bool {
        self.state != FiberState::Runnable
    }

    pub fn is_done(&self) -> bool {
        self.state == FiberState::Done
    }

    /// The error that concluded the fiber, if it failed.
    pub fn error(&self) -> Option<&RuntimeError> {
        self.error.as_ref()
    }

    /// Resumes the parser until its next suspension or conclusion.
    ///
    /// Resuming a concluded fiber is an error; the caller must check
    /// `is_concluded` first (a sink treats extra input for a completed
    /// sub-parser as a parse error).
    pub fn resume(&mut self, input: &mut Stream) -> RtResult<FiberStatus> {
        if self.state != FiberState::Runnable {
            return Err(RuntimeError::invalid_argument("cannot resume a concluded fiber"));
        }
        let _guard = SuspensionGuard::enter();
        match self.parser.resume(input) {
            Ok(FiberStatus::Done) => {
                self.state = FiberState::Done;
                Ok(FiberStatus::Done)
            }
            Ok(FiberStatus::Suspended) => Ok(FiberStatus::Suspended),
            Err(err) => {
                self.state = FiberState::Failed;
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Aborts the fiber, discarding remaining state. The parser's own
    /// `%error` handling ran (or not) inside `resume`; abort itself never
    /// runs user code.
    pub fn abort(&mut self) {
        if self.state == FiberState::Runnable {
            self.state = FiberState::Aborted;
        }
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        stats::on_fiber_release();
    }
}

thread_local! {
    static SUSPENDABLE_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as executing inside a fiber for the duration of
/// a resume, so `yield_now` can reject calls from non-suspendable contexts.
struct SuspensionGuard;

impl SuspensionGuard {
    fn enter() -> Self {
        SUSPENDABLE_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for SuspensionGuard {
    fn drop(&mut self) {
        SUSPENDABLE_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Explicit yield point. Legal only while a fiber is being resumed.
pub fn yield_now() -> RtResult<Wait> {
    if SUSPENDABLE_DEPTH.with(Cell::get) == 0 {
        return Err(RuntimeError::new(
            ErrorKind::NotSuspendable,
            "yield in non-suspendable context",
        ));
    }
    Ok(Wait::Suspend)
}

/// Blocks the parse until at least `n` bytes are available in `view`.
///
/// Returns `Ready` when the bytes are present, `Suspend` when the parser
/// must wait for more input, and `ParseError(msg)` on frozen end-of-data
/// with insufficient bytes.
pub fn wait_for_input(stream: &Stream, view: View, n: u64, msg: &str, location: &str) -> RtResult<Wait> {
    if view.len(stream) >= n {
        return Ok(Wait::Ready);
    }
    if view.at_eod(stream) {
        return Err(RuntimeError::parse_error(msg).with_location(location));
    }
    Ok(Wait::Suspend)
}

/// Like `wait_for_input`, but frozen end-of-data yields `Ready` with
/// `false` instead of raising; the parser then handles EOD itself.
pub fn wait_for_input_or_eod(stream: &Stream, view: View, n: u64) -> RtResult<(Wait, bool)> {
    if view.len(stream) >= n {
        return Ok((Wait::Ready, true));
    }
    if view.at_eod(stream) {
        return Ok((Wait::Ready, false));
    }
    Ok((Wait::Suspend, false))
}

/// Blocks until the input is frozen.
pub fn wait_for_eod(stream: &Stream, view: View) -> Wait {
    if view.at_eod(stream) {
        Wait::Ready
    } else {
        Wait::Suspend
    }
}

/// Global execution statistics for debugging.
pub mod stats {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static LIVE_FIBERS: AtomicUsize = AtomicUsize::new(0);
    static CACHED_FIBERS: AtomicUsize = AtomicUsize::new(0);
    static STREAM_BYTES: AtomicUsize = AtomicUsize::new(0);
    static STREAM_BYTES_MAX: AtomicUsize = AtomicUsize::new(0);

    /// Snapshot of runtime memory state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MemoryStatistics {
        /// Bytes currently retained across all live streams.
        pub stream_bytes: usize,
        /// High-water mark of retained stream bytes.
        pub stream_bytes_max: usize,
        /// Fibers currently alive.
        pub fibers: usize,
        /// Concluded fibers retained for reuse.
        pub fibers_cached: usize,
    }

    pub(crate) fn on_fiber_create() {
        LIVE_FIBERS.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_fiber_release() {
        LIVE_FIBERS.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn on_stream_alloc(bytes: usize) {
        let now = STREAM_BYTES.fetch_add(bytes, Ordering::Relaxed) + bytes;
        STREAM_BYTES_MAX.fetch_max(now, Ordering::Relaxed);
    }

    pub(crate) fn on_stream_free(bytes: usize) {
        STREAM_BYTES.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Current memory statistics.
    pub fn memory_statistics() -> MemoryStatistics {
        MemoryStatistics {
            stream_bytes: STREAM_BYTES.load(Ordering::Relaxed),
            stream_bytes_max: STREAM_BYTES_MAX.load(Ordering::Relaxed),
            fibers: LIVE_FIBERS.load(Ordering::Relaxed),
            fibers_cached: CACHED_FIBERS.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bytes::Bytes;

    /// A parser that needs `n` bytes, then completes with them recorded.
    struct NeedBytes {
        n: u64,
        got: Option<Bytes>,
    }

    impl Parse for NeedBytes {
        fn resume(&mut self, input: &mut Stream) -> RtResult<FiberStatus> {
            let view = input.view();
            match wait_for_input(input, view, self.n, "expecting bytes", "<test>")? {
                Wait::Suspend => Ok(FiberStatus::Suspended),
                Wait::Ready => {
                    self.got = Some(view.read(input, self.n).expect("wait granted"));
                    Ok(FiberStatus::Done)
                }
            }
        }
    }

    #[test]
    fn fiber_suspends_until_input_arrives() {
        let mut stream = Stream::new();
        let mut fiber = Fiber::new(Box::new(NeedBytes { n: 4, got: None }));
        assert_eq!(fiber.resume(&mut stream).unwrap(), FiberStatus::Suspended);
        stream.append(b"ab".to_vec()).unwrap();
        assert_eq!(fiber.resume(&mut stream).unwrap(), FiberStatus::Suspended);
        stream.append(b"cd".to_vec()).unwrap();
        assert_eq!(fiber.resume(&mut stream).unwrap(), FiberStatus::Done);
        assert!(fiber.is_done());
    }

    #[test]
    fn frozen_input_with_too_few_bytes_is_a_parse_error() {
        let mut stream = Stream::new();
        stream.append(b"ab".to_vec()).unwrap();
        stream.freeze();
        let mut fiber = Fiber::new(Box::new(NeedBytes { n: 5, got: None }));
        let err = fiber.resume(&mut stream).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
        assert!(fiber.is_concluded());
        assert!(!fiber.is_done());
    }

    #[test]
    fn yield_outside_fiber_is_rejected() {
        let err = yield_now().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotSuspendable);
        assert_eq!(err.message, "yield in non-suspendable context");
    }

    struct Yielder {
        yielded: bool,
    }

    impl Parse for Yielder {
        fn resume(&mut self, _input: &mut Stream) -> RtResult<FiberStatus> {
            if self.yielded {
                return Ok(FiberStatus::Done);
            }
            self.yielded = true;
            yield_now()?;
            Ok(FiberStatus::Suspended)
        }
    }

    #[test]
    fn yield_inside_fiber_is_allowed() {
        let mut stream = Stream::new();
        let mut fiber = Fiber::new(Box::new(Yielder { yielded: false }));
        assert_eq!(fiber.resume(&mut stream).unwrap(), FiberStatus::Suspended);
        assert_eq!(fiber.resume(&mut stream).unwrap(), FiberStatus::Done);
    }

    #[test]
    fn abort_concludes_without_running_code() {
        let mut fiber = Fiber::new(Box::new(NeedBytes { n: 1, got: None }));
        fiber.abort();
        assert!(fiber.is_concluded());
        let mut stream = Stream::new();
        assert!(fiber.resume(&mut stream).is_err());
    }
}

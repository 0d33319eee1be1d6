//! Per-job event handlers.
//!
//! A job may be started with a handler object; the kernel invokes it
//! for stdout/stderr line batches and, exactly once, for exit. All
//! methods default to no-ops so a handler implements only the subset it
//! cares about. Jobs without a handler have their output discarded —
//! it is not buffered for later retrieval.
//!
//! The handler object itself carries any accumulated state (counters,
//! collected lines, ...). Invocations receive `&mut self` and only run
//! on the kernel's dispatch path, so no synchronization is needed
//! inside a handler.
//!
//! Handlers receive `&mut JobKernel` and may reenter it: start new
//! jobs, send input, or `wait` — including waiting on jobs whose own
//! handlers wait again. Events addressed to a handler that is currently
//! executing are deferred in arrival order and delivered when it
//! returns.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::kernel::JobKernel;
use crate::table::JobId;

/// Which output channel a line batch came from.
///
/// Pty-backed jobs merge both channels; their batches always report
/// `Stdout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Callback object attached to a job at start time.
#[async_trait]
pub trait JobHandler: Send {
    /// A batch of lines arrived on stdout or stderr.
    ///
    /// Batches are non-empty and delivered in the order the bytes were
    /// observed. See [`LineBuffer`](crate::line_buffer::LineBuffer) for
    /// the exact line semantics.
    async fn on_output(
        &mut self,
        kernel: &mut JobKernel,
        id: JobId,
        lines: &[Vec<u8>],
        stream: StreamKind,
    ) {
        let _ = (kernel, id, lines, stream);
    }

    /// The job reached a terminal state.
    ///
    /// Fires after every output batch produced before process death has
    /// been delivered. `code` is the exit code, `128 + signal` for a
    /// signaled death, or `-1` if the child could not be reaped.
    async fn on_exit(&mut self, kernel: &mut JobKernel, id: JobId, code: i64) {
        let _ = (kernel, id, code);
    }
}

/// Shared, lockable handler reference as stored in the job table.
///
/// The mutex is what makes reentrancy detectable: a `try_lock` failure
/// means the handler is executing right now, and the event is deferred
/// instead of deadlocking.
pub type SharedHandler = Arc<Mutex<dyn JobHandler>>;

/// Wrap a concrete handler for use in a [`JobSpec`](crate::spawn::JobSpec).
pub fn shared<H: JobHandler + 'static>(handler: H) -> SharedHandler {
    Arc::new(Mutex::new(handler))
}

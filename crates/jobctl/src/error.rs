//! Error types for job-control operations.
//!
//! Spawn-time rejections are NOT errors here: `start` reports them
//! through [`StartStatus`](crate::kernel::StartStatus) sentinels so the
//! host never has to unwind. This enum covers the synchronous failures
//! of the post-spawn operations (`send`, `close`, `resize`, `stop`,
//! `discard`).

use thiserror::Error;

use crate::table::JobId;

/// Failure modes of operations on an existing job.
#[derive(Debug, Error)]
pub enum JobError {
    /// The id is unknown, already discarded, or the job is no longer
    /// running where a running job is required.
    #[error("no such job: {0}")]
    NoSuchJob(JobId),

    /// `stop` was already requested, or the job already reached a
    /// terminal state.
    #[error("job {0} already stopped")]
    AlreadyStopped(JobId),

    /// The host closed stdin earlier; no further writes are accepted.
    #[error("stdin already closed for job {0}")]
    StdinClosed(JobId),

    /// `resize` on a job that is not backed by a pseudo-terminal.
    #[error("job {0} is not attached to a pty")]
    NotAPty(JobId),

    /// `close` names a stream the host cannot half-close.
    #[error("cannot close stream {0:?}")]
    UnknownStream(String),

    /// The job was not started with rpc wiring, or its raw streams were
    /// already claimed.
    #[error("job {0} has no claimable rpc streams")]
    NotRpc(JobId),

    /// `discard` on a job that has not reached a terminal state.
    #[error("job {0} is still running")]
    StillRunning(JobId),

    /// An OS-level I/O failure while writing to or signaling the child.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

//! jobctl: an embeddable asynchronous job-control kernel.
//!
//! This crate provides:
//!
//! - **Kernel**: the `JobKernel` — spawns jobs, dispatches their events,
//!   coordinates waits, and tears children down on shutdown
//! - **Spawning**: `JobSpec` with argv or shell commands, pipe/pty/rpc
//!   wiring, cwd and environment overrides
//! - **Streams**: line-oriented buffering of stdout/stderr with exact
//!   byte preservation (NULs included)
//! - **Handlers**: per-job callback objects invoked with stdout/stderr
//!   line batches and the exit code
//! - **Pty**: pseudo-terminal backed jobs with live resize
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        JobKernel                           │
//! │  ┌──────────┐  ┌─────────────┐  ┌───────────────────────┐  │
//! │  │ JobTable │  │ wait stack  │  │ deferred handler calls│  │
//! │  └──────────┘  └─────────────┘  └───────────────────────┘  │
//! │        ▲              event queue (mpsc)                   │
//! │        └────────────────── ◀───────────┐                   │
//! └────────────────────────────────────────┼───────────────────┘
//!            per-job I/O task  ────────────┘
//!            (drain stdout/stderr → reap child → exit event)
//! ```
//!
//! Handlers run only while the host is inside `poll` or `wait`, with
//! `&mut` access to the kernel, so handler code never races with other
//! handler code and may reenter the kernel freely.

pub mod error;
pub mod handler;
pub mod kernel;
pub mod line_buffer;
mod pty;
pub mod spawn;
pub mod table;

pub use error::JobError;
pub use handler::{shared, JobHandler, SharedHandler, StreamKind};
pub use kernel::{InterruptHandle, JobKernel, KernelConfig, StartStatus};
pub use line_buffer::{join_lines, LineBuffer};
pub use spawn::{CommandLine, JobSpec, PtySize};
pub use table::{JobId, JobInfo, JobState};

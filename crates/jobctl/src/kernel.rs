//! The job-control kernel.
//!
//! `JobKernel` owns the job table, the event queue, and the wait
//! machinery. Per-job I/O tasks are the only other moving parts: each
//! one drains its child's output into the event queue, reaps the child,
//! and emits exactly one exit event. Nothing else happens until the
//! host calls [`poll`](JobKernel::poll) or [`wait`](JobKernel::wait),
//! which is where all handler code runs.
//!
//! # Reentrancy
//!
//! Handlers receive `&mut JobKernel` and may start jobs, send input, or
//! wait — nested waits are tracked as an explicit stack of frames, and
//! every exit completion is applied to every active frame. An event for
//! a handler that is currently executing is deferred (its mutex is
//! held) and retried in arrival order once the invocation returns.
//!
//! # Teardown
//!
//! `shutdown` SIGTERMs every running non-detached job's process group,
//! waits out the grace period, then SIGKILLs stragglers. Detached jobs
//! are left to the OS. `Drop` is a synchronous best-effort fallback.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Notify, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::JobError;
use crate::handler::{JobHandler, SharedHandler, StreamKind};
use crate::line_buffer::{join_lines, LineBuffer};
use crate::pty::{self, PtyReader};
use crate::spawn::{self, JobSpec, SpawnError};
use crate::table::{Job, JobId, JobInfo, JobState, JobTable, StdinSink};

/// Tunables for the kernel. `Default` is the common case.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Interpreter for [`CommandLine::Shell`](crate::spawn::CommandLine) jobs.
    pub shell: PathBuf,
    /// Flag that makes the shell run its next argument (`-c`).
    pub shell_flag: String,
    /// How long `stop` and `shutdown` give SIGTERM before SIGKILL.
    pub term_grace: Duration,
    /// Read chunk size for output pumps.
    pub read_buffer_size: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            shell_flag: "-c".to_string(),
            term_grace: Duration::from_secs(2),
            read_buffer_size: 8192,
        }
    }
}

/// Outcome of [`JobKernel::start`].
///
/// Spawn failures are reported here, never as panics or `Err`: invalid
/// arguments carry a message and map to the raw sentinel `0`, a missing
/// or non-executable target maps to `-1`. Neither consumes a job id.
#[derive(Debug)]
pub enum StartStatus {
    Started(JobId),
    Rejected(String),
    NotExecutable,
}

impl StartStatus {
    /// The conventional numeric form: positive id, `0`, or `-1`.
    pub fn raw(&self) -> i64 {
        match self {
            StartStatus::Started(id) => id.0 as i64,
            StartStatus::Rejected(_) => 0,
            StartStatus::NotExecutable => -1,
        }
    }

    pub fn id(&self) -> Option<JobId> {
        match self {
            StartStatus::Started(id) => Some(*id),
            _ => None,
        }
    }

    /// Rejection message, present only for invalid arguments.
    pub fn message(&self) -> Option<&str> {
        match self {
            StartStatus::Rejected(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Aborts an in-progress `wait` from outside the kernel.
///
/// One `interrupt` call aborts the innermost active wait; a call with
/// no wait in progress is held and aborts the next one.
#[derive(Clone)]
pub struct InterruptHandle {
    notify: Arc<Notify>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.notify.notify_one();
    }
}

/// Raw event emitted by a job's I/O task.
struct RawEvent {
    id: JobId,
    payload: RawPayload,
}

enum RawPayload {
    Output {
        stream: StreamKind,
        lines: Vec<Vec<u8>>,
    },
    /// `None` means the child could not be reaped (`Failed`).
    Exit { code: Option<i64> },
}

/// A handler invocation waiting for its handler to become free.
struct DeferredCall {
    id: JobId,
    handler: SharedHandler,
    call: HandlerCall,
}

enum HandlerCall {
    Output {
        stream: StreamKind,
        lines: Vec<Vec<u8>>,
    },
    Exit {
        code: i64,
    },
}

/// One active `wait`. Exit dispatch removes the id from every frame.
struct WaitFrame {
    pending: HashSet<JobId>,
}

enum Next {
    Event(RawEvent),
    Timeout,
    Interrupted,
    Idle,
}

/// The process-wide job-control state.
pub struct JobKernel {
    config: KernelConfig,
    table: JobTable,
    events_tx: UnboundedSender<RawEvent>,
    events_rx: UnboundedReceiver<RawEvent>,
    deferred: VecDeque<DeferredCall>,
    wait_stack: Vec<WaitFrame>,
    interrupt: Arc<Notify>,
}

impl JobKernel {
    pub fn new(config: KernelConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            table: JobTable::new(),
            events_tx,
            events_rx,
            deferred: VecDeque::new(),
            wait_stack: Vec::new(),
            interrupt: Arc::new(Notify::new()),
        }
    }

    /// Handle for aborting waits, safe to move to another task or a
    /// signal handler.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            notify: self.interrupt.clone(),
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Spawning
    // ────────────────────────────────────────────────────────────────

    /// Start a job. Must be called from within a tokio runtime.
    pub fn start(&mut self, spec: JobSpec) -> StartStatus {
        let resolved = match spawn::resolve(&spec, &self.config) {
            Ok(resolved) => resolved,
            Err(SpawnError::Invalid(msg)) => {
                debug!(%msg, "spawn rejected");
                return StartStatus::Rejected(msg);
            }
            Err(SpawnError::NotExecutable) => return StartStatus::NotExecutable,
        };

        let mut cmd = Command::new(&resolved.program);
        cmd.args(&resolved.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        if spec.clear_env {
            cmd.env_clear();
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let (pty_master, pty_reader) = match spec.pty {
            Some(size) => {
                let pair = match pty::open(size) {
                    Ok(pair) => pair,
                    Err(e) => return StartStatus::Rejected(format!("pty allocation failed: {}", e)),
                };
                let slave_in = match pair.slave.try_clone() {
                    Ok(fd) => fd,
                    Err(e) => return StartStatus::Rejected(format!("pty allocation failed: {}", e)),
                };
                let slave_out = match pair.slave.try_clone() {
                    Ok(fd) => fd,
                    Err(e) => return StartStatus::Rejected(format!("pty allocation failed: {}", e)),
                };
                cmd.stdin(Stdio::from(slave_in));
                cmd.stdout(Stdio::from(slave_out));
                cmd.stderr(Stdio::from(pair.slave));
                pty::set_controlling_tty(&mut cmd);
                (Some(Arc::new(pair.master)), Some(pair.reader))
            }
            None => {
                cmd.stdin(Stdio::piped());
                cmd.stdout(Stdio::piped());
                cmd.stderr(Stdio::piped());
                // Own process group, so stop/shutdown can signal the
                // whole job without touching the host.
                cmd.process_group(0);
                (None, None)
            }
        };

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            // Resolution already vetted the path; a spawn failure here
            // is the same "cannot execute" answer, and must not have
            // consumed an id.
            Err(_) => return StartStatus::NotExecutable,
        };

        let pid = Pid::from_raw(child.id().map(|p| p as i32).unwrap_or(-1));
        let id = self.table.allocate();
        let alive = Arc::new(AtomicBool::new(true));

        let stdin = match &pty_master {
            Some(master) => StdinSink::Pty(master.clone()),
            None => child
                .stdin
                .take()
                .map(StdinSink::Pipe)
                .unwrap_or(StdinSink::Closed),
        };

        let rpc_streams = if spec.rpc {
            match (child.stdout.take(), child.stderr.take()) {
                (Some(out), Some(err)) => Some((out, err)),
                _ => None,
            }
        } else {
            None
        };

        let tx = self.events_tx.clone();
        let buf_size = self.config.read_buffer_size;
        let io_task = match pty_reader {
            Some(reader) => spawn_pty_task(child, reader, id, tx, alive.clone(), buf_size),
            None if spec.rpc => tokio::spawn(finish_child(child, id, tx, alive.clone())),
            None => spawn_pipe_task(child, id, tx, alive.clone(), buf_size),
        };

        let command = spec.describe();
        debug!(job = %id, pid = pid.as_raw(), command = %command, "started job");
        self.table.insert(Job {
            id,
            pid,
            command,
            state: JobState::Running,
            stdin,
            pty: pty_master,
            handler: spec.handler,
            detach: spec.detach,
            stop_requested: false,
            alive,
            io_task: Some(io_task),
            escalation: None,
            rpc_streams,
        });
        StartStatus::Started(id)
    }

    // ────────────────────────────────────────────────────────────────
    // Operations on running jobs
    // ────────────────────────────────────────────────────────────────

    /// Write raw bytes to the job's stdin, verbatim.
    pub async fn send(&mut self, id: JobId, data: &[u8]) -> Result<(), JobError> {
        let job = self.running_mut(id)?;
        match &mut job.stdin {
            StdinSink::Closed => Err(JobError::StdinClosed(id)),
            StdinSink::Pipe(stdin) => {
                stdin.write_all(data).await?;
                stdin.flush().await?;
                Ok(())
            }
            StdinSink::Pty(master) => {
                master.write_all(data).await?;
                Ok(())
            }
        }
    }

    /// Write a line list to stdin: elements joined with `\n`, nothing
    /// appended after the last one.
    pub async fn send_lines(&mut self, id: JobId, lines: &[Vec<u8>]) -> Result<(), JobError> {
        let data = join_lines(lines);
        self.send(id, &data).await
    }

    /// Half-close a job stream. Only `"stdin"` can be closed.
    pub async fn close(&mut self, id: JobId, stream: &str) -> Result<(), JobError> {
        if stream != "stdin" {
            return Err(JobError::UnknownStream(stream.to_string()));
        }
        let job = self.running_mut(id)?;
        match std::mem::replace(&mut job.stdin, StdinSink::Closed) {
            StdinSink::Closed => Err(JobError::StdinClosed(id)),
            StdinSink::Pipe(mut stdin) => {
                stdin.shutdown().await?;
                Ok(())
            }
            StdinSink::Pty(master) => {
                // No fd to close without killing resize: send VEOF and
                // refuse further writes instead.
                master.write_all(&[0x04]).await?;
                Ok(())
            }
        }
    }

    /// Change a pty job's terminal geometry.
    pub fn resize(&mut self, id: JobId, rows: u16, cols: u16) -> Result<(), JobError> {
        let job = self.running_mut(id)?;
        let Some(master) = &job.pty else {
            return Err(JobError::NotAPty(id));
        };
        master.resize(rows, cols)?;
        Ok(())
    }

    /// Request termination: SIGTERM to the job's process group now,
    /// SIGKILL after the grace period if it is still alive. A job may
    /// only be stopped once.
    pub fn stop(&mut self, id: JobId) -> Result<(), JobError> {
        let grace = self.config.term_grace;
        let job = self.table.get_mut(id).ok_or(JobError::NoSuchJob(id))?;
        if job.state.is_terminal() || job.stop_requested {
            return Err(JobError::AlreadyStopped(id));
        }
        job.stop_requested = true;
        let pgid = job.pid;
        killpg(pgid, Signal::SIGTERM).map_err(std::io::Error::from)?;
        debug!(job = %id, "sent SIGTERM");

        let alive = job.alive.clone();
        job.escalation = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if alive.load(Ordering::Acquire) {
                warn!(job = %id, "grace period elapsed, sending SIGKILL");
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        }));
        Ok(())
    }

    /// OS pid, valid only while the job is running.
    pub fn pid(&self, id: JobId) -> Result<i32, JobError> {
        match self.table.get(id) {
            Some(job) if !job.state.is_terminal() => Ok(job.pid.as_raw()),
            _ => Err(JobError::NoSuchJob(id)),
        }
    }

    /// Current state, if the job is still in the table.
    pub fn state(&self, id: JobId) -> Option<JobState> {
        self.table.get(id).map(|job| job.state)
    }

    /// Snapshot of every tracked job, oldest first.
    pub fn list(&self) -> Vec<JobInfo> {
        self.table.list()
    }

    /// Drop a terminal-state row from the table. Its id is never
    /// reused; a later `wait` on it reports `-3`.
    pub fn discard(&mut self, id: JobId) -> Result<(), JobError> {
        self.table.remove(id).map(|_| ())
    }

    /// Detach the raw stdout/stderr of an rpc-wired job for the
    /// transport collaborator. Single-shot.
    pub fn take_rpc_streams(
        &mut self,
        id: JobId,
    ) -> Result<(ChildStdout, ChildStderr), JobError> {
        let job = self.table.get_mut(id).ok_or(JobError::NoSuchJob(id))?;
        job.rpc_streams.take().ok_or(JobError::NotRpc(id))
    }

    fn running_mut(&mut self, id: JobId) -> Result<&mut Job, JobError> {
        match self.table.get_mut(id) {
            Some(job) if !job.state.is_terminal() => Ok(job),
            _ => Err(JobError::NoSuchJob(id)),
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Event loop
    // ────────────────────────────────────────────────────────────────

    /// Dispatch everything currently queued without blocking.
    pub async fn poll(&mut self) {
        self.flush_deferred().await;
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event).await;
        }
        self.flush_deferred().await;
    }

    /// Block until every job in `ids` reaches a terminal state, the
    /// timeout elapses, or an interrupt arrives, while still dispatching
    /// every job's events.
    ///
    /// Results come back in input order: the exit code, `-1` for a job
    /// that had not terminated in time, `-3` for an unknown id, or `-2`
    /// in every position when the wait was interrupted. A zero timeout
    /// is a single non-blocking poll.
    pub async fn wait(&mut self, ids: &[JobId], timeout: Option<Duration>) -> Vec<i64> {
        self.poll().await;

        let blocking = timeout.map_or(true, |t| !t.is_zero());
        let pending: HashSet<JobId> = ids
            .iter()
            .copied()
            .filter(|&id| matches!(self.table.get(id), Some(job) if !job.state.is_terminal()))
            .collect();

        let mut interrupted = false;
        if blocking && !pending.is_empty() {
            let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
            self.wait_stack.push(WaitFrame { pending });
            let depth = self.wait_stack.len();
            loop {
                if self.wait_stack[depth - 1].pending.is_empty() {
                    break;
                }
                match self.next_event(deadline).await {
                    Next::Event(event) => {
                        self.dispatch(event).await;
                        self.flush_deferred().await;
                    }
                    Next::Timeout => break,
                    Next::Interrupted => {
                        interrupted = true;
                        break;
                    }
                    Next::Idle => break,
                }
            }
            // Inner waits are strictly nested, so this frame is on top.
            self.wait_stack.truncate(depth - 1);
        }

        if interrupted {
            debug!("wait interrupted");
            return vec![-2; ids.len()];
        }
        ids.iter()
            .map(|&id| match self.table.get(id) {
                None => -3,
                Some(job) => match job.state {
                    JobState::Exited(code) => code,
                    JobState::Failed | JobState::Running => -1,
                },
            })
            .collect()
    }

    async fn next_event(&mut self, deadline: Option<tokio::time::Instant>) -> Next {
        let interrupt = Arc::clone(&self.interrupt);
        match deadline {
            Some(at) => tokio::select! {
                biased;
                _ = interrupt.notified() => Next::Interrupted,
                event = self.events_rx.recv() => event.map(Next::Event).unwrap_or(Next::Idle),
                _ = tokio::time::sleep_until(at) => Next::Timeout,
            },
            None => tokio::select! {
                biased;
                _ = interrupt.notified() => Next::Interrupted,
                event = self.events_rx.recv() => event.map(Next::Event).unwrap_or(Next::Idle),
            },
        }
    }

    async fn dispatch(&mut self, event: RawEvent) {
        match event.payload {
            RawPayload::Output { stream, lines } => {
                // No handler: discard, nothing is buffered for later.
                let Some(handler) = self.table.get(event.id).and_then(|j| j.handler.clone())
                else {
                    return;
                };
                self.deliver(event.id, handler, HandlerCall::Output { stream, lines })
                    .await;
            }
            RawPayload::Exit { code } => {
                // Bookkeeping happens unconditionally and before the
                // handler runs: state transition, resource release,
                // wait-frame completion.
                let handler = match self.table.get_mut(event.id) {
                    Some(job) => {
                        job.state = match code {
                            Some(code) => JobState::Exited(code),
                            None => JobState::Failed,
                        };
                        job.release_io();
                        job.handler.clone()
                    }
                    None => None,
                };
                for frame in &mut self.wait_stack {
                    frame.pending.remove(&event.id);
                }
                if let Some(handler) = handler {
                    self.deliver(
                        event.id,
                        handler,
                        HandlerCall::Exit {
                            code: code.unwrap_or(-1),
                        },
                    )
                    .await;
                }
            }
        }
    }

    async fn deliver(&mut self, id: JobId, handler: SharedHandler, call: HandlerCall) {
        // Once one call for a job is deferred, later calls queue behind
        // it to keep per-job ordering.
        if self.deferred.iter().any(|d| d.id == id) {
            self.deferred.push_back(DeferredCall { id, handler, call });
            return;
        }
        match handler.clone().try_lock_owned() {
            Ok(mut guard) => {
                self.invoke(&mut guard, id, call).await;
                self.flush_deferred().await;
            }
            // Handler is executing right now (reentrant event).
            Err(_) => self.deferred.push_back(DeferredCall { id, handler, call }),
        }
    }

    async fn invoke(
        &mut self,
        guard: &mut OwnedMutexGuard<dyn JobHandler>,
        id: JobId,
        call: HandlerCall,
    ) {
        match call {
            HandlerCall::Output { stream, lines } => {
                guard.on_output(self, id, &lines, stream).await;
            }
            HandlerCall::Exit { code } => guard.on_exit(self, id, code).await,
        }
    }

    async fn flush_deferred(&mut self) {
        loop {
            let mut progressed = false;
            for _ in 0..self.deferred.len() {
                let Some(deferred) = self.deferred.pop_front() else {
                    break;
                };
                match deferred.handler.clone().try_lock_owned() {
                    Ok(mut guard) => {
                        self.invoke(&mut guard, deferred.id, deferred.call).await;
                        progressed = true;
                    }
                    Err(_) => self.deferred.push_back(deferred),
                }
            }
            if !progressed || self.deferred.is_empty() {
                break;
            }
        }
    }

    // ────────────────────────────────────────────────────────────────
    // Teardown
    // ────────────────────────────────────────────────────────────────

    /// Terminate every running non-detached job: SIGTERM to each
    /// process group, wait out the grace period, SIGKILL stragglers.
    /// Detached jobs are left running; their OS resources now belong to
    /// the OS.
    pub async fn shutdown(&mut self) {
        let targets: Vec<(JobId, Pid)> = self
            .table
            .iter()
            .filter(|job| {
                !job.detach && !job.state.is_terminal() && job.alive.load(Ordering::Acquire)
            })
            .map(|job| (job.id, job.pid))
            .collect();
        if targets.is_empty() {
            self.poll().await;
            return;
        }

        debug!(count = targets.len(), "terminating running jobs");
        for (_, pgid) in &targets {
            let _ = killpg(*pgid, Signal::SIGTERM);
        }

        let ids: Vec<JobId> = targets.iter().map(|(id, _)| *id).collect();
        let grace = self.config.term_grace;
        let results = self.wait(&ids, Some(grace)).await;

        let mut escalated = false;
        for ((id, pgid), result) in targets.iter().zip(&results) {
            if matches!(*result, -1 | -2) {
                warn!(job = %id, "still running at shutdown, sending SIGKILL");
                let _ = killpg(*pgid, Signal::SIGKILL);
                escalated = true;
            }
        }
        if escalated {
            let _ = self.wait(&ids, Some(Duration::from_secs(1))).await;
        }
    }
}

impl Default for JobKernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl Drop for JobKernel {
    fn drop(&mut self) {
        // Best-effort synchronous teardown for hosts that never called
        // shutdown: signal, give children a beat, then force.
        let mut pending = Vec::new();
        for job in self.table.iter() {
            if !job.detach && job.alive.load(Ordering::Acquire) {
                let _ = killpg(job.pid, Signal::SIGTERM);
                pending.push((job.pid, job.alive.clone()));
            }
        }
        if pending.is_empty() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
        for (pgid, alive) in pending {
            if alive.load(Ordering::Acquire) {
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────
// Per-job I/O tasks
// ────────────────────────────────────────────────────────────────────

fn spawn_pipe_task(
    mut child: Child,
    id: JobId,
    tx: UnboundedSender<RawEvent>,
    alive: Arc<AtomicBool>,
    buf_size: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_pump = async {
            if let Some(reader) = stdout {
                pump_pipe(reader, id, StreamKind::Stdout, tx.clone(), buf_size).await;
            }
        };
        let err_pump = async {
            if let Some(reader) = stderr {
                pump_pipe(reader, id, StreamKind::Stderr, tx.clone(), buf_size).await;
            }
        };
        tokio::join!(out_pump, err_pump);
        finish_child(child, id, tx, alive).await;
    })
}

fn spawn_pty_task(
    child: Child,
    reader: PtyReader,
    id: JobId,
    tx: UnboundedSender<RawEvent>,
    alive: Arc<AtomicBool>,
    buf_size: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        pump_pty(reader, id, tx.clone(), buf_size).await;
        finish_child(child, id, tx, alive).await;
    })
}

/// Drain one pipe to EOF, emitting line batches as they complete and a
/// final flush batch at the end.
async fn pump_pipe<R>(
    mut reader: R,
    id: JobId,
    stream: StreamKind,
    tx: UnboundedSender<RawEvent>,
    buf_size: usize,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buf_size];
    let mut lines = LineBuffer::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Some(batch) = lines.push(&buf[..n]) {
                    let _ = tx.send(RawEvent {
                        id,
                        payload: RawPayload::Output {
                            stream,
                            lines: batch,
                        },
                    });
                }
            }
        }
    }
    let _ = tx.send(RawEvent {
        id,
        payload: RawPayload::Output {
            stream,
            lines: lines.finish(),
        },
    });
}

/// Same as [`pump_pipe`] for the merged pty stream.
async fn pump_pty(
    mut reader: PtyReader,
    id: JobId,
    tx: UnboundedSender<RawEvent>,
    buf_size: usize,
) {
    let mut buf = vec![0u8; buf_size];
    let mut lines = LineBuffer::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Some(batch) = lines.push(&buf[..n]) {
                    let _ = tx.send(RawEvent {
                        id,
                        payload: RawPayload::Output {
                            stream: StreamKind::Stdout,
                            lines: batch,
                        },
                    });
                }
            }
        }
    }
    let _ = tx.send(RawEvent {
        id,
        payload: RawPayload::Output {
            stream: StreamKind::Stdout,
            lines: lines.finish(),
        },
    });
}

/// Reap the child and emit the single exit event. Runs strictly after
/// the output pumps, which is what keeps exit behind all drained
/// output.
async fn finish_child(
    mut child: Child,
    id: JobId,
    tx: UnboundedSender<RawEvent>,
    alive: Arc<AtomicBool>,
) {
    let code = match child.wait().await {
        Ok(status) => Some(exit_code_of(status)),
        Err(e) => {
            warn!(job = %id, error = %e, "failed to reap child");
            None
        }
    };
    alive.store(false, Ordering::Release);
    let _ = tx.send(RawEvent {
        id,
        payload: RawPayload::Exit { code },
    });
}

fn exit_code_of(status: std::process::ExitStatus) -> i64 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        i64::from(code)
    } else if let Some(signal) = status.signal() {
        128 + i64::from(signal)
    } else {
        -1
    }
}

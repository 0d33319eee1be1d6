//! Process-wide job registry.
//!
//! The table is owned by the kernel and only ever touched from its
//! dispatch path, so it needs no locking: concurrency in this crate is
//! interleaving through reentrant calls, never parallelism.
//!
//! Ids are allocated only after a child process actually exists, which
//! is what keeps the counter untouched across both kinds of spawn
//! failure.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use nix::unistd::Pid;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;

use crate::error::JobError;
use crate::handler::SharedHandler;
use crate::pty::PtyMaster;

/// Unique identifier for a job. Positive, monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Process is alive (or its exit has not been dispatched yet).
    Running,
    /// Process terminated with the given code.
    Exited(i64),
    /// Process could not be reaped; no exit code is available.
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Running)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Running => write!(f, "running"),
            JobState::Exited(code) => write!(f, "exited:{}", code),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of a job for listings.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    /// OS pid, present only while the job is running.
    pub pid: Option<i32>,
}

/// Host-side write end of the child's stdin.
pub(crate) enum StdinSink {
    Pipe(ChildStdin),
    Pty(Arc<PtyMaster>),
    Closed,
}

/// One tracked child process.
pub(crate) struct Job {
    pub id: JobId,
    pub pid: Pid,
    pub command: String,
    pub state: JobState,
    pub stdin: StdinSink,
    /// Master side of the pty, kept for resize until the job ends.
    pub pty: Option<Arc<PtyMaster>>,
    pub handler: Option<SharedHandler>,
    pub detach: bool,
    pub stop_requested: bool,
    /// Cleared by the I/O task right after the child is reaped; signal
    /// escalation and drop teardown consult it instead of the (possibly
    /// stale, event-queue-lagged) `state`.
    pub alive: Arc<AtomicBool>,
    /// The job's I/O task; detached jobs keep theirs past shutdown.
    pub io_task: Option<JoinHandle<()>>,
    /// Pending SIGKILL escalation from `stop`, aborted once the exit is
    /// dispatched.
    pub escalation: Option<JoinHandle<()>>,
    /// Raw output pipes of an rpc-wired job, parked here until the
    /// transport collaborator claims them.
    pub rpc_streams: Option<(ChildStdout, ChildStderr)>,
}

impl Job {
    /// Release OS-facing resources at the terminal transition. Runs
    /// exactly once, before the exit handler fires.
    pub fn release_io(&mut self) {
        self.stdin = StdinSink::Closed;
        self.pty = None;
        if let Some(task) = self.escalation.take() {
            task.abort();
        }
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            command: self.command.clone(),
            state: self.state,
            pid: matches!(self.state, JobState::Running).then(|| self.pid.as_raw()),
        }
    }
}

/// Registry mapping ids to job rows; owns id allocation.
#[derive(Default)]
pub(crate) struct JobTable {
    next_id: u64,
    jobs: HashMap<JobId, Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            jobs: HashMap::new(),
        }
    }

    /// Hand out the next id. Callers must only do this once a process
    /// exists; failed spawns must not advance the counter.
    pub fn allocate(&mut self) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, job: Job) {
        self.jobs.insert(job.id, job);
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    /// Discard a row; only terminal-state rows may be removed.
    pub fn remove(&mut self, id: JobId) -> Result<Job, JobError> {
        match self.jobs.get(&id) {
            None => Err(JobError::NoSuchJob(id)),
            Some(job) if !job.state.is_terminal() => Err(JobError::StillRunning(id)),
            Some(_) => Ok(self.jobs.remove(&id).expect("presence checked above")),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Listing sorted by id, oldest first.
    pub fn list(&self) -> Vec<JobInfo> {
        let mut infos: Vec<JobInfo> = self.jobs.values().map(Job::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use jobctl::{
    shared, JobHandler, JobId, JobKernel, SharedHandler, StartStatus, StreamKind,
};
use jobctl::line_buffer::join_lines;
use jobctl::spawn::JobSpec;

/// Shared view of everything a [`Collector`] handler observed.
#[derive(Clone, Default)]
pub struct Recording {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    stdout: Vec<Vec<u8>>,
    stderr: Vec<Vec<u8>>,
    /// Event arrival order: "stdout", "stderr", "exit".
    order: Vec<String>,
    exit: Option<i64>,
}

impl Recording {
    /// A handler that records into this recording.
    pub fn collector(&self) -> SharedHandler {
        shared(Collector { rec: self.clone() })
    }

    /// The stdout byte stream, reconstructed from the delivered lines.
    pub fn stdout_bytes(&self) -> Vec<u8> {
        join_lines(&self.inner.lock().unwrap().stdout)
    }

    pub fn stderr_bytes(&self) -> Vec<u8> {
        join_lines(&self.inner.lock().unwrap().stderr)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout_bytes()).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr_bytes()).into_owned()
    }

    pub fn stdout_lines(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().stdout.clone()
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.inner.lock().unwrap().exit
    }

    pub fn order(&self) -> Vec<String> {
        self.inner.lock().unwrap().order.clone()
    }
}

struct Collector {
    rec: Recording,
}

#[async_trait]
impl JobHandler for Collector {
    async fn on_output(
        &mut self,
        _kernel: &mut JobKernel,
        _id: JobId,
        lines: &[Vec<u8>],
        stream: StreamKind,
    ) {
        let mut inner = self.rec.inner.lock().unwrap();
        inner.order.push(stream.to_string());
        match stream {
            StreamKind::Stdout => inner.stdout.extend(lines.iter().cloned()),
            StreamKind::Stderr => inner.stderr.extend(lines.iter().cloned()),
        }
    }

    async fn on_exit(&mut self, _kernel: &mut JobKernel, _id: JobId, code: i64) {
        let mut inner = self.rec.inner.lock().unwrap();
        inner.order.push("exit".to_string());
        inner.exit = Some(code);
    }
}

/// Start a job, panicking on rejection.
pub fn start_job(kernel: &mut JobKernel, spec: JobSpec) -> JobId {
    init_tracing();
    match kernel.start(spec) {
        StartStatus::Started(id) => id,
        other => panic!("job failed to start: {:?}", other),
    }
}

/// Route kernel traces to the test output when RUST_LOG is set.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

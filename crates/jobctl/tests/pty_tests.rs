//! Integration tests for pty-backed jobs.
//!
//! Tests verify:
//! - the child sees a real controlling terminal
//! - stdout and stderr arrive merged on the stdout stream
//! - terminal-driven CRs are preserved in line payloads
//! - initial geometry and live resize via TIOCSWINSZ
//! - VEOF-based stdin close
//! - pty and rpc wiring are mutually exclusive

use std::time::Duration;

use jobctl::spawn::{JobSpec, PtySize};
use jobctl::{JobError, JobKernel};

mod common;
use common::{start_job, Recording};

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn size(rows: u16, cols: u16) -> PtySize {
    PtySize { rows, cols }
}

// ============================================================================
// Terminal Identity
// ============================================================================

#[tokio::test]
async fn test_pty_child_has_a_controlling_terminal() {
    let mut kernel = JobKernel::default();
    let rec = Recording::default();
    let id = start_job(
        &mut kernel,
        JobSpec::shell("[ -t 0 ] && echo is-a-tty || echo not-a-tty")
            .pty(PtySize::default())
            .handler(rec.collector()),
    );
    kernel.wait(&[id], WAIT).await;
    assert!(rec.stdout_text().contains("is-a-tty"));
}

#[tokio::test]
async fn test_pipe_child_has_no_terminal() {
    let mut kernel = JobKernel::default();
    let rec = Recording::default();
    let id = start_job(
        &mut kernel,
        JobSpec::shell("[ -t 0 ] && echo is-a-tty || echo not-a-tty")
            .handler(rec.collector()),
    );
    kernel.wait(&[id], WAIT).await;
    assert!(rec.stdout_text().contains("not-a-tty"));
}

// ============================================================================
// Merged Output
// ============================================================================

#[tokio::test]
async fn test_stderr_merged_into_stdout_stream() {
    let mut kernel = JobKernel::default();
    let rec = Recording::default();
    let id = start_job(
        &mut kernel,
        JobSpec::shell("echo out; echo err >&2")
            .pty(PtySize::default())
            .handler(rec.collector()),
    );
    kernel.wait(&[id], WAIT).await;

    let text = rec.stdout_text();
    assert!(text.contains("out"));
    assert!(text.contains("err"));
    assert!(rec.stderr_bytes().is_empty());
}

#[tokio::test]
async fn test_terminal_crs_preserved_in_lines() {
    let mut kernel = JobKernel::default();
    let rec = Recording::default();
    let id = start_job(
        &mut kernel,
        JobSpec::shell("echo hello")
            .pty(PtySize::default())
            .handler(rec.collector()),
    );
    kernel.wait(&[id], WAIT).await;

    // The terminal's ONLCR turns \n into \r\n; splitting happens on \n
    // only, so the CR stays in the payload.
    assert!(rec.stdout_lines().contains(&b"hello\r".to_vec()));
}

// ============================================================================
// Geometry
// ============================================================================

#[tokio::test]
async fn test_initial_geometry_visible_to_child() {
    let mut kernel = JobKernel::default();
    let rec = Recording::default();
    let id = start_job(
        &mut kernel,
        JobSpec::shell("stty size")
            .pty(size(30, 90))
            .handler(rec.collector()),
    );
    kernel.wait(&[id], WAIT).await;
    assert!(rec.stdout_text().contains("30 90"));
}

#[tokio::test]
async fn test_resize_reaches_running_child() {
    let mut kernel = JobKernel::default();
    let rec = Recording::default();
    let id = start_job(
        &mut kernel,
        JobSpec::shell("stty size; sleep 1; stty size")
            .pty(size(24, 80))
            .handler(rec.collector()),
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    kernel.resize(id, 40, 120).unwrap();
    kernel.wait(&[id], WAIT).await;

    let text = rec.stdout_text();
    assert!(text.contains("24 80"));
    assert!(text.contains("40 120"));
}

#[tokio::test]
async fn test_resize_rejected_for_pipe_jobs() {
    let mut kernel = JobKernel::default();
    let id = start_job(&mut kernel, JobSpec::argv(["sleep", "30"]));
    assert!(matches!(
        kernel.resize(id, 40, 120),
        Err(JobError::NotAPty(_))
    ));
    kernel.stop(id).unwrap();
    kernel.wait(&[id], WAIT).await;
}

// ============================================================================
// Stdin
// ============================================================================

#[tokio::test]
async fn test_close_sends_eof_through_the_terminal() {
    let mut kernel = JobKernel::default();
    let rec = Recording::default();
    let id = start_job(
        &mut kernel,
        JobSpec::argv(["cat"])
            .pty(PtySize::default())
            .handler(rec.collector()),
    );

    kernel.send(id, b"hi\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    kernel.close(id, "stdin").await.unwrap();

    assert_eq!(kernel.wait(&[id], WAIT).await, vec![0]);
    // Terminal echo plus cat's copy; exact layout is up to the tty.
    assert!(rec.stdout_text().contains("hi"));

    assert!(matches!(
        kernel.send(id, b"late").await,
        Err(JobError::NoSuchJob(_)) | Err(JobError::StdinClosed(_))
    ));
}

// ============================================================================
// Wiring Conflicts
// ============================================================================

#[tokio::test]
async fn test_pty_and_rpc_are_mutually_exclusive() {
    let mut kernel = JobKernel::default();
    let status = kernel.start(JobSpec::argv(["cat"]).pty(PtySize::default()).rpc());
    assert_eq!(status.raw(), 0);
    assert!(status.message().unwrap().contains("mutually exclusive"));
}

//! Integration tests for wait: ordering, timeouts, interrupts, and
//! reentrant waiting from inside handlers.
//!
//! Tests verify:
//! - results come back in input order regardless of completion order
//! - timeout (-1), interrupt (-2), and unknown id (-3) sentinels
//! - zero timeout is a single non-blocking poll
//! - handlers can start jobs and wait on them while a wait is running
//! - events for a busy handler are deferred, not lost

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobctl::spawn::JobSpec;
use jobctl::{shared, JobHandler, JobId, JobKernel, StartStatus};

mod common;
use common::start_job;

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_results_in_input_order_despite_reverse_completion() {
    let mut kernel = JobKernel::default();
    let slow = start_job(&mut kernel, JobSpec::shell("sleep 0.3; exit 4"));
    let mid = start_job(&mut kernel, JobSpec::shell("sleep 0.2; exit 5"));
    let fast = start_job(&mut kernel, JobSpec::shell("sleep 0.1; exit 6"));

    assert_eq!(kernel.wait(&[slow, mid, fast], WAIT).await, vec![4, 5, 6]);
}

#[tokio::test]
async fn test_duplicate_ids_each_get_a_result() {
    let mut kernel = JobKernel::default();
    let id = start_job(&mut kernel, JobSpec::shell("exit 2"));
    assert_eq!(kernel.wait(&[id, id], WAIT).await, vec![2, 2]);
}

#[tokio::test]
async fn test_empty_wait_returns_immediately() {
    let mut kernel = JobKernel::default();
    assert_eq!(kernel.wait(&[], None).await, Vec::<i64>::new());
}

// ============================================================================
// Timeout and Sentinels
// ============================================================================

#[tokio::test]
async fn test_timeout_reports_minus_one_for_unfinished() {
    let mut kernel = JobKernel::default();
    let done = start_job(&mut kernel, JobSpec::argv(["true"]));
    let slow = start_job(&mut kernel, JobSpec::argv(["sleep", "30"]));

    let results = kernel
        .wait(&[done, slow], Some(Duration::from_millis(300)))
        .await;
    assert_eq!(results, vec![0, -1]);

    kernel.stop(slow).unwrap();
    kernel.wait(&[slow], WAIT).await;
}

#[tokio::test]
async fn test_unknown_id_reports_minus_three() {
    let mut kernel = JobKernel::default();
    assert_eq!(
        kernel.wait(&[JobId(4242)], Some(Duration::ZERO)).await,
        vec![-3]
    );
}

#[tokio::test]
async fn test_zero_timeout_is_a_nonblocking_poll() {
    let mut kernel = JobKernel::default();
    let slow = start_job(&mut kernel, JobSpec::argv(["sleep", "30"]));

    let started = std::time::Instant::now();
    let results = kernel.wait(&[slow, JobId(999)], Some(Duration::ZERO)).await;
    assert_eq!(results, vec![-1, -3]);
    assert!(started.elapsed() < Duration::from_secs(5));

    kernel.stop(slow).unwrap();
    kernel.wait(&[slow], WAIT).await;
}

#[tokio::test]
async fn test_zero_timeout_still_observes_finished_jobs() {
    let mut kernel = JobKernel::default();
    let id = start_job(&mut kernel, JobSpec::shell("exit 9"));
    kernel.wait(&[id], WAIT).await;
    assert_eq!(kernel.wait(&[id], Some(Duration::ZERO)).await, vec![9]);
}

// ============================================================================
// Interrupt
// ============================================================================

#[tokio::test]
async fn test_interrupt_aborts_wait_with_minus_two_everywhere() {
    let mut kernel = JobKernel::default();
    let slow = start_job(&mut kernel, JobSpec::argv(["sleep", "30"]));

    let handle = kernel.interrupt_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.interrupt();
    });

    // Every slot reports -2, even ones that would otherwise be -3.
    let results = kernel.wait(&[slow, JobId(777)], None).await;
    assert_eq!(results, vec![-2, -2]);

    kernel.stop(slow).unwrap();
    kernel.wait(&[slow], WAIT).await;
}

#[tokio::test]
async fn test_interrupt_before_wait_aborts_next_wait() {
    let mut kernel = JobKernel::default();
    let slow = start_job(&mut kernel, JobSpec::argv(["sleep", "30"]));

    kernel.interrupt_handle().interrupt();
    assert_eq!(kernel.wait(&[slow], None).await, vec![-2]);

    kernel.stop(slow).unwrap();
    kernel.wait(&[slow], WAIT).await;
}

// ============================================================================
// Reentrant Waits
// ============================================================================

/// Exit handler that starts a fresh job and waits on it, recursing
/// until the depth counter runs out.
struct NestingHandler {
    depth: u32,
    log: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl JobHandler for NestingHandler {
    async fn on_exit(&mut self, kernel: &mut JobKernel, _id: JobId, code: i64) {
        self.log.lock().unwrap().push(code);
        if self.depth == 0 {
            return;
        }
        let spec = JobSpec::shell(format!("exit {}", self.depth)).handler(shared(
            NestingHandler {
                depth: self.depth - 1,
                log: self.log.clone(),
            },
        ));
        if let StartStatus::Started(id) = kernel.start(spec) {
            let results = kernel.wait(&[id], WAIT).await;
            assert_eq!(results, vec![i64::from(self.depth)]);
        }
    }
}

#[tokio::test]
async fn test_handler_can_wait_ten_levels_deep() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut kernel = JobKernel::default();

    let id = start_job(
        &mut kernel,
        JobSpec::shell("exit 99").handler(shared(NestingHandler {
            depth: 10,
            log: log.clone(),
        })),
    );
    assert_eq!(kernel.wait(&[id], WAIT).await, vec![99]);

    let mut expected = vec![99];
    expected.extend((1..=10).rev());
    assert_eq!(*log.lock().unwrap(), expected);
}

/// One handler instance attached to two jobs: the first exit waits on
/// the second job, whose exit event must be deferred (the handler is
/// busy) and delivered afterwards.
struct CrossWaiter {
    target: Arc<Mutex<Option<JobId>>>,
    log: Arc<Mutex<Vec<(u64, i64)>>>,
}

#[async_trait]
impl JobHandler for CrossWaiter {
    async fn on_exit(&mut self, kernel: &mut JobKernel, id: JobId, code: i64) {
        self.log.lock().unwrap().push((id.0, code));
        let target = self.target.lock().unwrap().expect("target set before start");
        if id != target {
            let results = kernel.wait(&[target], WAIT).await;
            assert_eq!(results, vec![5]);
        }
    }
}

#[tokio::test]
async fn test_event_for_busy_handler_is_deferred_not_lost() {
    let mut kernel = JobKernel::default();
    let target = Arc::new(Mutex::new(None));
    let log = Arc::new(Mutex::new(Vec::new()));

    let handler = shared(CrossWaiter {
        target: target.clone(),
        log: log.clone(),
    });

    let slow = start_job(
        &mut kernel,
        JobSpec::shell("sleep 0.3; exit 5").handler(handler.clone()),
    );
    *target.lock().unwrap() = Some(slow);
    let fast = start_job(&mut kernel, JobSpec::shell("exit 7").handler(handler));

    assert_eq!(kernel.wait(&[fast], WAIT).await, vec![7]);
    kernel.poll().await;

    let entries = log.lock().unwrap().clone();
    assert_eq!(entries, vec![(fast.0, 7), (slow.0, 5)]);
}

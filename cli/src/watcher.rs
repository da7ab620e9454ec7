use crate::types::{TaskState, TaskStatus};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::warn;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Coarse stage labels keyed off the poll attempt count. Purely a display
/// affordance; nothing downstream may branch on these.
const STAGE_LABELS: &[(u32, &str)] = &[
    (3, "Extracting audio…"),
    (8, "Loading the separation model…"),
    (15, "Splitting stems…"),
];
const FINAL_STAGE_LABEL: &str = "Finishing up…";

pub fn stage_label(attempt: u32) -> &'static str {
    for &(limit, label) in STAGE_LABELS {
        if attempt < limit {
            return label;
        }
    }
    FINAL_STAGE_LABEL
}

/// Terminal result of one remote job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(TaskStatus),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Progress { job_id: String, attempt: u32, label: &'static str },
    Terminal { job_id: String, outcome: JobOutcome },
}

/// Owner handle for one polling loop. Dropping the handle does not stop the
/// loop; `teardown` does, and is idempotent.
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop. After this returns, the terminal event is never
    /// delivered, even if a poll that was already in flight later resolves.
    pub fn teardown(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

/// Watches one remote job until it reaches a terminal state.
///
/// Polls on a fixed cadence with no backoff and no retry cap: transport
/// failures are logged and swallowed, and the next tick fires on schedule.
/// Polls are strictly sequential; a new one is issued only after the
/// previous response resolves. The terminal event is pushed to `events`
/// exactly once, after which the loop ends.
pub fn spawn<P, F>(
    job_id: String,
    interval: Duration,
    mut poll: P,
    events: UnboundedSender<WatchEvent>,
) -> JobHandle
where
    P: FnMut() -> F + Send + 'static,
    F: Future<Output = anyhow::Result<TaskStatus>> + Send + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    let id = job_id.clone();
    let task = tokio::spawn(async move {
        let mut attempt = 0u32;
        loop {
            sleep(interval).await;
            attempt = attempt.saturating_add(1);

            let status = match poll().await {
                Ok(status) => status,
                Err(err) => {
                    warn!("status poll failed for {id}: {err}");
                    continue;
                }
            };

            // Teardown may have raced the in-flight poll; the result is
            // discarded, not delivered.
            if flag.load(Ordering::SeqCst) {
                return;
            }

            if status.status.is_terminal() {
                let outcome = match status.status {
                    TaskState::Error => JobOutcome::Failed(
                        status.message.clone().unwrap_or_else(|| "processing failed".to_string()),
                    ),
                    _ => JobOutcome::Completed(status),
                };
                let _ = events.send(WatchEvent::Terminal { job_id: id.clone(), outcome });
                return;
            }

            let _ = events.send(WatchEvent::Progress {
                job_id: id.clone(),
                attempt,
                label: stage_label(attempt),
            });
        }
    });
    JobHandle { job_id, cancelled, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::time::{advance, Instant};

    fn status(state: TaskState) -> TaskStatus {
        TaskStatus { status: state, progress: None, result: None, file: None, message: None }
    }

    fn scripted(
        responses: Vec<anyhow::Result<TaskStatus>>,
    ) -> impl FnMut() -> std::future::Ready<anyhow::Result<TaskStatus>> + Send + 'static {
        let script = Arc::new(Mutex::new(VecDeque::from(responses)));
        move || {
            let next = script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(status(TaskState::Completed)));
            std::future::ready(next)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_terminal_exactly_once() {
        let (tx, mut rx) = unbounded_channel();
        let poller = scripted(vec![
            Ok(status(TaskState::Pending)),
            Ok(status(TaskState::Processing)),
            Ok(status(TaskState::Completed)),
        ]);
        let handle = spawn("job-1".into(), DEFAULT_POLL_INTERVAL, poller, tx);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, WatchEvent::Progress { attempt: 1, .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, WatchEvent::Progress { attempt: 2, .. }));
        let third = rx.recv().await.unwrap();
        assert_eq!(
            third,
            WatchEvent::Terminal {
                job_id: "job-1".into(),
                outcome: JobOutcome::Completed(status(TaskState::Completed)),
            }
        );

        // Loop has ended; the channel closes without further events.
        assert!(rx.recv().await.is_none());
        assert!(handle.is_finished());

        // Tearing down an already-terminal loop is a no-op.
        handle.teardown();
        handle.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn remote_error_surfaces_the_message() {
        let (tx, mut rx) = unbounded_channel();
        let failed = TaskStatus {
            status: TaskState::Error,
            progress: None,
            result: None,
            file: None,
            message: Some("demucs exploded".into()),
        };
        let poller = scripted(vec![Ok(failed)]);
        let _handle = spawn("job-2".into(), DEFAULT_POLL_INTERVAL, poller, tx);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            WatchEvent::Terminal {
                job_id: "job-2".into(),
                outcome: JobOutcome::Failed("demucs exploded".into()),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cadence_does_not_drift_across_transport_failures() {
        let (tx, mut rx) = unbounded_channel();
        let times = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(Mutex::new(0u32));
        let poller = {
            let times = times.clone();
            let calls = calls.clone();
            move || {
                times.lock().unwrap().push(Instant::now());
                let n = {
                    let mut calls = calls.lock().unwrap();
                    *calls += 1;
                    *calls
                };
                let result = if n <= 3 {
                    Err(anyhow!("transient network fault"))
                } else {
                    Ok(status(TaskState::Completed))
                };
                std::future::ready(result)
            }
        };
        let _handle = spawn("job-3".into(), DEFAULT_POLL_INTERVAL, poller, tx);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, WatchEvent::Terminal { .. }));

        // Three failures are followed by one more tick, all on the fixed
        // interval with no backoff.
        let times = times.lock().unwrap();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], DEFAULT_POLL_INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn torn_down_loop_never_delivers() {
        let (tx, mut rx) = unbounded_channel();
        // The poll response is pending long past teardown.
        let poller = || async {
            sleep(Duration::from_secs(60)).await;
            Ok(status(TaskState::Completed))
        };
        let handle = spawn("job-4".into(), DEFAULT_POLL_INTERVAL, poller, tx);

        // Let the loop enter its first poll, then cancel while it is pending.
        advance(DEFAULT_POLL_INTERVAL).await;
        handle.teardown();
        handle.teardown();
        advance(Duration::from_secs(300)).await;

        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn stage_labels_follow_attempt_thresholds() {
        assert_eq!(stage_label(1), "Extracting audio…");
        assert_eq!(stage_label(3), "Loading the separation model…");
        assert_eq!(stage_label(8), "Splitting stems…");
        assert_eq!(stage_label(40), "Finishing up…");
    }

    #[test]
    fn outcome_carries_the_completed_payload() {
        let completed = TaskStatus {
            status: TaskState::Completed,
            progress: Some(100),
            result: Some(json!({ "status": "success", "stems_dir": "x" })),
            file: None,
            message: None,
        };
        let outcome = JobOutcome::Completed(completed.clone());
        match outcome {
            JobOutcome::Completed(payload) => {
                assert_eq!(payload.separation_stems().unwrap(), "x");
            }
            JobOutcome::Failed(_) => unreachable!(),
        }
    }
}

//! Polls tracked hypervisor tasks until they reach a terminal state.

use crate::core::domain::{
    error::{ProviderError, ProviderResult},
    model::TaskRef,
};
use crate::core::infrastructure::api_client::ApiClient;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Poll cadence and limits for awaiting tasks.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Delay before the first status poll.
    pub initial_interval: Duration,
    /// Ceiling the interval doubles toward.
    pub max_interval: Duration,
    /// Total time a task may take to reach a terminal state.
    pub deadline: Duration,
    /// Consecutive transient poll failures tolerated before giving up.
    pub max_poll_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            // Sized for slow operations like template extraction and
            // disk resizes, not just config writes.
            deadline: Duration::from_secs(600),
            max_poll_failures: 3,
        }
    }
}

/// Awaits tracked tasks on behalf of the reconciler.
///
/// Cancellation is cooperative: when the signal trips between polls, the
/// poller keeps polling until the task terminates and only then reports
/// `Cancelled`, so no tracked operation is left running unobserved.
pub struct TaskPoller<'a> {
    client: &'a ApiClient,
    config: PollConfig,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a> TaskPoller<'a> {
    pub fn new(client: &'a ApiClient, config: PollConfig) -> Self {
        Self {
            client,
            config,
            cancel: None,
        }
    }

    /// Attaches a cancellation signal checked between polls.
    #[must_use]
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Polls the task until it terminates.
    ///
    /// # Errors
    /// - `TaskFailed` when the hypervisor reports a terminal failure.
    /// - `Timeout` when the deadline passes or status polling keeps
    ///   failing transiently.
    /// - `Cancelled` when the cancel signal tripped; the task was still
    ///   drained to a terminal state first.
    pub async fn await_task(&self, task: &TaskRef) -> ProviderResult<()> {
        let deadline = Instant::now() + self.config.deadline;
        let mut interval = self.config.initial_interval;
        let mut consecutive_failures: u32 = 0;
        let mut cancel = self.cancel.clone();
        let mut cancelled = false;

        loop {
            if Instant::now() >= deadline {
                return Err(self.timeout(task));
            }

            if wait_interval(interval, cancel.as_mut().filter(|_| !cancelled)).await {
                cancelled = true;
                debug!("Cancellation requested, draining task {}", task.upid());
            }

            match self.client.task_status(task).await {
                Ok(status) if status.is_finished() => {
                    if cancelled {
                        return Err(ProviderError::Cancelled {
                            upid: task.upid().to_string(),
                        });
                    }
                    if status.succeeded() {
                        debug!(
                            "Task {} ({}) finished after {:?}",
                            task.upid(),
                            task.task_type().unwrap_or("unknown"),
                            task.started_at().elapsed().unwrap_or_default()
                        );
                        return Ok(());
                    }
                    return Err(ProviderError::TaskFailed {
                        upid: task.upid().to_string(),
                        reason: status.failure_reason().unwrap_or("unknown").to_string(),
                    });
                }
                Ok(_) => {
                    consecutive_failures = 0;
                    interval = (interval * 2).min(self.config.max_interval);
                }
                Err(e) if e.is_transient() => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_poll_failures {
                        warn!(
                            "Giving up on task {} after {} failed status polls: {}",
                            task.upid(),
                            consecutive_failures,
                            e
                        );
                        return Err(self.timeout(task));
                    }
                    warn!("Transient failure polling task {}: {}", task.upid(), e);
                    interval = (interval * 2).min(self.config.max_interval);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn timeout(&self, task: &TaskRef) -> ProviderError {
        ProviderError::Timeout {
            upid: task.upid().to_string(),
            deadline: self.config.deadline,
        }
    }
}

/// Sleeps one poll interval, watching the cancel signal.
///
/// Returns `true` when cancellation was observed before the interval
/// elapsed.
async fn wait_interval(
    interval: Duration,
    signal: Option<&mut watch::Receiver<bool>>,
) -> bool {
    let Some(signal) = signal else {
        sleep(interval).await;
        return false;
    };
    tokio::select! {
        () = sleep(interval) => false,
        changed = signal.changed() => match changed {
            Ok(()) => *signal.borrow(),
            // Sender dropped; cancellation can no longer arrive, so just
            // finish the wait.
            Err(_) => {
                sleep(interval).await;
                false
            }
        },
    }
}

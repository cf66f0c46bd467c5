use std::collections::BTreeMap;
use std::fmt;
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::job::{JobHandle, JobStatus};

/// Default pause between two polling rounds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Waits between polling rounds.
pub trait Sleeper: fmt::Debug + Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread, optionally with a console spinner.
#[derive(Debug, Clone, Default)]
pub struct ThreadSleeper {
    progress: bool,
}

impl ThreadSleeper {
    pub fn new(progress: bool) -> Self {
        Self { progress }
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !self.progress {
            thread::sleep(duration);
            return;
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Waiting for the server to complete the job");
        pb.enable_steady_tick(Duration::from_millis(120));
        thread::sleep(duration);
        pb.finish_and_clear();
    }
}

/// Anything that can report the current status of a job.
pub trait StatusSource {
    fn job_status(&self, handle: &JobHandle) -> Result<JobStatus>;
}

/// Polls every handle until each one is `Failed` or `Complete`.
///
/// Each round queries all still-pending handles in key order, then sleeps for
/// `interval` if any remain. An empty map returns at once. A status query that
/// errors marks that job failed; nothing is retried.
pub fn poll_all<S>(
    source: &S,
    handles: &BTreeMap<String, JobHandle>,
    sleeper: &dyn Sleeper,
    interval: Duration,
) -> BTreeMap<String, JobStatus>
where
    S: StatusSource + ?Sized,
{
    let mut resolved = BTreeMap::new();
    if handles.is_empty() {
        return resolved;
    }

    let mut outstanding: Vec<(&String, &JobHandle)> = handles.iter().collect();
    let mut round = 0usize;

    loop {
        round += 1;
        debug!(round, outstanding = outstanding.len(), "polling export jobs");

        outstanding.retain(|&(dataset, handle)| {
            let status = source.job_status(handle).unwrap_or_else(|e| {
                JobStatus::Failed(format!("status query failed: {}", e))
            });
            match status {
                JobStatus::Pending => true,
                JobStatus::Failed(reason) => {
                    warn!(%dataset, job = %handle, %reason, "export job failed");
                    resolved.insert(dataset.clone(), JobStatus::Failed(reason));
                    false
                }
                JobStatus::Complete(manifest) => {
                    info!(%dataset, job = %handle, outputs = manifest.len(), "export job completed");
                    resolved.insert(dataset.clone(), JobStatus::Complete(manifest));
                    false
                }
            }
        });

        if outstanding.is_empty() {
            break;
        }
        sleeper.sleep(interval);
    }

    info!(rounds = round, jobs = resolved.len(), "server finished processing the requests");
    resolved
}

/// Single-job form of [`poll_all`].
pub fn poll<S>(
    source: &S,
    handle: &JobHandle,
    sleeper: &dyn Sleeper,
    interval: Duration,
) -> JobStatus
where
    S: StatusSource + ?Sized,
{
    const KEY: &str = "export";
    let handles = BTreeMap::from([(KEY.to_string(), handle.clone())]);
    poll_all(source, &handles, sleeper, interval)
        .remove(KEY)
        .unwrap_or_else(|| JobStatus::Failed("job vanished from poll results".into()))
}

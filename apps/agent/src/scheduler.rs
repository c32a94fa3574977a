//! Periodic job dispatch with one worker per job.
//!
//! A single timer loop owns every schedule and fires jobs into per-job
//! queues. Each queue is drained by exactly one worker, so a job never
//! overlaps with itself while different jobs never wait on each other.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

/// Firings that may wait behind a running instance of the same job
const PENDING_FIRINGS: usize = 1;

#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// Run one instance of `job`, containing its errors and panics.
async fn run_guarded(job: Arc<dyn Job>) {
    let name = job.name();
    let started = Instant::now();
    info!(job = name, "job started");

    match tokio::spawn(async move { job.run().await }).await {
        Ok(Ok(())) => {
            info!(job = name, elapsed_ms = started.elapsed().as_millis() as u64, "job finished");
        }
        Ok(Err(e)) => error!(job = name, error = ?e, "job failed"),
        Err(e) if e.is_panic() => error!(job = name, "job panicked"),
        Err(e) => warn!(job = name, error = %e, "job cancelled"),
    }
}

/// Single-worker queue for one job
pub struct JobQueue {
    name: &'static str,
    tx: mpsc::Sender<()>,
}

impl JobQueue {
    pub fn spawn(job: Arc<dyn Job>, pending: usize) -> (Self, JoinHandle<()>) {
        let name = job.name();
        let (tx, mut rx) = mpsc::channel::<()>(pending.max(1));

        let worker = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                run_guarded(Arc::clone(&job)).await;
            }
            debug!(job = name, "job queue closed");
        });

        (Self { name, tx }, worker)
    }

    /// Queue a firing. Returns false when it was coalesced into a firing that
    /// is already waiting behind the running instance.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                info!(job = self.name, "firing coalesced with the run already pending");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                error!(job = self.name, "job worker is gone");
                false
            }
        }
    }
}

/// Fixed-period scheduler for a set of jobs
#[derive(Default)]
pub struct JobScheduler {
    entries: Vec<(Duration, Arc<dyn Job>)>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` once at startup and then every `period`.
    pub fn every(mut self, period: Duration, job: Arc<dyn Job>) -> Self {
        self.entries.push((period.max(Duration::from_millis(1)), job));
        self
    }

    /// Drive the schedules until `shutdown` turns true or its sender is
    /// dropped. Work still in flight at that point is abandoned.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut queues = Vec::with_capacity(self.entries.len());
        let mut workers = Vec::with_capacity(self.entries.len());
        let mut next_due = Vec::with_capacity(self.entries.len());
        let start = Instant::now();

        for (period, job) in &self.entries {
            info!(job = job.name(), period_secs = period.as_secs_f64(), "scheduling job");
            let (queue, worker) = JobQueue::spawn(Arc::clone(job), PENDING_FIRINGS);
            queues.push(queue);
            workers.push(worker);
            next_due.push(start);
        }

        loop {
            let now = Instant::now();
            for (i, (period, _)) in self.entries.iter().enumerate() {
                if next_due[i] <= now {
                    queues[i].trigger();
                    next_due[i] += *period;
                    if next_due[i] <= now {
                        next_due[i] = now + *period;
                    }
                }
            }

            let wake = next_due.iter().min().copied();
            tokio::select! {
                _ = async {
                    match wake {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopping");
        for worker in workers {
            worker.abort();
        }
    }
}

use crate::features::jobs::driver::{JobDriverRegistry, ProgressReporter};
use crate::features::jobs::ledger::ResourceLedger;
use crate::features::jobs::models::Job;
use crate::features::jobs::queue::{JobError, JobQueue};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const LEASE_DURATION: ChronoDuration = ChronoDuration::seconds(300);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const RECLAIM_INTERVAL_TICKS: u32 = 20;
const SAMPLE_INTERVAL_TICKS: u32 = 10;
const CANCEL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Tunables sourced from `Config` so an operator can retune scheduling
/// behavior without a rebuild.
#[derive(Clone, Copy)]
pub struct RunnerTuning {
    pub starvation_threshold: ChronoDuration,
    pub cancel_grace_period: Duration,
    pub base_retry_delay: ChronoDuration,
    pub max_retry_delay_secs: i64,
}

impl RunnerTuning {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            starvation_threshold: ChronoDuration::seconds(config.job_starvation_threshold_secs),
            cancel_grace_period: Duration::from_secs(config.cancel_grace_period_secs),
            base_retry_delay: ChronoDuration::seconds(config.job_backoff_base_secs as i64),
            max_retry_delay_secs: config.job_backoff_cap_secs as i64,
        }
    }
}

/// Dequeues, dispatches, and supervises job execution against a shared
/// resource ledger. One `JobRunner` can be driven by several `run_forever`
/// callers (e.g. one per worker process) sharing the same Postgres-backed
/// queue; `worker_id` disambiguates which one holds a given lease.
#[derive(Clone)]
pub struct JobRunner {
    queue: JobQueue,
    ledger: Arc<ResourceLedger>,
    drivers: JobDriverRegistry,
    worker_id: String,
    tuning: RunnerTuning,
    cancel_flags: Arc<DashMap<Uuid, Arc<AtomicBool>>>,
}

impl JobRunner {
    pub fn new(queue: JobQueue, ledger: Arc<ResourceLedger>, drivers: JobDriverRegistry, worker_id: String, tuning: RunnerTuning) -> Self {
        Self { queue, ledger, drivers, worker_id, tuning, cancel_flags: Arc::new(DashMap::new()) }
    }

    pub async fn run_forever(&self) {
        let mut tick: u32 = 0;
        loop {
            tick = tick.wrapping_add(1);
            if tick % RECLAIM_INTERVAL_TICKS == 0 {
                if let Err(e) = self.queue.reclaim_expired_leases().await {
                    tracing::warn!(error = %e, "failed to reclaim expired job leases");
                }
            }
            if tick % SAMPLE_INTERVAL_TICKS == 0 {
                if let Err(e) = self.queue.record_cluster_sample(&self.ledger).await {
                    tracing::warn!(error = %e, "failed to record cluster metric sample");
                }
            }

            match self.dispatch_cycle().await {
                Ok(true) => {} // dispatched something, loop again immediately
                Ok(false) => tokio::time::sleep(IDLE_POLL_INTERVAL).await,
                Err(e) => {
                    tracing::error!(error = %e, "job dispatch cycle failed");
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Returns `Ok(true)` if a job was dispatched this cycle.
    async fn dispatch_cycle(&self) -> Result<bool, JobError> {
        if let Some(oldest) = self.queue.peek_oldest_queued().await? {
            if Utc::now() - oldest.created_at > self.tuning.starvation_threshold {
                return self.dispatch_starved(oldest).await;
            }
        }

        let Some(job) = self.queue.dequeue_next(&self.worker_id, LEASE_DURATION).await? else {
            return Ok(false);
        };

        let resources = job.resources();
        if self.ledger.exceeds_total_capacity(resources) {
            self.queue
                .fail_permanently(job.id, "job requests more resources than the cluster has, ever")
                .await?;
            return Ok(true);
        }

        if !self.ledger.try_reserve(resources) {
            self.queue.requeue_without_penalty(job.id).await?;
            return Ok(false);
        }

        self.spawn_execution(job, resources);
        Ok(true)
    }

    /// The head-of-line job has waited past the starvation threshold: block
    /// on it specifically rather than letting a steady stream of
    /// higher-priority arrivals dequeue ahead of it indefinitely.
    async fn dispatch_starved(&self, oldest: Job) -> Result<bool, JobError> {
        let resources = oldest.resources();
        if self.ledger.exceeds_total_capacity(resources) {
            self.queue
                .fail_permanently(oldest.id, "job requests more resources than the cluster has, ever")
                .await?;
            return Ok(true);
        }

        if !self.ledger.try_reserve(resources) {
            tracing::warn!(job_id = %oldest.id, "starved job still cannot fit, holding off other dispatch this cycle");
            return Ok(false);
        }

        let Some(claimed) = self.queue.claim_specific(oldest.id, &self.worker_id, LEASE_DURATION).await? else {
            self.ledger.release(resources);
            return Ok(false);
        };

        self.spawn_execution(claimed, resources);
        Ok(true)
    }

    fn spawn_execution(&self, job: Job, resources: crate::features::jobs::models::ResourceRequirements) {
        let queue = self.queue.clone();
        let ledger = self.ledger.clone();
        let drivers = self.drivers.clone();
        let cancel_flags = self.cancel_flags.clone();
        let tuning = self.tuning;
        let job_id = job.id;
        let kind = job.kind.clone();

        let cancel_flag = Arc::new(AtomicBool::new(false));
        cancel_flags.insert(job_id, cancel_flag.clone());

        tokio::spawn(async move {
            let reporter = ProgressReporter::new(queue.clone(), job_id, cancel_flag.clone());
            let driver = drivers.get(&kind);

            let exec = async move {
                match driver {
                    Some(d) => d.execute(&job, reporter).await,
                    None => Err(format!("no driver registered for job kind '{kind}'")),
                }
            };
            tokio::pin!(exec);

            let mut cancel_deadline: Option<tokio::time::Instant> = None;
            let outcome = loop {
                tokio::select! {
                    result = &mut exec => break Some(result),
                    _ = tokio::time::sleep(CANCEL_POLL_INTERVAL) => {
                        match cancel_deadline {
                            None => {
                                if let Ok(current) = queue.get(job_id).await {
                                    if current.cancel_requested {
                                        cancel_flag.store(true, Ordering::Relaxed);
                                        cancel_deadline = Some(tokio::time::Instant::now() + tuning.cancel_grace_period);
                                    }
                                }
                            }
                            Some(deadline) if tokio::time::Instant::now() >= deadline => break None,
                            Some(_) => {}
                        }
                    }
                }
            };

            cancel_flags.remove(&job_id);
            ledger.release(resources);

            match outcome {
                None => {
                    tracing::info!(%job_id, "cancellation grace period elapsed, forcing job to cancelled");
                    let _ = queue.mark_cancelled(job_id).await;
                }
                Some(Ok(result)) => {
                    let _ = queue.complete(job_id, result).await;
                }
                Some(Err(error)) => {
                    let attempt = queue.get(job_id).await.map(|j| j.attempts).unwrap_or(1);
                    let delay = jittered_backoff(attempt, &tuning);
                    match queue.fail_or_retry(job_id, &error, delay).await {
                        Ok(_) => {}
                        Err(e) => tracing::error!(%job_id, error = %e, "failed to record job failure"),
                    }
                }
            }
        });
    }
}

/// Exponential backoff with full jitter: `min(max, base * 2^attempt) * U(0,1)`.
/// Jitter avoids every failed job in a burst retrying in lockstep.
fn jittered_backoff(attempt: i32, tuning: &RunnerTuning) -> ChronoDuration {
    let exp_secs = (tuning.base_retry_delay.num_seconds() * 2i64.saturating_pow(attempt.max(0) as u32))
        .min(tuning.max_retry_delay_secs);
    let jittered = rand::thread_rng().gen_range(0..=exp_secs.max(1));
    ChronoDuration::seconds(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tuning() -> RunnerTuning {
        RunnerTuning {
            starvation_threshold: ChronoDuration::seconds(300),
            cancel_grace_period: Duration::from_secs(30),
            base_retry_delay: ChronoDuration::seconds(5),
            max_retry_delay_secs: 300,
        }
    }

    #[test]
    fn backoff_never_exceeds_max_delay() {
        let tuning = test_tuning();
        for attempt in 0..20 {
            let delay = jittered_backoff(attempt, &tuning);
            assert!(delay.num_seconds() <= tuning.max_retry_delay_secs);
        }
    }

    #[test]
    fn backoff_grows_with_attempt_count_on_average() {
        let tuning = test_tuning();
        let low: i64 = (0..50).map(|_| jittered_backoff(1, &tuning).num_seconds()).sum();
        let high: i64 = (0..50).map(|_| jittered_backoff(5, &tuning).num_seconds()).sum();
        assert!(high > low);
    }
}

//! Liveness monitor: re-checks live harvested postings and retires the ones that keep failing.

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use isjh_core::{HarvestedJob, JobStatus, RunCounters, RunRecord, RunType};
use isjh_storage::{Fetch, LivenessUpdate};
use tracing::{debug, info, warn};

use crate::{LivenessMethod, RunError, RunOptions, SyncPipeline};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Ok,
    /// Short cause: `HTTP 404`, `timeout`, `network error`.
    Failed(String),
}

/// Pure state transition for one check. A taken-down job stays taken down.
pub fn next_liveness_state(
    job: &HarvestedJob,
    outcome: &CheckOutcome,
    failure_threshold: u32,
    now: DateTime<Utc>,
) -> LivenessUpdate {
    let mut update = LivenessUpdate {
        job_id: job.id,
        checked_at: now,
        consecutive_failures: 0,
        status: job.status,
        takedown_reason: job.takedown_reason.clone(),
    };
    if let CheckOutcome::Failed(reason) = outcome {
        let failures = job.consecutive_failures.saturating_add(1);
        update.consecutive_failures = failures;
        if failures >= failure_threshold && job.status != JobStatus::TakenDown {
            update.status = JobStatus::TakenDown;
            update.takedown_reason = Some(format!(
                "{reason} after {failures} consecutive failures at {}",
                now.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
    }
    update
}

async fn check_url(
    fetch: &dyn Fetch,
    method: LivenessMethod,
    url: &str,
    timeout: std::time::Duration,
) -> CheckOutcome {
    let request = async {
        match method {
            LivenessMethod::Head => fetch.head(url).await,
            LivenessMethod::Get => fetch.get(url).await,
        }
    };
    match tokio::time::timeout(timeout, request).await {
        Ok(Ok(_)) => CheckOutcome::Ok,
        Ok(Err(err)) => {
            debug!(url, %err, "liveness check failed");
            CheckOutcome::Failed(err.reason())
        }
        Err(_) => CheckOutcome::Failed("timeout".to_string()),
    }
}

impl SyncPipeline {
    pub async fn run_liveness_check(&self, options: &RunOptions) -> Result<RunRecord, RunError> {
        let started_at = Utc::now();
        self.locked(RunType::LivenessCheck, options.dry_run, move || async move {
            let settings = &self.config.liveness;
            let jobs: Vec<HarvestedJob> = self
                .store
                .live_harvested_jobs()
                .await?
                .into_iter()
                .filter(|job| job.source_url.is_some())
                .collect();
            info!(jobs = jobs.len(), batch_size = settings.batch_size, method = ?settings.method, "liveness run starting");

            let mut counters = RunCounters::default();
            let mut errors = Vec::new();
            let batch_size = settings.batch_size.max(1);

            for (index, batch) in jobs.chunks(batch_size).enumerate() {
                if index > 0 {
                    self.pacer.pause(settings.batch_delay).await;
                }
                let outcomes = join_all(batch.iter().map(|job| async move {
                    let url = job.source_url.as_deref().unwrap_or_default();
                    check_url(self.fetch.as_ref(), settings.method, url, settings.timeout).await
                }))
                .await;

                for (job, outcome) in batch.iter().zip(outcomes) {
                    let update =
                        next_liveness_state(job, &outcome, settings.failure_threshold, Utc::now());
                    counters.checked += 1;
                    match update.status {
                        JobStatus::TakenDown => {
                            counters.taken_down += 1;
                            info!(
                                job_id = %job.id,
                                title = %job.title,
                                reason = update.takedown_reason.as_deref().unwrap_or_default(),
                                "posting taken down"
                            );
                        }
                        _ if outcome == CheckOutcome::Ok => counters.live += 1,
                        _ => counters.failed += 1,
                    }
                    if options.dry_run {
                        continue;
                    }
                    if let Err(err) = self.store.apply_liveness(&update).await {
                        warn!(job_id = %job.id, %err, "failed to store liveness result");
                        errors.push(format!("{}: {err}", job.id));
                    }
                }
                debug!(batch = index + 1, checked = counters.checked, "liveness batch done");
            }

            let record = RunRecord::finish(
                RunType::LivenessCheck,
                started_at,
                options.dry_run,
                counters,
                Vec::new(),
                errors,
            );
            info!(
                run_id = %record.id,
                checked = record.counters.checked,
                live = record.counters.live,
                taken_down = record.counters.taken_down,
                failed = record.counters.failed,
                dry_run = options.dry_run,
                "liveness run finished"
            );
            if !options.dry_run {
                self.store.append_run(&record).await?;
            }
            Ok(record)
        })
        .await
    }
}

//! Crawl orchestrator: drains every harvestable source into the store.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use isjh_adapters::{AtsSource, CareerPageSource, HarvestSource, PageCursor, TesSource};
use isjh_core::{
    Organization, Platform, RawPosting, RunCounters, RunRecord, RunType, SourceSummary,
};
use isjh_storage::{OrganizationFilter, OrganizationScope};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dedup::{Admission, Deduplicator, OrganizationMatcher};
use crate::{RunError, RunOptions, SourceKind, SyncPipeline};

/// A source plus the organization its postings belong to. Board sources carry no
/// organization; their postings name the employer themselves.
pub struct HarvestTarget {
    pub source: Box<dyn HarvestSource>,
    pub organization: Option<Organization>,
}

enum Ingest {
    New,
    Skipped,
    Unmatched,
    Failed(String),
}

struct HarvestRun<'a> {
    pipeline: &'a SyncPipeline,
    admin: Uuid,
    dedup: Deduplicator<'a>,
    matcher: OrganizationMatcher,
    dry_run: bool,
    signatures_detected: usize,
    errors: Vec<String>,
}

impl SyncPipeline {
    pub async fn run_harvest(&self, options: &RunOptions) -> Result<RunRecord, RunError> {
        let started_at = Utc::now();
        let admin = self.store.admin_user_id().await?.ok_or(RunError::MissingAdmin)?;
        let registry = &self.source_registry()?;

        self.locked(RunType::Harvest, options.dry_run, move || async move {
            let filter = OrganizationFilter {
                scope: OrganizationScope::Harvestable,
                ..options.filter.clone()
            };
            let organizations = self.store.list_organizations(&filter).await?;
            let mut targets = self.organization_targets(organizations);

            if options.filter.platform.map_or(true, |p| p == Platform::Tes) {
                for source in registry.enabled() {
                    match source.kind {
                        SourceKind::Tes => match TesSource::new(&source.source_key, &source.listing_url) {
                            Ok(tes) => targets.push(HarvestTarget {
                                source: Box::new(tes),
                                organization: None,
                            }),
                            Err(err) => warn!(source = %source.source_key, %err, "skipping misconfigured source"),
                        },
                    }
                }
            }

            let board_orgs = if targets.iter().any(|t| t.organization.is_none()) {
                self.store.list_organizations(&OrganizationFilter::default()).await?
            } else {
                Vec::new()
            };

            let mut run = HarvestRun {
                pipeline: self,
                admin,
                dedup: Deduplicator::new(self.store.as_ref(), options.dry_run),
                matcher: OrganizationMatcher::new(board_orgs),
                dry_run: options.dry_run,
                signatures_detected: 0,
                errors: Vec::new(),
            };

            let mut sources = Vec::with_capacity(targets.len());
            for target in &targets {
                let key = target.source.source_key();
                let summary = run
                    .drain(target)
                    .instrument(info_span!("harvest_source", source = %key))
                    .await;
                if let (Some(org), Some(platform)) = (&target.organization, target.source.detected_signature()) {
                    run.remember_signature(org, platform).await;
                }
                sources.push(summary);
            }

            let mut counters = RunCounters {
                signatures_detected: run.signatures_detected,
                ..Default::default()
            };
            for summary in &sources {
                counters.jobs_found += summary.jobs_found;
                counters.jobs_new += summary.jobs_new;
                counters.jobs_skipped += summary.jobs_skipped;
                counters.jobs_unmatched += summary.jobs_unmatched;
            }
            let record = RunRecord::finish(
                RunType::Harvest,
                started_at,
                options.dry_run,
                counters,
                sources,
                run.errors,
            );
            info!(
                run_id = %record.id,
                found = record.counters.jobs_found,
                new = record.counters.jobs_new,
                skipped = record.counters.jobs_skipped,
                unmatched = record.counters.jobs_unmatched,
                errors = record.errors.len(),
                dry_run = options.dry_run,
                "harvest run finished"
            );
            if !options.dry_run {
                self.store.append_run(&record).await?;
            }
            Ok(record)
        })
        .await
    }

    /// Confirmed ATS accounts first; career pages for organizations without one.
    pub fn organization_targets(&self, organizations: Vec<Organization>) -> Vec<HarvestTarget> {
        organizations
            .into_iter()
            .filter_map(|org| {
                let source: Box<dyn HarvestSource> = match (&org.ats, &org.career_page_url) {
                    (Some(identity), _) => Box::new(AtsSource::for_identity(identity)?),
                    (None, Some(url)) => {
                        Box::new(CareerPageSource::new(url.clone(), Arc::clone(&self.extractor)))
                    }
                    (None, None) => return None,
                };
                Some(HarvestTarget {
                    source,
                    organization: Some(org),
                })
            })
            .collect()
    }
}

impl HarvestRun<'_> {
    async fn drain(&mut self, target: &HarvestTarget) -> SourceSummary {
        let config = &self.pipeline.config;
        let started = Instant::now();
        let mut summary = SourceSummary {
            source_key: target.source.source_key(),
            ..Default::default()
        };
        let mut cursor = PageCursor::default();
        let mut processed = 0usize;

        for page_index in 0..config.max_pages {
            if page_index > 0 {
                self.pipeline.pacer.pause(config.page_delay).await;
            }
            let page = match target.source.fetch_page(self.pipeline.fetch.as_ref(), &cursor).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(source = %summary.source_key, page = page_index + 1, %err, "page fetch failed; stopping source");
                    self.errors.push(format!("{}: {err}", summary.source_key));
                    summary.error = Some(err.to_string());
                    break;
                }
            };
            summary.pages += 1;
            if page.postings.is_empty() {
                debug!(source = %summary.source_key, page = page_index + 1, "empty page; stopping source");
                break;
            }

            for raw in page.postings {
                if processed >= config.max_postings {
                    break;
                }
                processed += 1;
                summary.jobs_found += 1;
                match self.ingest(&raw, target.organization.as_ref(), &summary.source_key).await {
                    Ingest::New => summary.jobs_new += 1,
                    Ingest::Skipped => summary.jobs_skipped += 1,
                    Ingest::Unmatched => summary.jobs_unmatched += 1,
                    Ingest::Failed(message) => self.errors.push(message),
                }
            }
            if processed >= config.max_postings {
                debug!(source = %summary.source_key, processed, "posting cap reached");
                break;
            }
            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis().min(u64::MAX as u128) as u64;
        info!(
            source = %summary.source_key,
            pages = summary.pages,
            found = summary.jobs_found,
            new = summary.jobs_new,
            skipped = summary.jobs_skipped,
            "source drained"
        );
        summary
    }

    /// Store a platform seen on a career page; a confirmed account is never overwritten.
    async fn remember_signature(&mut self, org: &Organization, platform: Platform) {
        if org.detected_signature == Some(platform) {
            return;
        }
        let mut updated = org.clone();
        if !updated.record_signature(platform) {
            return;
        }
        info!(organization = %org.name, %platform, "ATS signature detected during harvest");
        self.signatures_detected += 1;
        if self.dry_run {
            return;
        }
        if let Err(err) = self.pipeline.store.update_organization_identity(&updated).await {
            warn!(organization = %org.name, %err, "failed to store detected signature");
            self.errors.push(format!("{}: {err}", org.name));
        }
    }

    async fn ingest(
        &mut self,
        raw: &RawPosting,
        owner: Option<&Organization>,
        source_key: &str,
    ) -> Ingest {
        let organization = match owner {
            Some(org) => org,
            None => match raw
                .organization_name
                .as_deref()
                .and_then(|name| self.matcher.resolve(name))
            {
                Some(org) => org,
                None => {
                    debug!(employer = ?raw.organization_name, title = %raw.title, "no stored organization for posting");
                    return Ingest::Unmatched;
                }
            },
        };

        let job = match self
            .pipeline
            .normalizer
            .normalize(raw, organization, self.admin, source_key)
        {
            Ok(job) => job,
            Err(err) => return Ingest::Failed(format!("{source_key}: {err}")),
        };

        match self.dedup.admit(job).await {
            Ok(Admission::New(_)) => Ingest::New,
            Ok(Admission::Skipped) => Ingest::Skipped,
            Err(err) => Ingest::Failed(format!("{source_key}: storing `{}`: {err}", raw.title)),
        }
    }
}

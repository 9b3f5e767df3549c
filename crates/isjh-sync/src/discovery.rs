//! Discovery runner: finds platform accounts, websites and career pages for organizations
//! that have no confirmed ATS identity yet.

use std::sync::Arc;

use chrono::Utc;
use isjh_adapters::html::looks_like_career_page;
use isjh_adapters::{
    detect_fingerprints, first_match, probe_for, Fingerprint, PlatformProbe, ProbeContext,
    ProbeMatch,
};
use isjh_core::{generate_candidates, CandidateSet, Organization, Platform, RunCounters, RunRecord, RunType};
use isjh_storage::{OrganizationFilter, OrganizationScope};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{RunError, RunOptions, SyncPipeline};

/// Paths tried on a school's website when looking for its vacancies page.
pub const CAREER_PATHS: [&str; 6] = [
    "/careers",
    "/jobs",
    "/vacancies",
    "/employment",
    "/work-with-us",
    "/join-us",
];

/// What one organization's discovery pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    pub identity_confirmed: bool,
    pub signature_detected: bool,
    pub website_found: bool,
    pub career_page_found: bool,
}

impl DiscoveryOutcome {
    pub fn changed(&self) -> bool {
        self.identity_confirmed || self.signature_detected || self.website_found || self.career_page_found
    }
}

impl SyncPipeline {
    pub async fn run_discovery(&self, options: &RunOptions) -> Result<RunRecord, RunError> {
        let started_at = Utc::now();
        self.locked(RunType::Discovery, options.dry_run, move || async move {
            // The platform filter narrows which probes run, not which organizations are listed.
            let filter = OrganizationFilter {
                scope: OrganizationScope::NeedsDiscovery,
                platform: None,
                ..options.filter.clone()
            };
            let organizations = self.store.list_organizations(&filter).await?;
            info!(organizations = organizations.len(), platform = ?options.filter.platform, "discovery run starting");

            let mut counters = RunCounters::default();
            let mut errors = Vec::new();
            for (index, mut org) in organizations.into_iter().enumerate() {
                if index > 0 {
                    self.pacer.pause(self.config.probe_delay).await;
                }
                counters.organizations_scanned += 1;
                let span = info_span!("discover", organization = %org.name, country = %org.country_code);
                let outcome = self
                    .discover_organization(&mut org, options.filter.platform)
                    .instrument(span)
                    .await;

                counters.identities_confirmed += usize::from(outcome.identity_confirmed);
                counters.signatures_detected += usize::from(outcome.signature_detected);
                counters.websites_found += usize::from(outcome.website_found);
                counters.career_pages_found += usize::from(outcome.career_page_found);

                if outcome.changed() && !options.dry_run {
                    if let Err(err) = self.store.update_organization_identity(&org).await {
                        warn!(organization = %org.name, %err, "failed to store discovered identity");
                        errors.push(format!("{}: {err}", org.name));
                    }
                }
            }

            let record = RunRecord::finish(
                RunType::Discovery,
                started_at,
                options.dry_run,
                counters,
                Vec::new(),
                errors,
            );
            info!(
                run_id = %record.id,
                scanned = record.counters.organizations_scanned,
                confirmed = record.counters.identities_confirmed,
                signatures = record.counters.signatures_detected,
                websites = record.counters.websites_found,
                career_pages = record.counters.career_pages_found,
                dry_run = options.dry_run,
                "discovery run finished"
            );
            if !options.dry_run {
                self.store.append_run(&record).await?;
            }
            Ok(record)
        })
        .await
    }

    /// Run every discovery step for one organization, mutating it in place.
    pub async fn discover_organization(
        &self,
        org: &mut Organization,
        platform: Option<Platform>,
    ) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();
        let candidates = generate_candidates(&org.name, &org.country_code, org.city.as_deref(), self.tables());
        debug!(slugs = ?candidates.slugs, domains = candidates.domains.len(), "candidates generated");

        if org.ats.is_none() {
            for probe in self.probes_for(platform) {
                if let Some(found) = self.probe_verified(&probe, &candidates.slugs, &org.name).await {
                    info!(platform = %found.platform, slug = %found.slug, postings = found.posting_count, "ATS identity confirmed");
                    org.confirm_ats(found.identity(), Utc::now());
                    outcome.identity_confirmed = true;
                    break;
                }
            }
        }

        if org.website_domain.is_none() {
            if let Some(domain) = self.find_website(&candidates, &org.name).await {
                info!(%domain, "website found");
                org.record_website(domain, Utc::now());
                outcome.website_found = true;
            }
        }

        let Some(domain) = org.website_domain.clone() else {
            return outcome;
        };
        if org.ats.is_some() && org.career_page_url.is_some() {
            return outcome;
        }

        let scan = self.scan_website(&domain, org.career_page_url.is_none()).await;
        if let Some(url) = scan.career_page {
            info!(%url, "career page found");
            org.record_career_page(url, Utc::now());
            outcome.career_page_found = true;
        }

        if org.ats.is_none() {
            match self.resolve_fingerprints(&scan.fingerprints, &org.name, platform).await {
                Some(FingerprintResult::Confirmed(found)) => {
                    info!(platform = %found.platform, slug = %found.slug, "ATS identity confirmed from page markup");
                    org.confirm_ats(found.identity(), Utc::now());
                    outcome.identity_confirmed = true;
                }
                Some(FingerprintResult::Signature(platform)) => {
                    if org.detected_signature != Some(platform) && org.record_signature(platform) {
                        debug!(%platform, "ATS signature recorded");
                        outcome.signature_detected = true;
                    }
                }
                None => {}
            }
        }
        outcome
    }

    fn probe_context(&self) -> ProbeContext<'_> {
        ProbeContext {
            fetch: self.fetch.as_ref(),
            pacer: self.pacer.as_ref(),
            delay: self.config.probe_delay,
        }
    }

    /// First slug whose board answers and whose public page names the organization.
    async fn probe_verified(
        &self,
        probe: &Arc<dyn PlatformProbe>,
        slugs: &[String],
        organization_name: &str,
    ) -> Option<ProbeMatch> {
        let ctx = self.probe_context();
        first_match(slugs.iter(), ctx.pacer, ctx.delay, |slug| async move {
            let found = probe.probe(ctx, slug).await?;
            let verdict = self
                .verifier
                .verify_board(ctx.fetch, &found.board_url, organization_name)
                .await;
            if verdict.is_accepted() {
                Some(found)
            } else {
                debug!(platform = %found.platform, slug = %found.slug, ?verdict, "probe hit failed identity check");
                None
            }
        })
        .await
    }

    /// Apex first, then `www.`; only locally scoped domains skip the page comparison.
    async fn find_website(&self, candidates: &CandidateSet, organization_name: &str) -> Option<String> {
        let attempts = candidates.domains.iter().flat_map(|candidate| {
            [
                (candidate, format!("https://{}", candidate.domain)),
                (candidate, format!("https://www.{}", candidate.domain)),
            ]
        });
        first_match(attempts, self.pacer.as_ref(), self.config.probe_delay, |(candidate, url)| async move {
            let page = match self.fetch.get(&url).await {
                Ok(page) => page,
                Err(err) => {
                    debug!(%url, %err, "domain candidate unreachable");
                    return None;
                }
            };
            let verdict = self
                .verifier
                .verify_domain_page(candidate, &page.text(), organization_name);
            debug!(%url, ?verdict, "domain candidate checked");
            verdict.is_accepted().then(|| candidate.domain.clone())
        })
        .await
    }

    /// Fetch the homepage and common career paths, collecting ATS fingerprints on the way.
    /// Path pages win over the homepage as the career page.
    async fn scan_website(&self, domain: &str, want_career_page: bool) -> WebsiteScan {
        let base = format!("https://{domain}");
        let mut scan = WebsiteScan::default();
        let mut homepage_is_career_page = false;

        match self.fetch.get(&base).await {
            Ok(page) => {
                let html = page.text();
                scan.fingerprints.extend(detect_fingerprints(&html));
                homepage_is_career_page = looks_like_career_page(&html, self.tables());
            }
            Err(err) => debug!(url = %base, %err, "homepage unreachable"),
        }

        for path in CAREER_PATHS {
            if scan.career_page.is_some() {
                break;
            }
            self.pacer.pause(self.config.probe_delay).await;
            let url = format!("{base}{path}");
            let page = match self.fetch.get(&url).await {
                Ok(page) => page,
                Err(err) => {
                    debug!(%url, %err, "career path unreachable");
                    continue;
                }
            };
            let html = page.text();
            scan.fingerprints.extend(detect_fingerprints(&html));
            if looks_like_career_page(&html, self.tables()) {
                scan.career_page = Some(page.final_url.clone());
            }
        }

        if scan.career_page.is_none() && homepage_is_career_page {
            scan.career_page = Some(base);
        }
        if !want_career_page {
            scan.career_page = None;
        }
        scan
    }

    /// Slug-bearing fingerprints are probed and verified; the first platform seen
    /// otherwise becomes the detected signature.
    async fn resolve_fingerprints(
        &self,
        fingerprints: &[Fingerprint],
        organization_name: &str,
        platform: Option<Platform>,
    ) -> Option<FingerprintResult> {
        let relevant: Vec<&Fingerprint> = fingerprints
            .iter()
            .filter(|fp| platform.map_or(true, |want| fp.platform == want))
            .collect();
        for fp in &relevant {
            let (Some(slug), Some(probe)) = (fp.slug.as_ref(), probe_for(fp.platform)) else {
                continue;
            };
            if let Some(found) = self
                .probe_verified(&probe, std::slice::from_ref(slug), organization_name)
                .await
            {
                return Some(FingerprintResult::Confirmed(found));
            }
        }
        relevant
            .first()
            .map(|fp| FingerprintResult::Signature(fp.platform))
    }
}

#[derive(Debug, Default)]
struct WebsiteScan {
    career_page: Option<String>,
    fingerprints: Vec<Fingerprint>,
}

enum FingerprintResult {
    Confirmed(ProbeMatch),
    Signature(Platform),
}

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use isjh_core::{AtsIdentity, JobCategory, JobStatus, Organization, Platform, RunType};
use isjh_storage::{
    FixtureFetcher, FixtureResponse, HarvestStore, MemoryStore, NoPacer, OrganizationFilter,
};
use isjh_sync::{RunError, RunOptions, SourceRegistry, SyncConfig, SyncPipeline};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

const GREENHOUSE_API: &str = "https://boards-api.greenhouse.io/v1/boards/lakeview/jobs?content=true";
const GREENHOUSE_BOARD: &str = "https://boards.greenhouse.io/lakeview";

fn fixture(relative: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(relative);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

fn lakeview(confirmed: bool) -> Organization {
    let mut org = Organization::new("Lakeview International School", "Thailand", "TH").with_city("Bangkok");
    if confirmed {
        org.confirm_ats(
            AtsIdentity {
                platform: Platform::Greenhouse,
                slug: "lakeview".into(),
            },
            Utc::now(),
        );
    }
    org
}

fn harbourside() -> Organization {
    Organization::new("Harbourside Academy", "Oman", "OM").with_city("Muscat")
}

fn greenhouse_fetcher() -> FixtureFetcher {
    let jobs: JsonValue = serde_json::from_str(&fixture("greenhouse/lakeview_jobs.json")).unwrap();
    FixtureFetcher::new()
        .with_json(GREENHOUSE_API, &jobs)
        .with_html(GREENHOUSE_BOARD, &fixture("greenhouse/lakeview_board.html"))
}

fn admin_store(organizations: Vec<Organization>) -> Arc<MemoryStore> {
    Arc::new(
        MemoryStore::new()
            .with_admin(Uuid::new_v4())
            .with_organizations(organizations),
    )
}

fn pipeline(config: SyncConfig, store: &Arc<MemoryStore>, fetch: &Arc<FixtureFetcher>) -> SyncPipeline {
    SyncPipeline::new(config, store.clone(), fetch.clone(), Arc::new(NoPacer))
        .with_source_registry(SourceRegistry { sources: Vec::new() })
}

#[tokio::test]
async fn greenhouse_board_harvests_every_posting_once() {
    let store = admin_store(vec![lakeview(true)]);
    let fetch = Arc::new(greenhouse_fetcher());
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    let record = pipeline.run_harvest(&RunOptions::default()).await.unwrap();
    assert_eq!(record.run_type, RunType::Harvest);
    assert_eq!(record.counters.jobs_found, 5);
    assert_eq!(record.counters.jobs_new, 5);
    assert_eq!(record.counters.jobs_skipped, 0);
    assert!(record.errors.is_empty(), "{:?}", record.errors);
    assert_eq!(record.sources.len(), 1);
    assert_eq!(record.sources[0].source_key, "greenhouse:lakeview");
    assert_eq!(record.sources[0].pages, 1);

    let inserted = store.inserted_jobs().await;
    let hashes: HashSet<&str> = inserted.iter().map(|j| j.content_hash.as_str()).collect();
    assert_eq!(hashes.len(), 5);
    assert!(inserted.iter().all(|j| j.harvested && j.status == JobStatus::Live));

    let chemistry = inserted
        .iter()
        .find(|j| j.title == "High School Chemistry Teacher")
        .unwrap();
    assert_eq!(chemistry.category, JobCategory::HighSchool);
    assert_eq!(chemistry.country_code, "TH");
    assert_eq!(chemistry.city, "Bangkok");
    assert_eq!(chemistry.description, "IB DP Chemistry, August start.");

    // No location on the posting: the organization's own location is used.
    let librarian = inserted.iter().find(|j| j.title == "Part-time Librarian").unwrap();
    assert_eq!(librarian.city, "Bangkok");
    assert_eq!(librarian.country_code, "TH");

    assert_eq!(store.runs().await.len(), 1);
}

#[tokio::test]
async fn second_harvest_skips_everything_it_already_stored() {
    let store = admin_store(vec![lakeview(true)]);
    let fetch = Arc::new(greenhouse_fetcher());
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    pipeline.run_harvest(&RunOptions::default()).await.unwrap();
    let again = pipeline.run_harvest(&RunOptions::default()).await.unwrap();
    assert_eq!(again.counters.jobs_found, 5);
    assert_eq!(again.counters.jobs_new, 0);
    assert_eq!(again.counters.jobs_skipped, 5);
    assert_eq!(store.jobs().await.len(), 5);
    assert_eq!(store.runs().await.len(), 2);
}

#[tokio::test]
async fn dry_run_reports_counts_but_writes_nothing() {
    let store = admin_store(vec![lakeview(true)]);
    let fetch = Arc::new(greenhouse_fetcher());
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    let record = pipeline
        .run_harvest(&RunOptions {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(record.dry_run);
    assert_eq!(record.counters.jobs_new, 5);
    assert!(store.jobs().await.is_empty());
    assert!(store.runs().await.is_empty());
}

#[tokio::test]
async fn harvest_without_an_admin_is_refused() {
    let store = Arc::new(MemoryStore::new().with_organizations(vec![lakeview(true)]));
    let fetch = Arc::new(greenhouse_fetcher());
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    let err = pipeline.run_harvest(&RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, RunError::MissingAdmin));
    assert!(fetch.requests().is_empty());
}

#[tokio::test]
async fn held_run_lock_is_fatal_and_left_alone() {
    let store = admin_store(vec![lakeview(true)]);
    assert!(store.acquire_run_lock(RunType::Harvest).await.unwrap());
    let fetch = Arc::new(greenhouse_fetcher());
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    let err = pipeline.run_harvest(&RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, RunError::LockHeld { run_type: "harvest" }));
    assert!(fetch.requests().is_empty());
    // Still held by the other invocation.
    assert!(!store.acquire_run_lock(RunType::Harvest).await.unwrap());
    // Other run types are independent.
    assert!(store.acquire_run_lock(RunType::LivenessCheck).await.unwrap());
}

fn lever_page(slug: &str, range: std::ops::Range<usize>) -> JsonValue {
    JsonValue::Array(
        range
            .map(|i| {
                json!({
                    "id": format!("{slug}-{i}"),
                    "text": format!("Teaching Assistant {i}"),
                    "hostedUrl": format!("https://jobs.lever.co/{slug}/{i}"),
                    "categories": { "location": "Singapore", "commitment": "Full-time" }
                })
            })
            .collect(),
    )
}

fn lever_org(slug: &str) -> Organization {
    let mut org = Organization::new("Orchard Bay School", "Singapore", "SG");
    org.confirm_ats(
        AtsIdentity {
            platform: Platform::Lever,
            slug: slug.into(),
        },
        Utc::now(),
    );
    org
}

#[tokio::test]
async fn pagination_stops_at_the_first_failing_page() {
    let store = admin_store(vec![lever_org("orchardbay")]);
    let fetch = Arc::new(
        FixtureFetcher::new()
            .with_json(
                "https://api.lever.co/v0/postings/orchardbay?mode=json&skip=0&limit=100",
                &lever_page("orchardbay", 0..100),
            )
            .with_get(
                "https://api.lever.co/v0/postings/orchardbay?mode=json&skip=100&limit=100",
                FixtureResponse::status(503),
            ),
    );
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    let record = pipeline.run_harvest(&RunOptions::default()).await.unwrap();
    let summary = &record.sources[0];
    assert_eq!(summary.pages, 1);
    assert_eq!(summary.jobs_found, 100);
    assert_eq!(summary.jobs_new, 100);
    assert!(summary.error.as_deref().unwrap_or_default().contains("503"));
    assert_eq!(record.errors.len(), 1);
    assert_eq!(fetch.request_count("GET https://api.lever.co/"), 2);
}

#[tokio::test]
async fn posting_cap_ends_a_source_early() {
    let store = admin_store(vec![lever_org("orchardbay")]);
    let fetch = Arc::new(FixtureFetcher::new().with_json(
        "https://api.lever.co/v0/postings/orchardbay?mode=json&skip=0&limit=100",
        &lever_page("orchardbay", 0..100),
    ));
    let config = SyncConfig {
        max_postings: 7,
        ..SyncConfig::default()
    };
    let pipeline = pipeline(config, &store, &fetch);

    let record = pipeline.run_harvest(&RunOptions::default()).await.unwrap();
    assert_eq!(record.counters.jobs_found, 7);
    assert_eq!(store.jobs().await.len(), 7);
    assert!(record.sources[0].error.is_none());
}

#[tokio::test]
async fn board_postings_resolve_employers_or_count_as_unmatched() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(
        workspace.path().join("sources.yaml"),
        r#"
sources:
  - source_key: tes-international
    display_name: TES International
    enabled: true
    kind: tes
    listing_url: "https://www.tes.com/jobs/browse/international?page={page}"
"#,
    )
    .unwrap();

    let store = admin_store(vec![lakeview(true), harbourside()]);
    let fetch = Arc::new(FixtureFetcher::new().with_html(
        "https://www.tes.com/jobs/browse/international?page=1",
        &fixture("tes/international_page1.html"),
    ));
    let config = SyncConfig {
        workspace_root: workspace.path().to_path_buf(),
        ..SyncConfig::default()
    };
    let pipeline = SyncPipeline::new(config, store.clone(), fetch.clone(), Arc::new(NoPacer));

    let record = pipeline
        .run_harvest(&RunOptions {
            filter: OrganizationFilter {
                platform: Some(Platform::Tes),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(record.sources.len(), 1);
    assert_eq!(record.sources[0].source_key, "tes-international");
    assert_eq!(record.counters.jobs_found, 3);
    assert_eq!(record.counters.jobs_new, 2);
    assert_eq!(record.counters.jobs_unmatched, 1);

    let inserted = store.inserted_jobs().await;
    let english = inserted.iter().find(|j| j.title == "Head of English").unwrap();
    assert_eq!(english.organization_name, "Harbourside Academy");
    assert_eq!(english.country_code, "OM");
    assert_eq!(english.salary.as_deref(), Some("Competitive, tax free"));
    assert!(inserted.iter().all(|j| j.title != "Private Maths Tutor"));
}

#[tokio::test]
async fn unreadable_source_registry_aborts_the_harvest() {
    let workspace = tempfile::tempdir().unwrap();
    let store = admin_store(vec![lakeview(true)]);
    let fetch = Arc::new(greenhouse_fetcher());
    let config = SyncConfig {
        workspace_root: workspace.path().to_path_buf(),
        ..SyncConfig::default()
    };
    let pipeline = SyncPipeline::new(config, store.clone(), fetch.clone(), Arc::new(NoPacer));

    let err = pipeline.run_harvest(&RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, RunError::Registry(_)));
    assert!(store.runs().await.is_empty());
}

#[tokio::test]
async fn liveness_retires_postings_after_repeated_failures() {
    let store = admin_store(vec![lakeview(true)]);
    let fetch = Arc::new(greenhouse_fetcher());
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);
    pipeline.run_harvest(&RunOptions::default()).await.unwrap();

    // Only one posting still answers; the other four 404.
    let alive = "https://boards.greenhouse.io/lakeview/jobs/4101";
    fetch.set_head(alive, FixtureResponse::ok(Vec::new()));

    for round in 1..=2u32 {
        let record = pipeline.run_liveness_check(&RunOptions::default()).await.unwrap();
        assert_eq!(record.counters.checked, 5);
        assert_eq!(record.counters.live, 1);
        assert_eq!(record.counters.failed, 4);
        assert_eq!(record.counters.taken_down, 0);
        let failing = store
            .jobs()
            .await
            .into_iter()
            .filter(|j| j.source_url.as_deref() != Some(alive))
            .all(|j| j.consecutive_failures == round && j.status == JobStatus::Live);
        assert!(failing);
    }

    let third = pipeline.run_liveness_check(&RunOptions::default()).await.unwrap();
    assert_eq!(third.counters.taken_down, 4);
    assert_eq!(third.counters.live, 1);

    for job in store.jobs().await {
        if job.source_url.as_deref() == Some(alive) {
            assert_eq!(job.status, JobStatus::Live);
            assert_eq!(job.consecutive_failures, 0);
            assert!(job.last_checked_at.is_some());
        } else {
            assert_eq!(job.status, JobStatus::TakenDown);
            let reason = job.takedown_reason.unwrap();
            assert!(reason.starts_with("HTTP 404 after 3 consecutive failures at "), "{reason}");
        }
    }

    // Taken-down postings are no longer checked, even if their pages come back.
    fetch.set_head("https://boards.greenhouse.io/lakeview/jobs/4102", FixtureResponse::ok(Vec::new()));
    let fourth = pipeline.run_liveness_check(&RunOptions::default()).await.unwrap();
    assert_eq!(fourth.counters.checked, 1);
    let revived = store
        .jobs()
        .await
        .into_iter()
        .filter(|j| j.status == JobStatus::Live)
        .count();
    assert_eq!(revived, 1);
    assert_eq!(store.runs().await.len(), 5);
}

#[tokio::test]
async fn a_successful_check_resets_the_failure_counter() {
    let store = admin_store(vec![lakeview(true)]);
    let fetch = Arc::new(greenhouse_fetcher());
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);
    pipeline.run_harvest(&RunOptions::default()).await.unwrap();

    let url = "https://boards.greenhouse.io/lakeview/jobs/4102";
    fetch.set_head(url, FixtureResponse::Timeout);
    pipeline.run_liveness_check(&RunOptions::default()).await.unwrap();
    pipeline.run_liveness_check(&RunOptions::default()).await.unwrap();
    let failed_twice = store.jobs().await.into_iter().find(|j| j.source_url.as_deref() == Some(url)).unwrap();
    assert_eq!(failed_twice.consecutive_failures, 2);

    fetch.set_head(url, FixtureResponse::ok(Vec::new()));
    pipeline.run_liveness_check(&RunOptions::default()).await.unwrap();
    let recovered = store.jobs().await.into_iter().find(|j| j.source_url.as_deref() == Some(url)).unwrap();
    assert_eq!(recovered.consecutive_failures, 0);
    assert_eq!(recovered.status, JobStatus::Live);
}

#[tokio::test]
async fn liveness_dry_run_leaves_jobs_untouched() {
    let store = admin_store(vec![lakeview(true)]);
    let fetch = Arc::new(greenhouse_fetcher());
    let mut config = SyncConfig::default();
    config.liveness.failure_threshold = 1;
    let pipeline = pipeline(config, &store, &fetch);
    pipeline.run_harvest(&RunOptions::default()).await.unwrap();

    let record = pipeline
        .run_liveness_check(&RunOptions {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(record.counters.taken_down, 5);
    assert!(store.jobs().await.iter().all(|j| j.status == JobStatus::Live && j.consecutive_failures == 0));
    assert_eq!(store.runs().await.len(), 1);
}

#[tokio::test]
async fn discovery_confirms_a_verified_greenhouse_board() {
    let org = lakeview(false);
    let org_id = org.id;
    let store = admin_store(vec![org]);
    let fetch = Arc::new(greenhouse_fetcher());
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    let record = pipeline.run_discovery(&RunOptions::default()).await.unwrap();
    assert_eq!(record.run_type, RunType::Discovery);
    assert_eq!(record.counters.organizations_scanned, 1);
    assert_eq!(record.counters.identities_confirmed, 1);

    let stored = store.organization(org_id).await.unwrap();
    assert_eq!(
        stored.ats,
        Some(AtsIdentity {
            platform: Platform::Greenhouse,
            slug: "lakeview".into(),
        })
    );
    assert!(stored.ats_discovered_at.is_some());
    assert_eq!(fetch.request_count(&format!("GET {GREENHOUSE_BOARD}")), 1);

    // A confirmed organization is not scanned again.
    let again = pipeline.run_discovery(&RunOptions::default()).await.unwrap();
    assert_eq!(again.counters.organizations_scanned, 0);
}

#[tokio::test]
async fn discovery_rejects_a_board_that_names_someone_else() {
    let org = Organization::new("Riverside International School", "Singapore", "SG");
    let org_id = org.id;
    let store = admin_store(vec![org]);
    let jobs: JsonValue = serde_json::from_str(&fixture("greenhouse/lakeview_jobs.json")).unwrap();
    let fetch = Arc::new(
        FixtureFetcher::new()
            .with_json("https://boards-api.greenhouse.io/v1/boards/riverside/jobs?content=true", &jobs)
            .with_html(
                "https://boards.greenhouse.io/riverside",
                "<html><head><title>Acme Logistics Careers</title></head></html>",
            ),
    );
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    let record = pipeline.run_discovery(&RunOptions::default()).await.unwrap();
    assert_eq!(record.counters.identities_confirmed, 0);
    assert_eq!(fetch.request_count("GET https://boards.greenhouse.io/riverside"), 1);
    assert!(store.organization(org_id).await.unwrap().ats.is_none());
}

#[tokio::test]
async fn discovery_finds_career_page_and_signature_then_harvest_reads_it() {
    let mut org = harbourside();
    org.record_website("harbourside.org", Utc::now());
    let org_id = org.id;
    let store = admin_store(vec![org]);
    let fetch = Arc::new(
        FixtureFetcher::new()
            .with_html("https://harbourside.org", &fixture("career/harbourside_home.html"))
            .with_html("https://harbourside.org/careers", &fixture("career/harbourside_careers.html")),
    );
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    let record = pipeline.run_discovery(&RunOptions::default()).await.unwrap();
    assert_eq!(record.counters.career_pages_found, 1);
    assert_eq!(record.counters.signatures_detected, 1);
    assert_eq!(record.counters.identities_confirmed, 0);

    let stored = store.organization(org_id).await.unwrap();
    assert_eq!(stored.career_page_url.as_deref(), Some("https://harbourside.org/careers"));
    assert_eq!(stored.detected_signature, Some(Platform::Greenhouse));
    assert!(stored.ats.is_none());

    let harvest = pipeline
        .run_harvest(&RunOptions {
            filter: OrganizationFilter {
                platform: Some(Platform::Html),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(harvest.sources[0].source_key, "html:https://harbourside.org/careers");
    assert_eq!(harvest.counters.jobs_new, 3);
    let titles: HashSet<String> = store.inserted_jobs().await.into_iter().map(|j| j.title).collect();
    assert!(titles.contains("Head of Science"));
    assert!(titles.contains("KS2 Class Teacher"));
    assert!(titles.contains("School Nurse"));
}

#[tokio::test]
async fn discovery_confirms_a_workday_account_linked_from_the_homepage() {
    let mut org = Organization::new("Acme Bilingual School", "Peru", "PE");
    org.record_website("acmebilingual.org", Utc::now());
    let org_id = org.id;
    let store = admin_store(vec![org]);
    let fetch = Arc::new(
        FixtureFetcher::new()
            .with_html(
                "https://acmebilingual.org",
                r#"<html><head><title>Acme Bilingual School</title></head><body>
                   <a href="https://acme.wd5.myworkdayjobs.com/en-US/AcmeCareers">Open positions</a>
                   </body></html>"#,
            )
            .with_post_json(
                "https://acme.wd5.myworkdayjobs.com/wday/cxs/acme/AcmeCareers/jobs",
                &json!({
                    "total": 1,
                    "jobPostings": [
                        { "title": "Grade 4 Teacher", "externalPath": "/job/Lima/Grade-4-Teacher_R9", "locationsText": "Lima, Peru" }
                    ]
                }),
            )
            .with_html(
                "https://acme.wd5.myworkdayjobs.com/AcmeCareers",
                "<html><head><title>Careers at Acme Bilingual School</title></head></html>",
            ),
    );
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    let record = pipeline.run_discovery(&RunOptions::default()).await.unwrap();
    assert_eq!(record.counters.identities_confirmed, 1);
    assert_eq!(record.counters.signatures_detected, 0);

    let stored = store.organization(org_id).await.unwrap();
    assert_eq!(
        stored.ats,
        Some(AtsIdentity {
            platform: Platform::Workday,
            slug: "acme/AcmeCareers/wd5".into(),
        })
    );
    assert_eq!(stored.detected_signature, None);
}

#[tokio::test]
async fn harvest_stores_a_signature_seen_on_a_career_page() {
    let mut org = harbourside();
    org.record_career_page("https://harbourside.org/careers", Utc::now());
    let org_id = org.id;
    let store = admin_store(vec![org]);
    let page = fixture("career/harbourside_careers.html").replace(
        "</head>",
        r#"<script src="https://www.greenhouse.io/embed/analytics.js"></script></head>"#,
    );
    let fetch = Arc::new(FixtureFetcher::new().with_html("https://harbourside.org/careers", &page));
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    let dry = pipeline
        .run_harvest(&RunOptions {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(dry.counters.signatures_detected, 1);
    assert_eq!(store.organization(org_id).await.unwrap().detected_signature, None);

    let record = pipeline.run_harvest(&RunOptions::default()).await.unwrap();
    assert_eq!(record.counters.jobs_new, 3);
    assert_eq!(record.counters.signatures_detected, 1);
    assert!(record.errors.is_empty(), "{:?}", record.errors);
    let stored = store.organization(org_id).await.unwrap();
    assert_eq!(stored.detected_signature, Some(Platform::Greenhouse));
    assert!(stored.ats.is_none());

    // Already recorded: nothing new to report.
    let again = pipeline.run_harvest(&RunOptions::default()).await.unwrap();
    assert_eq!(again.counters.signatures_detected, 0);
}

#[tokio::test]
async fn discovery_dry_run_updates_nothing() {
    let org = lakeview(false);
    let org_id = org.id;
    let store = admin_store(vec![org]);
    let fetch = Arc::new(greenhouse_fetcher());
    let pipeline = pipeline(SyncConfig::default(), &store, &fetch);

    let record = pipeline
        .run_discovery(&RunOptions {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(record.counters.identities_confirmed, 1);
    assert!(store.organization(org_id).await.unwrap().ats.is_none());
    assert!(store.runs().await.is_empty());
}

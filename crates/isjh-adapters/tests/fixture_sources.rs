use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use isjh_adapters::{
    CareerPageSource, GreenhouseProbe, HarvestSource, HeuristicExtractor, IdentityVerifier,
    PageCursor, PlatformProbe, ProbeContext, TesSource,
};
use isjh_core::Platform;
use isjh_storage::{FixtureFetcher, RecordingPacer};
use serde_json::Value as JsonValue;

fn fixture(relative: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(relative);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[tokio::test]
async fn greenhouse_fixture_probes_and_verifies() {
    let jobs: JsonValue = serde_json::from_str(&fixture("greenhouse/lakeview_jobs.json")).unwrap();
    let fetch = FixtureFetcher::new()
        .with_json("https://boards-api.greenhouse.io/v1/boards/lakeview/jobs?content=true", &jobs)
        .with_html("https://boards.greenhouse.io/lakeview", &fixture("greenhouse/lakeview_board.html"));
    let pacer = RecordingPacer::default();
    let ctx = ProbeContext {
        fetch: &fetch,
        pacer: &pacer,
        delay: Duration::from_millis(250),
    };

    let found = GreenhouseProbe.probe(ctx, "lakeview").await.unwrap();
    assert_eq!(found.platform, Platform::Greenhouse);
    assert_eq!(found.posting_count, 5);
    assert!(GreenhouseProbe.probe(ctx, "lakeview-international-school").await.is_none());

    let verdict = IdentityVerifier::default()
        .verify_board(&fetch, &found.board_url, "Lakeview International School")
        .await;
    assert!(verdict.is_accepted());
}

#[tokio::test]
async fn tes_fixture_page_yields_board_postings() {
    let fetch = FixtureFetcher::new().with_html(
        "https://www.tes.com/jobs/browse/international?page=1",
        &fixture("tes/international_page1.html"),
    );
    let source = TesSource::new(
        "tes-international",
        "https://www.tes.com/jobs/browse/international?page={page}",
    )
    .unwrap();

    let page = source.fetch_page(&fetch, &PageCursor::default()).await.unwrap();
    assert!(page.next.is_none());
    let employers: Vec<Option<&str>> = page
        .postings
        .iter()
        .map(|p| p.organization_name.as_deref())
        .collect();
    assert_eq!(
        employers,
        vec![
            Some("Lakeview International School"),
            Some("harbourside academy"),
            Some("Northwind Tutoring Centre"),
        ]
    );
    let pe = &page.postings[0];
    assert_eq!(pe.location.as_deref(), Some("Bangkok, Thailand"));
    assert_eq!(
        pe.source_url,
        "https://www.tes.com/jobs/vacancy/teacher-of-primary-pe-lakeview-7001"
    );
    assert_eq!(page.postings[1].start_date.as_deref(), Some("August 2026"));
}

#[tokio::test]
async fn career_page_fixture_extracts_vacancies() {
    let url = "https://harbourside.org/careers";
    let fetch = FixtureFetcher::new().with_html(url, &fixture("career/harbourside_careers.html"));
    let source = CareerPageSource::new(url, Arc::new(HeuristicExtractor::default()));

    let page = source.fetch_page(&fetch, &PageCursor::default()).await.unwrap();
    let titles: Vec<&str> = page.postings.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["Head of Science", "KS2 Class Teacher", "School Nurse"]);
    assert_eq!(
        page.postings[0].source_url,
        "https://harbourside.org/careers/head-of-science"
    );
    // The emailed vacancy has no page of its own.
    assert_eq!(page.postings[2].source_url, url);
    assert!(source.detected_signature().is_none());
    assert!(page.next.is_none());
}

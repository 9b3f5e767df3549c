//! Platform probes, job-board parsers and HTML extraction for ISJH sources.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use isjh_core::{AtsIdentity, Platform, RawPosting};
use isjh_storage::{Fetch, FetchError, Pacer};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

pub mod ats;
pub mod html;
pub mod tes;
pub mod verify;

pub use ats::{
    BambooHrProbe, GreenhouseProbe, LeverProbe, SmartRecruitersProbe, WorkableProbe, WorkdayProbe,
    WorkdaySlug,
};
pub use html::{
    detect_fingerprints, CareerPageSource, ExtractedJob, Fingerprint, HeuristicExtractor,
    JobExtractor,
};
pub use tes::TesSource;
pub use verify::{significant_words, IdentityVerifier, Verdict};

pub const CRATE_NAME: &str = "isjh-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Position inside a paginated source: numeric offset/page plus an optional opaque token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    pub offset: usize,
    pub token: Option<String>,
}

impl PageCursor {
    pub fn at(offset: usize) -> Self {
        Self {
            offset,
            token: None,
        }
    }

    pub fn is_first(&self) -> bool {
        self.offset == 0 && self.token.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePage {
    pub postings: Vec<RawPosting>,
    /// `None` on the last page.
    pub next: Option<PageCursor>,
    /// Total posting count when the platform reports it.
    pub total: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeMatch {
    pub platform: Platform,
    pub slug: String,
    pub board_url: String,
    pub posting_count: usize,
}

impl ProbeMatch {
    pub fn identity(&self) -> AtsIdentity {
        AtsIdentity {
            platform: self.platform,
            slug: self.slug.clone(),
        }
    }
}

/// Shared handles every probe attempt needs.
#[derive(Clone, Copy)]
pub struct ProbeContext<'a> {
    pub fetch: &'a dyn Fetch,
    pub pacer: &'a dyn Pacer,
    pub delay: Duration,
}

#[async_trait]
pub trait PlatformProbe: Send + Sync {
    fn platform(&self) -> Platform;

    /// Boards advertising more postings than this are treated as someone else's account.
    fn max_postings(&self) -> usize;

    /// Public, human-facing page used for identity verification.
    fn board_url(&self, slug: &str) -> String;

    /// Harvest one page of a confirmed slug. Failures are source-level errors.
    async fn fetch_page(
        &self,
        fetch: &dyn Fetch,
        slug: &str,
        cursor: &PageCursor,
    ) -> Result<SourcePage, AdapterError>;

    /// Any failure or an empty board is "no match", never an error.
    async fn probe(&self, ctx: ProbeContext<'_>, candidate: &str) -> Option<ProbeMatch> {
        let page = match self.fetch_page(ctx.fetch, candidate, &PageCursor::default()).await {
            Ok(page) => page,
            Err(err) => {
                debug!(platform = %self.platform(), candidate, %err, "probe miss");
                return None;
            }
        };
        accept_probe_page(self.platform(), self.max_postings(), candidate, self.board_url(candidate), &page)
    }
}

pub(crate) fn accept_probe_page(
    platform: Platform,
    max_postings: usize,
    slug: &str,
    board_url: String,
    page: &SourcePage,
) -> Option<ProbeMatch> {
    let count = page.total.unwrap_or(page.postings.len()).max(page.postings.len());
    if count == 0 {
        debug!(%platform, slug, "probe answered with an empty board");
        return None;
    }
    if count > max_postings {
        debug!(%platform, slug, count, max_postings, "probe rejected: posting count over cap");
        return None;
    }
    Some(ProbeMatch {
        platform,
        slug: slug.to_string(),
        board_url,
        posting_count: count,
    })
}

/// Try candidates in order, pausing between attempts, and stop at the first hit.
pub async fn first_match<C, T, F, Fut>(
    candidates: impl IntoIterator<Item = C>,
    pacer: &dyn Pacer,
    delay: Duration,
    mut attempt: F,
) -> Option<T>
where
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let mut first = true;
    for candidate in candidates {
        if !first {
            pacer.pause(delay).await;
        }
        first = false;
        if let Some(found) = attempt(candidate).await {
            return Some(found);
        }
    }
    None
}

pub fn probe_for(platform: Platform) -> Option<Arc<dyn PlatformProbe>> {
    match platform {
        Platform::Greenhouse => Some(Arc::new(GreenhouseProbe)),
        Platform::Lever => Some(Arc::new(LeverProbe)),
        Platform::Workable => Some(Arc::new(WorkableProbe)),
        Platform::SmartRecruiters => Some(Arc::new(SmartRecruitersProbe)),
        Platform::BambooHr => Some(Arc::new(BambooHrProbe)),
        Platform::Workday => Some(Arc::new(WorkdayProbe::default())),
        Platform::Tes | Platform::Html => None,
    }
}

/// Every ATS probe, in discovery priority order.
pub fn standard_probes() -> Vec<Arc<dyn PlatformProbe>> {
    Platform::ATS.iter().filter_map(|p| probe_for(*p)).collect()
}

/// A paginated stream of raw postings the crawl orchestrator can drain.
#[async_trait]
pub trait HarvestSource: Send + Sync {
    fn source_key(&self) -> String;

    async fn fetch_page(
        &self,
        fetch: &dyn Fetch,
        cursor: &PageCursor,
    ) -> Result<SourcePage, AdapterError>;

    /// Platform seen in fetched markup without an account slug, if any.
    fn detected_signature(&self) -> Option<Platform> {
        None
    }
}

/// A confirmed ATS account harvested through its probe.
pub struct AtsSource {
    probe: Arc<dyn PlatformProbe>,
    slug: String,
}

impl AtsSource {
    pub fn new(probe: Arc<dyn PlatformProbe>, slug: impl Into<String>) -> Self {
        Self {
            probe,
            slug: slug.into(),
        }
    }

    pub fn for_identity(identity: &AtsIdentity) -> Option<Self> {
        probe_for(identity.platform).map(|probe| Self::new(probe, identity.slug.clone()))
    }
}

#[async_trait]
impl HarvestSource for AtsSource {
    fn source_key(&self) -> String {
        format!("{}:{}", self.probe.platform(), self.slug)
    }

    async fn fetch_page(
        &self,
        fetch: &dyn Fetch,
        cursor: &PageCursor,
    ) -> Result<SourcePage, AdapterError> {
        self.probe.fetch_page(fetch, &self.slug, cursor).await
    }
}

pub(crate) fn text_or_none(value: impl AsRef<str>) -> Option<String> {
    let collapsed = value
        .as_ref()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(format!("bad selector `{css}`: {e}")))
}

pub(crate) fn element_text(el: ElementRef<'_>) -> Option<String> {
    text_or_none(el.text().collect::<String>())
}

pub(crate) fn select_first_text(
    scope: ElementRef<'_>,
    css: &str,
) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(scope.select(&sel).find_map(element_text))
}

pub(crate) fn select_first_attr(
    document: &Html,
    css: &str,
    attr: &str,
) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .find_map(|n| n.value().attr(attr).and_then(text_or_none)))
}

pub(crate) fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.as_str().filter(|s| !s.trim().is_empty())
}

pub(crate) fn json_usize(value: &JsonValue, path: &[&str]) -> Option<usize> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.as_u64().map(|n| n as usize)
}

/// Join non-empty parts with ", " to form a "City, Country" location string.
pub(crate) fn join_location<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    let parts: Vec<&str> = parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

pub(crate) fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return None;
    }
    let base = url::Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

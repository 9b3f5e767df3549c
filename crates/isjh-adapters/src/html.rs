//! Heuristic job extraction from arbitrary career pages and ATS fingerprint detection.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use isjh_core::tables::{contains_term, normalize_words};
use isjh_core::{LookupTables, Platform, RawPosting};
use isjh_storage::Fetch;
use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::{debug, info};

use crate::{
    element_text, probe_for, resolve_url, selector, AdapterError, HarvestSource, PageCursor,
    PlatformProbe, SourcePage,
};

pub const MIN_TITLE_CHARS: usize = 5;
pub const MAX_TITLE_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractedJob {
    pub title: String,
    pub url: String,
}

/// Pulls job-looking entries out of a page. The orchestrator depends only on this seam.
pub trait JobExtractor: Send + Sync {
    fn extract(&self, html: &str, base_url: &str) -> Vec<ExtractedJob>;
}

#[derive(Debug, Clone, Copy)]
pub struct HeuristicExtractor {
    tables: &'static LookupTables,
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self::new(LookupTables::standard())
    }
}

impl HeuristicExtractor {
    pub fn new(tables: &'static LookupTables) -> Self {
        Self { tables }
    }

    fn looks_like_job_title(&self, text: &str) -> bool {
        let len = text.chars().count();
        if !(MIN_TITLE_CHARS..=MAX_TITLE_CHARS).contains(&len) {
            return false;
        }
        let normalized = normalize_words(text);
        if self
            .tables
            .navigation_phrases
            .iter()
            .any(|phrase| normalize_words(phrase) == normalized)
        {
            return false;
        }
        self.tables
            .job_title_keywords
            .iter()
            .any(|kw| contains_term(&normalized, kw))
    }

    /// Pass (a): anchors whose own text reads like a job title.
    fn anchors(&self, document: &Html, base_url: &str) -> Vec<ExtractedJob> {
        let Ok(sel) = selector("a[href]") else {
            return Vec::new();
        };
        document
            .select(&sel)
            .filter_map(|a| {
                let title = element_text(a)?;
                if !self.looks_like_job_title(&title) {
                    return None;
                }
                let url = resolve_url(base_url, a.value().attr("href")?)?;
                Some(ExtractedJob { title, url })
            })
            .collect()
    }

    /// Pass (b): list items, table rows and articles with a job-like heading.
    fn blocks(&self, document: &Html, base_url: &str) -> Vec<ExtractedJob> {
        let (Ok(block_sel), Ok(heading_sel)) = (
            selector("li, tr, article, .job, .vacancy, .position"),
            selector("h2, h3, h4, h5, strong, b, .title, .job-title, td"),
        ) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for block in document.select(&block_sel) {
            let Some(title) = block
                .select(&heading_sel)
                .filter_map(element_text)
                .find(|t| self.looks_like_job_title(t))
            else {
                continue;
            };
            let url = nearest_link(block, base_url).unwrap_or_else(|| base_url.to_string());
            out.push(ExtractedJob { title, url });
        }
        out
    }
}

impl JobExtractor for HeuristicExtractor {
    fn extract(&self, html: &str, base_url: &str) -> Vec<ExtractedJob> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        self.anchors(&document, base_url)
            .into_iter()
            .chain(self.blocks(&document, base_url))
            .filter(|job| seen.insert((job.title.to_lowercase(), job.url.clone())))
            .collect()
    }
}

/// Vendor evidence found in page markup. `slug` is present when the markup names the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub platform: Platform,
    pub slug: Option<String>,
}

struct FingerprintPattern {
    platform: Platform,
    with_slug: &'static LazyLock<Regex>,
    bare: &'static LazyLock<Regex>,
}

static GREENHOUSE_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:job-)?boards(?:-api)?\.greenhouse\.io/(?:embed/job_board(?:/js)?\?for=|v1/boards/)?([a-z0-9_-]+)")
        .expect("valid greenhouse pattern")
});
static GREENHOUSE_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)greenhouse\.io").expect("valid greenhouse pattern"));

static LEVER_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:jobs\.lever\.co/|api\.lever\.co/v0/postings/)([a-z0-9_.-]+)")
        .expect("valid lever pattern")
});
static LEVER_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)lever\.co\b").expect("valid lever pattern"));

static WORKABLE_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)apply\.workable\.com/(?:api/v\d/accounts/)?([a-z0-9_-]+)")
        .expect("valid workable pattern")
});
static WORKABLE_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)workable\.com").expect("valid workable pattern"));

static SMARTRECRUITERS_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:careers|jobs)\.smartrecruiters\.com/([a-z0-9_-]+)")
        .expect("valid smartrecruiters pattern")
});
static SMARTRECRUITERS_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)smartrecruiters\.com").expect("valid smartrecruiters pattern")
});

static BAMBOOHR_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)//([a-z0-9-]+)\.bamboohr\.com").expect("valid bamboohr pattern")
});
static BAMBOOHR_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bamboohr\.com").expect("valid bamboohr pattern"));

static WORKDAY_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)//([a-z0-9]+)\.wd(\d+)\.myworkdayjobs\.com/(?:[a-z]{2}-[a-z]{2}/)?([a-z0-9_-]+)")
        .expect("valid workday pattern")
});
static WORKDAY_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)myworkdayjobs\.com").expect("valid workday pattern"));

static PATTERNS: [FingerprintPattern; 6] = [
    FingerprintPattern {
        platform: Platform::Greenhouse,
        with_slug: &GREENHOUSE_SLUG,
        bare: &GREENHOUSE_BARE,
    },
    FingerprintPattern {
        platform: Platform::Lever,
        with_slug: &LEVER_SLUG,
        bare: &LEVER_BARE,
    },
    FingerprintPattern {
        platform: Platform::Workable,
        with_slug: &WORKABLE_SLUG,
        bare: &WORKABLE_BARE,
    },
    FingerprintPattern {
        platform: Platform::SmartRecruiters,
        with_slug: &SMARTRECRUITERS_SLUG,
        bare: &SMARTRECRUITERS_BARE,
    },
    FingerprintPattern {
        platform: Platform::BambooHr,
        with_slug: &BAMBOOHR_SLUG,
        bare: &BAMBOOHR_BARE,
    },
    FingerprintPattern {
        platform: Platform::Workday,
        with_slug: &WORKDAY_SLUG,
        bare: &WORKDAY_BARE,
    },
];

/// Path segments the slug patterns can capture that never name an account.
const RESERVED_SEGMENTS: &[&str] = &[
    "embed", "api", "v0", "v1", "v3", "j", "jobs", "careers", "www", "static", "assets", "js",
];

fn slug_from_captures(platform: Platform, caps: &regex::Captures<'_>) -> Option<String> {
    if platform == Platform::Workday {
        let tenant = caps.get(1)?.as_str().to_ascii_lowercase();
        let instance = caps.get(2)?.as_str();
        let site = caps.get(3)?.as_str();
        if RESERVED_SEGMENTS.contains(&site.to_ascii_lowercase().as_str()) || site == "wday" {
            return None;
        }
        return Some(format!("{tenant}/{site}/wd{instance}"));
    }
    let slug = caps.get(1)?.as_str().trim_end_matches('.').to_ascii_lowercase();
    (!slug.is_empty() && !RESERVED_SEGMENTS.contains(&slug.as_str())).then_some(slug)
}

/// One fingerprint per platform, in ATS priority order. Slug-bearing evidence wins over bare mentions.
pub fn detect_fingerprints(html: &str) -> Vec<Fingerprint> {
    PATTERNS
        .iter()
        .filter_map(|pattern| {
            let slug = pattern
                .with_slug
                .captures_iter(html)
                .find_map(|caps| slug_from_captures(pattern.platform, &caps));
            if slug.is_some() || pattern.bare.is_match(html) {
                Some(Fingerprint {
                    platform: pattern.platform,
                    slug,
                })
            } else {
                None
            }
        })
        .collect()
}

/// True when the page text mentions vacancies, careers or jobs.
pub fn looks_like_career_page(html: &str, tables: &LookupTables) -> bool {
    let document = Html::parse_document(html);
    let text = normalize_words(&document.root_element().text().collect::<Vec<_>>().join(" "));
    tables
        .career_page_markers
        .iter()
        .any(|marker| contains_term(&text, marker))
}

/// A school's own career page: defers to the embedded ATS when the markup names one,
/// otherwise runs the heuristic extractor over the page.
pub struct CareerPageSource {
    url: String,
    extractor: Arc<dyn JobExtractor>,
    deferred: Mutex<Option<(Arc<dyn PlatformProbe>, String)>>,
    signature: Mutex<Option<Platform>>,
}

impl CareerPageSource {
    pub fn new(url: impl Into<String>, extractor: Arc<dyn JobExtractor>) -> Self {
        Self {
            url: url.into(),
            extractor,
            deferred: Mutex::new(None),
            signature: Mutex::new(None),
        }
    }

    fn deferred_probe(&self) -> Option<(Arc<dyn PlatformProbe>, String)> {
        self.deferred
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl HarvestSource for CareerPageSource {
    fn source_key(&self) -> String {
        format!("html:{}", self.url)
    }

    fn detected_signature(&self) -> Option<Platform> {
        *self.signature.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn fetch_page(
        &self,
        fetch: &dyn Fetch,
        cursor: &PageCursor,
    ) -> Result<SourcePage, AdapterError> {
        if let Some((probe, slug)) = self.deferred_probe() {
            return probe.fetch_page(fetch, &slug, cursor).await;
        }
        if !cursor.is_first() {
            return Ok(SourcePage::default());
        }

        let page = fetch.get(&self.url).await?;
        let html = page.text();
        let fingerprints = detect_fingerprints(&html);

        let embedded = fingerprints.iter().find_map(|fp| {
            let slug = fp.slug.clone()?;
            probe_for(fp.platform).map(|probe| (probe, slug))
        });
        if let Some((probe, slug)) = embedded {
            info!(url = %self.url, platform = %probe.platform(), slug = %slug, "career page embeds an ATS board");
            *self.deferred.lock().unwrap_or_else(|e| e.into_inner()) =
                Some((Arc::clone(&probe), slug.clone()));
            return probe.fetch_page(fetch, &slug, cursor).await;
        }
        if let Some(fp) = fingerprints.first() {
            debug!(url = %self.url, platform = %fp.platform, "ATS signature without an account slug");
            *self.signature.lock().unwrap_or_else(|e| e.into_inner()) = Some(fp.platform);
        }

        let postings = self
            .extractor
            .extract(&html, &page.final_url)
            .into_iter()
            .map(|job| RawPosting::new(job.title, job.url))
            .collect::<Vec<_>>();
        Ok(SourcePage {
            total: Some(postings.len()),
            postings,
            next: None,
        })
    }
}

/// First resolvable link inside a block.
fn nearest_link(block: ElementRef<'_>, base_url: &str) -> Option<String> {
    let sel = selector("a[href]").ok()?;
    block
        .select(&sel)
        .find_map(|a| a.value().attr("href").and_then(|h| resolve_url(base_url, h)))
}

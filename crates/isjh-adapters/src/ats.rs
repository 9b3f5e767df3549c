//! Probes for the public, unauthenticated postings endpoints of each ATS.

use async_trait::async_trait;
use isjh_core::{Platform, RawPosting};
use isjh_storage::Fetch;
use scraper::Html;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::{
    accept_probe_page, element_text, first_match, join_location, json_str, json_usize,
    resolve_url, select_first_text, selector, AdapterError, PageCursor, PlatformProbe,
    ProbeContext, ProbeMatch, SourcePage,
};

pub const GREENHOUSE_MAX_POSTINGS: usize = 120;
pub const LEVER_MAX_POSTINGS: usize = 120;
pub const WORKABLE_MAX_POSTINGS: usize = 120;
pub const SMARTRECRUITERS_MAX_POSTINGS: usize = 100;
pub const WORKDAY_MAX_POSTINGS: usize = 200;
pub const BAMBOOHR_MAX_POSTINGS: usize = 120;

const LEVER_PAGE_SIZE: usize = 100;
const SMARTRECRUITERS_PAGE_SIZE: usize = 100;
const WORKDAY_PAGE_SIZE: usize = 20;

// ---------------------------------------------------------------------------
// Greenhouse

#[derive(Debug, Deserialize)]
struct GreenhouseBoard {
    #[serde(default)]
    jobs: Vec<GreenhouseJob>,
    #[serde(default)]
    meta: Option<GreenhouseMeta>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseMeta {
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseJob {
    id: Option<u64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    absolute_url: String,
    location: Option<GreenhouseName>,
    content: Option<String>,
    #[serde(default)]
    departments: Vec<GreenhouseName>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseName {
    name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GreenhouseProbe;

#[async_trait]
impl PlatformProbe for GreenhouseProbe {
    fn platform(&self) -> Platform {
        Platform::Greenhouse
    }

    fn max_postings(&self) -> usize {
        GREENHOUSE_MAX_POSTINGS
    }

    fn board_url(&self, slug: &str) -> String {
        format!("https://boards.greenhouse.io/{slug}")
    }

    async fn fetch_page(
        &self,
        fetch: &dyn Fetch,
        slug: &str,
        _cursor: &PageCursor,
    ) -> Result<SourcePage, AdapterError> {
        let url = format!("https://boards-api.greenhouse.io/v1/boards/{slug}/jobs?content=true");
        let board: GreenhouseBoard = fetch.get(&url).await?.json()?;
        let postings = board
            .jobs
            .into_iter()
            .map(|job| RawPosting {
                external_id: job.id.map(|id| id.to_string()),
                location: job.location.and_then(|l| l.name),
                description_html: job.content,
                apply_url: Some(job.absolute_url.clone()).filter(|u| !u.is_empty()),
                department: job.departments.into_iter().find_map(|d| d.name),
                ..RawPosting::new(job.title, job.absolute_url)
            })
            .collect::<Vec<_>>();
        Ok(SourcePage {
            total: board.meta.and_then(|m| m.total).or(Some(postings.len())),
            postings,
            next: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Lever

#[derive(Debug, Deserialize)]
struct LeverPosting {
    id: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default, rename = "hostedUrl")]
    hosted_url: String,
    #[serde(rename = "applyUrl")]
    apply_url: Option<String>,
    #[serde(default)]
    categories: LeverCategories,
    description: Option<String>,
    #[serde(rename = "descriptionPlain")]
    description_plain: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LeverCategories {
    location: Option<String>,
    commitment: Option<String>,
    team: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LeverProbe;

#[async_trait]
impl PlatformProbe for LeverProbe {
    fn platform(&self) -> Platform {
        Platform::Lever
    }

    fn max_postings(&self) -> usize {
        LEVER_MAX_POSTINGS
    }

    fn board_url(&self, slug: &str) -> String {
        format!("https://jobs.lever.co/{slug}")
    }

    async fn fetch_page(
        &self,
        fetch: &dyn Fetch,
        slug: &str,
        cursor: &PageCursor,
    ) -> Result<SourcePage, AdapterError> {
        let url = format!(
            "https://api.lever.co/v0/postings/{slug}?mode=json&skip={}&limit={LEVER_PAGE_SIZE}",
            cursor.offset
        );
        let postings: Vec<LeverPosting> = fetch.get(&url).await?.json()?;
        let full_page = postings.len() == LEVER_PAGE_SIZE;
        let postings = postings
            .into_iter()
            .map(|p| RawPosting {
                external_id: p.id,
                location: p.categories.location,
                description_html: p.description.or(p.description_plain),
                apply_url: p.apply_url,
                employment_hint: p.categories.commitment,
                department: p.categories.team,
                ..RawPosting::new(p.text, p.hosted_url)
            })
            .collect::<Vec<_>>();
        Ok(SourcePage {
            next: full_page.then(|| PageCursor::at(cursor.offset + postings.len())),
            postings,
            total: None,
        })
    }

    /// Lever reports no total, so pages are counted until a short page or the cap is passed.
    async fn probe(&self, ctx: ProbeContext<'_>, candidate: &str) -> Option<ProbeMatch> {
        let mut cursor = PageCursor::default();
        let mut counted = 0usize;
        let mut first_page: Option<SourcePage> = None;
        loop {
            let mut page = match self.fetch_page(ctx.fetch, candidate, &cursor).await {
                Ok(page) => page,
                Err(err) => {
                    debug!(platform = %Platform::Lever, candidate, skip = cursor.offset, %err, "probe miss");
                    return None;
                }
            };
            counted += page.postings.len();
            let next = page.next.take();
            first_page.get_or_insert(page);
            match next {
                Some(next) if counted <= LEVER_MAX_POSTINGS => {
                    ctx.pacer.pause(ctx.delay).await;
                    cursor = next;
                }
                _ => break,
            }
        }
        let mut page = first_page?;
        page.total = Some(counted);
        accept_probe_page(Platform::Lever, LEVER_MAX_POSTINGS, candidate, self.board_url(candidate), &page)
    }
}

// ---------------------------------------------------------------------------
// Workable

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkableProbe;

fn workable_hint(kind: &str) -> String {
    match kind.trim().to_ascii_lowercase().as_str() {
        "full" => "full time".to_string(),
        "part" => "part time".to_string(),
        "temporary" | "contract" => "contract".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl PlatformProbe for WorkableProbe {
    fn platform(&self) -> Platform {
        Platform::Workable
    }

    fn max_postings(&self) -> usize {
        WORKABLE_MAX_POSTINGS
    }

    fn board_url(&self, slug: &str) -> String {
        format!("https://apply.workable.com/{slug}/")
    }

    async fn fetch_page(
        &self,
        fetch: &dyn Fetch,
        slug: &str,
        cursor: &PageCursor,
    ) -> Result<SourcePage, AdapterError> {
        let url = format!("https://apply.workable.com/api/v3/accounts/{slug}/jobs");
        let mut body = json!({
            "query": "",
            "location": [],
            "department": [],
            "worktype": [],
            "remote": []
        });
        if let Some(token) = &cursor.token {
            body["token"] = JsonValue::String(token.clone());
        }
        let value: JsonValue = fetch.post_json(&url, &body).await?.json()?;
        let results = value
            .get("results")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| AdapterError::Message(format!("workable response for {slug} has no results")))?;

        let postings = results
            .iter()
            .filter_map(|job| {
                let shortcode = json_str(job, &["shortcode"])?;
                let title = json_str(job, &["title"])?;
                let source_url = format!("https://apply.workable.com/{slug}/j/{shortcode}/");
                Some(RawPosting {
                    external_id: Some(shortcode.to_string()),
                    location: join_location([
                        json_str(job, &["location", "city"]),
                        json_str(job, &["location", "country"]),
                    ]),
                    apply_url: Some(format!("{source_url}apply/")),
                    employment_hint: json_str(job, &["type"]).map(workable_hint),
                    department: job
                        .get("department")
                        .and_then(JsonValue::as_array)
                        .and_then(|d| d.first())
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                    ..RawPosting::new(title, source_url)
                })
            })
            .collect::<Vec<_>>();

        let next = json_str(&value, &["nextPage"]).map(|token| PageCursor {
            offset: cursor.offset + postings.len(),
            token: Some(token.to_string()),
        });
        Ok(SourcePage {
            total: json_usize(&value, &["total"]),
            postings,
            next,
        })
    }
}

// ---------------------------------------------------------------------------
// SmartRecruiters

#[derive(Debug, Clone, Copy, Default)]
pub struct SmartRecruitersProbe;

#[async_trait]
impl PlatformProbe for SmartRecruitersProbe {
    fn platform(&self) -> Platform {
        Platform::SmartRecruiters
    }

    fn max_postings(&self) -> usize {
        SMARTRECRUITERS_MAX_POSTINGS
    }

    fn board_url(&self, slug: &str) -> String {
        format!("https://careers.smartrecruiters.com/{slug}")
    }

    async fn fetch_page(
        &self,
        fetch: &dyn Fetch,
        slug: &str,
        cursor: &PageCursor,
    ) -> Result<SourcePage, AdapterError> {
        let url = format!(
            "https://api.smartrecruiters.com/v1/companies/{slug}/postings?offset={}&limit={SMARTRECRUITERS_PAGE_SIZE}",
            cursor.offset
        );
        let value: JsonValue = fetch.get(&url).await?.json()?;
        let content = value
            .get("content")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| AdapterError::Message(format!("smartrecruiters response for {slug} has no content")))?;

        let postings = content
            .iter()
            .filter_map(|job| {
                let id = json_str(job, &["id"])?;
                let title = json_str(job, &["name"])?;
                let country = json_str(job, &["location", "country"]).map(str::to_ascii_uppercase);
                Some(RawPosting {
                    external_id: Some(id.to_string()),
                    location: join_location([
                        json_str(job, &["location", "city"]),
                        country.as_deref(),
                    ]),
                    employment_hint: json_str(job, &["typeOfEmployment", "label"]).map(str::to_string),
                    department: json_str(job, &["department", "label"]).map(str::to_string),
                    ..RawPosting::new(title, format!("https://jobs.smartrecruiters.com/{slug}/{id}"))
                })
            })
            .collect::<Vec<_>>();

        let total = json_usize(&value, &["totalFound"]);
        let consumed = cursor.offset + postings.len();
        let next = match total {
            Some(total) if consumed < total && !postings.is_empty() => Some(PageCursor::at(consumed)),
            _ => None,
        };
        Ok(SourcePage {
            postings,
            next,
            total,
        })
    }
}

// ---------------------------------------------------------------------------
// BambooHR

#[derive(Debug, Clone, Copy, Default)]
pub struct BambooHrProbe;

fn parse_bamboohr_embed(html: &str, slug: &str) -> Result<Vec<RawPosting>, AdapterError> {
    let document = Html::parse_document(html);
    let base = format!("https://{slug}.bamboohr.com/jobs/");
    let item_sel = selector("li.BambooHR-ATS-Jobs-Item")?;
    let link_sel = selector("a[href]")?;

    let mut postings = Vec::new();
    for item in document.select(&item_sel) {
        let Some(link) = item.select(&link_sel).next() else {
            continue;
        };
        let (Some(title), Some(url)) = (
            element_text(link),
            link.value().attr("href").and_then(|h| resolve_url(&base, h)),
        ) else {
            continue;
        };
        let department = item
            .ancestors()
            .filter_map(scraper::ElementRef::wrap)
            .find(|el| el.value().classes().any(|c| c == "BambooHR-ATS-Department-Item"))
            .map(|dept| select_first_text(dept, ".BambooHR-ATS-Department-Header"))
            .transpose()?
            .flatten();
        postings.push(RawPosting {
            location: select_first_text(item, ".BambooHR-ATS-Location")?,
            department,
            ..RawPosting::new(title, url)
        });
    }
    Ok(postings)
}

#[async_trait]
impl PlatformProbe for BambooHrProbe {
    fn platform(&self) -> Platform {
        Platform::BambooHr
    }

    fn max_postings(&self) -> usize {
        BAMBOOHR_MAX_POSTINGS
    }

    fn board_url(&self, slug: &str) -> String {
        format!("https://{slug}.bamboohr.com/careers")
    }

    async fn fetch_page(
        &self,
        fetch: &dyn Fetch,
        slug: &str,
        _cursor: &PageCursor,
    ) -> Result<SourcePage, AdapterError> {
        let url = format!("https://{slug}.bamboohr.com/jobs/embed2.php");
        let html = fetch.get(&url).await?.text();
        let postings = parse_bamboohr_embed(&html, slug)?;
        Ok(SourcePage {
            total: Some(postings.len()),
            postings,
            next: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Workday

/// Confirmed Workday accounts are stored as `tenant/site/wdN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkdaySlug {
    pub tenant: String,
    pub site: String,
    pub instance: u16,
}

impl WorkdaySlug {
    pub fn parse(slug: &str) -> Option<Self> {
        let mut parts = slug.split('/');
        let tenant = parts.next().filter(|s| !s.is_empty())?;
        let site = parts.next().filter(|s| !s.is_empty())?;
        let instance = parts.next()?.strip_prefix("wd")?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            tenant: tenant.to_string(),
            site: site.to_string(),
            instance,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}/{}/wd{}", self.tenant, self.site, self.instance)
    }

    fn host(&self) -> String {
        format!("https://{}.wd{}.myworkdayjobs.com", self.tenant, self.instance)
    }

    pub fn jobs_url(&self) -> String {
        format!("{}/wday/cxs/{}/{}/jobs", self.host(), self.tenant, self.site)
    }

    pub fn board_url(&self) -> String {
        format!("{}/{}", self.host(), self.site)
    }
}

/// Searches tenant × site × instance for a candidate tenant.
#[derive(Debug, Clone)]
pub struct WorkdayProbe {
    /// `{tenant}` is substituted with the candidate.
    pub site_patterns: Vec<String>,
    pub instances: Vec<u16>,
}

impl Default for WorkdayProbe {
    fn default() -> Self {
        Self {
            site_patterns: ["External", "{tenant}", "Careers", "{tenant}_Careers"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            instances: vec![1, 3, 5, 12, 103],
        }
    }
}

impl WorkdayProbe {
    pub fn search_space(&self, tenant: &str) -> Vec<WorkdaySlug> {
        self.site_patterns
            .iter()
            .flat_map(|pattern| {
                let site = pattern.replace("{tenant}", tenant);
                self.instances.iter().map(move |instance| WorkdaySlug {
                    tenant: tenant.to_string(),
                    site: site.clone(),
                    instance: *instance,
                })
            })
            .collect()
    }
}

#[async_trait]
impl PlatformProbe for WorkdayProbe {
    fn platform(&self) -> Platform {
        Platform::Workday
    }

    fn max_postings(&self) -> usize {
        WORKDAY_MAX_POSTINGS
    }

    fn board_url(&self, slug: &str) -> String {
        WorkdaySlug::parse(slug)
            .map(|s| s.board_url())
            .unwrap_or_else(|| format!("https://{slug}.myworkdayjobs.com"))
    }

    async fn fetch_page(
        &self,
        fetch: &dyn Fetch,
        slug: &str,
        cursor: &PageCursor,
    ) -> Result<SourcePage, AdapterError> {
        let account = WorkdaySlug::parse(slug)
            .ok_or_else(|| AdapterError::Message(format!("malformed workday slug `{slug}`")))?;
        let body = json!({
            "appliedFacets": {},
            "limit": WORKDAY_PAGE_SIZE,
            "offset": cursor.offset,
            "searchText": ""
        });
        let value: JsonValue = fetch.post_json(&account.jobs_url(), &body).await?.json()?;
        let listed = value
            .get("jobPostings")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| AdapterError::Message(format!("workday response for {slug} has no jobPostings")))?;

        let base = format!("{}/{}", account.host(), account.site);
        let postings = listed
            .iter()
            .filter_map(|job| {
                let title = json_str(job, &["title"])?;
                let path = json_str(job, &["externalPath"])?;
                let source_url = format!("{base}{path}");
                Some(RawPosting {
                    external_id: job
                        .get("bulletFields")
                        .and_then(JsonValue::as_array)
                        .and_then(|b| b.first())
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                    location: json_str(job, &["locationsText"]).map(str::to_string),
                    ..RawPosting::new(title, source_url)
                })
            })
            .collect::<Vec<_>>();

        // Workday only reports `total` reliably on the first page.
        let total = json_usize(&value, &["total"]).filter(|t| *t > 0);
        let consumed = cursor.offset + postings.len();
        let more = postings.len() == WORKDAY_PAGE_SIZE && total.map_or(true, |t| consumed < t);
        Ok(SourcePage {
            next: more.then(|| PageCursor::at(consumed)),
            postings,
            total,
        })
    }

    /// A full `tenant/site/wdN` slug, as found in page markup, is tried as is; a bare
    /// tenant walks the site × instance search space.
    async fn probe(&self, ctx: ProbeContext<'_>, candidate: &str) -> Option<ProbeMatch> {
        if let Some(account) = WorkdaySlug::parse(candidate) {
            return self.probe_account(ctx.fetch, account).await;
        }
        // Workday tenants never contain separators.
        if candidate.contains('-') || candidate.contains('/') {
            return None;
        }
        first_match(self.search_space(candidate), ctx.pacer, ctx.delay, |account| {
            self.probe_account(ctx.fetch, account)
        })
        .await
    }
}

impl WorkdayProbe {
    async fn probe_account(&self, fetch: &dyn Fetch, account: WorkdaySlug) -> Option<ProbeMatch> {
        let slug = account.encode();
        match self.fetch_page(fetch, &slug, &PageCursor::default()).await {
            Ok(page) => accept_probe_page(Platform::Workday, self.max_postings(), &slug, account.board_url(), &page),
            Err(err) => {
                debug!(slug = %slug, %err, "workday probe miss");
                None
            }
        }
    }
}

//! Parser for the TES multi-employer job board.
//!
//! Listing pages carry schema.org `JobPosting` JSON-LD for most vacancies and plain card
//! markup for the rest. JSON-LD wins when both describe the same URL.

use std::collections::HashSet;

use async_trait::async_trait;
use isjh_core::RawPosting;
use isjh_storage::Fetch;
use scraper::Html;
use serde_json::Value as JsonValue;

use crate::{
    element_text, join_location, json_str, resolve_url, select_first_text, selector,
    AdapterError, HarvestSource, PageCursor, SourcePage,
};

pub const PAGE_PLACEHOLDER: &str = "{page}";

#[derive(Debug, Clone)]
pub struct TesSource {
    source_key: String,
    listing_url: String,
}

impl TesSource {
    /// `listing_url` must contain `{page}`; pages are numbered from 1.
    pub fn new(source_key: impl Into<String>, listing_url: impl Into<String>) -> Result<Self, AdapterError> {
        let listing_url = listing_url.into();
        if !listing_url.contains(PAGE_PLACEHOLDER) {
            return Err(AdapterError::Message(format!(
                "listing url `{listing_url}` has no {PAGE_PLACEHOLDER} placeholder"
            )));
        }
        Ok(Self {
            source_key: source_key.into(),
            listing_url,
        })
    }

    pub fn page_url(&self, page: usize) -> String {
        self.listing_url.replace(PAGE_PLACEHOLDER, &page.to_string())
    }
}

#[async_trait]
impl HarvestSource for TesSource {
    fn source_key(&self) -> String {
        self.source_key.clone()
    }

    async fn fetch_page(
        &self,
        fetch: &dyn Fetch,
        cursor: &PageCursor,
    ) -> Result<SourcePage, AdapterError> {
        let page_number = cursor.offset + 1;
        let url = self.page_url(page_number);
        let response = fetch.get(&url).await?;
        let listing = parse_listing(&response.text(), &response.final_url)?;
        Ok(SourcePage {
            next: listing.has_next.then(|| PageCursor::at(page_number)),
            total: None,
            postings: listing.postings,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TesListing {
    pub postings: Vec<RawPosting>,
    pub has_next: bool,
}

pub fn parse_listing(html: &str, page_url: &str) -> Result<TesListing, AdapterError> {
    let document = Html::parse_document(html);
    let mut postings = Vec::new();
    let mut seen = HashSet::new();

    let ld_sel = selector(r#"script[type="application/ld+json"]"#)?;
    for script in document.select(&ld_sel) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<JsonValue>(&raw) else {
            continue;
        };
        for node in job_posting_nodes(&value) {
            if let Some(posting) = posting_from_json_ld(node, page_url) {
                if seen.insert(posting.source_url.clone()) {
                    postings.push(posting);
                }
            }
        }
    }

    let card_sel = selector("article.job-card, li.job-card, div.job-card, [data-job-card]")?;
    let title_sel = selector(".job-card__title a, h2 a, h3 a")?;
    let link_sel = selector("a[href]")?;
    for card in document.select(&card_sel) {
        let Some(link) = card
            .select(&title_sel)
            .next()
            .or_else(|| card.select(&link_sel).next())
        else {
            continue;
        };
        let (Some(title), Some(url)) = (
            element_text(link),
            link.value().attr("href").and_then(|h| resolve_url(page_url, h)),
        ) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        postings.push(RawPosting {
            organization_name: select_first_text(card, ".job-card__employer, .employer")?,
            location: select_first_text(card, ".job-card__location, .location")?,
            salary: select_first_text(card, ".job-card__salary, .salary")?,
            start_date: select_first_text(card, ".job-card__start, .start-date")?,
            employment_hint: select_first_text(card, ".job-card__contract, .contract-type")?,
            ..RawPosting::new(title, url)
        });
    }

    let next_sel = selector(r#"a[rel="next"], link[rel="next"]"#)?;
    Ok(TesListing {
        has_next: document.select(&next_sel).next().is_some(),
        postings,
    })
}

fn job_posting_nodes(value: &JsonValue) -> Vec<&JsonValue> {
    match value {
        JsonValue::Array(items) => items.iter().flat_map(job_posting_nodes).collect(),
        JsonValue::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                return job_posting_nodes(graph);
            }
            if map.get("@type").and_then(JsonValue::as_str) == Some("ItemList") {
                return map
                    .get("itemListElement")
                    .and_then(JsonValue::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .flat_map(|item| job_posting_nodes(item.get("item").unwrap_or(item)))
                            .collect()
                    })
                    .unwrap_or_default();
            }
            if map.get("@type").and_then(JsonValue::as_str) == Some("JobPosting") {
                vec![value]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

fn posting_from_json_ld(node: &JsonValue, page_url: &str) -> Option<RawPosting> {
    let title = json_str(node, &["title"])?;
    let url = resolve_url(page_url, json_str(node, &["url"])?)?;
    let address = node
        .get("jobLocation")
        .map(|loc| match loc {
            JsonValue::Array(items) => items.first().unwrap_or(loc),
            _ => loc,
        })
        .and_then(|loc| loc.get("address"));
    let country = address.and_then(|a| {
        json_str(a, &["addressCountry"]).or_else(|| json_str(a, &["addressCountry", "name"]))
    });
    let employment = match node.get("employmentType") {
        Some(JsonValue::Array(kinds)) => {
            let kinds: Vec<&str> = kinds.iter().filter_map(JsonValue::as_str).collect();
            (!kinds.is_empty()).then(|| kinds.join(" "))
        }
        Some(JsonValue::String(kind)) => Some(kind.replace('_', " ")),
        _ => None,
    };
    Some(RawPosting {
        external_id: json_str(node, &["identifier", "value"]).map(str::to_string),
        location: join_location([
            address.and_then(|a| json_str(a, &["addressLocality"])),
            country,
        ]),
        description_html: json_str(node, &["description"]).map(str::to_string),
        organization_name: json_str(node, &["hiringOrganization", "name"]).map(str::to_string),
        employment_hint: employment,
        start_date: json_str(node, &["jobStartDate"]).map(str::to_string),
        salary: json_str(node, &["baseSalary", "value", "value"])
            .or_else(|| json_str(node, &["baseSalary", "description"]))
            .map(str::to_string),
        ..RawPosting::new(title, url)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
    <html><head>
      <script type="application/ld+json">
        {"@context":"https://schema.org","@graph":[
          {"@type":"JobPosting","title":"Teacher of English","url":"/jobs/job/teacher-of-english-1001",
           "hiringOrganization":{"@type":"Organization","name":"British School of Muscat"},
           "jobLocation":{"@type":"Place","address":{"addressLocality":"Muscat","addressCountry":"Oman"}},
           "employmentType":"FULL_TIME","description":"&lt;p&gt;Join us&lt;/p&gt;"},
          {"@type":"Organization","name":"TES"}
        ]}
      </script>
      <link rel="next" href="?page=2">
    </head><body>
      <article class="job-card">
        <h3><a href="/jobs/job/teacher-of-english-1001">Teacher of English</a></h3>
      </article>
      <article class="job-card">
        <h3><a href="/jobs/job/primary-teacher-1002">Primary Class Teacher</a></h3>
        <div class="job-card__employer">Garden International School</div>
        <div class="job-card__location">Kuala Lumpur, Malaysia</div>
        <div class="job-card__contract">Maternity cover</div>
      </article>
    </body></html>"#;

    #[test]
    fn json_ld_and_cards_merge_without_duplicates() {
        let listing = parse_listing(LISTING, "https://www.tes.com/jobs/browse/international?page=1").unwrap();
        assert!(listing.has_next);
        assert_eq!(listing.postings.len(), 2);

        let english = &listing.postings[0];
        assert_eq!(english.source_url, "https://www.tes.com/jobs/job/teacher-of-english-1001");
        assert_eq!(english.organization_name.as_deref(), Some("British School of Muscat"));
        assert_eq!(english.location.as_deref(), Some("Muscat, Oman"));
        assert_eq!(english.employment_hint.as_deref(), Some("FULL TIME"));

        let primary = &listing.postings[1];
        assert_eq!(primary.organization_name.as_deref(), Some("Garden International School"));
        assert_eq!(primary.employment_hint.as_deref(), Some("Maternity cover"));
    }

    #[test]
    fn listing_urls_need_a_page_placeholder() {
        assert!(TesSource::new("tes", "https://www.tes.com/jobs/browse").is_err());
        let source = TesSource::new("tes", "https://www.tes.com/jobs/browse?page={page}").unwrap();
        assert_eq!(source.page_url(3), "https://www.tes.com/jobs/browse?page=3");
    }
}

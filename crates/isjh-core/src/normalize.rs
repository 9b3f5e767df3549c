//! Mapping of heterogeneous raw postings into the canonical job schema.

use scraper::Html;
use thiserror::Error;
use uuid::Uuid;

use crate::tables::{
    contains_term, normalize_words, CountryEntry, LookupTables, UNKNOWN_COUNTRY_CODE,
    UNKNOWN_REGION,
};
use crate::{ContractType, JobCategory, JobStatus, NewJob, Organization, RawPosting};

pub const MAX_DESCRIPTION_CHARS: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub city: String,
    pub country: String,
    pub country_code: String,
    pub region: String,
}

impl Location {
    pub fn is_resolved(&self) -> bool {
        self.country_code != UNKNOWN_COUNTRY_CODE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("posting has an empty title (source {source_url})")]
    MissingTitle { source_url: String },
    #[error("posting `{title}` has no source url")]
    MissingSourceUrl { title: String },
}

#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'t> {
    tables: &'t LookupTables,
    max_description_chars: usize,
}

impl Normalizer<'static> {
    pub fn standard() -> Self {
        Self::new(LookupTables::standard())
    }
}

impl<'t> Normalizer<'t> {
    pub fn new(tables: &'t LookupTables) -> Self {
        Self {
            tables,
            max_description_chars: MAX_DESCRIPTION_CHARS,
        }
    }

    pub fn with_max_description_chars(mut self, max: usize) -> Self {
        self.max_description_chars = max.max(1);
        self
    }

    pub fn tables(&self) -> &'t LookupTables {
        self.tables
    }

    /// First matching rung of the ladder wins; no match falls back to the default category.
    pub fn infer_category(&self, title: &str) -> JobCategory {
        let title = normalize_words(title);
        self.tables
            .category_ladder
            .iter()
            .find(|(_, terms)| terms.iter().any(|t| contains_term(&title, t)))
            .map(|(category, _)| *category)
            .unwrap_or(self.tables.default_category)
    }

    pub fn infer_contract_type(&self, title: &str, hint: Option<&str>) -> ContractType {
        let text = normalize_words(&format!("{title} {}", hint.unwrap_or_default()));
        self.tables
            .contract_ladder
            .iter()
            .find(|(_, terms)| terms.iter().any(|t| contains_term(&text, t)))
            .map(|(contract, _)| *contract)
            .unwrap_or(ContractType::FullTime)
    }

    /// Exact (alias-tolerant) match first, then the longest whole-word containment.
    pub fn resolve_country(&self, text: &str) -> Option<&'t CountryEntry> {
        let trimmed = text.trim();
        let wanted = normalize_words(trimmed);
        if wanted.is_empty() {
            return None;
        }

        if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_uppercase()) {
            if let Some(entry) = self.tables.country_by_code(trimmed) {
                return Some(entry);
            }
        }

        let exact = self.tables.countries.iter().find(|entry| {
            normalize_words(entry.name) == wanted
                || entry.aliases.iter().any(|a| normalize_words(a) == wanted)
        });
        if exact.is_some() {
            return exact;
        }

        self.tables
            .countries
            .iter()
            .flat_map(|entry| {
                std::iter::once(entry.name)
                    .chain(entry.aliases.iter().copied())
                    .map(move |alias| (entry, alias))
            })
            .filter(|(_, alias)| alias.chars().count() >= 4 && contains_term(&wanted, alias))
            .max_by_key(|(_, alias)| alias.chars().count())
            .map(|(entry, _)| entry)
    }

    /// "City, Country" → parts; a single segment is both city and country.
    pub fn resolve_location(&self, raw: &str) -> Location {
        let segments: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
            return Location {
                city: String::new(),
                country: String::new(),
                country_code: UNKNOWN_COUNTRY_CODE.to_string(),
                region: UNKNOWN_REGION.to_string(),
            };
        };

        match self.resolve_country(last) {
            Some(entry) => Location {
                city: if segments.len() == 1 {
                    entry.name.to_string()
                } else {
                    first.to_string()
                },
                country: entry.name.to_string(),
                country_code: entry.code.to_string(),
                region: entry.region.to_string(),
            },
            None => Location {
                city: first.to_string(),
                country: last.to_string(),
                country_code: UNKNOWN_COUNTRY_CODE.to_string(),
                region: UNKNOWN_REGION.to_string(),
            },
        }
    }

    pub fn clean_description(&self, html: &str) -> String {
        let mut text = strip_markup(html);
        // Some APIs return entity-escaped markup; the first pass only decodes it.
        if looks_like_markup(&text) {
            text = strip_markup(&text);
        }
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        truncate_chars(&collapsed, self.max_description_chars)
    }

    pub fn normalize(
        &self,
        raw: &RawPosting,
        organization: &Organization,
        posted_by: Uuid,
        source_key: &str,
    ) -> Result<NewJob, NormalizeError> {
        let title = raw.title.split_whitespace().collect::<Vec<_>>().join(" ");
        if title.is_empty() {
            return Err(NormalizeError::MissingTitle {
                source_url: raw.source_url.clone(),
            });
        }
        let source_url = raw.source_url.trim().to_string();
        if source_url.is_empty() {
            return Err(NormalizeError::MissingSourceUrl { title });
        }

        let location = match raw.location.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => self.resolve_location(text),
            _ => self.organization_location(organization),
        };

        let description = raw
            .description_html
            .as_deref()
            .map(|html| self.clean_description(html))
            .unwrap_or_default();

        Ok(NewJob {
            category: self.infer_category(&title),
            contract_type: self.infer_contract_type(&title, raw.employment_hint.as_deref()),
            title,
            organization_id: organization.id,
            organization_name: organization.name.clone(),
            posted_by,
            city: location.city,
            country: location.country,
            country_code: location.country_code,
            region: location.region,
            description,
            application_url: raw
                .apply_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .unwrap_or(&source_url)
                .to_string(),
            salary: non_empty(raw.salary.as_deref()),
            start_date: non_empty(raw.start_date.as_deref()),
            status: JobStatus::Live,
            source_url,
            source_key: source_key.to_string(),
            content_hash: String::new(),
            harvested: true,
        })
    }

    fn organization_location(&self, organization: &Organization) -> Location {
        let region = if organization.region.is_empty() {
            self.tables.region_for(&organization.country_code).to_string()
        } else {
            organization.region.clone()
        };
        Location {
            city: organization
                .city
                .clone()
                .unwrap_or_else(|| organization.country.clone()),
            country: organization.country.clone(),
            country_code: organization.country_code.clone(),
            region,
        }
    }
}

fn strip_markup(input: &str) -> String {
    Html::parse_fragment(input)
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}

fn looks_like_markup(text: &str) -> bool {
    text.contains('<')
        && text.contains('>')
        && (text.contains("</") || text.contains("/>") || text.contains("<p") || text.contains("<br"))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept.trim_end())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org() -> Organization {
        let mut org = Organization::new("Harbourside International School", "Singapore", "SG")
            .with_city("Singapore");
        org.region = "Asia".into();
        org
    }

    #[test]
    fn category_inference_is_total_and_defaults_to_high_school() {
        let n = Normalizer::standard();
        assert_eq!(n.infer_category(""), JobCategory::HighSchool);
        assert_eq!(n.infer_category("Teacher of Mathematics"), JobCategory::HighSchool);
        assert_eq!(n.infer_category("Head of Primary"), JobCategory::Admin);
        assert_eq!(n.infer_category("Assistant Principal, Secondary"), JobCategory::Admin);
        assert_eq!(n.infer_category("Primary Teaching Assistant"), JobCategory::SupportStaff);
        assert_eq!(n.infer_category("Receptionist"), JobCategory::SupportStaff);
        assert_eq!(n.infer_category("Year 3 Class Teacher"), JobCategory::Elementary);
        assert_eq!(n.infer_category("MYP Science Teacher"), JobCategory::MiddleSchool);
        assert_eq!(n.infer_category("IB DP Chemistry Teacher"), JobCategory::HighSchool);
    }

    #[test]
    fn contract_type_prefers_part_time_then_contract() {
        let n = Normalizer::standard();
        assert_eq!(n.infer_contract_type("Part-Time Music Teacher", None), ContractType::PartTime);
        assert_eq!(
            n.infer_contract_type("English Teacher (Maternity Cover)", None),
            ContractType::Contract
        );
        assert_eq!(
            n.infer_contract_type("Art Teacher", Some("Fixed-term")),
            ContractType::Contract
        );
        assert_eq!(n.infer_contract_type("Art Teacher", Some("Full time")), ContractType::FullTime);
    }

    #[test]
    fn location_resolution_matches_documented_examples() {
        let n = Normalizer::standard();
        let dubai = n.resolve_location("Dubai, United Arab Emirates");
        assert_eq!(dubai.city, "Dubai");
        assert_eq!(dubai.country, "United Arab Emirates");
        assert_eq!(dubai.country_code, "AE");
        assert_eq!(dubai.region, "Middle East");

        let sg = n.resolve_location("Singapore");
        assert_eq!(sg.city, "Singapore");
        assert_eq!(sg.country, "Singapore");
        assert_eq!(sg.country_code, "SG");

        let alias = n.resolve_location("Abu Dhabi, UAE");
        assert_eq!(alias.country, "United Arab Emirates");

        let contained = n.resolve_location("Seoul, Republic of Korea (South)");
        assert_eq!(contained.country_code, "KR");

        let unknown = n.resolve_location("Atlantis, Lost Continent");
        assert_eq!(unknown.country_code, UNKNOWN_COUNTRY_CODE);
        assert_eq!(unknown.country, "Lost Continent");
        assert!(!unknown.is_resolved());
    }

    #[test]
    fn description_strips_tags_entities_and_escaped_markup() {
        let n = Normalizer::standard().with_max_description_chars(40);
        assert_eq!(
            n.clean_description("<p>Join&nbsp;our <b>team</b> &amp; grow</p>"),
            "Join our team & grow"
        );
        assert_eq!(
            n.clean_description("&lt;p&gt;Escaped &lt;strong&gt;content&lt;/strong&gt;&lt;/p&gt;"),
            "Escaped content"
        );
        let long = "word ".repeat(40);
        let cleaned = n.clean_description(&long);
        assert_eq!(cleaned.chars().count(), 40);
        assert!(cleaned.ends_with('…'));
    }

    #[test]
    fn normalize_falls_back_to_organization_location() {
        let n = Normalizer::standard();
        let mut raw = RawPosting::new("  Grade 4   Teacher ", "https://example.test/jobs/1");
        raw.salary = Some("  ".into());
        let job = n.normalize(&raw, &org(), Uuid::nil(), "greenhouse:harbourside").unwrap();
        assert_eq!(job.title, "Grade 4 Teacher");
        assert_eq!(job.category, JobCategory::Elementary);
        assert_eq!(job.city, "Singapore");
        assert_eq!(job.country_code, "SG");
        assert_eq!(job.application_url, "https://example.test/jobs/1");
        assert_eq!(job.salary, None);
        assert_eq!(job.status, JobStatus::Live);
        assert!(job.harvested);
    }

    #[test]
    fn normalize_rejects_blank_title() {
        let n = Normalizer::standard();
        let raw = RawPosting::new("   ", "https://example.test/jobs/2");
        assert!(matches!(
            n.normalize(&raw, &org(), Uuid::nil(), "k"),
            Err(NormalizeError::MissingTitle { .. })
        ));
    }
}

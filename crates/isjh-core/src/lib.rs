//! Core domain model for ISJH: organizations, harvested jobs, run records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod candidates;
pub mod normalize;
pub mod tables;

pub use candidates::{generate_candidates, CandidateSet, DomainCandidate};
pub use normalize::{Location, NormalizeError, Normalizer};
pub use tables::LookupTables;

pub const CRATE_NAME: &str = "isjh-core";

/// External surfaces a school can publish vacancies through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Greenhouse,
    Lever,
    Workable,
    Workday,
    SmartRecruiters,
    BambooHr,
    Tes,
    Html,
}

impl Platform {
    pub const ATS: [Platform; 6] = [
        Platform::Greenhouse,
        Platform::Lever,
        Platform::Workable,
        Platform::SmartRecruiters,
        Platform::BambooHr,
        Platform::Workday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Greenhouse => "greenhouse",
            Platform::Lever => "lever",
            Platform::Workable => "workable",
            Platform::Workday => "workday",
            Platform::SmartRecruiters => "smartrecruiters",
            Platform::BambooHr => "bamboohr",
            Platform::Tes => "tes",
            Platform::Html => "html",
        }
    }

    /// True for platforms with an account-scoped postings endpoint.
    pub fn is_ats(&self) -> bool {
        Self::ATS.contains(self)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform `{0}`")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "greenhouse" => Ok(Platform::Greenhouse),
            "lever" => Ok(Platform::Lever),
            "workable" => Ok(Platform::Workable),
            "workday" => Ok(Platform::Workday),
            "smartrecruiters" => Ok(Platform::SmartRecruiters),
            "bamboohr" => Ok(Platform::BambooHr),
            "tes" => Ok(Platform::Tes),
            "html" => Ok(Platform::Html),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

/// A platform account confirmed by probe + identity verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtsIdentity {
    pub platform: Platform,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub city: Option<String>,
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub website_domain: Option<String>,
    pub career_page_url: Option<String>,
    pub ats: Option<AtsIdentity>,
    pub detected_signature: Option<Platform>,
    pub website_discovered_at: Option<DateTime<Utc>>,
    pub career_page_discovered_at: Option<DateTime<Utc>>,
    pub ats_discovered_at: Option<DateTime<Utc>>,
}

impl Organization {
    pub fn new(name: impl Into<String>, country: impl Into<String>, country_code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            city: None,
            country: country.into(),
            country_code: country_code.into(),
            region: String::new(),
            website_domain: None,
            career_page_url: None,
            ats: None,
            detected_signature: None,
            website_discovered_at: None,
            career_page_discovered_at: None,
            ats_discovered_at: None,
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Record a verified platform account. A confirmed pair is replaced only by another
    /// confirmed pair, and the weaker signature tag is cleared once a pair exists.
    pub fn confirm_ats(&mut self, identity: AtsIdentity, at: DateTime<Utc>) {
        self.ats = Some(identity);
        self.detected_signature = None;
        self.ats_discovered_at = Some(at);
    }

    /// Returns false (and changes nothing) when an ATS pair is already confirmed.
    pub fn record_signature(&mut self, platform: Platform) -> bool {
        if self.ats.is_some() {
            return false;
        }
        self.detected_signature = Some(platform);
        true
    }

    pub fn record_website(&mut self, domain: impl Into<String>, at: DateTime<Utc>) {
        self.website_domain = Some(domain.into());
        self.website_discovered_at = Some(at);
    }

    pub fn record_career_page(&mut self, url: impl Into<String>, at: DateTime<Utc>) {
        self.career_page_url = Some(url.into());
        self.career_page_discovered_at = Some(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobCategory {
    Elementary,
    MiddleSchool,
    HighSchool,
    Admin,
    SupportStaff,
}

impl JobCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCategory::Elementary => "elementary",
            JobCategory::MiddleSchool => "middle-school",
            JobCategory::HighSchool => "high-school",
            JobCategory::Admin => "admin",
            JobCategory::SupportStaff => "support-staff",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractType {
    FullTime,
    PartTime,
    Contract,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::FullTime => "full-time",
            ContractType::PartTime => "part-time",
            ContractType::Contract => "contract",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Live,
    Pending,
    TakenDown,
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Live => "live",
            JobStatus::Pending => "pending",
            JobStatus::TakenDown => "taken-down",
            JobStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "live" => Some(JobStatus::Live),
            "pending" => Some(JobStatus::Pending),
            "taken-down" => Some(JobStatus::TakenDown),
            "expired" => Some(JobStatus::Expired),
            _ => None,
        }
    }
}

/// Pre-normalized handoff contract from probes and extractors into the harvest pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawPosting {
    pub external_id: Option<String>,
    pub title: String,
    /// Free-form "City, Country" text as the source presents it.
    pub location: Option<String>,
    pub description_html: Option<String>,
    pub apply_url: Option<String>,
    pub source_url: String,
    /// Employment-type label from the source (e.g. Lever `commitment`).
    pub employment_hint: Option<String>,
    pub department: Option<String>,
    pub salary: Option<String>,
    pub start_date: Option<String>,
    /// Employer as named by a multi-employer board; absent for account-scoped sources.
    pub organization_name: Option<String>,
}

impl RawPosting {
    pub fn new(title: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source_url: source_url.into(),
            ..Default::default()
        }
    }
}

/// Canonical record ready for insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub title: String,
    pub organization_id: Uuid,
    pub organization_name: String,
    pub posted_by: Uuid,
    pub city: String,
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub category: JobCategory,
    pub contract_type: ContractType,
    pub description: String,
    pub application_url: String,
    pub salary: Option<String>,
    pub start_date: Option<String>,
    pub status: JobStatus,
    pub source_url: String,
    pub source_key: String,
    pub content_hash: String,
    pub harvested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestedJob {
    pub id: Uuid,
    pub title: String,
    pub organization_id: Uuid,
    pub status: JobStatus,
    pub source_url: Option<String>,
    pub source_key: String,
    pub content_hash: String,
    pub harvested: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub takedown_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HarvestedJob {
    pub fn from_new(id: Uuid, job: &NewJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: job.title.clone(),
            organization_id: job.organization_id,
            status: job.status,
            source_url: Some(job.source_url.clone()),
            source_key: job.source_key.clone(),
            content_hash: job.content_hash.clone(),
            harvested: job.harvested,
            last_checked_at: None,
            consecutive_failures: 0,
            takedown_reason: None,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunType {
    Harvest,
    LivenessCheck,
    Discovery,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Harvest => "harvest",
            RunType::LivenessCheck => "liveness-check",
            RunType::Discovery => "discovery",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub jobs_found: usize,
    pub jobs_new: usize,
    pub jobs_skipped: usize,
    pub jobs_unmatched: usize,
    pub checked: usize,
    pub live: usize,
    pub taken_down: usize,
    pub failed: usize,
    pub organizations_scanned: usize,
    pub identities_confirmed: usize,
    pub signatures_detected: usize,
    pub websites_found: usize,
    pub career_pages_found: usize,
}

/// Per-source outcome inside a harvest run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source_key: String,
    pub pages: usize,
    pub jobs_found: usize,
    pub jobs_new: usize,
    pub jobs_skipped: usize,
    pub jobs_unmatched: usize,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub run_type: RunType,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub counters: RunCounters,
    pub sources: Vec<SourceSummary>,
    pub errors: Vec<String>,
}

impl RunRecord {
    pub fn finish(
        run_type: RunType,
        started_at: DateTime<Utc>,
        dry_run: bool,
        counters: RunCounters,
        sources: Vec<SourceSummary>,
        errors: Vec<String>,
    ) -> Self {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            id: Uuid::new_v4(),
            run_type,
            started_at,
            finished_at,
            duration_ms,
            dry_run,
            counters,
            sources,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_never_overwrites_confirmed_identity() {
        let mut org = Organization::new("Acme International School", "Singapore", "SG");
        assert!(org.record_signature(Platform::Lever));
        org.confirm_ats(
            AtsIdentity {
                platform: Platform::Greenhouse,
                slug: "acmeschool".into(),
            },
            Utc::now(),
        );
        assert_eq!(org.detected_signature, None);
        assert!(!org.record_signature(Platform::Workable));
        assert_eq!(org.detected_signature, None);
        assert_eq!(org.ats.as_ref().map(|a| a.platform), Some(Platform::Greenhouse));
    }

    #[test]
    fn enums_serialize_in_kebab_case() {
        assert_eq!(
            serde_json::to_string(&JobCategory::MiddleSchool).unwrap(),
            "\"middle-school\""
        );
        assert_eq!(serde_json::to_string(&JobStatus::TakenDown).unwrap(), "\"taken-down\"");
        assert_eq!(serde_json::to_string(&RunType::LivenessCheck).unwrap(), "\"liveness-check\"");
        assert_eq!("SmartRecruiters".parse::<Platform>(), Ok(Platform::SmartRecruiters));
        assert!("indeed".parse::<Platform>().is_err());
    }
}

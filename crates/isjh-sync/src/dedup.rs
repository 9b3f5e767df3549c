//! Content-hash deduplication and employer-name resolution for multi-employer boards.

use std::collections::HashSet;

use isjh_core::tables::normalize_words;
use isjh_core::{NewJob, Organization};
use isjh_storage::{sha256_hex, HarvestStore, StoreError};
use strsim::jaro_winkler;
use tracing::debug;
use uuid::Uuid;

/// Minimum Jaro–Winkler similarity for a fuzzy employer match.
pub const ORG_MATCH_THRESHOLD: f64 = 0.93;

/// Stable fingerprint of (title, organization, source URL), insensitive to case and outer whitespace.
pub fn content_hash(title: &str, organization_name: &str, source_url: &str) -> String {
    let key = format!(
        "{}|{}|{}",
        title.trim().to_lowercase(),
        organization_name.trim().to_lowercase(),
        source_url.trim().to_lowercase()
    );
    sha256_hex(key.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// `None` in dry-run mode, where nothing is written.
    New(Option<Uuid>),
    Skipped,
}

pub struct Deduplicator<'a> {
    store: &'a dyn HarvestStore,
    dry_run: bool,
    /// Hashes a dry run would have inserted so far.
    unwritten: HashSet<String>,
}

impl<'a> Deduplicator<'a> {
    pub fn new(store: &'a dyn HarvestStore, dry_run: bool) -> Self {
        Self {
            store,
            dry_run,
            unwritten: HashSet::new(),
        }
    }

    /// Stamp the content hash and insert unless a record with that hash already exists.
    pub async fn admit(&mut self, mut job: NewJob) -> Result<Admission, StoreError> {
        job.content_hash = content_hash(&job.title, &job.organization_name, &job.source_url);
        if self.unwritten.contains(&job.content_hash) || self.store.job_exists(&job.content_hash).await? {
            return Ok(Admission::Skipped);
        }
        if self.dry_run {
            self.unwritten.insert(job.content_hash);
            return Ok(Admission::New(None));
        }
        match self.store.insert_job(&job).await {
            Ok(id) => Ok(Admission::New(Some(id))),
            Err(StoreError::UniqueViolation(what)) => {
                debug!(%what, "lost insert race; counting as skipped");
                Ok(Admission::Skipped)
            }
            Err(err) => Err(err),
        }
    }
}

/// Resolves an employer name from a job board against stored organizations.
pub struct OrganizationMatcher {
    entries: Vec<(String, Organization)>,
}

impl OrganizationMatcher {
    pub fn new(organizations: Vec<Organization>) -> Self {
        Self {
            entries: organizations
                .into_iter()
                .map(|org| (normalize_words(&org.name), org))
                .collect(),
        }
    }

    /// Exact normalized name first, then the best fuzzy score at or above the threshold.
    pub fn resolve(&self, employer: &str) -> Option<&Organization> {
        let wanted = normalize_words(employer);
        if wanted.is_empty() {
            return None;
        }
        if let Some((_, org)) = self.entries.iter().find(|(name, _)| *name == wanted) {
            return Some(org);
        }
        self.entries
            .iter()
            .map(|(name, org)| (jaro_winkler(name, &wanted), org))
            .filter(|(score, _)| *score >= ORG_MATCH_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, org)| org)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isjh_core::{ContractType, JobCategory, JobStatus};
    use isjh_storage::MemoryStore;

    fn job(title: &str) -> NewJob {
        NewJob {
            title: title.into(),
            organization_id: Uuid::nil(),
            organization_name: "Seaview Academy".into(),
            posted_by: Uuid::nil(),
            city: "Lima".into(),
            country: "Peru".into(),
            country_code: "PE".into(),
            region: "Latin America".into(),
            category: JobCategory::HighSchool,
            contract_type: ContractType::FullTime,
            description: String::new(),
            application_url: "https://seaview.test/jobs/1".into(),
            salary: None,
            start_date: None,
            status: JobStatus::Live,
            source_url: "https://seaview.test/jobs/1".into(),
            source_key: "html:https://seaview.test/jobs".into(),
            content_hash: String::new(),
            harvested: true,
        }
    }

    #[test]
    fn hash_ignores_case_and_outer_whitespace() {
        assert_eq!(
            content_hash(" Math Teacher ", "ABC", "http://X"),
            content_hash("math teacher", "abc", "http://x")
        );
        assert_ne!(
            content_hash("Math Teacher", "ABC", "http://x/1"),
            content_hash("Math Teacher", "ABC", "http://x/2")
        );
    }

    #[tokio::test]
    async fn second_admission_of_the_same_posting_is_skipped() {
        let store = MemoryStore::new();
        let mut dedup = Deduplicator::new(&store, false);
        assert!(matches!(dedup.admit(job("Biology Teacher")).await.unwrap(), Admission::New(Some(_))));
        assert_eq!(dedup.admit(job("biology teacher ")).await.unwrap(), Admission::Skipped);
        assert_eq!(store.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn dry_run_checks_existence_but_never_inserts() {
        let store = MemoryStore::new();
        let mut dedup = Deduplicator::new(&store, true);
        assert_eq!(dedup.admit(job("Biology Teacher")).await.unwrap(), Admission::New(None));
        assert!(store.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn dry_run_counts_a_repeated_posting_once() {
        let store = MemoryStore::new();
        let mut dedup = Deduplicator::new(&store, true);
        assert_eq!(dedup.admit(job("Art Teacher")).await.unwrap(), Admission::New(None));
        assert_eq!(dedup.admit(job(" ART TEACHER")).await.unwrap(), Admission::Skipped);
        assert_eq!(dedup.admit(job("Music Teacher")).await.unwrap(), Admission::New(None));
        assert!(store.jobs().await.is_empty());
    }

    #[test]
    fn employer_names_resolve_exactly_then_fuzzily() {
        let matcher = OrganizationMatcher::new(vec![
            Organization::new("British School of Muscat", "Oman", "OM"),
            Organization::new("Garden International School", "Malaysia", "MY"),
        ]);
        assert_eq!(
            matcher.resolve("british school of muscat").map(|o| o.country_code.as_str()),
            Some("OM")
        );
        assert_eq!(
            matcher.resolve("Garden International Schools").map(|o| o.country_code.as_str()),
            Some("MY")
        );
        assert!(matcher.resolve("Riverside Primary").is_none());
        assert!(matcher.resolve("  ").is_none());
    }
}

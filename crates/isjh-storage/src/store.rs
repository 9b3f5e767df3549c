//! Persistent store contract plus an in-memory implementation with the same uniqueness rules.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use isjh_core::{
    HarvestedJob, JobStatus, NewJob, Organization, Platform, RunRecord, RunType,
};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrganizationScope {
    #[default]
    All,
    /// No confirmed ATS pair yet.
    NeedsDiscovery,
    /// Confirmed ATS pair or a known career page.
    Harvestable,
}

#[derive(Debug, Clone, Default)]
pub struct OrganizationFilter {
    pub scope: OrganizationScope,
    pub country_code: Option<String>,
    /// Confirmed ATS platform; `Platform::Html` selects career-page-only organizations.
    pub platform: Option<Platform>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl OrganizationFilter {
    pub fn matches(&self, org: &Organization) -> bool {
        let in_scope = match self.scope {
            OrganizationScope::All => true,
            OrganizationScope::NeedsDiscovery => org.ats.is_none(),
            OrganizationScope::Harvestable => org.ats.is_some() || org.career_page_url.is_some(),
        };
        let country_ok = self
            .country_code
            .as_deref()
            .map(|cc| org.country_code.eq_ignore_ascii_case(cc))
            .unwrap_or(true);
        let platform_ok = match self.platform {
            None => true,
            Some(Platform::Html) => org.ats.is_none() && org.career_page_url.is_some(),
            Some(platform) => org.ats.as_ref().map(|a| a.platform) == Some(platform),
        };
        in_scope && country_ok && platform_ok
    }
}

/// Result of one liveness check, applied atomically per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessUpdate {
    pub job_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub status: JobStatus,
    pub takedown_reason: Option<String>,
}

#[async_trait]
pub trait HarvestStore: Send + Sync {
    /// Ordered by name then id so offset/limit windows are stable across runs.
    async fn list_organizations(
        &self,
        filter: &OrganizationFilter,
    ) -> Result<Vec<Organization>, StoreError>;

    /// Persist discovery fields (website, career page, ATS pair, signature, timestamps).
    async fn update_organization_identity(&self, org: &Organization) -> Result<(), StoreError>;

    async fn job_exists(&self, content_hash: &str) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::UniqueViolation`] when the content hash is already stored.
    async fn insert_job(&self, job: &NewJob) -> Result<Uuid, StoreError>;

    /// Live, harvested jobs that carry a source URL.
    async fn live_harvested_jobs(&self) -> Result<Vec<HarvestedJob>, StoreError>;

    /// Never revives a taken-down job.
    async fn apply_liveness(&self, update: &LivenessUpdate) -> Result<(), StoreError>;

    async fn append_run(&self, run: &RunRecord) -> Result<(), StoreError>;

    /// Identity harvested postings are attributed to.
    async fn admin_user_id(&self) -> Result<Option<Uuid>, StoreError>;

    /// False when another invocation of the same run type holds the lock.
    async fn acquire_run_lock(&self, run_type: RunType) -> Result<bool, StoreError>;

    async fn release_run_lock(&self, run_type: RunType) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    organizations: Vec<Organization>,
    jobs: Vec<(NewJob, HarvestedJob)>,
    runs: Vec<RunRecord>,
    admin: Option<Uuid>,
    locks: HashSet<RunType>,
}

/// In-memory store used by tests and offline runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admin(self, admin: Uuid) -> Self {
        self.state.try_lock().map(|mut s| s.admin = Some(admin)).ok();
        self
    }

    pub fn with_organizations(self, organizations: Vec<Organization>) -> Self {
        self.state
            .try_lock()
            .map(|mut s| s.organizations = organizations)
            .ok();
        self
    }

    pub async fn organizations(&self) -> Vec<Organization> {
        self.state.lock().await.organizations.clone()
    }

    pub async fn organization(&self, id: Uuid) -> Option<Organization> {
        self.state
            .lock()
            .await
            .organizations
            .iter()
            .find(|o| o.id == id)
            .cloned()
    }

    pub async fn inserted_jobs(&self) -> Vec<NewJob> {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .map(|(new, _)| new.clone())
            .collect()
    }

    pub async fn jobs(&self) -> Vec<HarvestedJob> {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .map(|(_, job)| job.clone())
            .collect()
    }

    pub async fn job(&self, id: Uuid) -> Option<HarvestedJob> {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .find(|(_, job)| job.id == id)
            .map(|(_, job)| job.clone())
    }

    pub async fn runs(&self) -> Vec<RunRecord> {
        self.state.lock().await.runs.clone()
    }
}

#[async_trait]
impl HarvestStore for MemoryStore {
    async fn list_organizations(
        &self,
        filter: &OrganizationFilter,
    ) -> Result<Vec<Organization>, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<Organization> = state
            .organizations
            .iter()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn update_organization_identity(&self, org: &Organization) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let existing = state
            .organizations
            .iter_mut()
            .find(|o| o.id == org.id)
            .ok_or_else(|| StoreError::NotFound(format!("organization {}", org.id)))?;
        *existing = org.clone();
        Ok(())
    }

    async fn job_exists(&self, content_hash: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .any(|(_, job)| job.content_hash == content_hash))
    }

    async fn insert_job(&self, job: &NewJob) -> Result<Uuid, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .jobs
            .iter()
            .any(|(_, existing)| existing.content_hash == job.content_hash)
        {
            return Err(StoreError::UniqueViolation(format!(
                "jobs.content_hash = {}",
                job.content_hash
            )));
        }
        let id = Uuid::new_v4();
        let harvested = HarvestedJob::from_new(id, job, Utc::now());
        state.jobs.push((job.clone(), harvested));
        Ok(id)
    }

    async fn live_harvested_jobs(&self) -> Result<Vec<HarvestedJob>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .map(|(_, job)| job)
            .filter(|job| {
                job.status == JobStatus::Live
                    && job.harvested
                    && job.source_url.as_deref().is_some_and(|u| !u.trim().is_empty())
            })
            .cloned()
            .collect())
    }

    async fn apply_liveness(&self, update: &LivenessUpdate) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let (_, job) = state
            .jobs
            .iter_mut()
            .find(|(_, job)| job.id == update.job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", update.job_id)))?;
        job.last_checked_at = Some(update.checked_at);
        job.consecutive_failures = update.consecutive_failures;
        if job.status != JobStatus::TakenDown {
            job.status = update.status;
            if update.takedown_reason.is_some() {
                job.takedown_reason = update.takedown_reason.clone();
            }
        }
        Ok(())
    }

    async fn append_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        self.state.lock().await.runs.push(run.clone());
        Ok(())
    }

    async fn admin_user_id(&self) -> Result<Option<Uuid>, StoreError> {
        Ok(self.state.lock().await.admin)
    }

    async fn acquire_run_lock(&self, run_type: RunType) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.locks.insert(run_type))
    }

    async fn release_run_lock(&self, run_type: RunType) -> Result<(), StoreError> {
        self.state.lock().await.locks.remove(&run_type);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isjh_core::{AtsIdentity, ContractType, JobCategory};

    fn new_job(hash: &str) -> NewJob {
        NewJob {
            title: "Physics Teacher".into(),
            organization_id: Uuid::nil(),
            organization_name: "Harbourside".into(),
            posted_by: Uuid::nil(),
            city: "Singapore".into(),
            country: "Singapore".into(),
            country_code: "SG".into(),
            region: "Asia".into(),
            category: JobCategory::HighSchool,
            contract_type: ContractType::FullTime,
            description: String::new(),
            application_url: "https://example.test/1".into(),
            salary: None,
            start_date: None,
            status: JobStatus::Live,
            source_url: "https://example.test/1".into(),
            source_key: "greenhouse:harbourside".into(),
            content_hash: hash.into(),
            harvested: true,
        }
    }

    #[tokio::test]
    async fn duplicate_hash_is_a_unique_violation() {
        let store = MemoryStore::new();
        store.insert_job(&new_job("abc")).await.unwrap();
        assert!(store.job_exists("abc").await.unwrap());
        assert!(matches!(
            store.insert_job(&new_job("abc")).await,
            Err(StoreError::UniqueViolation(_))
        ));
        assert_eq!(store.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn taken_down_jobs_are_never_revived() {
        let store = MemoryStore::new();
        let id = store.insert_job(&new_job("abc")).await.unwrap();
        let now = Utc::now();
        store
            .apply_liveness(&LivenessUpdate {
                job_id: id,
                checked_at: now,
                consecutive_failures: 3,
                status: JobStatus::TakenDown,
                takedown_reason: Some("HTTP 404".into()),
            })
            .await
            .unwrap();
        store
            .apply_liveness(&LivenessUpdate {
                job_id: id,
                checked_at: now,
                consecutive_failures: 0,
                status: JobStatus::Live,
                takedown_reason: None,
            })
            .await
            .unwrap();
        let job = store.job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::TakenDown);
        assert_eq!(job.takedown_reason.as_deref(), Some("HTTP 404"));
        assert!(store.live_harvested_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn organization_filter_scopes_and_pages() {
        let mut confirmed = Organization::new("Beta School", "Japan", "JP");
        confirmed.ats = Some(AtsIdentity {
            platform: Platform::Lever,
            slug: "betaschool".into(),
        });
        let mut career_only = Organization::new("Alpha School", "Japan", "JP");
        career_only.career_page_url = Some("https://alpha.test/careers".into());
        let bare = Organization::new("Gamma School", "Thailand", "TH");
        let store = MemoryStore::new().with_organizations(vec![confirmed, career_only, bare]);

        let harvestable = store
            .list_organizations(&OrganizationFilter {
                scope: OrganizationScope::Harvestable,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            harvestable.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
            vec!["Alpha School", "Beta School"]
        );

        let html_only = store
            .list_organizations(&OrganizationFilter {
                platform: Some(Platform::Html),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(html_only.len(), 1);

        let paged = store
            .list_organizations(&OrganizationFilter {
                offset: 1,
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paged[0].name, "Beta School");

        let needs = store
            .list_organizations(&OrganizationFilter {
                scope: OrganizationScope::NeedsDiscovery,
                country_code: Some("th".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(needs.len(), 1);
        assert_eq!(needs[0].name, "Gamma School");
    }

    #[tokio::test]
    async fn run_lock_is_exclusive_per_run_type() {
        let store = MemoryStore::new();
        assert!(store.acquire_run_lock(RunType::Harvest).await.unwrap());
        assert!(!store.acquire_run_lock(RunType::Harvest).await.unwrap());
        assert!(store.acquire_run_lock(RunType::LivenessCheck).await.unwrap());
        store.release_run_lock(RunType::Harvest).await.unwrap();
        assert!(store.acquire_run_lock(RunType::Harvest).await.unwrap());
    }
}

//! `HarvestStore` backed by Postgres through sqlx.
//!
//! Tables are owned by the surrounding application's migrations; this module only reads
//! and writes the columns the pipeline needs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use isjh_core::{
    AtsIdentity, HarvestedJob, JobStatus, NewJob, Organization, Platform, RunRecord, RunType,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{HarvestStore, LivenessUpdate, OrganizationFilter, OrganizationScope, StoreError};

/// Locks older than this are assumed to belong to a crashed run.
pub const DEFAULT_STALE_LOCK_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    stale_lock_after: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            stale_lock_after: DEFAULT_STALE_LOCK_AFTER,
        }
    }

    /// Connect and verify the database answers before any run starts.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn map_insert_error(err: sqlx::Error, what: String) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::UniqueViolation(what),
        _ => StoreError::Database(err),
    }
}

fn organization_from_row(row: &PgRow) -> Result<Organization, StoreError> {
    let ats_platform: Option<String> = row.try_get("ats_platform")?;
    let ats_slug: Option<String> = row.try_get("ats_slug")?;
    let ats = match (ats_platform, ats_slug) {
        (Some(platform), Some(slug)) => Some(AtsIdentity {
            platform: platform
                .parse::<Platform>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            slug,
        }),
        _ => None,
    };
    let detected_signature = row
        .try_get::<Option<String>, _>("detected_signature")?
        .map(|s| s.parse::<Platform>())
        .transpose()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(Organization {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        city: row.try_get("city")?,
        country: row.try_get("country")?,
        country_code: row.try_get("country_code")?,
        region: row.try_get("region")?,
        website_domain: row.try_get("website_domain")?,
        career_page_url: row.try_get("career_page_url")?,
        ats,
        detected_signature,
        website_discovered_at: row.try_get("website_discovered_at")?,
        career_page_discovered_at: row.try_get("career_page_discovered_at")?,
        ats_discovered_at: row.try_get("ats_discovered_at")?,
    })
}

fn harvested_job_from_row(row: &PgRow) -> Result<HarvestedJob, StoreError> {
    let status: String = row.try_get("status")?;
    let failures: i32 = row.try_get("consecutive_failures")?;
    Ok(HarvestedJob {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        organization_id: row.try_get("school_id")?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("job status `{status}`")))?,
        source_url: row.try_get("source_url")?,
        source_key: row.try_get("source_key")?,
        content_hash: row.try_get("content_hash")?,
        harvested: row.try_get("is_harvested")?,
        last_checked_at: row.try_get("last_checked_at")?,
        consecutive_failures: failures.max(0) as u32,
        takedown_reason: row.try_get("takedown_reason")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl HarvestStore for PgStore {
    async fn list_organizations(
        &self,
        filter: &OrganizationFilter,
    ) -> Result<Vec<Organization>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT id, name, city, country, country_code, region, website_domain,
                   career_page_url, ats_platform, ats_slug, detected_signature,
                   website_discovered_at, career_page_discovered_at, ats_discovered_at
              FROM schools
             WHERE TRUE
            "#,
        );
        match filter.scope {
            OrganizationScope::All => {}
            OrganizationScope::NeedsDiscovery => {
                qb.push(" AND ats_slug IS NULL");
            }
            OrganizationScope::Harvestable => {
                qb.push(" AND (ats_slug IS NOT NULL OR career_page_url IS NOT NULL)");
            }
        }
        if let Some(cc) = &filter.country_code {
            qb.push(" AND upper(country_code) = upper(")
                .push_bind(cc.clone())
                .push(")");
        }
        match filter.platform {
            None => {}
            Some(Platform::Html) => {
                qb.push(" AND ats_slug IS NULL AND career_page_url IS NOT NULL");
            }
            Some(platform) => {
                qb.push(" AND ats_platform = ")
                    .push_bind(platform.as_str())
                    .push(" AND ats_slug IS NOT NULL");
            }
        }
        qb.push(" ORDER BY name, id OFFSET ")
            .push_bind(filter.offset as i64);
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(organization_from_row).collect()
    }

    async fn update_organization_identity(&self, org: &Organization) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE schools
               SET website_domain = $2,
                   career_page_url = $3,
                   ats_platform = $4,
                   ats_slug = $5,
                   detected_signature = CASE WHEN $5::text IS NULL THEN $6 ELSE NULL END,
                   website_discovered_at = $7,
                   career_page_discovered_at = $8,
                   ats_discovered_at = $9
             WHERE id = $1
            "#,
        )
        .bind(org.id)
        .bind(&org.website_domain)
        .bind(&org.career_page_url)
        .bind(org.ats.as_ref().map(|a| a.platform.as_str()))
        .bind(org.ats.as_ref().map(|a| a.slug.clone()))
        .bind(org.detected_signature.map(|p| p.as_str()))
        .bind(org.website_discovered_at)
        .bind(org.career_page_discovered_at)
        .bind(org.ats_discovered_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("school {}", org.id)));
        }
        Ok(())
    }

    async fn job_exists(&self, content_hash: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM jobs WHERE content_hash = $1) AS present")
            .bind(content_hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("present")?)
    }

    async fn insert_job(&self, job: &NewJob) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, title, school_id, school_name, posted_by, city, country, country_code,
                region, category, contract_type, description, application_url, salary,
                start_date, status, source_url, source_key, content_hash, is_harvested,
                consecutive_failures, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, 0, NOW()
            )
            "#,
        )
        .bind(id)
        .bind(&job.title)
        .bind(job.organization_id)
        .bind(&job.organization_name)
        .bind(job.posted_by)
        .bind(&job.city)
        .bind(&job.country)
        .bind(&job.country_code)
        .bind(&job.region)
        .bind(job.category.as_str())
        .bind(job.contract_type.as_str())
        .bind(&job.description)
        .bind(&job.application_url)
        .bind(&job.salary)
        .bind(&job.start_date)
        .bind(job.status.as_str())
        .bind(&job.source_url)
        .bind(&job.source_key)
        .bind(&job.content_hash)
        .bind(job.harvested)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, format!("jobs.content_hash = {}", job.content_hash)))?;
        Ok(id)
    }

    async fn live_harvested_jobs(&self) -> Result<Vec<HarvestedJob>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, school_id, status, source_url, source_key, content_hash,
                   is_harvested, last_checked_at, consecutive_failures, takedown_reason,
                   created_at
              FROM jobs
             WHERE status = 'live'
               AND is_harvested
               AND source_url IS NOT NULL
               AND btrim(source_url) <> ''
             ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(harvested_job_from_row).collect()
    }

    async fn apply_liveness(&self, update: &LivenessUpdate) -> Result<(), StoreError> {
        // SET expressions see the pre-update row, so a taken-down job keeps its status and reason.
        let result = sqlx::query(
            r#"
            UPDATE jobs
               SET last_checked_at = $2,
                   consecutive_failures = $3,
                   status = CASE WHEN status = 'taken-down' THEN status ELSE $4 END,
                   takedown_reason = CASE
                       WHEN status <> 'taken-down' AND $5::text IS NOT NULL THEN $5
                       ELSE takedown_reason
                   END
             WHERE id = $1
            "#,
        )
        .bind(update.job_id)
        .bind(update.checked_at)
        .bind(update.consecutive_failures.min(i32::MAX as u32) as i32)
        .bind(update.status.as_str())
        .bind(&update.takedown_reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("job {}", update.job_id)));
        }
        Ok(())
    }

    async fn append_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        let counters = serde_json::to_value(&run.counters)
            .map_err(|e| StoreError::Corrupt(format!("run counters: {e}")))?;
        let sources = serde_json::to_value(&run.sources)
            .map_err(|e| StoreError::Corrupt(format!("run sources: {e}")))?;
        let errors = serde_json::to_value(&run.errors)
            .map_err(|e| StoreError::Corrupt(format!("run errors: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO harvest_runs (
                id, run_type, started_at, finished_at, duration_ms, dry_run,
                counters, sources, errors
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(run.id)
        .bind(run.run_type.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.duration_ms.min(i64::MAX as u64) as i64)
        .bind(run.dry_run)
        .bind(counters)
        .bind(sources)
        .bind(errors)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn admin_user_id(&self) -> Result<Option<Uuid>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id
              FROM users
             WHERE role = 'admin'
             ORDER BY created_at
             LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("id")?),
            None => None,
        })
    }

    async fn acquire_run_lock(&self, run_type: RunType) -> Result<bool, StoreError> {
        let stale_before: DateTime<Utc> = Utc::now()
            - chrono::Duration::from_std(self.stale_lock_after)
                .unwrap_or_else(|_| chrono::Duration::hours(6));
        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_locks (run_type, acquired_at)
            VALUES ($1, NOW())
            ON CONFLICT (run_type) DO UPDATE
               SET acquired_at = EXCLUDED.acquired_at
             WHERE pipeline_locks.acquired_at < $2
            "#,
        )
        .bind(run_type.as_str())
        .bind(stale_before)
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() == 1;
        if acquired {
            debug!(run_type = run_type.as_str(), "acquired run lock");
        } else {
            warn!(run_type = run_type.as_str(), "run lock is held by another invocation");
        }
        Ok(acquired)
    }

    async fn release_run_lock(&self, run_type: RunType) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pipeline_locks WHERE run_type = $1")
            .bind(run_type.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

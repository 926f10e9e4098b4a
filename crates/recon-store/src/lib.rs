//! Tenant store access: candidate reads, the reconciliation upsert and
//! the retention cleanup, all against a per-tenant MySQL database.
//!
//! Every mutation here is scoped to one explicit transaction; nothing
//! holds a connection across tenants or runs.

use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, warn};

use recon_core::{
    decode_visit_map, prune_visit_map, BatchOutcome, Candidate, EnrichedContact, Outcome,
    PersistedRecord, RunStatistics, VisitMapError,
};

pub const CRATE_NAME: &str = "recon-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    VisitMap(#[from] VisitMapError),
}

/// Whether a database error indicates the connection or pool is gone,
/// as opposed to a problem with one particular row.
///
/// A systemic error aborts the whole batch; a row-level error fails
/// that row and lets the batch continue.
pub fn is_systemic(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Tls(_)
    )
}

const ENRICHED_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS enriched_contacts (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    tenant_id VARCHAR(64) NOT NULL,
    contact_id BIGINT NOT NULL,
    run_timestamp DATETIME NOT NULL,
    channel_type VARCHAR(64) NULL,
    language VARCHAR(16) NULL,
    phone_number VARCHAR(32) NOT NULL,
    external_id VARCHAR(64) NULL,
    national_id VARCHAR(32) NULL,
    name VARCHAR(255) NULL,
    surname VARCHAR(255) NULL,
    gender VARCHAR(16) NULL,
    birth_date DATE NULL,
    email VARCHAR(255) NULL,
    identity_found TINYINT(1) NOT NULL DEFAULT 0,
    history_found TINYINT(1) NOT NULL DEFAULT 0,
    visit_count BIGINT NOT NULL DEFAULT 0,
    last_visit_at DATETIME NULL,
    last_visit_doctor VARCHAR(255) NULL,
    last_visit_department VARCHAR(255) NULL,
    last_visit_branch VARCHAR(255) NULL,
    first_contact_at DATETIME NULL,
    visit_details JSON NULL,
    UNIQUE KEY uq_tenant_contact (tenant_id, contact_id)
)
"#;

const PHASE_A_DELETE_SQL: &str = r#"
DELETE FROM enriched_contacts
 WHERE tenant_id = ?
   AND visit_count = 1
   AND last_visit_at IS NOT NULL
   AND last_visit_at < ?
"#;

// SUM over integer columns yields DECIMAL on MySQL, which i64 decoding
// rejects; the casts keep every aggregate an integer on the wire.
const LATEST_RUN_SUMMARY_SQL: &str = r#"
SELECT MAX(run_timestamp) AS latest_run,
       COUNT(*) AS total_rows,
       CAST(SUM(identity_found) AS SIGNED) AS with_identity,
       CAST(SUM(history_found) AS SIGNED) AS with_history,
       CAST(SUM(visit_count) AS SIGNED) AS total_visits
  FROM enriched_contacts
 WHERE tenant_id = ?
"#;

/// Connection to one tenant's database. Opened at the start of that
/// tenant's turn and closed before moving to the next.
#[derive(Debug, Clone)]
pub struct TenantStore {
    pool: MySqlPool,
    tenant_id: String,
}

impl TenantStore {
    pub async fn connect(tenant_id: impl Into<String>, database_url: &str) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool,
            tenant_id: tenant_id.into(),
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(ENRICHED_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Contacts eligible for enrichment: distinct contacts with at
    /// least one message and a usable phone number. Test numbers are
    /// excluded at the source. Newest contacts first.
    pub async fn list_candidates(&self, limit: Option<i64>) -> Result<Vec<Candidate>, StoreError> {
        let base = r#"
            SELECT DISTINCT c.id, c.channel_type, c.language, c.phone_number
              FROM contacts c
              JOIN chat_messages m ON m.contact_id = c.id
             WHERE c.phone_number IS NOT NULL
               AND c.phone_number <> ''
               AND c.phone_number NOT LIKE '%test%'
             ORDER BY c.id DESC
        "#;

        let rows = match limit {
            Some(limit) => {
                sqlx::query(&format!("{base} LIMIT ?"))
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query(base).fetch_all(&self.pool).await?,
        };

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            candidates.push(Candidate {
                contact_id: row.try_get("id")?,
                channel_type: row.try_get("channel_type")?,
                language: row.try_get("language")?,
                phone_number: row.try_get("phone_number")?,
                tenant_id: self.tenant_id.clone(),
            });
        }
        Ok(candidates)
    }

    /// Timestamp of the contact's earliest message, used as the lower
    /// gate of the visit window. `None` when the contact has none.
    pub async fn first_contact_at(
        &self,
        contact_id: i64,
    ) -> Result<Option<NaiveDateTime>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT MIN(sent_at) AS first_contact_at
              FROM chat_messages
             WHERE contact_id = ?
            "#,
        )
        .bind(contact_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("first_contact_at")?)
    }
}

/// What a batch write will do, decided before any transaction opens.
#[derive(Debug, Default)]
struct BatchPlan {
    records: Vec<PersistedRecord>,
    skipped: u64,
    failed: u64,
}

/// Per-contact write decision: contacts without a usable identity or
/// without windowed history are skipped, the rest are projected to
/// their store row. Kept free of database access so the decision and
/// its row keys can be tested directly.
fn plan_batch(run_timestamp: NaiveDateTime, contacts: &[EnrichedContact]) -> BatchPlan {
    let mut plan = BatchPlan::default();
    for contact in contacts {
        if !contact.identity_found || !contact.history_found {
            debug!(
                contact_id = contact.contact_id,
                identity_found = contact.identity_found,
                history_found = contact.history_found,
                "nothing to reconcile, skipping contact"
            );
            plan.skipped += 1;
            continue;
        }
        match PersistedRecord::project(run_timestamp, contact) {
            Ok(record) => plan.records.push(record),
            Err(err) => {
                warn!(contact_id = contact.contact_id, error = %err, "projection failed");
                plan.failed += 1;
            }
        }
    }
    plan
}

/// The single mutation point for enrichment results. All inserts and
/// updates of `enriched_contacts` go through [`write_batch`], which is
/// also the only place run statistics are recorded.
///
/// [`write_batch`]: ReconciliationWriter::write_batch
pub struct ReconciliationWriter<'a> {
    store: &'a TenantStore,
}

impl<'a> ReconciliationWriter<'a> {
    pub fn new(store: &'a TenantStore) -> Self {
        Self { store }
    }

    /// Upsert one batch of enriched contacts inside one transaction.
    ///
    /// Contacts without a usable identity or without windowed history
    /// are counted as skipped and not written. A row-level database
    /// error fails that row and continues; a systemic error rolls the
    /// whole batch back and counts every contact in it as failed.
    pub async fn write_batch(
        &self,
        run_timestamp: NaiveDateTime,
        contacts: &[EnrichedContact],
        stats: &mut RunStatistics,
    ) -> Result<BatchOutcome, StoreError> {
        let plan = plan_batch(run_timestamp, contacts);
        let mut outcome = BatchOutcome {
            skipped: plan.skipped,
            failed: plan.failed,
            ..BatchOutcome::default()
        };
        let mut tx = self.store.pool.begin().await.map_err(|err| {
            stats.record_many(Outcome::Failed, contacts.len() as u64);
            StoreError::Sqlx(err)
        })?;

        for record in &plan.records {
            match Self::upsert_record(&mut tx, record).await {
                Ok(Outcome::Inserted) => outcome.inserted += 1,
                Ok(Outcome::Updated) => outcome.updated += 1,
                Ok(_) => {}
                Err(err) if is_systemic(&err) => {
                    drop(tx);
                    stats.record_many(Outcome::Failed, contacts.len() as u64);
                    return Err(StoreError::Sqlx(err));
                }
                Err(err) => {
                    warn!(contact_id = record.contact_id, error = %err, "row write failed");
                    outcome.failed += 1;
                }
            }
        }

        tx.commit().await.map_err(|err| {
            stats.record_many(Outcome::Failed, contacts.len() as u64);
            StoreError::Sqlx(err)
        })?;

        stats.apply_batch(&outcome);
        Ok(outcome)
    }

    async fn upsert_record(
        tx: &mut sqlx::Transaction<'_, sqlx::MySql>,
        record: &PersistedRecord,
    ) -> Result<Outcome, sqlx::Error> {
        let existing = sqlx::query(
            r#"
            SELECT id FROM enriched_contacts
             WHERE tenant_id = ? AND contact_id = ?
            "#,
        )
        .bind(&record.tenant_id)
        .bind(record.contact_id)
        .fetch_optional(&mut **tx)
        .await?;

        match existing {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                sqlx::query(
                    r#"
                    UPDATE enriched_contacts
                       SET run_timestamp = ?,
                           channel_type = ?,
                           language = ?,
                           phone_number = ?,
                           external_id = ?,
                           national_id = ?,
                           name = ?,
                           surname = ?,
                           gender = ?,
                           birth_date = ?,
                           email = ?,
                           identity_found = ?,
                           history_found = ?,
                           visit_count = ?,
                           last_visit_at = ?,
                           last_visit_doctor = ?,
                           last_visit_department = ?,
                           last_visit_branch = ?,
                           first_contact_at = ?,
                           visit_details = ?
                     WHERE id = ?
                    "#,
                )
                .bind(record.run_timestamp)
                .bind(&record.channel_type)
                .bind(&record.language)
                .bind(&record.phone_number)
                .bind(&record.external_id)
                .bind(&record.national_id)
                .bind(&record.name)
                .bind(&record.surname)
                .bind(&record.gender)
                .bind(record.birth_date)
                .bind(&record.email)
                .bind(record.identity_found)
                .bind(record.history_found)
                .bind(record.visit_count)
                .bind(record.last_visit_at)
                .bind(&record.last_visit_doctor)
                .bind(&record.last_visit_department)
                .bind(&record.last_visit_branch)
                .bind(record.first_contact_at)
                .bind(&record.visit_details)
                .bind(id)
                .execute(&mut **tx)
                .await?;
                Ok(Outcome::Updated)
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO enriched_contacts (
                        tenant_id, contact_id, run_timestamp, channel_type, language,
                        phone_number, external_id, national_id, name, surname,
                        gender, birth_date, email, identity_found, history_found,
                        visit_count, last_visit_at, last_visit_doctor,
                        last_visit_department, last_visit_branch, first_contact_at,
                        visit_details
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&record.tenant_id)
                .bind(record.contact_id)
                .bind(record.run_timestamp)
                .bind(&record.channel_type)
                .bind(&record.language)
                .bind(&record.phone_number)
                .bind(&record.external_id)
                .bind(&record.national_id)
                .bind(&record.name)
                .bind(&record.surname)
                .bind(&record.gender)
                .bind(record.birth_date)
                .bind(&record.email)
                .bind(record.identity_found)
                .bind(record.history_found)
                .bind(record.visit_count)
                .bind(record.last_visit_at)
                .bind(&record.last_visit_doctor)
                .bind(&record.last_visit_department)
                .bind(&record.last_visit_branch)
                .bind(record.first_contact_at)
                .bind(&record.visit_details)
                .execute(&mut **tx)
                .await?;
                Ok(Outcome::Inserted)
            }
        }
    }
}

/// Outcome of the multi-visit pruning phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseBOutcome {
    pub examined: u64,
    pub cleaned_records: u64,
    pub pruned_visits: u64,
}

/// Counts reported without deleting anything, for dry runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CleanupStatistics {
    pub single_visit_deletable: u64,
    pub multi_visit_candidates: u64,
}

impl TenantStore {
    /// Phase A: delete rows whose single recorded visit fell out of the
    /// retention window.
    pub async fn retention_phase_a(&self, cutoff: NaiveDateTime) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(PHASE_A_DELETE_SQL)
            .bind(&self.tenant_id)
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Phase B: prune expired entries out of multi-visit rows and
    /// recompute their counts and latest-visit summary. Rows whose
    /// visit map cannot be decoded are left untouched.
    pub async fn retention_phase_b(&self, cutoff: NaiveDateTime) -> Result<PhaseBOutcome, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, visit_details
              FROM enriched_contacts
             WHERE tenant_id = ?
               AND visit_count > 1
               AND visit_details IS NOT NULL
               AND visit_details <> ''
            "#,
        )
        .bind(&self.tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut outcome = PhaseBOutcome {
            examined: rows.len() as u64,
            ..PhaseBOutcome::default()
        };
        if rows.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await?;
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let raw: String = row.try_get("visit_details")?;
            let map = match decode_visit_map(&raw) {
                Ok(map) => map,
                Err(err) => {
                    warn!(record_id = id, error = %err, "visit map undecodable, leaving row as is");
                    continue;
                }
            };

            let pruned = prune_visit_map(&map, cutoff);
            if pruned.removed == 0 {
                continue;
            }

            let encoded = recon_core::encode_visit_map(&pruned.retained)?;
            let latest = pruned.latest.as_ref();
            sqlx::query(
                r#"
                UPDATE enriched_contacts
                   SET visit_details = ?,
                       visit_count = ?,
                       last_visit_at = ?,
                       last_visit_doctor = ?,
                       last_visit_department = ?,
                       last_visit_branch = ?
                 WHERE id = ?
                "#,
            )
            .bind(&encoded)
            .bind(pruned.retained.len() as i64)
            .bind(latest.and_then(|d| d.parsed_timestamp()))
            .bind(latest.and_then(|d| d.doctor_name.clone()))
            .bind(latest.and_then(|d| d.department_name.clone()))
            .bind(latest.and_then(|d| d.branch_name.clone()))
            .bind(id)
            .execute(&mut *tx)
            .await?;

            outcome.cleaned_records += 1;
            outcome.pruned_visits += pruned.removed as u64;
        }
        tx.commit().await?;

        Ok(outcome)
    }

    /// What the cleanup would touch, without touching it.
    pub async fn cleanup_statistics(
        &self,
        cutoff: NaiveDateTime,
    ) -> Result<CleanupStatistics, StoreError> {
        let single: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
              FROM enriched_contacts
             WHERE tenant_id = ?
               AND visit_count = 1
               AND last_visit_at IS NOT NULL
               AND last_visit_at < ?
            "#,
        )
        .bind(&self.tenant_id)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;

        let multi: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
              FROM enriched_contacts
             WHERE tenant_id = ?
               AND visit_count > 1
               AND visit_details IS NOT NULL
               AND visit_details <> ''
            "#,
        )
        .bind(&self.tenant_id)
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;

        Ok(CleanupStatistics {
            single_visit_deletable: single.max(0) as u64,
            multi_visit_candidates: multi.max(0) as u64,
        })
    }

    /// Aggregate of the most recent reconciliation run, for reporting.
    pub async fn latest_run_summary(&self) -> Result<Option<RunReportRow>, StoreError> {
        let row = sqlx::query(LATEST_RUN_SUMMARY_SQL)
            .bind(&self.tenant_id)
            .fetch_one(&self.pool)
            .await?;

        let latest_run: Option<NaiveDateTime> = row.try_get("latest_run")?;
        let Some(latest_run) = latest_run else {
            return Ok(None);
        };
        let with_identity: Option<i64> = row.try_get("with_identity")?;
        let with_history: Option<i64> = row.try_get("with_history")?;
        let total_visits: Option<i64> = row.try_get("total_visits")?;
        Ok(Some(RunReportRow {
            latest_run,
            total_rows: row.try_get("total_rows")?,
            with_identity: with_identity.unwrap_or(0),
            with_history: with_history.unwrap_or(0),
            total_visits: total_visits.unwrap_or(0),
        }))
    }
}

/// Per-tenant reporting aggregate.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RunReportRow {
    pub latest_run: NaiveDateTime,
    pub total_rows: i64,
    pub with_identity: i64,
    pub with_history: i64,
    pub total_visits: i64,
}

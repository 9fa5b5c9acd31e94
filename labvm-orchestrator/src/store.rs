//! Persistence gateway: requests, roster membership, and provisioned VMs.
//!
//! The store is the only component that touches the database. Timestamps are
//! persisted as unix seconds; the approval flag transition in
//! [`FleetStore::mark_approved`] is the orchestrator's sole guard against
//! double-approval, so it is a single compare-and-set statement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{OrchestratorError, Result};
use crate::reaper::MAX_REAP_ATTEMPTS;

/// A classroom VM request. Created on submission, mutated exactly once
/// (approval), never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRequest {
    pub id: i64,
    pub submitter_email: String,
    pub course_name: String,
    pub vm_profile: String,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

/// Parameters for submitting a new VM request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub submitter_email: String,
    pub course_name: String,
    pub vm_profile: String,
}

/// One provisioned student sandbox. `vm_name` is the unique, deterministic
/// identity everything else (cloud resource names, reaping) derives from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedVm {
    pub vm_name: String,
    pub student_email: String,
    pub course_name: String,
    pub vm_profile: String,
    pub ip_address: String,
    pub username: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reap_attempts: i64,
}

impl ProvisionedVm {
    /// Remote-desktop invocation shown to the student. Presentation only;
    /// nothing in the orchestrator parses it.
    pub fn connect_string(&self) -> String {
        format!("mstsc /v:{}", self.ip_address)
    }
}

#[derive(Clone)]
pub struct FleetStore {
    pool: SqlitePool,
}

impl FleetStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── Requests ──────────────────────────────────────────────────────────

    /// Submit a new VM request. At most one unapproved request may exist per
    /// (submitter, course); a second submission is rejected.
    pub async fn submit_request(&self, req: SubmitRequest) -> Result<VmRequest> {
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO vm_requests (submitter_email, course_name, vm_profile, is_approved, created_at)
             VALUES (?, ?, ?, 0, ?)",
        )
        .bind(&req.submitter_email)
        .bind(&req.course_name)
        .bind(&req.vm_profile)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await;

        let result = match result {
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(OrchestratorError::DuplicateRequest {
                    submitter_email: req.submitter_email,
                    course_name: req.course_name,
                })
            }
            other => other?,
        };

        let id = result.last_insert_rowid();
        self.get_request(id)
            .await?
            .ok_or(OrchestratorError::RequestNotActionable(id))
    }

    /// Get a single request by id.
    pub async fn get_request(&self, id: i64) -> Result<Option<VmRequest>> {
        let row = sqlx::query_as::<_, VmRequestRow>("SELECT * FROM vm_requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    /// Atomically flip a request from unapproved to approved. Returns false
    /// when the request is absent or already approved, which makes this safe
    /// under concurrent approval calls for the same id.
    pub async fn mark_approved(&self, id: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE vm_requests SET is_approved = 1 WHERE id = ? AND is_approved = 0")
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// All requests still waiting for approval, oldest first.
    pub async fn list_pending_requests(&self) -> Result<Vec<VmRequest>> {
        let rows = sqlx::query_as::<_, VmRequestRow>(
            "SELECT * FROM vm_requests WHERE is_approved = 0 ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ── Roster ────────────────────────────────────────────────────────────

    /// Add a student to a course roster. Re-adding is a no-op.
    pub async fn add_roster_entry(&self, course_name: &str, student_email: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO roster (course_name, student_email) VALUES (?, ?)")
            .bind(course_name)
            .bind(student_email)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Emails of every student enrolled in a course.
    pub async fn list_roster(&self, course_name: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT student_email FROM roster WHERE course_name = ? ORDER BY student_email",
        )
        .bind(course_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(email,)| email).collect())
    }

    // ── Provisioned VMs ───────────────────────────────────────────────────

    /// Persist a provisioned VM record. A duplicate `vm_name` surfaces as a
    /// resource conflict rather than overwriting the existing record.
    pub async fn insert_provisioned_vm(&self, vm: &ProvisionedVm) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO provisioned_vms
             (vm_name, student_email, course_name, vm_profile, ip_address, username, password, created_at, expires_at, reap_attempts)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&vm.vm_name)
        .bind(&vm.student_email)
        .bind(&vm.course_name)
        .bind(&vm.vm_profile)
        .bind(&vm.ip_address)
        .bind(&vm.username)
        .bind(&vm.password)
        .bind(vm.created_at.timestamp())
        .bind(vm.expires_at.timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(OrchestratorError::ResourceConflict(vm.vm_name.clone()))
            }
            Err(e) => Err(e.into()),
            Ok(_) => Ok(()),
        }
    }

    /// Get a single provisioned VM by name.
    pub async fn get_provisioned_vm(&self, vm_name: &str) -> Result<Option<ProvisionedVm>> {
        let row =
            sqlx::query_as::<_, ProvisionedVmRow>("SELECT * FROM provisioned_vms WHERE vm_name = ?")
                .bind(vm_name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Into::into))
    }

    /// Whether a derived VM name is already taken.
    pub async fn vm_name_exists(&self, vm_name: &str) -> Result<bool> {
        Ok(self.get_provisioned_vm(vm_name).await?.is_some())
    }

    /// Remove a provisioned VM record. Returns false when the record was
    /// already gone, which reap paths treat as success.
    pub async fn delete_provisioned_vm(&self, vm_name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM provisioned_vms WHERE vm_name = ?")
            .bind(vm_name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// All VMs belonging to one student, newest first.
    pub async fn list_provisioned_vms(&self, student_email: &str) -> Result<Vec<ProvisionedVm>> {
        let rows = sqlx::query_as::<_, ProvisionedVmRow>(
            "SELECT * FROM provisioned_vms WHERE student_email = ? ORDER BY created_at DESC",
        )
        .bind(student_email)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// VMs whose TTL has elapsed and that have not exhausted their reap
    /// attempts. The reaper reconstructs its work queue from this query, so
    /// a process restart loses nothing.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<ProvisionedVm>> {
        let rows = sqlx::query_as::<_, ProvisionedVmRow>(
            "SELECT * FROM provisioned_vms WHERE expires_at < ? AND reap_attempts < ?",
        )
        .bind(now.timestamp())
        .bind(MAX_REAP_ATTEMPTS)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Record a failed reap attempt; returns the new attempt count.
    pub async fn bump_reap_attempts(&self, vm_name: &str) -> Result<i64> {
        sqlx::query("UPDATE provisioned_vms SET reap_attempts = reap_attempts + 1 WHERE vm_name = ?")
            .bind(vm_name)
            .execute(&self.pool)
            .await?;

        let row: Option<(i64,)> =
            sqlx::query_as("SELECT reap_attempts FROM provisioned_vms WHERE vm_name = ?")
                .bind(vm_name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(n,)| n).unwrap_or(0))
    }
}

// Internal row types for sqlx
#[derive(sqlx::FromRow)]
struct VmRequestRow {
    id: i64,
    submitter_email: String,
    course_name: String,
    vm_profile: String,
    is_approved: i64,
    created_at: i64,
}

#[derive(sqlx::FromRow)]
struct ProvisionedVmRow {
    vm_name: String,
    student_email: String,
    course_name: String,
    vm_profile: String,
    ip_address: String,
    username: String,
    password: String,
    created_at: i64,
    expires_at: i64,
    reap_attempts: i64,
}

impl From<VmRequestRow> for VmRequest {
    fn from(row: VmRequestRow) -> Self {
        Self {
            id: row.id,
            submitter_email: row.submitter_email,
            course_name: row.course_name,
            vm_profile: row.vm_profile,
            is_approved: row.is_approved != 0,
            created_at: DateTime::from_timestamp(row.created_at, 0).unwrap_or_default(),
        }
    }
}

impl From<ProvisionedVmRow> for ProvisionedVm {
    fn from(row: ProvisionedVmRow) -> Self {
        Self {
            vm_name: row.vm_name,
            student_email: row.student_email,
            course_name: row.course_name,
            vm_profile: row.vm_profile,
            ip_address: row.ip_address,
            username: row.username,
            password: row.password,
            created_at: DateTime::from_timestamp(row.created_at, 0).unwrap_or_default(),
            expires_at: DateTime::from_timestamp(row.expires_at, 0).unwrap_or_default(),
            reap_attempts: row.reap_attempts,
        }
    }
}

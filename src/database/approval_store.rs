//! Postgres-backed approval instances.
//!
//! Status changes are a single conditional `UPDATE ... WHERE status =
//! 'waiting' AND version = $expected`; the affected row count tells the
//! caller whether it won. The sweeper reads through the
//! `(status, next_iteration)` index.

use crate::approvals::store::ApprovalStore;
use crate::error::{GatekeeperError, GatekeeperResult};
use crate::models::approval_instance::{ApprovalActivity, ApprovalInstance, ApproverSpec};
use crate::state_machine::ApprovalStatus;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const APPROVAL_COLUMNS: &str = "id, approval_type, status, deadline, created_at, last_modified_at, \
     next_iteration, account_id, org_identifier, project_identifier, pipeline_identifier, \
     plan_execution_id, node_execution_id, callback_id, triggered_by, approvers, activities, \
     error_message, version";

#[derive(Debug, Clone)]
pub struct PgApprovalStore {
    pool: PgPool,
}

impl PgApprovalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_approval(row: &PgRow) -> GatekeeperResult<ApprovalInstance> {
    let approval_type: String = row.try_get("approval_type")?;
    let status: String = row.try_get("status")?;
    let approvers: Option<Json<ApproverSpec>> = row.try_get("approvers")?;
    let activities: Json<Vec<ApprovalActivity>> = row.try_get("activities")?;

    Ok(ApprovalInstance {
        id: row.try_get("id")?,
        approval_type: approval_type.parse().map_err(GatekeeperError::Persistence)?,
        status: status
            .parse::<ApprovalStatus>()
            .map_err(GatekeeperError::Persistence)?,
        deadline: row.try_get("deadline")?,
        created_at: row.try_get("created_at")?,
        last_modified_at: row.try_get("last_modified_at")?,
        next_iteration: row.try_get("next_iteration")?,
        account_id: row.try_get("account_id")?,
        org_identifier: row.try_get("org_identifier")?,
        project_identifier: row.try_get("project_identifier")?,
        pipeline_identifier: row.try_get("pipeline_identifier")?,
        plan_execution_id: row.try_get("plan_execution_id")?,
        node_execution_id: row.try_get("node_execution_id")?,
        callback_id: row.try_get("callback_id")?,
        triggered_by: row.try_get("triggered_by")?,
        approvers: approvers.map(|json| json.0),
        activities: activities.0,
        error_message: row.try_get("error_message")?,
        version: row.try_get("version")?,
    })
}

#[async_trait]
impl ApprovalStore for PgApprovalStore {
    async fn insert(&self, instance: &ApprovalInstance) -> GatekeeperResult<()> {
        sqlx::query(&format!(
            "INSERT INTO gatekeeper_approval_instances ({APPROVAL_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
        ))
        .bind(instance.id)
        .bind(instance.approval_type.to_string())
        .bind(instance.status.to_string())
        .bind(instance.deadline)
        .bind(instance.created_at)
        .bind(instance.last_modified_at)
        .bind(instance.next_iteration)
        .bind(&instance.account_id)
        .bind(&instance.org_identifier)
        .bind(&instance.project_identifier)
        .bind(&instance.pipeline_identifier)
        .bind(&instance.plan_execution_id)
        .bind(&instance.node_execution_id)
        .bind(&instance.callback_id)
        .bind(&instance.triggered_by)
        .bind(instance.approvers.as_ref().map(Json))
        .bind(Json(&instance.activities))
        .bind(&instance.error_message)
        .bind(instance.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> GatekeeperResult<Option<ApprovalInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM gatekeeper_approval_instances WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_approval).transpose()
    }

    async fn compare_and_set(
        &self,
        expected_version: i64,
        updated: &ApprovalInstance,
    ) -> GatekeeperResult<bool> {
        let result = sqlx::query(
            "UPDATE gatekeeper_approval_instances SET \
                 status = $3, last_modified_at = $4, next_iteration = $5, \
                 activities = $6, error_message = $7, version = $8 \
             WHERE id = $1 AND version = $2 AND status = 'waiting'",
        )
        .bind(updated.id)
        .bind(expected_version)
        .bind(updated.status.to_string())
        .bind(updated.last_modified_at)
        .bind(updated.next_iteration)
        .bind(Json(&updated.activities))
        .bind(&updated.error_message)
        .bind(updated.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Distinguish a lost race from a missing row
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM gatekeeper_approval_instances WHERE id = $1)",
        )
        .bind(updated.id)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            Ok(false)
        } else {
            Err(GatekeeperError::ApprovalNotFound(updated.id))
        }
    }

    async fn due_for_iteration(&self, now: i64, limit: usize) -> GatekeeperResult<Vec<ApprovalInstance>> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM gatekeeper_approval_instances \
             WHERE status = 'waiting' AND next_iteration <= $1 \
             ORDER BY next_iteration, created_at \
             LIMIT $2"
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect()
    }

    async fn reschedule(&self, id: Uuid, next_iteration: i64) -> GatekeeperResult<()> {
        sqlx::query(
            "UPDATE gatekeeper_approval_instances SET next_iteration = $2 \
             WHERE id = $1 AND status = 'waiting'",
        )
        .bind(id)
        .bind(next_iteration)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

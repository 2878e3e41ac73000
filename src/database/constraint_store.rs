//! Postgres-backed constraint lanes.
//!
//! Each `apply` runs in one transaction that first takes
//! `pg_advisory_xact_lock(hashtextextended(constraint_key, 0))`. The lane is
//! loaded, the operation runs through the same [`Lane`] algorithm as the
//! in-memory store, and the written instances plus the sequence counter are
//! stored before commit releases the lock. Operations on different keys never
//! wait on each other.

use crate::constraints::lane::{Lane, LaneChange, LaneOperation};
use crate::constraints::store::ConstraintStore;
use crate::error::{GatekeeperError, GatekeeperResult};
use crate::models::constraint_instance::ResourceConstraintInstance;
use crate::models::resource_restraint::ConstraintKey;
use crate::state_machine::ConsumerState;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

const INSTANCE_COLUMNS: &str = "id, constraint_key, consumer_id, sequence, state, permits, acquire_mode, \
     release_entity_id, plan_execution_id, created_at, acquired_at, finished_at";

#[derive(Debug, Clone)]
pub struct PgConstraintStore {
    pool: PgPool,
}

impl PgConstraintStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_lane(
        tx: &mut Transaction<'_, Postgres>,
        key: &ConstraintKey,
    ) -> GatekeeperResult<Lane> {
        let next_sequence: Option<i64> = sqlx::query_scalar(
            "SELECT next_sequence FROM gatekeeper_constraint_lanes WHERE constraint_key = $1",
        )
        .bind(key.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM gatekeeper_constraint_instances \
             WHERE constraint_key = $1 AND state <> 'finished' ORDER BY sequence"
        ))
        .bind(key.as_str())
        .fetch_all(&mut **tx)
        .await?;

        let live = rows
            .iter()
            .map(row_to_instance)
            .collect::<GatekeeperResult<Vec<_>>>()?;

        Ok(Lane::restore(key.clone(), live, next_sequence.unwrap_or(1)))
    }

    async fn store_change(
        tx: &mut Transaction<'_, Postgres>,
        lane: &Lane,
        change: &LaneChange,
    ) -> GatekeeperResult<()> {
        sqlx::query(
            "INSERT INTO gatekeeper_constraint_lanes (constraint_key, next_sequence, updated_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (constraint_key) \
             DO UPDATE SET next_sequence = EXCLUDED.next_sequence, updated_at = now()",
        )
        .bind(lane.key().as_str())
        .bind(lane.next_sequence())
        .execute(&mut **tx)
        .await?;

        for instance in &change.written {
            sqlx::query(&format!(
                "INSERT INTO gatekeeper_constraint_instances ({INSTANCE_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 ON CONFLICT (id) DO UPDATE SET \
                     state = EXCLUDED.state, \
                     acquired_at = EXCLUDED.acquired_at, \
                     finished_at = EXCLUDED.finished_at"
            ))
            .bind(instance.id)
            .bind(instance.constraint_key.as_str())
            .bind(&instance.consumer_id)
            .bind(instance.sequence)
            .bind(instance.state.to_string())
            .bind(instance.permits as i32)
            .bind(instance.acquire_mode.to_string())
            .bind(&instance.release_entity_id)
            .bind(&instance.plan_execution_id)
            .bind(instance.created_at)
            .bind(instance.acquired_at)
            .bind(instance.finished_at)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

fn row_to_instance(row: &PgRow) -> GatekeeperResult<ResourceConstraintInstance> {
    let state: String = row.try_get("state")?;
    let acquire_mode: String = row.try_get("acquire_mode")?;
    let permits: i32 = row.try_get("permits")?;
    let constraint_key: String = row.try_get("constraint_key")?;

    Ok(ResourceConstraintInstance {
        id: row.try_get("id")?,
        constraint_key: ConstraintKey::from(constraint_key),
        consumer_id: row.try_get("consumer_id")?,
        sequence: row.try_get("sequence")?,
        state: state
            .parse::<ConsumerState>()
            .map_err(GatekeeperError::Persistence)?,
        permits: u32::try_from(permits)
            .map_err(|_| GatekeeperError::Persistence(format!("stored permits {permits} is negative")))?,
        acquire_mode: acquire_mode.parse().map_err(GatekeeperError::Persistence)?,
        release_entity_id: row.try_get("release_entity_id")?,
        plan_execution_id: row.try_get("plan_execution_id")?,
        created_at: row.try_get("created_at")?,
        acquired_at: row.try_get("acquired_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

#[async_trait]
impl ConstraintStore for PgConstraintStore {
    async fn apply(&self, key: &ConstraintKey, operation: LaneOperation) -> GatekeeperResult<LaneChange> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key.as_str())
            .execute(&mut *tx)
            .await?;

        let mut lane = Self::load_lane(&mut tx, key).await?;
        let operation_name = operation.name();
        let change = lane.apply(operation, Utc::now())?;

        if change.is_no_op() {
            tx.rollback().await?;
        } else {
            Self::store_change(&mut tx, &lane, &change).await?;
            tx.commit().await?;
        }

        debug!(
            constraint_key = %key,
            operation = operation_name,
            written = change.written.len(),
            "Applied lane operation"
        );
        Ok(change)
    }

    async fn live_instances(&self, key: &ConstraintKey) -> GatekeeperResult<Vec<ResourceConstraintInstance>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM gatekeeper_constraint_instances \
             WHERE constraint_key = $1 AND state <> 'finished' ORDER BY sequence"
        ))
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_instance).collect()
    }

    async fn instance(
        &self,
        key: &ConstraintKey,
        consumer_id: &str,
    ) -> GatekeeperResult<Option<ResourceConstraintInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM gatekeeper_constraint_instances \
             WHERE constraint_key = $1 AND consumer_id = $2 AND state <> 'finished'"
        ))
        .bind(key.as_str())
        .bind(consumer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_instance).transpose()
    }
}

//! Action record persistence
//!
//! Records live in the `action_records` table. The acquire step is a single
//! conditional UPDATE, so exactly one caller can flip a record to PROCESSING
//! no matter how many submissions of the same token race.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::{debug, info, warn};

use super::ActionStatus;
use crate::combat::{CombatError, CombatResult};

/// A single action token and what happened to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub action_token: String,
    pub requester_id: String,
    /// Character whose combat this token acts on
    pub combat_id: String,
    /// Payload shape the next submission must have
    pub expected_dto: String,
    /// Shape of the step that left the record waiting for `expected_dto`
    pub parked_dto: Option<String>,
    pub status: ActionStatus,
    /// Cached outcome once applied (or partial outcome between steps)
    pub result_payload: Option<Value>,
    pub error: Option<String>,
    /// Unix ms after which the record counts as abandoned
    pub expires_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Who is submitting, for which combat, with which payload shape
#[derive(Debug, Clone)]
pub struct AcquireMeta {
    pub requester_id: String,
    pub combat_id: String,
    pub dto: String,
}

/// Outcome of [`ActionLedger::try_acquire`]
#[derive(Debug, Clone, PartialEq)]
pub enum Acquire {
    /// Caller owns the action and must mark it applied or failed
    Acquired(ActionRecord),
    /// Already applied; replay the cached payload
    Duplicate(Value),
    /// A resubmission of the step that parked the token; replay its partial outcome
    Parked(Value),
    /// Another caller holds the record right now
    Busy(ActionRecord),
}

/// Counts from a cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stuck PROCESSING records returned to PENDING
    pub reclaimed: u64,
    /// Expired records deleted
    pub purged: u64,
}

type RecordRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    i64,
    i64,
    i64,
);

const SELECT_RECORD: &str = r#"
    SELECT token, requester_id, combat_id, expected_dto, parked_dto, status, result_payload, error,
           expires_at, created_at, updated_at
    FROM action_records WHERE token = ?
"#;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Ledger of action tokens backed by SQLite
#[derive(Debug, Clone)]
pub struct ActionLedger {
    pool: SqlitePool,
    /// How long an unresolved token lives
    ttl: Duration,
    /// How long an applied result stays replayable
    applied_retention: Duration,
}

impl ActionLedger {
    pub fn new(pool: SqlitePool, ttl: Duration, applied_retention: Duration) -> Self {
        Self {
            pool,
            ttl,
            applied_retention,
        }
    }

    /// Issue a fresh token; its record is created on first use
    pub fn issue_token(&self) -> String {
        super::generate_token()
    }

    /// Fetch a record by token
    pub async fn get(&self, token: &str) -> CombatResult<Option<ActionRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(SELECT_RECORD)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(into_record).transpose()
    }

    /// Create the record if needed and try to take ownership of it
    pub async fn try_acquire(&self, token: &str, meta: &AcquireMeta) -> CombatResult<Acquire> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CombatError::invalid_request("action token is required"));
        }

        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO action_records
                (token, requester_id, combat_id, expected_dto, status, expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'PENDING', ?, ?, ?)
            ON CONFLICT(token) DO NOTHING
            "#,
        )
        .bind(token)
        .bind(&meta.requester_id)
        .bind(&meta.combat_id)
        .bind(&meta.dto)
        .bind(now + millis(self.ttl))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let record = self.require(token).await?;
        if record.combat_id != meta.combat_id {
            return Err(CombatError::invalid_request(
                "action token belongs to a different combat",
            ));
        }

        if record.status == ActionStatus::Applied {
            debug!("Replaying applied action {}", token);
            return Ok(Acquire::Duplicate(record.result_payload.unwrap_or(Value::Null)));
        }
        if !record.status.is_acquirable() {
            debug!("Action {} is already in flight", token);
            return Ok(Acquire::Busy(record));
        }

        if record.expected_dto != meta.dto {
            if record.status == ActionStatus::Pending
                && record.parked_dto.as_deref() == Some(meta.dto.as_str())
            {
                if let Some(partial) = record.result_payload {
                    debug!("Replaying parked step of action {}", token);
                    return Ok(Acquire::Parked(partial));
                }
            }
            return Err(CombatError::UnexpectedActionPayload {
                expected: record.expected_dto,
                received: meta.dto.clone(),
            });
        }

        let claimed = sqlx::query(
            r#"
            UPDATE action_records
            SET status = 'PROCESSING', requester_id = ?, error = NULL, expires_at = ?, updated_at = ?
            WHERE token = ? AND status IN ('PENDING', 'FAILED')
            "#,
        )
        .bind(&meta.requester_id)
        .bind(now + millis(self.ttl))
        .bind(now)
        .bind(token)
        .execute(&self.pool)
        .await?;

        let current = self.require(token).await?;
        if claimed.rows_affected() == 1 {
            return Ok(Acquire::Acquired(current));
        }

        // lost the race to another submission
        match current.status {
            ActionStatus::Applied => Ok(Acquire::Duplicate(
                current.result_payload.unwrap_or(Value::Null),
            )),
            _ => Ok(Acquire::Busy(current)),
        }
    }

    /// Cache the outcome and close the token
    pub async fn set_applied(&self, token: &str, result: &Value) -> CombatResult<()> {
        self.set_applied_on(&self.pool, token, result).await
    }

    /// [`ActionLedger::set_applied`] on a caller-supplied connection, so the
    /// flip can commit together with the state it caches.
    ///
    /// Fails if the caller no longer owns the record.
    pub async fn set_applied_on<'c, E>(&self, executor: E, token: &str, result: &Value) -> CombatResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let now = now_ms();
        let payload = serde_json::to_string(result)?;
        let updated = sqlx::query(
            r#"
            UPDATE action_records
            SET status = 'APPLIED', result_payload = ?, error = NULL, expires_at = ?, updated_at = ?
            WHERE token = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(&payload)
        .bind(now + millis(self.applied_retention))
        .bind(now)
        .bind(token)
        .execute(executor)
        .await?;

        if updated.rows_affected() == 0 {
            warn!("set_applied on {} found no PROCESSING record", token);
            return Err(CombatError::ActionInProgress(token.to_string()));
        }
        Ok(())
    }

    /// Record a failure; the token stays retryable
    pub async fn set_failed(&self, token: &str, error: &str) -> CombatResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE action_records
            SET status = 'FAILED', error = ?, updated_at = ?
            WHERE token = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(error)
        .bind(now_ms())
        .bind(token)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            warn!("set_failed on {} found no PROCESSING record", token);
        }
        Ok(())
    }

    /// Park a multi-step action until its next payload arrives.
    ///
    /// The next submission under this token must declare `next_expected_dto`
    /// or [`ActionLedger::try_acquire`] rejects it.
    pub async fn set_pending_with_expected(
        &self,
        token: &str,
        next_expected_dto: &str,
        partial_result: &Value,
    ) -> CombatResult<()> {
        self.set_pending_with_expected_on(&self.pool, token, next_expected_dto, partial_result)
            .await
    }

    pub async fn set_pending_with_expected_on<'c, E>(
        &self,
        executor: E,
        token: &str,
        next_expected_dto: &str,
        partial_result: &Value,
    ) -> CombatResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let now = now_ms();
        let payload = serde_json::to_string(partial_result)?;
        let updated = sqlx::query(
            r#"
            UPDATE action_records
            SET status = 'PENDING', parked_dto = expected_dto, expected_dto = ?,
                result_payload = ?, error = NULL,
                expires_at = ?, updated_at = ?
            WHERE token = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(next_expected_dto)
        .bind(&payload)
        .bind(now + millis(self.ttl))
        .bind(now)
        .bind(token)
        .execute(executor)
        .await?;

        if updated.rows_affected() == 0 {
            warn!("set_pending_with_expected on {} found no PROCESSING record", token);
            return Err(CombatError::ActionInProgress(token.to_string()));
        }
        Ok(())
    }

    /// Reclaim abandoned tokens and purge expired ones
    pub async fn sweep_expired(&self) -> CombatResult<SweepReport> {
        self.sweep_expired_at(now_ms()).await
    }

    /// Cleanup pass as of `now` (unix ms)
    pub async fn sweep_expired_at(&self, now: i64) -> CombatResult<SweepReport> {
        let reclaimed = sqlx::query(
            r#"
            UPDATE action_records
            SET status = 'PENDING', error = 'abandoned while processing', expires_at = ?, updated_at = ?
            WHERE status = 'PROCESSING' AND expires_at <= ?
            "#,
        )
        .bind(now + millis(self.ttl))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let purged = sqlx::query(
            "DELETE FROM action_records WHERE status IN ('PENDING', 'FAILED', 'APPLIED') AND expires_at <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if reclaimed > 0 || purged > 0 {
            info!(
                "Ledger sweep: reclaimed {} stuck action(s), purged {}",
                reclaimed, purged
            );
        }

        Ok(SweepReport { reclaimed, purged })
    }

    async fn require(&self, token: &str) -> CombatResult<ActionRecord> {
        self.get(token)
            .await?
            .ok_or_else(|| CombatError::NotFound(format!("action token '{}'", token)))
    }
}

fn into_record(row: RecordRow) -> CombatResult<ActionRecord> {
    let (
        action_token,
        requester_id,
        combat_id,
        expected_dto,
        parked_dto,
        status,
        result_payload,
        error,
        expires_at,
        created_at,
        updated_at,
    ) = row;

    let status = ActionStatus::parse(&status)
        .ok_or_else(|| CombatError::invalid_state(format!("unknown action status '{}'", status)))?;
    let result_payload = result_payload
        .map(|p| serde_json::from_str(&p))
        .transpose()?;

    Ok(ActionRecord {
        action_token,
        requester_id,
        combat_id,
        expected_dto,
        parked_dto,
        status,
        result_payload,
        error,
        expires_at,
        created_at,
        updated_at,
    })
}

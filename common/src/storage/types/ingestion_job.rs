use std::time::Duration;

use chrono::Duration as ChronoDuration;
use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE_SECS: i64 = 300;
pub const DEFAULT_PRIORITY: i32 = 0;

/// Queue-level lifecycle of one ingestion job. The document itself tracks
/// its own `Pending → Processing → Indexed | Failed` status; the job states
/// below exist for claiming, leasing and retry bookkeeping.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum JobState {
    #[serde(rename = "Pending")]
    #[default]
    Pending,
    #[serde(rename = "Reserved")]
    Reserved,
    #[serde(rename = "Processing")]
    Processing,
    #[serde(rename = "Succeeded")]
    Succeeded,
    #[serde(rename = "Failed")]
    Failed,
    #[serde(rename = "Cancelled")]
    Cancelled,
    #[serde(rename = "DeadLetter")]
    DeadLetter,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Reserved => "Reserved",
            JobState::Processing => "Processing",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
            JobState::Cancelled => "Cancelled",
            JobState::DeadLetter => "DeadLetter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Cancelled | JobState::DeadLetter
        )
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct JobErrorInfo {
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
enum JobTransition {
    Reserve,
    StartProcessing,
    Succeed,
    Fail,
    Cancel,
    DeadLetter,
    Release,
}

impl JobTransition {
    fn as_str(&self) -> &'static str {
        match self {
            JobTransition::Reserve => "reserve",
            JobTransition::StartProcessing => "start_processing",
            JobTransition::Succeed => "succeed",
            JobTransition::Fail => "fail",
            JobTransition::Cancel => "cancel",
            JobTransition::DeadLetter => "deadletter",
            JobTransition::Release => "release",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: JobLifecycleMachine,
        initial: Pending,
        states: [Pending, Reserved, Processing, Succeeded, Failed, Cancelled, DeadLetter],
        events {
            reserve {
                transition: { from: Pending, to: Reserved }
                transition: { from: Failed, to: Reserved }
            }
            start_processing {
                transition: { from: Reserved, to: Processing }
            }
            succeed {
                transition: { from: Processing, to: Succeeded }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
            cancel {
                transition: { from: Pending, to: Cancelled }
                transition: { from: Reserved, to: Cancelled }
                transition: { from: Processing, to: Cancelled }
            }
            deadletter {
                transition: { from: Failed, to: DeadLetter }
            }
            release {
                transition: { from: Reserved, to: Pending }
            }
        }
    }

    pub(super) fn pending() -> JobLifecycleMachine<(), Pending> {
        JobLifecycleMachine::new(())
    }

    pub(super) fn reserved() -> JobLifecycleMachine<(), Reserved> {
        pending()
            .reserve()
            .expect("reserve transition from Pending should exist")
    }

    pub(super) fn processing() -> JobLifecycleMachine<(), Processing> {
        reserved()
            .start_processing()
            .expect("start_processing transition from Reserved should exist")
    }

    pub(super) fn failed() -> JobLifecycleMachine<(), Failed> {
        processing()
            .fail()
            .expect("fail transition from Processing should exist")
    }
}

fn invalid_transition(state: &JobState, event: JobTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid job transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(state: &JobState, event: JobTransition) -> Result<JobState, AppError> {
    use lifecycle::*;
    match (state, event) {
        (JobState::Pending, JobTransition::Reserve) => pending()
            .reserve()
            .map(|_| JobState::Reserved)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Failed, JobTransition::Reserve) => failed()
            .reserve()
            .map(|_| JobState::Reserved)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Reserved, JobTransition::StartProcessing) => reserved()
            .start_processing()
            .map(|_| JobState::Processing)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Processing, JobTransition::Succeed) => processing()
            .succeed()
            .map(|_| JobState::Succeeded)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Processing, JobTransition::Fail) => processing()
            .fail()
            .map(|_| JobState::Failed)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Pending, JobTransition::Cancel) => pending()
            .cancel()
            .map(|_| JobState::Cancelled)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Reserved, JobTransition::Cancel) => reserved()
            .cancel()
            .map(|_| JobState::Cancelled)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Processing, JobTransition::Cancel) => processing()
            .cancel()
            .map(|_| JobState::Cancelled)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Failed, JobTransition::DeadLetter) => failed()
            .deadletter()
            .map(|_| JobState::DeadLetter)
            .map_err(|_| invalid_transition(state, event)),
        (JobState::Reserved, JobTransition::Release) => reserved()
            .release()
            .map(|_| JobState::Pending)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

stored_object!(IngestionJob, "ingestion_job", {
    /// Document this job (re)indexes. Chunk identity is scoped to the
    /// document, so jobs for different documents never contend.
    document_id: String,
    requested_by: String,
    state: JobState,
    attempts: u32,
    max_attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    scheduled_at: chrono::DateTime<chrono::Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<chrono::DateTime<chrono::Utc>>,
    lease_duration_secs: i64,
    worker_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    last_error_at: Option<chrono::DateTime<chrono::Utc>>,
    priority: i32
});

impl IngestionJob {
    pub fn new(document_id: String, requested_by: String) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            document_id,
            requested_by,
            state: JobState::Pending,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            scheduled_at: now,
            locked_at: None,
            lease_duration_secs: DEFAULT_LEASE_SECS,
            worker_id: None,
            error_code: None,
            error_message: None,
            last_error_at: None,
            priority: DEFAULT_PRIORITY,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs.max(0) as u64)
    }

    /// Queue a (re)ingestion of a document. Explicit retry and re-upload go
    /// through here as well: the pipeline always re-runs all stages from
    /// scratch at document granularity.
    pub async fn enqueue(
        document_id: String,
        requested_by: String,
        db: &SurrealDbClient,
    ) -> Result<IngestionJob, AppError> {
        let job = Self::new(document_id, requested_by);
        db.store_item(job.clone()).await?;
        Ok(job)
    }

    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        lease_duration: Duration,
    ) -> Result<Option<IngestionJob>, AppError> {
        debug_assert!(compute_next_state(&JobState::Pending, JobTransition::Reserve).is_ok());
        debug_assert!(compute_next_state(&JobState::Failed, JobTransition::Reserve).is_ok());

        const CLAIM_QUERY: &str = r#"
            UPDATE (
                SELECT * FROM type::table($table)
                WHERE state IN $candidate_states
                  AND scheduled_at <= $now
                  AND (
                        attempts < max_attempts
                        OR state IN $sticky_states
                  )
                  AND (
                        locked_at = NONE
                        OR time::unix($now) - time::unix(locked_at) >= lease_duration_secs
                  )
                ORDER BY priority DESC, scheduled_at ASC, created_at ASC
                LIMIT 1
            )
            SET state = $reserved_state,
                attempts = if state IN $increment_states THEN
                    if attempts + 1 > max_attempts THEN max_attempts ELSE attempts + 1 END
                ELSE
                    attempts
                END,
                locked_at = $now,
                worker_id = $worker_id,
                lease_duration_secs = $lease_secs,
                updated_at = $now
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind((
                "candidate_states",
                vec![
                    JobState::Pending.as_str(),
                    JobState::Failed.as_str(),
                    JobState::Reserved.as_str(),
                    JobState::Processing.as_str(),
                ],
            ))
            .bind((
                "sticky_states",
                vec![JobState::Reserved.as_str(), JobState::Processing.as_str()],
            ))
            .bind((
                "increment_states",
                vec![JobState::Pending.as_str(), JobState::Failed.as_str()],
            ))
            .bind(("reserved_state", JobState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_secs", lease_duration.as_secs() as i64))
            .await?;

        let job: Option<IngestionJob> = result.take(0)?;
        Ok(job)
    }

    pub async fn mark_processing(&self, db: &SurrealDbClient) -> Result<IngestionJob, AppError> {
        let next = compute_next_state(&self.state, JobTransition::StartProcessing)?;
        debug_assert_eq!(next, JobState::Processing);

        const START_PROCESSING_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $processing,
                updated_at = $now,
                locked_at = $now
            WHERE state = $reserved AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(START_PROCESSING_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("processing", JobState::Processing.as_str()))
            .bind(("reserved", JobState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<IngestionJob> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, JobTransition::StartProcessing))
    }

    pub async fn mark_succeeded(&self, db: &SurrealDbClient) -> Result<IngestionJob, AppError> {
        let next = compute_next_state(&self.state, JobTransition::Succeed)?;
        debug_assert_eq!(next, JobState::Succeeded);

        const COMPLETE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $succeeded,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                scheduled_at = $now,
                error_code = NONE,
                error_message = NONE,
                last_error_at = NONE
            WHERE state = $processing AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(COMPLETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("succeeded", JobState::Succeeded.as_str()))
            .bind(("processing", JobState::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<IngestionJob> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, JobTransition::Succeed))
    }

    pub async fn mark_failed(
        &self,
        error: JobErrorInfo,
        retry_delay: Duration,
        db: &SurrealDbClient,
    ) -> Result<IngestionJob, AppError> {
        let next = compute_next_state(&self.state, JobTransition::Fail)?;
        debug_assert_eq!(next, JobState::Failed);

        let now = chrono::Utc::now();
        let retry_at = now
            + ChronoDuration::from_std(retry_delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $failed,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                scheduled_at = $retry_at,
                error_code = $error_code,
                error_message = $error_message,
                last_error_at = $now
            WHERE state = $processing AND worker_id = $worker_id
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("failed", JobState::Failed.as_str()))
            .bind(("processing", JobState::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("retry_at", SurrealDatetime::from(retry_at)))
            .bind(("error_code", error.code.clone()))
            .bind(("error_message", error.message.clone()))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<IngestionJob> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, JobTransition::Fail))
    }

    pub async fn mark_dead_letter(
        &self,
        error: JobErrorInfo,
        db: &SurrealDbClient,
    ) -> Result<IngestionJob, AppError> {
        let next = compute_next_state(&self.state, JobTransition::DeadLetter)?;
        debug_assert_eq!(next, JobState::DeadLetter);

        const DEAD_LETTER_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $dead,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                scheduled_at = $now,
                error_code = $error_code,
                error_message = $error_message,
                last_error_at = $now
            WHERE state = $failed
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(DEAD_LETTER_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("dead", JobState::DeadLetter.as_str()))
            .bind(("failed", JobState::Failed.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("error_code", error.code.clone()))
            .bind(("error_message", error.message.clone()))
            .await?;

        let updated: Option<IngestionJob> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, JobTransition::DeadLetter))
    }

    pub async fn mark_cancelled(&self, db: &SurrealDbClient) -> Result<IngestionJob, AppError> {
        compute_next_state(&self.state, JobTransition::Cancel)?;

        const CANCEL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $cancelled,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE
            WHERE state IN $allow_states
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(CANCEL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("cancelled", JobState::Cancelled.as_str()))
            .bind((
                "allow_states",
                vec![
                    JobState::Pending.as_str(),
                    JobState::Reserved.as_str(),
                    JobState::Processing.as_str(),
                ],
            ))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<IngestionJob> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, JobTransition::Cancel))
    }

    pub async fn release(&self, db: &SurrealDbClient) -> Result<IngestionJob, AppError> {
        compute_next_state(&self.state, JobTransition::Release)?;

        const RELEASE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $pending,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE
            WHERE state = $reserved
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(RELEASE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("pending", JobState::Pending.as_str()))
            .bind(("reserved", JobState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<IngestionJob> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, JobTransition::Release))
    }

    pub async fn get_unfinished(db: &SurrealDbClient) -> Result<Vec<IngestionJob>, AppError> {
        let jobs: Vec<IngestionJob> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE state IN $active_states
                 ORDER BY scheduled_at ASC, created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind((
                "active_states",
                vec![
                    JobState::Pending.as_str(),
                    JobState::Reserved.as_str(),
                    JobState::Processing.as_str(),
                    JobState::Failed.as_str(),
                ],
            ))
            .await?
            .take(0)?;

        Ok(jobs)
    }
}

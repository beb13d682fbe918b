use crate::{
    domain::{
        entities::{JobData, JobFilter, JobMeta, JobOutcome, JobRecord, JobStatus},
        repositories::JobStore,
    },
    error::{AppError, Result},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, Bson, DateTime as BsonDateTime, Document},
    options::{
        FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument,
    },
    Collection, Cursor, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// MongoDB document representation of a job record.
///
/// Field names follow the Agenda collection layout (`nextRunAt`, `lockedAt`,
/// `meta.status`, ...) so existing tooling can read the collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub data: JobData,

    // Scheduling and lock fields, hit by every poll cycle
    pub next_run_at: Option<BsonDateTime>,
    pub locked_at: Option<BsonDateTime>,
    #[serde(default)]
    pub disabled: bool,
    pub repeat_interval: Option<String>,

    pub last_run_at: Option<BsonDateTime>,
    pub last_finished_at: Option<BsonDateTime>,

    pub failed_at: Option<BsonDateTime>,
    #[serde(default)]
    pub fail_count: i64,
    pub fail_reason: Option<String>,

    pub meta: JobMetaDocument,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetaDocument {
    pub status: JobStatus,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

fn to_bson_time(value: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_system_time(value.into())
}

fn from_bson_time(value: BsonDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(value.to_system_time())
}

impl From<&JobRecord> for JobDocument {
    fn from(job: &JobRecord) -> Self {
        JobDocument {
            id: job.id.clone(),
            name: job.name.clone(),
            data: job.data.clone(),
            next_run_at: job.next_run_at.map(to_bson_time),
            locked_at: job.locked_at.map(to_bson_time),
            disabled: job.disabled,
            repeat_interval: job.repeat_interval.clone(),
            last_run_at: job.last_run_at.map(to_bson_time),
            last_finished_at: job.last_finished_at.map(to_bson_time),
            failed_at: job.failed_at.map(to_bson_time),
            fail_count: i64::from(job.fail_count),
            fail_reason: job.fail_reason.clone(),
            meta: JobMetaDocument {
                status: job.meta.status,
                duration_ms: job.meta.duration_ms.map(|ms| ms as i64),
            },
            created_at: to_bson_time(job.created_at),
            updated_at: to_bson_time(job.updated_at),
        }
    }
}

impl From<JobDocument> for JobRecord {
    fn from(doc: JobDocument) -> Self {
        JobRecord {
            id: doc.id,
            name: doc.name,
            data: doc.data,
            next_run_at: doc.next_run_at.map(from_bson_time),
            last_run_at: doc.last_run_at.map(from_bson_time),
            last_finished_at: doc.last_finished_at.map(from_bson_time),
            locked_at: doc.locked_at.map(from_bson_time),
            failed_at: doc.failed_at.map(from_bson_time),
            fail_count: u32::try_from(doc.fail_count.max(0)).unwrap_or(u32::MAX),
            fail_reason: doc.fail_reason,
            repeat_interval: doc.repeat_interval,
            disabled: doc.disabled,
            meta: JobMeta {
                status: doc.meta.status,
                duration_ms: doc.meta.duration_ms.map(|ms| ms.max(0) as u64),
            },
            created_at: from_bson_time(doc.created_at),
            updated_at: from_bson_time(doc.updated_at),
        }
    }
}

/// MongoDB implementation of [`JobStore`].
///
/// Claims go through `findOneAndUpdate` with the full eligibility predicate in
/// the filter, so two pollers racing for one record cannot both win.
pub struct MongoJobRepository {
    collection: Collection<JobDocument>,
}

impl MongoJobRepository {
    pub fn new(database: &Database, collection_name: &str) -> Self {
        Self {
            collection: database.collection::<JobDocument>(collection_name),
        }
    }

    async fn collect(&self, mut cursor: Cursor<JobDocument>) -> Result<Vec<JobRecord>> {
        let mut jobs = Vec::new();
        while cursor
            .advance()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Cursor error: {}", e)))?
        {
            let document = cursor
                .deserialize_current()
                .map_err(|e| AppError::DatabaseError(format!("Failed to deserialize job: {}", e)))?;
            jobs.push(JobRecord::from(document));
        }
        Ok(jobs)
    }
}

/// Eligibility predicate shared by the scan and the claim.
fn eligible_filter(now: DateTime<Utc>, lock_cutoff: DateTime<Utc>) -> Document {
    doc! {
        "disabled": { "$ne": true },
        "nextRunAt": { "$lte": to_bson_time(now) },
        "$or": unlocked_clause(lock_cutoff),
    }
}

fn due_filter(names: &[String], now: DateTime<Utc>, lock_cutoff: DateTime<Utc>) -> Document {
    let mut filter = eligible_filter(now, lock_cutoff);
    filter.insert("name", doc! { "$in": names });
    filter
}

fn claim_filter(id: &str, now: DateTime<Utc>, lock_cutoff: DateTime<Utc>) -> Document {
    let mut filter = eligible_filter(now, lock_cutoff);
    filter.insert("_id", id);
    filter
}

fn claim_update(now: DateTime<Utc>) -> Document {
    let locked_at = to_bson_time(now);
    doc! {
        "$set": {
            "lockedAt": locked_at,
            "lastRunAt": locked_at,
            "meta.status": JobStatus::InProgress.as_str(),
            "updatedAt": locked_at,
        }
    }
}

fn unlocked_clause(lock_cutoff: DateTime<Utc>) -> Vec<Document> {
    vec![
        doc! { "lockedAt": Bson::Null },
        doc! { "lockedAt": { "$lte": to_bson_time(lock_cutoff) } },
    ]
}

fn after_update() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

fn outcome_update(outcome: &JobOutcome) -> Document {
    let finished_at = to_bson_time(outcome.finished_at());
    let mut set = doc! {
        "lockedAt": Bson::Null,
        "lastFinishedAt": finished_at,
        "nextRunAt": outcome.next_run_at().map(to_bson_time),
        "meta.status": outcome.status().as_str(),
        "meta.durationMs": outcome.duration_ms() as i64,
        "updatedAt": finished_at,
    };

    match outcome {
        JobOutcome::Failed { reason, .. } => {
            set.insert("failedAt", finished_at);
            set.insert("failReason", reason.as_str());
            doc! { "$set": set, "$inc": { "failCount": 1_i64 } }
        }
        _ => doc! { "$set": set },
    }
}

#[async_trait]
impl JobStore for MongoJobRepository {
    async fn prepare(&self) -> Result<()> {
        let indexes = vec![
            // Claim scan: due, unlocked, enabled
            IndexModel::builder()
                .keys(doc! {
                    "name": 1,
                    "nextRunAt": 1,
                    "lockedAt": 1,
                    "disabled": 1
                })
                .options(
                    IndexOptions::builder()
                        .name("findAndLockNextJobIndex".to_string())
                        .build(),
                )
                .build(),
            IndexModel::builder()
                .keys(doc! { "meta.status": 1, "nextRunAt": 1 })
                .options(
                    IndexOptions::builder()
                        .name("status_next_run_idx".to_string())
                        .build(),
                )
                .build(),
        ];

        self.collection
            .create_indexes(indexes, None)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to create job indexes: {}", e)))?;

        Ok(())
    }

    async fn insert(&self, job: &JobRecord) -> Result<()> {
        self.collection
            .insert_one(JobDocument::from(job), None)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to create job: {}", e)))?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<JobRecord>> {
        let document = self
            .collection
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to find job: {}", e)))?;

        Ok(document.map(JobRecord::from))
    }

    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        let mut query = Document::new();
        if let Some(name) = &filter.name {
            query.insert("name", name.as_str());
        }
        if let Some(status) = filter.status {
            query.insert("meta.status", status.as_str());
        }

        let options = FindOptions::builder()
            .sort(doc! { "nextRunAt": 1, "createdAt": 1 })
            .limit(filter.limit)
            .build();

        let cursor = self
            .collection
            .find(query, options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list jobs: {}", e)))?;

        self.collect(cursor).await
    }

    async fn find_due(
        &self,
        names: &[String],
        now: DateTime<Utc>,
        lock_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobRecord>> {
        let filter = due_filter(names, now, lock_cutoff);

        let options = FindOptions::builder()
            .sort(doc! { "nextRunAt": 1 })
            .limit(limit)
            .build();

        let cursor = self
            .collection
            .find(filter, options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to scan due jobs: {}", e)))?;

        self.collect(cursor).await
    }

    async fn claim(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lock_cutoff: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let claimed = self
            .collection
            .find_one_and_update(
                claim_filter(id, now, lock_cutoff),
                claim_update(now),
                after_update(),
            )
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to claim job: {}", e)))?;

        if claimed.is_none() {
            debug!(job_id = %id, "claim lost to another poller");
        }

        Ok(claimed.map(JobRecord::from))
    }

    async fn finish(
        &self,
        id: &str,
        claimed_at: DateTime<Utc>,
        outcome: &JobOutcome,
    ) -> Result<bool> {
        let filter = doc! { "_id": id, "lockedAt": to_bson_time(claimed_at) };

        let result = self
            .collection
            .update_one(filter, outcome_update(outcome), None)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to record job outcome: {}", e)))?;

        Ok(result.matched_count > 0)
    }

    async fn reset_for_retry(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lock_cutoff: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let filter = doc! { "_id": id, "$or": unlocked_clause(lock_cutoff) };
        let now = to_bson_time(now);
        let update = doc! {
            "$set": {
                "failedAt": Bson::Null,
                "failCount": 0_i64,
                "failReason": Bson::Null,
                "lockedAt": Bson::Null,
                "nextRunAt": now,
                "meta.status": JobStatus::Pending.as_str(),
                "updatedAt": now,
            }
        };

        let document = self
            .collection
            .find_one_and_update(filter, update, after_update())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to reset job: {}", e)))?;

        Ok(document.map(JobRecord::from))
    }

    async fn set_disabled(&self, id: &str, disabled: bool) -> Result<Option<JobRecord>> {
        let update = doc! {
            "$set": { "disabled": disabled, "updatedAt": BsonDateTime::now() }
        };

        let document = self
            .collection
            .find_one_and_update(doc! { "_id": id }, update, after_update())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to update job: {}", e)))?;

        Ok(document.map(JobRecord::from))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = self
            .collection
            .delete_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete job: {}", e)))?;

        Ok(result.deleted_count > 0)
    }

    async fn purge_completed(&self) -> Result<u64> {
        let filter = doc! {
            "meta.status": JobStatus::Completed.as_str(),
            "repeatInterval": Bson::Null,
        };

        let result = self
            .collection
            .delete_many(filter, None)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to purge jobs: {}", e)))?;

        Ok(result.deleted_count)
    }
}

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::debug;
use std::sync::Arc;

use crate::db::{get_connection, DbPool};
use crate::schema::sync_queue;
use crate::schema::sync_queue::dsl::*;
use crate::sync::{Result, SyncError};

use super::queue_model::{
    backoff_delay, NewQueueItem, QueueItem, QueueItemDB, QueueStatus, DEFAULT_MAX_RETRIES,
};

/// Repository for the durable retry queue.
///
/// Item state machine: pending -> processing -> completed, back to
/// pending with an incremented retry count, or abandoned once the retry
/// bound is hit. Abandoned items stay in the table for auditing.
pub struct QueueRepository {
    pool: Arc<DbPool>,
}

impl QueueRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Enqueues a failed operation, eligible to run immediately
    pub fn enqueue(&self, new_item: NewQueueItem) -> Result<QueueItem> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        let now = Utc::now();
        let item_db = QueueItemDB {
            id: uuid::Uuid::new_v4().to_string(),
            operation: new_item.operation.as_str().to_string(),
            event_id: new_item.event_id,
            integration_id: new_item.integration_id,
            payload: serde_json::to_string(&new_item.payload)?,
            priority: new_item.priority,
            status: QueueStatus::Pending.as_str().to_string(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: new_item.last_error,
            next_run_at: now,
            created_at: now,
            updated_at: now,
        };

        diesel::insert_into(sync_queue::table)
            .values(&item_db)
            .execute(&mut conn)?;

        debug!("Enqueued {} for event {}", item_db.operation, item_db.event_id);
        Ok(item_db.into())
    }

    /// Claims a batch of due items, flipping them to `processing`.
    ///
    /// Select and flip run inside one immediate transaction, which takes
    /// the write lock up front; two drainer instances contending on the
    /// same store can never claim the same item. Selection order is
    /// priority descending, then eligibility time ascending; unrelated
    /// events may interleave freely.
    pub fn claim_due(&self, now: DateTime<Utc>, batch: i64) -> Result<Vec<QueueItem>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        let due = conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
            let due = sync_queue
                .filter(status.eq(QueueStatus::Pending.as_str()))
                .filter(next_run_at.le(now))
                .order((priority.desc(), next_run_at.asc()))
                .limit(batch)
                .load::<QueueItemDB>(conn)?;

            let ids: Vec<String> = due.iter().map(|item| item.id.clone()).collect();
            if !ids.is_empty() {
                diesel::update(sync_queue.filter(id.eq_any(&ids)))
                    .set((
                        status.eq(QueueStatus::Processing.as_str()),
                        updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;
            }

            Ok(due)
        })?;

        Ok(due.into_iter().map(QueueItem::from).collect())
    }

    /// Marks a replayed item as completed; kept, not deleted
    pub fn mark_completed(&self, item_id: &str) -> Result<()> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        diesel::update(sync_queue.find(item_id))
            .set((
                status.eq(QueueStatus::Completed.as_str()),
                updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    /// Records a retryable failure: bumps the retry count, reschedules
    /// with exponential backoff, or abandons once the bound is reached.
    /// Returns the status the item ended up in.
    pub fn record_failure(&self, item_id: &str, error: &str) -> Result<QueueStatus> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        let item = sync_queue
            .find(item_id)
            .first::<QueueItemDB>(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    SyncError::NotFound(format!("Queue item {} not found", item_id))
                }
                _ => SyncError::DatabaseError(e.to_string()),
            })?;

        let now = Utc::now();
        let attempts = item.retry_count + 1;

        if attempts >= item.max_retries {
            diesel::update(sync_queue.find(item_id))
                .set((
                    status.eq(QueueStatus::Abandoned.as_str()),
                    retry_count.eq(attempts),
                    last_error.eq(Some(error)),
                    updated_at.eq(now),
                ))
                .execute(&mut conn)?;
            return Ok(QueueStatus::Abandoned);
        }

        diesel::update(sync_queue.find(item_id))
            .set((
                status.eq(QueueStatus::Pending.as_str()),
                retry_count.eq(attempts),
                last_error.eq(Some(error)),
                next_run_at.eq(now + backoff_delay(attempts)),
                updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        Ok(QueueStatus::Pending)
    }

    /// Abandons an item outright on a terminal failure
    pub fn abandon(&self, item_id: &str, error: &str) -> Result<()> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        diesel::update(sync_queue.find(item_id))
            .set((
                status.eq(QueueStatus::Abandoned.as_str()),
                last_error.eq(Some(error)),
                updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    pub fn get_by_id(&self, item_id: &str) -> Result<QueueItem> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        let item = sync_queue
            .find(item_id)
            .first::<QueueItemDB>(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    SyncError::NotFound(format!("Queue item {} not found", item_id))
                }
                _ => SyncError::DatabaseError(e.to_string()),
            })?;

        Ok(item.into())
    }

    /// Lists items by status, newest first. Operators use this to inspect
    /// the abandoned backlog.
    pub fn list_by_status(&self, status_filter: QueueStatus) -> Result<Vec<QueueItem>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;

        let rows = sync_queue
            .filter(status.eq(status_filter.as_str()))
            .order(updated_at.desc())
            .load::<QueueItemDB>(&mut conn)?;

        Ok(rows.into_iter().map(QueueItem::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::events::{EventKind, EventStatus, UnifiedEvent};
    use crate::sync::sync_model::{QueuePayload, SyncOperation};
    use chrono::Duration;
    use diesel::r2d2::{ConnectionManager, Pool};
    use diesel::sqlite::SqliteConnection;
    use diesel_migrations::MigrationHarness;

    fn create_test_pool() -> Arc<DbPool> {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .expect("Failed to create test pool");
        pool.get()
            .unwrap()
            .run_pending_migrations(db::MIGRATIONS)
            .expect("Failed to run migrations");
        Arc::new(pool)
    }

    fn sample_payload() -> QueuePayload {
        let now = Utc::now();
        QueuePayload {
            operation: SyncOperation::Create,
            integration_id: "int-1".to_string(),
            event: UnifiedEvent {
                id: "evt-1".to_string(),
                kind: EventKind::Event,
                title: "Site visit".to_string(),
                description: None,
                start_at: now,
                end_at: now + Duration::hours(1),
                all_day: false,
                location: None,
                attendees: vec![],
                status: EventStatus::Scheduled,
                is_recurring: false,
                client_id: None,
                created_at: now,
                updated_at: now,
            },
            external_id: None,
        }
    }

    fn enqueue_one(repo: &QueueRepository, priority_val: i32) -> QueueItem {
        repo.enqueue(NewQueueItem {
            operation: SyncOperation::Create,
            event_id: "evt-1".to_string(),
            integration_id: "int-1".to_string(),
            payload: sample_payload(),
            priority: priority_val,
            last_error: Some("timeout".to_string()),
        })
        .unwrap()
    }

    #[test]
    fn enqueued_item_is_immediately_eligible() {
        let repo = QueueRepository::new(create_test_pool());
        let item = enqueue_one(&repo, 0);
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.status, QueueStatus::Pending);

        let claimed = repo.claim_due(Utc::now(), 10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, item.id);
        // Claimed items are no longer visible to a second drain.
        assert!(repo.claim_due(Utc::now(), 10).unwrap().is_empty());
    }

    #[test]
    fn claimed_items_are_invisible_to_a_second_drainer() {
        let pool = create_test_pool();
        let first = QueueRepository::new(pool.clone());
        let second = QueueRepository::new(pool);
        let item = enqueue_one(&first, 0);

        let claimed = first.claim_due(Utc::now(), 10).unwrap();
        assert_eq!(claimed.len(), 1);
        // The claim commits the processing flip before returning, so a
        // second drainer over the same store sees nothing to take.
        assert_eq!(
            first.get_by_id(&item.id).unwrap().status,
            QueueStatus::Processing
        );
        assert!(second.claim_due(Utc::now(), 10).unwrap().is_empty());
    }

    #[test]
    fn claim_orders_by_priority_then_eligibility() {
        let repo = QueueRepository::new(create_test_pool());
        let low = enqueue_one(&repo, 0);
        let high = enqueue_one(&repo, 5);

        let claimed = repo.claim_due(Utc::now(), 10).unwrap();
        assert_eq!(claimed[0].id, high.id);
        assert_eq!(claimed[1].id, low.id);
    }

    #[test]
    fn failure_backs_off_exponentially_and_abandons_at_bound() {
        let repo = QueueRepository::new(create_test_pool());
        let item = enqueue_one(&repo, 0);

        let before = Utc::now();
        assert_eq!(
            repo.record_failure(&item.id, "still down").unwrap(),
            QueueStatus::Pending
        );
        let after_first = repo.get_by_id(&item.id).unwrap();
        assert_eq!(after_first.retry_count, 1);
        // First retry waits at least 2^1 minutes.
        assert!(after_first.next_run_at >= before + Duration::minutes(2));
        assert!(repo.claim_due(Utc::now(), 10).unwrap().is_empty());

        let before = Utc::now();
        assert_eq!(
            repo.record_failure(&item.id, "still down").unwrap(),
            QueueStatus::Pending
        );
        let after_second = repo.get_by_id(&item.id).unwrap();
        assert_eq!(after_second.retry_count, 2);
        assert!(after_second.next_run_at >= before + Duration::minutes(4));

        // Third failure hits max_retries = 3: abandoned, never rescheduled.
        assert_eq!(
            repo.record_failure(&item.id, "gave up").unwrap(),
            QueueStatus::Abandoned
        );
        let final_item = repo.get_by_id(&item.id).unwrap();
        assert_eq!(final_item.status, QueueStatus::Abandoned);
        assert_eq!(final_item.retry_count, 3);
        assert_eq!(final_item.last_error.as_deref(), Some("gave up"));

        let abandoned = repo.list_by_status(QueueStatus::Abandoned).unwrap();
        assert_eq!(abandoned.len(), 1);
    }

    #[test]
    fn completed_items_are_kept_but_not_reclaimed() {
        let repo = QueueRepository::new(create_test_pool());
        let item = enqueue_one(&repo, 0);
        let claimed = repo.claim_due(Utc::now(), 10).unwrap();
        assert_eq!(claimed.len(), 1);

        repo.mark_completed(&item.id).unwrap();
        assert_eq!(
            repo.get_by_id(&item.id).unwrap().status,
            QueueStatus::Completed
        );
        assert!(repo.claim_due(Utc::now(), 10).unwrap().is_empty());
    }

    #[test]
    fn payload_snapshot_round_trips() {
        let repo = QueueRepository::new(create_test_pool());
        let item = enqueue_one(&repo, 0);
        let parsed = repo.get_by_id(&item.id).unwrap().parse_payload().unwrap();
        assert_eq!(parsed.event.title, "Site visit");
        assert_eq!(parsed.operation, SyncOperation::Create);
    }

    #[test]
    fn batch_limit_is_respected() {
        let repo = QueueRepository::new(create_test_pool());
        for _ in 0..4 {
            enqueue_one(&repo, 0);
        }
        let claimed = repo.claim_due(Utc::now(), 2).unwrap();
        assert_eq!(claimed.len(), 2);
    }
}

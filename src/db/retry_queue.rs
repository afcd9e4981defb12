use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

use crate::providers::OwnedNumber;
use crate::provisioning::models::{RetryQueueItem, RetryStatus};

// key: provisioning-db -> retry-queue

#[derive(Debug, FromRow)]
struct RetryQueueRow {
    id: Uuid,
    tenant_id: Uuid,
    plan_id: String,
    requested_count: i32,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    orphaned_numbers: Json<Vec<OwnedNumber>>,
    next_attempt_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RetryQueueRow> for RetryQueueItem {
    fn from(row: RetryQueueRow) -> Self {
        RetryQueueItem {
            id: row.id,
            tenant_id: row.tenant_id,
            plan_id: row.plan_id,
            requested_count: row.requested_count,
            status: RetryStatus::from_str(&row.status),
            attempts: row.attempts,
            last_error: row.last_error,
            orphaned_numbers: row.orphaned_numbers.0,
            next_attempt_at: row.next_attempt_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub async fn insert_item<'c, E>(executor: E, item: &RetryQueueItem) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO provisioning_retry_queue (
            id,
            tenant_id,
            plan_id,
            requested_count,
            status,
            attempts,
            last_error,
            orphaned_numbers,
            next_attempt_at,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(item.id)
    .bind(item.tenant_id)
    .bind(&item.plan_id)
    .bind(item.requested_count)
    .bind(item.status.as_str())
    .bind(item.attempts)
    .bind(item.last_error.as_deref())
    .bind(Json(&item.orphaned_numbers))
    .bind(item.next_attempt_at)
    .bind(item.created_at)
    .bind(item.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn update_item<'c, E>(executor: E, item: &RetryQueueItem) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE provisioning_retry_queue
        SET plan_id = $2,
            requested_count = $3,
            status = $4,
            attempts = $5,
            last_error = $6,
            orphaned_numbers = $7,
            next_attempt_at = $8,
            updated_at = $9
        WHERE id = $1
        "#,
    )
    .bind(item.id)
    .bind(&item.plan_id)
    .bind(item.requested_count)
    .bind(item.status.as_str())
    .bind(item.attempts)
    .bind(item.last_error.as_deref())
    .bind(Json(&item.orphaned_numbers))
    .bind(item.next_attempt_at)
    .bind(item.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn fetch_item<'c, E>(executor: E, item_id: Uuid) -> Result<Option<RetryQueueItem>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query_as::<_, RetryQueueRow>(
        "SELECT * FROM provisioning_retry_queue WHERE id = $1",
    )
    .bind(item_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(RetryQueueItem::from))
}

pub async fn fetch_open_item<'c, E>(
    executor: E,
    tenant_id: Uuid,
    max_attempts: i32,
) -> Result<Option<RetryQueueItem>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query_as::<_, RetryQueueRow>(
        r#"
        SELECT *
        FROM provisioning_retry_queue
        WHERE tenant_id = $1
          AND status IN ('pending', 'failed')
          AND attempts < $2
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .bind(max_attempts)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(RetryQueueItem::from))
}

pub async fn fetch_due_items<'c, E>(
    executor: E,
    now: DateTime<Utc>,
    max_attempts: i32,
    limit: i64,
) -> Result<Vec<RetryQueueItem>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, RetryQueueRow>(
        r#"
        SELECT *
        FROM provisioning_retry_queue
        WHERE status IN ('pending', 'failed')
          AND next_attempt_at <= $1
          AND attempts < $2
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $3
        "#,
    )
    .bind(now)
    .bind(max_attempts)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(RetryQueueItem::from).collect())
}

pub async fn fetch_exhausted_items<'c, E>(
    executor: E,
    max_attempts: i32,
) -> Result<Vec<RetryQueueItem>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, RetryQueueRow>(
        r#"
        SELECT *
        FROM provisioning_retry_queue
        WHERE status = 'failed'
          AND attempts >= $1
        ORDER BY updated_at DESC
        "#,
    )
    .bind(max_attempts)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(RetryQueueItem::from).collect())
}

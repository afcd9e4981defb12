use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

use crate::provisioning::models::PoolEntry;

// key: provisioning-db -> shared-number-pool

#[derive(Debug, FromRow)]
struct PoolEntryRow {
    id: Uuid,
    phone_number: String,
    external_carrier_id: String,
    external_voice_id: Option<String>,
    assigned_tenant_id: Option<Uuid>,
    region: String,
    assigned_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<PoolEntryRow> for PoolEntry {
    fn from(row: PoolEntryRow) -> Self {
        PoolEntry {
            id: row.id,
            phone_number: row.phone_number,
            external_carrier_id: row.external_carrier_id,
            external_voice_id: row.external_voice_id,
            assigned_tenant_id: row.assigned_tenant_id,
            region: row.region,
            assigned_at: row.assigned_at,
            created_at: row.created_at,
        }
    }
}

pub async fn insert_pool_entry<'c, E>(executor: E, entry: &PoolEntry) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO pool_entries (
            id,
            phone_number,
            external_carrier_id,
            external_voice_id,
            assigned_tenant_id,
            region,
            assigned_at,
            created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(&entry.phone_number)
    .bind(&entry.external_carrier_id)
    .bind(entry.external_voice_id.as_deref())
    .bind(entry.assigned_tenant_id)
    .bind(&entry.region)
    .bind(entry.assigned_at)
    .bind(entry.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn fetch_pool_entry<'c, E>(
    executor: E,
    entry_id: Uuid,
) -> Result<Option<PoolEntry>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query_as::<_, PoolEntryRow>("SELECT * FROM pool_entries WHERE id = $1")
        .bind(entry_id)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(PoolEntry::from))
}

pub async fn claim_entry<'c, E>(
    executor: E,
    entry_id: Uuid,
    tenant_id: Uuid,
    at: DateTime<Utc>,
) -> Result<Option<PoolEntry>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query_as::<_, PoolEntryRow>(
        r#"
        UPDATE pool_entries
        SET assigned_tenant_id = $2,
            assigned_at = $3
        WHERE id = $1
          AND assigned_tenant_id IS NULL
        RETURNING *
        "#,
    )
    .bind(entry_id)
    .bind(tenant_id)
    .bind(at)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(PoolEntry::from))
}

pub async fn claim_any_available<'c, E>(
    executor: E,
    region: &str,
    tenant_id: Uuid,
    at: DateTime<Utc>,
) -> Result<Option<PoolEntry>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query_as::<_, PoolEntryRow>(
        r#"
        UPDATE pool_entries
        SET assigned_tenant_id = $2,
            assigned_at = $3
        WHERE id = (
            SELECT id
            FROM pool_entries
            WHERE region = $1
              AND assigned_tenant_id IS NULL
            ORDER BY external_voice_id IS NULL, created_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
          AND assigned_tenant_id IS NULL
        RETURNING *
        "#,
    )
    .bind(region)
    .bind(tenant_id)
    .bind(at)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(PoolEntry::from))
}

pub async fn set_voice_id<'c, E>(executor: E, entry_id: Uuid, voice_id: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query("UPDATE pool_entries SET external_voice_id = $2 WHERE id = $1")
        .bind(entry_id)
        .bind(voice_id)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn return_entry<'c, E>(
    executor: E,
    entry_id: Uuid,
    tenant_id: Uuid,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        UPDATE pool_entries
        SET assigned_tenant_id = NULL,
            assigned_at = NULL
        WHERE id = $1
          AND assigned_tenant_id = $2
        RETURNING id
        "#,
    )
    .bind(entry_id)
    .bind(tenant_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}

pub async fn count_available<'c, E>(executor: E, region: &str) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM pool_entries WHERE region = $1 AND assigned_tenant_id IS NULL",
    )
    .bind(region)
    .fetch_one(executor)
    .await
}

use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

use crate::provisioning::models::{PhoneResource, PhoneResourceStatus, ResourceOrigin};

// key: provisioning-db -> phone-resource-ledger

#[derive(Debug, FromRow)]
struct PhoneResourceRow {
    id: Uuid,
    tenant_id: Uuid,
    phone_number: String,
    external_carrier_id: String,
    external_voice_id: String,
    assigned_assistant_id: Option<String>,
    origin: String,
    pool_entry_id: Option<Uuid>,
    status: String,
    created_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
}

impl From<PhoneResourceRow> for PhoneResource {
    fn from(row: PhoneResourceRow) -> Self {
        PhoneResource {
            id: row.id,
            tenant_id: row.tenant_id,
            phone_number: row.phone_number,
            external_carrier_id: row.external_carrier_id,
            external_voice_id: row.external_voice_id,
            assigned_assistant_id: row.assigned_assistant_id,
            origin: ResourceOrigin::from_str(&row.origin),
            pool_entry_id: row.pool_entry_id,
            status: PhoneResourceStatus::from_str(&row.status),
            created_at: row.created_at,
            released_at: row.released_at,
        }
    }
}

const PHONE_RESOURCE_COLUMNS: &str = "id, tenant_id, phone_number, external_carrier_id, external_voice_id, assigned_assistant_id, origin, pool_entry_id, status, created_at, released_at";

pub async fn insert_phone_resource<'c, E>(
    executor: E,
    resource: &PhoneResource,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO phone_resources (
            id,
            tenant_id,
            phone_number,
            external_carrier_id,
            external_voice_id,
            assigned_assistant_id,
            origin,
            pool_entry_id,
            status,
            created_at,
            released_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(resource.id)
    .bind(resource.tenant_id)
    .bind(&resource.phone_number)
    .bind(&resource.external_carrier_id)
    .bind(&resource.external_voice_id)
    .bind(resource.assigned_assistant_id.as_deref())
    .bind(resource.origin.as_str())
    .bind(resource.pool_entry_id)
    .bind(resource.status.as_str())
    .bind(resource.created_at)
    .bind(resource.released_at)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn fetch_phone_resource<'c, E>(
    executor: E,
    resource_id: Uuid,
) -> Result<Option<PhoneResource>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query_as::<_, PhoneResourceRow>(&format!(
        "SELECT {PHONE_RESOURCE_COLUMNS} FROM phone_resources WHERE id = $1"
    ))
    .bind(resource_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(PhoneResource::from))
}

pub async fn list_active_phone_resources<'c, E>(
    executor: E,
    tenant_id: Uuid,
) -> Result<Vec<PhoneResource>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, PhoneResourceRow>(&format!(
        "SELECT {PHONE_RESOURCE_COLUMNS} FROM phone_resources WHERE tenant_id = $1 AND status = 'active' ORDER BY created_at ASC, id ASC"
    ))
    .bind(tenant_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(PhoneResource::from).collect())
}

pub async fn count_active_phone_resources<'c, E>(
    executor: E,
    tenant_id: Uuid,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM phone_resources WHERE tenant_id = $1 AND status = 'active'",
    )
    .bind(tenant_id)
    .fetch_one(executor)
    .await
}

pub async fn mark_phone_released<'c, E>(
    executor: E,
    resource_id: Uuid,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        UPDATE phone_resources
        SET status = 'released',
            released_at = $2
        WHERE id = $1
          AND status = 'active'
        RETURNING id
        "#,
    )
    .bind(resource_id)
    .bind(at)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}

use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Postgres};
use uuid::Uuid;

use crate::provisioning::models::{AssistantResource, AssistantStatus, ResourceQuota, Tenant};

// key: provisioning-db -> tenants,assistants

#[derive(Debug, FromRow)]
struct TenantRow {
    id: Uuid,
    plan_id: String,
    subscription_status: String,
    business_name: String,
    region: Option<String>,
    max_concurrent_sessions: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Tenant {
            id: row.id,
            plan_id: row.plan_id,
            subscription_status: row.subscription_status,
            business_name: row.business_name,
            region: row.region,
            max_concurrent_sessions: row.max_concurrent_sessions.max(0) as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AssistantRow {
    id: Uuid,
    tenant_id: Uuid,
    external_voice_id: String,
    status: String,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<AssistantRow> for AssistantResource {
    fn from(row: AssistantRow) -> Self {
        AssistantResource {
            id: row.id,
            tenant_id: row.tenant_id,
            external_voice_id: row.external_voice_id,
            status: AssistantStatus::from_str(&row.status),
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        }
    }
}

pub async fn fetch_tenant<'c, E>(executor: E, tenant_id: Uuid) -> Result<Option<Tenant>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query_as::<_, TenantRow>(
        r#"
        SELECT id, plan_id, subscription_status, business_name, region,
               max_concurrent_sessions, created_at, updated_at
        FROM tenants
        WHERE id = $1
        "#,
    )
    .bind(tenant_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(Tenant::from))
}

pub async fn upsert_tenant<'c, E>(executor: E, tenant: &Tenant) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO tenants (
            id,
            plan_id,
            subscription_status,
            business_name,
            region,
            max_concurrent_sessions,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id)
        DO UPDATE SET
            plan_id = EXCLUDED.plan_id,
            subscription_status = EXCLUDED.subscription_status,
            business_name = EXCLUDED.business_name,
            region = EXCLUDED.region,
            max_concurrent_sessions = EXCLUDED.max_concurrent_sessions,
            updated_at = NOW()
        "#,
    )
    .bind(tenant.id)
    .bind(&tenant.plan_id)
    .bind(&tenant.subscription_status)
    .bind(&tenant.business_name)
    .bind(tenant.region.as_deref())
    .bind(tenant.max_concurrent_sessions as i32)
    .bind(tenant.created_at)
    .bind(tenant.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn update_tenant_plan<'c, E>(
    executor: E,
    tenant_id: Uuid,
    plan_id: &str,
    quota: ResourceQuota,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE tenants
        SET plan_id = $2,
            max_concurrent_sessions = $3,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(tenant_id)
    .bind(plan_id)
    .bind(quota.max_concurrent_sessions as i32)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_subscription_status<'c, E>(
    executor: E,
    tenant_id: Uuid,
    status: &str,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        "UPDATE tenants SET subscription_status = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(tenant_id)
    .bind(status)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn fetch_active_assistant<'c, E>(
    executor: E,
    tenant_id: Uuid,
) -> Result<Option<AssistantResource>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query_as::<_, AssistantRow>(
        r#"
        SELECT id, tenant_id, external_voice_id, status, created_at, deleted_at
        FROM assistant_resources
        WHERE tenant_id = $1
          AND status = 'active'
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(AssistantResource::from))
}

pub async fn insert_assistant<'c, E>(
    executor: E,
    assistant: &AssistantResource,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO assistant_resources (
            id, tenant_id, external_voice_id, status, created_at, deleted_at
        ) VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(assistant.id)
    .bind(assistant.tenant_id)
    .bind(&assistant.external_voice_id)
    .bind(assistant.status.as_str())
    .bind(assistant.created_at)
    .bind(assistant.deleted_at)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn retire_assistant<'c, E>(
    executor: E,
    assistant_id: Uuid,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        UPDATE assistant_resources
        SET status = 'deleted',
            deleted_at = $2
        WHERE id = $1
          AND status = 'active'
        RETURNING id
        "#,
    )
    .bind(assistant_id)
    .bind(at)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}

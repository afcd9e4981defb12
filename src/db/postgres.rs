use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{phone_resources, pool_entries, retry_queue, tenants, ProvisioningStore};
use crate::provisioning::models::{
    AssistantResource, PhoneResource, PoolEntry, ResourceQuota, RetryQueueItem, Tenant,
};

/// key: provisioning-store-postgres
#[derive(Clone)]
pub struct PgProvisioningStore {
    pool: PgPool,
}

impl PgProvisioningStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProvisioningStore for PgProvisioningStore {
    async fn tenant(&self, tenant_id: Uuid) -> sqlx::Result<Option<Tenant>> {
        tenants::fetch_tenant(&self.pool, tenant_id).await
    }

    async fn upsert_tenant(&self, tenant: &Tenant) -> sqlx::Result<()> {
        tenants::upsert_tenant(&self.pool, tenant).await
    }

    async fn update_tenant_plan(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        quota: ResourceQuota,
    ) -> sqlx::Result<bool> {
        tenants::update_tenant_plan(&self.pool, tenant_id, plan_id, quota).await
    }

    async fn set_subscription_status(&self, tenant_id: Uuid, status: &str) -> sqlx::Result<bool> {
        tenants::set_subscription_status(&self.pool, tenant_id, status).await
    }

    async fn active_assistant(&self, tenant_id: Uuid) -> sqlx::Result<Option<AssistantResource>> {
        tenants::fetch_active_assistant(&self.pool, tenant_id).await
    }

    async fn insert_assistant(&self, assistant: &AssistantResource) -> sqlx::Result<()> {
        tenants::insert_assistant(&self.pool, assistant).await
    }

    async fn retire_assistant(&self, assistant_id: Uuid, at: DateTime<Utc>) -> sqlx::Result<bool> {
        tenants::retire_assistant(&self.pool, assistant_id, at).await
    }

    async fn insert_phone_resource(&self, resource: &PhoneResource) -> sqlx::Result<()> {
        phone_resources::insert_phone_resource(&self.pool, resource).await
    }

    async fn phone_resource(&self, resource_id: Uuid) -> sqlx::Result<Option<PhoneResource>> {
        phone_resources::fetch_phone_resource(&self.pool, resource_id).await
    }

    async fn active_phone_resources(&self, tenant_id: Uuid) -> sqlx::Result<Vec<PhoneResource>> {
        phone_resources::list_active_phone_resources(&self.pool, tenant_id).await
    }

    async fn count_active_phone_resources(&self, tenant_id: Uuid) -> sqlx::Result<i64> {
        phone_resources::count_active_phone_resources(&self.pool, tenant_id).await
    }

    async fn mark_phone_released(
        &self,
        resource_id: Uuid,
        at: DateTime<Utc>,
    ) -> sqlx::Result<bool> {
        phone_resources::mark_phone_released(&self.pool, resource_id, at).await
    }

    async fn insert_pool_entry(&self, entry: &PoolEntry) -> sqlx::Result<()> {
        pool_entries::insert_pool_entry(&self.pool, entry).await
    }

    async fn pool_entry(&self, entry_id: Uuid) -> sqlx::Result<Option<PoolEntry>> {
        pool_entries::fetch_pool_entry(&self.pool, entry_id).await
    }

    async fn claim_pool_entry(
        &self,
        entry_id: Uuid,
        tenant_id: Uuid,
        at: DateTime<Utc>,
    ) -> sqlx::Result<Option<PoolEntry>> {
        pool_entries::claim_entry(&self.pool, entry_id, tenant_id, at).await
    }

    async fn claim_available_pool_entry(
        &self,
        region: &str,
        tenant_id: Uuid,
        at: DateTime<Utc>,
    ) -> sqlx::Result<Option<PoolEntry>> {
        pool_entries::claim_any_available(&self.pool, region, tenant_id, at).await
    }

    async fn set_pool_voice_id(&self, entry_id: Uuid, voice_id: &str) -> sqlx::Result<()> {
        pool_entries::set_voice_id(&self.pool, entry_id, voice_id).await
    }

    async fn return_pool_entry(&self, entry_id: Uuid, tenant_id: Uuid) -> sqlx::Result<bool> {
        pool_entries::return_entry(&self.pool, entry_id, tenant_id).await
    }

    async fn count_available_pool_entries(&self, region: &str) -> sqlx::Result<i64> {
        pool_entries::count_available(&self.pool, region).await
    }

    async fn insert_retry_item(&self, item: &RetryQueueItem) -> sqlx::Result<()> {
        retry_queue::insert_item(&self.pool, item).await
    }

    async fn update_retry_item(&self, item: &RetryQueueItem) -> sqlx::Result<()> {
        retry_queue::update_item(&self.pool, item).await
    }

    async fn retry_item(&self, item_id: Uuid) -> sqlx::Result<Option<RetryQueueItem>> {
        retry_queue::fetch_item(&self.pool, item_id).await
    }

    async fn open_retry_item(
        &self,
        tenant_id: Uuid,
        max_attempts: i32,
    ) -> sqlx::Result<Option<RetryQueueItem>> {
        retry_queue::fetch_open_item(&self.pool, tenant_id, max_attempts).await
    }

    async fn due_retry_items(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> sqlx::Result<Vec<RetryQueueItem>> {
        retry_queue::fetch_due_items(&self.pool, now, max_attempts, limit).await
    }

    async fn exhausted_retry_items(&self, max_attempts: i32) -> sqlx::Result<Vec<RetryQueueItem>> {
        retry_queue::fetch_exhausted_items(&self.pool, max_attempts).await
    }
}

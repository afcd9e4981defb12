//! Ledger tables read and written by the provisioning core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::provisioning::models::{
    AssistantResource, PhoneResource, PoolEntry, ResourceQuota, RetryQueueItem, Tenant,
};

pub mod memory;
pub mod phone_resources;
pub mod pool_entries;
pub mod postgres;
pub mod retry_queue;
pub mod tenants;

pub use memory::InMemoryProvisioningStore;
pub use postgres::PgProvisioningStore;

/// key: provisioning-store -> persistence contract
///
/// Implementations must give read-your-writes consistency per tenant and
/// make the pool claim and release-marking calls atomic.
#[async_trait]
pub trait ProvisioningStore: Send + Sync {
    async fn tenant(&self, tenant_id: Uuid) -> sqlx::Result<Option<Tenant>>;

    async fn upsert_tenant(&self, tenant: &Tenant) -> sqlx::Result<()>;

    async fn update_tenant_plan(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        quota: ResourceQuota,
    ) -> sqlx::Result<bool>;

    async fn set_subscription_status(&self, tenant_id: Uuid, status: &str) -> sqlx::Result<bool>;

    async fn active_assistant(&self, tenant_id: Uuid) -> sqlx::Result<Option<AssistantResource>>;

    async fn insert_assistant(&self, assistant: &AssistantResource) -> sqlx::Result<()>;

    async fn retire_assistant(&self, assistant_id: Uuid, at: DateTime<Utc>) -> sqlx::Result<bool>;

    async fn insert_phone_resource(&self, resource: &PhoneResource) -> sqlx::Result<()>;

    async fn phone_resource(&self, resource_id: Uuid) -> sqlx::Result<Option<PhoneResource>>;

    /// Active resources for a tenant, oldest first.
    async fn active_phone_resources(&self, tenant_id: Uuid) -> sqlx::Result<Vec<PhoneResource>>;

    async fn count_active_phone_resources(&self, tenant_id: Uuid) -> sqlx::Result<i64>;

    /// Flips an active row to released. Returns `false` when it was already released.
    async fn mark_phone_released(&self, resource_id: Uuid, at: DateTime<Utc>)
        -> sqlx::Result<bool>;

    async fn insert_pool_entry(&self, entry: &PoolEntry) -> sqlx::Result<()>;

    async fn pool_entry(&self, entry_id: Uuid) -> sqlx::Result<Option<PoolEntry>>;

    /// Assigns the entry only if nobody holds it.
    async fn claim_pool_entry(
        &self,
        entry_id: Uuid,
        tenant_id: Uuid,
        at: DateTime<Utc>,
    ) -> sqlx::Result<Option<PoolEntry>>;

    /// Assigns any unheld entry in the region.
    async fn claim_available_pool_entry(
        &self,
        region: &str,
        tenant_id: Uuid,
        at: DateTime<Utc>,
    ) -> sqlx::Result<Option<PoolEntry>>;

    async fn set_pool_voice_id(&self, entry_id: Uuid, voice_id: &str) -> sqlx::Result<()>;

    /// Clears the assignment if `tenant_id` still holds the entry.
    async fn return_pool_entry(&self, entry_id: Uuid, tenant_id: Uuid) -> sqlx::Result<bool>;

    async fn count_available_pool_entries(&self, region: &str) -> sqlx::Result<i64>;

    async fn insert_retry_item(&self, item: &RetryQueueItem) -> sqlx::Result<()>;

    async fn update_retry_item(&self, item: &RetryQueueItem) -> sqlx::Result<()>;

    async fn retry_item(&self, item_id: Uuid) -> sqlx::Result<Option<RetryQueueItem>>;

    /// Most recent not-yet-succeeded item for the tenant that still has attempts left.
    async fn open_retry_item(
        &self,
        tenant_id: Uuid,
        max_attempts: i32,
    ) -> sqlx::Result<Option<RetryQueueItem>>;

    async fn due_retry_items(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> sqlx::Result<Vec<RetryQueueItem>>;

    async fn exhausted_retry_items(&self, max_attempts: i32) -> sqlx::Result<Vec<RetryQueueItem>>;
}

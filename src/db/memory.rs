use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ProvisioningStore;
use crate::provisioning::models::{
    AssistantResource, AssistantStatus, PhoneResource, PhoneResourceStatus, PoolEntry,
    ResourceQuota, RetryQueueItem, RetryStatus, Tenant,
};

#[derive(Default)]
struct Tables {
    tenants: HashMap<Uuid, Tenant>,
    assistants: Vec<AssistantResource>,
    phone_resources: Vec<PhoneResource>,
    pool_entries: Vec<PoolEntry>,
    retry_items: Vec<RetryQueueItem>,
}

/// key: provisioning-store-memory
///
/// Every call takes the single table lock, so conditional updates are atomic
/// the same way a single SQL statement is.
#[derive(Default)]
pub struct InMemoryProvisioningStore {
    tables: Mutex<Tables>,
}

impl InMemoryProvisioningStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every phone resource ever written for the tenant, released ones included.
    pub async fn all_phone_resources(&self, tenant_id: Uuid) -> Vec<PhoneResource> {
        self.tables
            .lock()
            .await
            .phone_resources
            .iter()
            .filter(|resource| resource.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub async fn assistants(&self, tenant_id: Uuid) -> Vec<AssistantResource> {
        self.tables
            .lock()
            .await
            .assistants
            .iter()
            .filter(|assistant| assistant.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub async fn retry_items(&self) -> Vec<RetryQueueItem> {
        self.tables.lock().await.retry_items.clone()
    }
}

fn is_due(item: &RetryQueueItem, max_attempts: i32) -> bool {
    matches!(item.status, RetryStatus::Pending | RetryStatus::Failed) && item.attempts < max_attempts
}

#[async_trait]
impl ProvisioningStore for InMemoryProvisioningStore {
    async fn tenant(&self, tenant_id: Uuid) -> sqlx::Result<Option<Tenant>> {
        Ok(self.tables.lock().await.tenants.get(&tenant_id).cloned())
    }

    async fn upsert_tenant(&self, tenant: &Tenant) -> sqlx::Result<()> {
        let mut tables = self.tables.lock().await;
        let created_at = tables
            .tenants
            .get(&tenant.id)
            .map(|existing| existing.created_at)
            .unwrap_or(tenant.created_at);
        let mut record = tenant.clone();
        record.created_at = created_at;
        record.updated_at = Utc::now();
        tables.tenants.insert(tenant.id, record);
        Ok(())
    }

    async fn update_tenant_plan(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        quota: ResourceQuota,
    ) -> sqlx::Result<bool> {
        let mut tables = self.tables.lock().await;
        let Some(tenant) = tables.tenants.get_mut(&tenant_id) else {
            return Ok(false);
        };
        tenant.plan_id = plan_id.to_string();
        tenant.max_concurrent_sessions = quota.max_concurrent_sessions;
        tenant.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_subscription_status(&self, tenant_id: Uuid, status: &str) -> sqlx::Result<bool> {
        let mut tables = self.tables.lock().await;
        let Some(tenant) = tables.tenants.get_mut(&tenant_id) else {
            return Ok(false);
        };
        tenant.subscription_status = status.to_string();
        tenant.updated_at = Utc::now();
        Ok(true)
    }

    async fn active_assistant(&self, tenant_id: Uuid) -> sqlx::Result<Option<AssistantResource>> {
        Ok(self
            .tables
            .lock()
            .await
            .assistants
            .iter()
            .rev()
            .find(|a| a.tenant_id == tenant_id && a.status == AssistantStatus::Active)
            .cloned())
    }

    async fn insert_assistant(&self, assistant: &AssistantResource) -> sqlx::Result<()> {
        self.tables.lock().await.assistants.push(assistant.clone());
        Ok(())
    }

    async fn retire_assistant(&self, assistant_id: Uuid, at: DateTime<Utc>) -> sqlx::Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables
            .assistants
            .iter_mut()
            .find(|a| a.id == assistant_id && a.status == AssistantStatus::Active)
        {
            Some(assistant) => {
                assistant.status = AssistantStatus::Deleted;
                assistant.deleted_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_phone_resource(&self, resource: &PhoneResource) -> sqlx::Result<()> {
        self.tables.lock().await.phone_resources.push(resource.clone());
        Ok(())
    }

    async fn phone_resource(&self, resource_id: Uuid) -> sqlx::Result<Option<PhoneResource>> {
        Ok(self
            .tables
            .lock()
            .await
            .phone_resources
            .iter()
            .find(|resource| resource.id == resource_id)
            .cloned())
    }

    async fn active_phone_resources(&self, tenant_id: Uuid) -> sqlx::Result<Vec<PhoneResource>> {
        let mut active: Vec<PhoneResource> = self
            .tables
            .lock()
            .await
            .phone_resources
            .iter()
            .filter(|resource| resource.tenant_id == tenant_id && resource.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|resource| resource.created_at);
        Ok(active)
    }

    async fn count_active_phone_resources(&self, tenant_id: Uuid) -> sqlx::Result<i64> {
        Ok(self
            .tables
            .lock()
            .await
            .phone_resources
            .iter()
            .filter(|resource| resource.tenant_id == tenant_id && resource.is_active())
            .count() as i64)
    }

    async fn mark_phone_released(
        &self,
        resource_id: Uuid,
        at: DateTime<Utc>,
    ) -> sqlx::Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables
            .phone_resources
            .iter_mut()
            .find(|resource| resource.id == resource_id && resource.is_active())
        {
            Some(resource) => {
                resource.status = PhoneResourceStatus::Released;
                resource.released_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_pool_entry(&self, entry: &PoolEntry) -> sqlx::Result<()> {
        self.tables.lock().await.pool_entries.push(entry.clone());
        Ok(())
    }

    async fn pool_entry(&self, entry_id: Uuid) -> sqlx::Result<Option<PoolEntry>> {
        Ok(self
            .tables
            .lock()
            .await
            .pool_entries
            .iter()
            .find(|entry| entry.id == entry_id)
            .cloned())
    }

    async fn claim_pool_entry(
        &self,
        entry_id: Uuid,
        tenant_id: Uuid,
        at: DateTime<Utc>,
    ) -> sqlx::Result<Option<PoolEntry>> {
        let mut tables = self.tables.lock().await;
        let Some(entry) = tables
            .pool_entries
            .iter_mut()
            .find(|entry| entry.id == entry_id && entry.assigned_tenant_id.is_none())
        else {
            return Ok(None);
        };
        entry.assigned_tenant_id = Some(tenant_id);
        entry.assigned_at = Some(at);
        Ok(Some(entry.clone()))
    }

    async fn claim_available_pool_entry(
        &self,
        region: &str,
        tenant_id: Uuid,
        at: DateTime<Utc>,
    ) -> sqlx::Result<Option<PoolEntry>> {
        let mut tables = self.tables.lock().await;
        let candidate = tables
            .pool_entries
            .iter_mut()
            .filter(|entry| entry.region == region && entry.assigned_tenant_id.is_none())
            .min_by_key(|entry| (entry.external_voice_id.is_none(), entry.created_at));
        let Some(entry) = candidate else {
            return Ok(None);
        };
        entry.assigned_tenant_id = Some(tenant_id);
        entry.assigned_at = Some(at);
        Ok(Some(entry.clone()))
    }

    async fn set_pool_voice_id(&self, entry_id: Uuid, voice_id: &str) -> sqlx::Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(entry) = tables.pool_entries.iter_mut().find(|e| e.id == entry_id) {
            entry.external_voice_id = Some(voice_id.to_string());
        }
        Ok(())
    }

    async fn return_pool_entry(&self, entry_id: Uuid, tenant_id: Uuid) -> sqlx::Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables
            .pool_entries
            .iter_mut()
            .find(|e| e.id == entry_id && e.assigned_tenant_id == Some(tenant_id))
        {
            Some(entry) => {
                entry.assigned_tenant_id = None;
                entry.assigned_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_available_pool_entries(&self, region: &str) -> sqlx::Result<i64> {
        Ok(self
            .tables
            .lock()
            .await
            .pool_entries
            .iter()
            .filter(|entry| entry.region == region && entry.assigned_tenant_id.is_none())
            .count() as i64)
    }

    async fn insert_retry_item(&self, item: &RetryQueueItem) -> sqlx::Result<()> {
        self.tables.lock().await.retry_items.push(item.clone());
        Ok(())
    }

    async fn update_retry_item(&self, item: &RetryQueueItem) -> sqlx::Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.retry_items.iter_mut().find(|i| i.id == item.id) {
            *existing = item.clone();
        }
        Ok(())
    }

    async fn retry_item(&self, item_id: Uuid) -> sqlx::Result<Option<RetryQueueItem>> {
        Ok(self
            .tables
            .lock()
            .await
            .retry_items
            .iter()
            .find(|item| item.id == item_id)
            .cloned())
    }

    async fn open_retry_item(
        &self,
        tenant_id: Uuid,
        max_attempts: i32,
    ) -> sqlx::Result<Option<RetryQueueItem>> {
        Ok(self
            .tables
            .lock()
            .await
            .retry_items
            .iter()
            .rev()
            .find(|item| item.tenant_id == tenant_id && is_due(item, max_attempts))
            .cloned())
    }

    async fn due_retry_items(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> sqlx::Result<Vec<RetryQueueItem>> {
        let mut due: Vec<RetryQueueItem> = self
            .tables
            .lock()
            .await
            .retry_items
            .iter()
            .filter(|item| is_due(item, max_attempts) && item.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|item| (item.next_attempt_at, item.created_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn exhausted_retry_items(&self, max_attempts: i32) -> sqlx::Result<Vec<RetryQueueItem>> {
        Ok(self
            .tables
            .lock()
            .await
            .retry_items
            .iter()
            .filter(|item| item.is_exhausted(max_attempts))
            .cloned()
            .collect())
    }
}

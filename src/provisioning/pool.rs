use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::ProvisioningStore;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::providers::{ImportOptions, VoiceAiProvider};

use super::models::{
    FailureStage, NumberFailure, PhoneResource, PoolEntry, ResourceOrigin, TenantProfile,
};
use super::source::{
    bind_and_record, normalize_region, AcquireBatch, AcquireRequest, NumberBinding, NumberSource,
};

#[derive(Debug, Clone, Serialize)]
pub struct PoolAssignment {
    pub pool_entry: PoolEntry,
    pub phone_resource_id: Uuid,
}

/// key: pool-allocator -> exclusive assignment of shared regional inventory
pub struct PoolAllocator {
    store: Arc<dyn ProvisioningStore>,
    voice: Arc<dyn VoiceAiProvider>,
    carrier_name: String,
}

impl PoolAllocator {
    pub fn new(
        store: Arc<dyn ProvisioningStore>,
        voice: Arc<dyn VoiceAiProvider>,
        carrier_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            voice,
            carrier_name: carrier_name.into(),
        }
    }

    /// Claims an entry for the tenant, importing it on first use, and records
    /// the phone resource. The claim is handed back if any later step fails.
    pub async fn assign(
        &self,
        tenant_id: Uuid,
        region: &str,
        assistant_id: &str,
        preferred_entry_id: Option<Uuid>,
    ) -> ProvisioningResult<PoolAssignment> {
        self.assign_resource(tenant_id, region, assistant_id, preferred_entry_id)
            .await
            .map(|(assignment, _)| assignment)
    }

    async fn assign_resource(
        &self,
        tenant_id: Uuid,
        region: &str,
        assistant_id: &str,
        preferred_entry_id: Option<Uuid>,
    ) -> ProvisioningResult<(PoolAssignment, PhoneResource)> {
        let region = normalize_region(region);
        let now = Utc::now();

        let mut claimed = None;
        if let Some(entry_id) = preferred_entry_id {
            claimed = self.store.claim_pool_entry(entry_id, tenant_id, now).await?;
            if claimed.is_none() {
                warn!(%tenant_id, %entry_id, "preferred pool entry unavailable; falling back to region");
            }
        }
        if claimed.is_none() {
            claimed = self
                .store
                .claim_available_pool_entry(&region, tenant_id, now)
                .await?;
        }
        let Some(entry) = claimed else {
            warn!(%tenant_id, %region, "number pool exhausted");
            return Err(ProvisioningError::PoolExhausted { region });
        };

        match self.complete(entry.clone(), tenant_id, assistant_id).await {
            Ok(assigned) => Ok(assigned),
            Err(err) => {
                match self.store.return_pool_entry(entry.id, tenant_id).await {
                    Ok(_) => info!(%tenant_id, entry_id = %entry.id, "pool claim returned after failure"),
                    Err(return_err) => warn!(
                        %tenant_id,
                        entry_id = %entry.id,
                        ?return_err,
                        "failed to return pool claim; entry needs operator attention"
                    ),
                }
                Err(err)
            }
        }
    }

    async fn complete(
        &self,
        mut entry: PoolEntry,
        tenant_id: Uuid,
        assistant_id: &str,
    ) -> ProvisioningResult<(PoolAssignment, PhoneResource)> {
        let voice_id = match entry.external_voice_id.clone() {
            Some(voice_id) => voice_id,
            None => {
                let options = ImportOptions {
                    name: entry.phone_number.clone(),
                    assistant_id: assistant_id.to_string(),
                    credential_id: self.voice.credential_id().map(str::to_string),
                };
                let imported = self
                    .voice
                    .import_phone_number(&entry.phone_number, &self.carrier_name, &options)
                    .await?;
                self.store.set_pool_voice_id(entry.id, &imported.id).await?;
                info!(entry_id = %entry.id, voice_id = %imported.id, "pool entry imported");
                entry.external_voice_id = Some(imported.id.clone());
                imported.id
            }
        };

        let binding = NumberBinding {
            tenant_id,
            assistant_id,
            phone_number: &entry.phone_number,
            carrier_id: &entry.external_carrier_id,
            voice_id: &voice_id,
            origin: ResourceOrigin::Pool,
            pool_entry_id: Some(entry.id),
        };
        let resource = bind_and_record(self.store.as_ref(), self.voice.as_ref(), binding)
            .await
            .map_err(|(_, err)| err)?;

        entry.assigned_tenant_id = Some(tenant_id);
        let assignment = PoolAssignment {
            pool_entry: entry,
            phone_resource_id: resource.id,
        };
        Ok((assignment, resource))
    }

    /// Puts an entry back into inventory. Its voice-platform id is kept.
    pub async fn release_entry(&self, entry_id: Uuid, tenant_id: Uuid) -> ProvisioningResult<bool> {
        let returned = self.store.return_pool_entry(entry_id, tenant_id).await?;
        if returned {
            info!(%tenant_id, %entry_id, "pool entry returned to inventory");
        }
        Ok(returned)
    }

    pub async fn add_inventory(
        &self,
        phone_number: &str,
        carrier_id: &str,
        region: &str,
    ) -> ProvisioningResult<PoolEntry> {
        let entry = PoolEntry {
            id: Uuid::new_v4(),
            phone_number: phone_number.to_string(),
            external_carrier_id: carrier_id.to_string(),
            external_voice_id: None,
            assigned_tenant_id: None,
            region: normalize_region(region),
            assigned_at: None,
            created_at: Utc::now(),
        };
        self.store.insert_pool_entry(&entry).await?;
        info!(entry_id = %entry.id, region = %entry.region, %phone_number, "pool inventory added");
        Ok(entry)
    }

    pub async fn available(&self, region: &str) -> ProvisioningResult<u32> {
        let count = self
            .store
            .count_available_pool_entries(&normalize_region(region))
            .await?;
        Ok(count.max(0) as u32)
    }
}

/// key: number-source -> shared pool
pub struct PoolNumberSource {
    allocator: Arc<PoolAllocator>,
    voice: Arc<dyn VoiceAiProvider>,
}

impl PoolNumberSource {
    pub fn new(allocator: Arc<PoolAllocator>, voice: Arc<dyn VoiceAiProvider>) -> Self {
        Self { allocator, voice }
    }
}

fn pool_region(profile: &TenantProfile) -> ProvisioningResult<&str> {
    profile
        .region
        .as_deref()
        .ok_or_else(|| ProvisioningError::Message("pooled provisioning requires a region".into()))
}

#[async_trait]
impl NumberSource for PoolNumberSource {
    fn origin(&self) -> ResourceOrigin {
        ResourceOrigin::Pool
    }

    async fn preflight(&self, profile: &TenantProfile) -> ProvisioningResult<()> {
        let missing = self.voice.missing_credentials();
        if !missing.is_empty() {
            return Err(ProvisioningError::MissingCredentials(missing));
        }
        let region = pool_region(profile)?;
        if self.allocator.available(region).await? == 0 {
            return Err(ProvisioningError::PoolExhausted {
                region: normalize_region(region),
            });
        }
        Ok(())
    }

    async fn acquire(&self, request: &AcquireRequest<'_>) -> ProvisioningResult<AcquireBatch> {
        let region = pool_region(request.profile)?;
        let mut batch = AcquireBatch::default();
        // Purchased orphans cannot enter a pooled tenant; keep them visible.
        for owned in request.adopt {
            batch.fail(NumberFailure {
                phone_number: Some(owned.phone_number.clone()),
                owned: Some(owned.clone()),
                stage: FailureStage::Surplus,
                error: format!(
                    "pooled region {} cannot adopt purchased number; release it on the carrier",
                    normalize_region(region)
                ),
                retryable: false,
            });
        }
        let mut preferred = request.profile.preferred_pool_entry;

        for attempted in 0..request.count as usize {
            let assigned = self
                .allocator
                .assign_resource(request.tenant_id, region, request.assistant_id, preferred.take())
                .await;
            match assigned {
                Ok((_, resource)) => batch.resources.push(resource),
                Err(err @ ProvisioningError::PoolExhausted { .. }) => {
                    warn!(tenant_id = %request.tenant_id, %region, "pool ran out mid-batch");
                    let remaining = request.count as usize - attempted;
                    for _ in 0..remaining {
                        batch.failures.push(NumberFailure {
                            phone_number: None,
                            owned: None,
                            stage: FailureStage::Inventory,
                            error: err.to_string(),
                            retryable: false,
                        });
                    }
                    break;
                }
                Err(err) => {
                    warn!(tenant_id = %request.tenant_id, ?err, "pool assignment failed");
                    batch.failures.push(NumberFailure {
                        phone_number: None,
                        owned: None,
                        stage: FailureStage::Assign,
                        retryable: err.is_retryable(),
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(batch)
    }

    async fn stop_routing(&self, resource: &PhoneResource) -> ProvisioningResult<()> {
        self.voice
            .detach_assistant(&resource.external_voice_id)
            .await?;
        Ok(())
    }

    async fn relinquish(&self, resource: &PhoneResource) -> ProvisioningResult<()> {
        let Some(entry_id) = resource.pool_entry_id else {
            return Err(ProvisioningError::Message(format!(
                "pooled resource {} has no pool entry",
                resource.id
            )));
        };
        if !self.allocator.release_entry(entry_id, resource.tenant_id).await? {
            warn!(resource_id = %resource.id, %entry_id, "pool entry was not held by tenant");
        }
        Ok(())
    }
}

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::ProvisioningStore;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::providers::{tolerate_not_found, AssistantConfig, OwnedNumber, VoiceAiProvider};

use super::entitlements::PlanCatalog;
use super::models::{
    AssistantResource, AssistantStatus, ProvisionOutcome, ResourceQuota, Tenant, TenantProfile,
};
use super::source::{AcquireRequest, NumberSources};

pub const ACTIVE_SUBSCRIPTION_STATUS: &str = "active";

/// key: provisioning-orchestrator -> assistant plus numbers for a tenant
///
/// Callers serialize per tenant; the orchestrator neither detects nor caps
/// resources that are already active.
pub struct ProvisioningOrchestrator {
    store: Arc<dyn ProvisioningStore>,
    voice: Arc<dyn VoiceAiProvider>,
    sources: NumberSources,
    catalog: Arc<PlanCatalog>,
}

impl ProvisioningOrchestrator {
    pub fn new(
        store: Arc<dyn ProvisioningStore>,
        voice: Arc<dyn VoiceAiProvider>,
        sources: NumberSources,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            store,
            voice,
            sources,
            catalog,
        }
    }

    pub fn sources(&self) -> &NumberSources {
        &self.sources
    }

    /// First-purchase provisioning: as many numbers as the plan allows.
    pub async fn provision(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        profile: &TenantProfile,
    ) -> ProvisioningResult<ProvisionOutcome> {
        let quota = self.catalog.quota_for(plan_id);
        self.run_pass(
            tenant_id,
            plan_id,
            profile,
            quota.number_count,
            &[],
            Some(ACTIVE_SUBSCRIPTION_STATUS),
        )
        .await
    }

    /// Provisions an explicit count for the reconciler and the retry sweep.
    /// The tenant's subscription status is left as stored.
    pub async fn provision_count(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        profile: &TenantProfile,
        count: u32,
        adopt: &[OwnedNumber],
    ) -> ProvisioningResult<ProvisionOutcome> {
        self.run_pass(tenant_id, plan_id, profile, count, adopt, None)
            .await
    }

    async fn run_pass(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        profile: &TenantProfile,
        count: u32,
        adopt: &[OwnedNumber],
        status: Option<&str>,
    ) -> ProvisioningResult<ProvisionOutcome> {
        let quota = self.catalog.quota_for(plan_id);
        let mut outcome = ProvisionOutcome {
            tenant_id,
            requested: count,
            provisioned: 0,
            resources: Vec::new(),
            failures: Vec::new(),
        };
        if count == 0 && adopt.is_empty() {
            self.record_tenant(tenant_id, plan_id, profile, quota, status).await?;
            return Ok(outcome);
        }

        let source = self.sources.for_region(profile.region.as_deref());
        source.preflight(profile).await?;

        self.record_tenant(tenant_id, plan_id, profile, quota, status).await?;
        let assistant = self.ensure_assistant(tenant_id, plan_id, profile, quota).await?;

        let request = AcquireRequest {
            tenant_id,
            assistant_id: &assistant.external_voice_id,
            profile,
            count,
            adopt,
        };
        let batch = source.acquire(&request).await?;
        outcome.provisioned = batch.resources.len() as u32;
        outcome.resources = batch.resources;
        outcome.failures = batch.failures;

        if outcome.is_complete() {
            info!(
                %tenant_id,
                plan_id,
                origin = source.origin().as_str(),
                provisioned = outcome.provisioned,
                "provisioning pass complete"
            );
        } else {
            warn!(
                %tenant_id,
                plan_id,
                origin = source.origin().as_str(),
                requested = outcome.requested,
                provisioned = outcome.provisioned,
                failures = outcome.failures.len(),
                "provisioning pass finished with failures"
            );
        }
        Ok(outcome)
    }

    async fn record_tenant(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        profile: &TenantProfile,
        quota: ResourceQuota,
        status: Option<&str>,
    ) -> ProvisioningResult<Tenant> {
        let now = Utc::now();
        let existing = self.store.tenant(tenant_id).await?;
        let subscription_status = match (status, existing.as_ref()) {
            (Some(status), _) => status.to_string(),
            (None, Some(tenant)) => tenant.subscription_status.clone(),
            (None, None) => ACTIVE_SUBSCRIPTION_STATUS.to_string(),
        };
        let tenant = Tenant {
            id: tenant_id,
            plan_id: plan_id.to_string(),
            subscription_status,
            business_name: profile.business_name.clone(),
            region: profile.region.clone(),
            max_concurrent_sessions: quota.max_concurrent_sessions,
            created_at: existing.as_ref().map(|tenant| tenant.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.store.upsert_tenant(&tenant).await?;
        Ok(tenant)
    }

    /// Reuses the tenant's active assistant or creates one. A created id that
    /// does not parse as a UUID is deleted again and never persisted.
    pub async fn ensure_assistant(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        profile: &TenantProfile,
        quota: ResourceQuota,
    ) -> ProvisioningResult<AssistantResource> {
        if let Some(existing) = self.store.active_assistant(tenant_id).await? {
            return Ok(existing);
        }

        let config = assistant_config(tenant_id, plan_id, profile, quota);
        let created = self.voice.create_assistant(&config).await?;
        if Uuid::parse_str(&created.id).is_err() {
            warn!(%tenant_id, assistant_id = %created.id, "voice platform returned malformed assistant id");
            if let Err(err) = tolerate_not_found(self.voice.delete_assistant(&created.id).await) {
                warn!(%tenant_id, ?err, "failed to clean up assistant with malformed id");
            }
            return Err(ProvisioningError::InvalidExternalId(created.id));
        }

        let assistant = AssistantResource {
            id: Uuid::new_v4(),
            tenant_id,
            external_voice_id: created.id,
            status: AssistantStatus::Active,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.store.insert_assistant(&assistant).await?;
        info!(%tenant_id, assistant_id = %assistant.external_voice_id, "assistant created");
        Ok(assistant)
    }
}

fn assistant_config(
    tenant_id: Uuid,
    plan_id: &str,
    profile: &TenantProfile,
    quota: ResourceQuota,
) -> AssistantConfig {
    let business = profile.business_name.trim();
    let name = if business.is_empty() {
        format!("tenant-{}", tenant_id.simple())
    } else {
        business.to_string()
    };
    let first_message = profile.greeting.clone().unwrap_or_else(|| {
        if business.is_empty() {
            "Thanks for calling. How can I help you today?".to_string()
        } else {
            format!("Thanks for calling {business}. How can I help you today?")
        }
    });
    AssistantConfig {
        name,
        first_message,
        max_concurrent_sessions: quota.max_concurrent_sessions,
        metadata: json!({
            "tenant_id": tenant_id,
            "plan_id": plan_id,
        }),
    }
}

#![allow(dead_code)]

use std::sync::Arc;

use line_provisioning::db::{InMemoryProvisioningStore, ProvisioningStore};
use line_provisioning::providers::{
    CallLog, ProviderBundle, SimulatedTelephonyProvider, SimulatedVoiceAiProvider,
};
use line_provisioning::provisioning::{
    PhoneResource, PlanCatalog, ProvisioningService, ResourceQuota, ServiceOptions, TenantProfile,
};
use uuid::Uuid;

pub const POOL_REGION: &str = "us-west";

pub struct Harness {
    pub store: Arc<InMemoryProvisioningStore>,
    pub telephony: Arc<SimulatedTelephonyProvider>,
    pub voice: Arc<SimulatedVoiceAiProvider>,
    pub log: CallLog,
    pub service: ProvisioningService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(default_options())
    }

    pub fn with_options(options: ServiceOptions) -> Self {
        let log = CallLog::default();
        let store = Arc::new(InMemoryProvisioningStore::new());
        let telephony = Arc::new(SimulatedTelephonyProvider::new(log.clone()));
        let voice = Arc::new(SimulatedVoiceAiProvider::new(log.clone()));
        let providers = ProviderBundle::new(telephony.clone(), voice.clone());
        let service = ProvisioningService::new(
            store.clone() as Arc<dyn ProvisioningStore>,
            providers,
            options,
        );
        Self {
            store,
            telephony,
            voice,
            log,
            service,
        }
    }

    pub async fn active(&self, tenant_id: Uuid) -> Vec<PhoneResource> {
        self.store.active_phone_resources(tenant_id).await.unwrap()
    }
}

/// Built-in plans plus a three-number plan used by teardown tests.
pub fn default_options() -> ServiceOptions {
    let mut catalog = PlanCatalog::builtin();
    catalog.insert(
        "trio",
        ResourceQuota {
            number_count: 3,
            max_concurrent_sessions: 6,
        },
    );
    ServiceOptions {
        catalog,
        pool_regions: vec![POOL_REGION.to_string()],
        ..ServiceOptions::default()
    }
}

pub fn profile(business_name: &str) -> TenantProfile {
    TenantProfile {
        business_name: business_name.to_string(),
        region: Some("CA".to_string()),
        ..TenantProfile::default()
    }
}

pub fn pooled_profile(business_name: &str) -> TenantProfile {
    TenantProfile {
        business_name: business_name.to_string(),
        region: Some(POOL_REGION.to_string()),
        ..TenantProfile::default()
    }
}

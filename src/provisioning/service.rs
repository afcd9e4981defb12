use std::sync::Arc;

use tracing::error;
use uuid::Uuid;

use crate::db::ProvisioningStore;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::providers::ProviderBundle;

use super::entitlements::PlanCatalog;
use super::locks::TenantLocks;
use super::models::{
    ProvisionOutcome, ReconcileOutcome, ReleaseOutcome, TeardownOutcome, TenantProfile,
};
use super::orchestrator::ProvisioningOrchestrator;
use super::pool::{PoolAllocator, PoolNumberSource};
use super::reconciler::PlanChangeReconciler;
use super::release::ReleaseWorkflow;
use super::retry::{RetryPolicy, RetryQueue};
use super::source::{NumberSources, PurchasedNumberSource};
use super::teardown::TenantTeardown;

#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub catalog: PlanCatalog,
    /// Regions served from shared pool inventory instead of realtime purchase.
    pub pool_regions: Vec<String>,
    pub retry: RetryPolicy,
}

/// key: provisioning-service -> entry points for subscription events
///
/// Every mutating call holds the tenant's lock, and retryable failures are
/// handed to the retry queue before the result is returned.
pub struct ProvisioningService {
    store: Arc<dyn ProvisioningStore>,
    catalog: Arc<PlanCatalog>,
    locks: TenantLocks,
    orchestrator: Arc<ProvisioningOrchestrator>,
    pool: Arc<PoolAllocator>,
    reconciler: PlanChangeReconciler,
    release: Arc<ReleaseWorkflow>,
    teardown: TenantTeardown,
    retry: Arc<RetryQueue>,
}

impl ProvisioningService {
    pub fn new(
        store: Arc<dyn ProvisioningStore>,
        providers: ProviderBundle,
        options: ServiceOptions,
    ) -> Self {
        let catalog = Arc::new(options.catalog);
        let locks = TenantLocks::new();

        let pool = Arc::new(PoolAllocator::new(
            store.clone(),
            providers.voice.clone(),
            providers.telephony.carrier_name(),
        ));
        let purchased = Arc::new(PurchasedNumberSource::new(
            store.clone(),
            providers.telephony.clone(),
            providers.voice.clone(),
        ));
        let pooled = Arc::new(PoolNumberSource::new(pool.clone(), providers.voice.clone()));
        let sources = NumberSources::new(purchased).with_pool(pooled, &options.pool_regions);

        let orchestrator = Arc::new(ProvisioningOrchestrator::new(
            store.clone(),
            providers.voice.clone(),
            sources.clone(),
            catalog.clone(),
        ));
        let release = Arc::new(ReleaseWorkflow::new(store.clone(), sources));
        let reconciler = PlanChangeReconciler::new(
            store.clone(),
            catalog.clone(),
            orchestrator.clone(),
            release.clone(),
        );
        let retry = Arc::new(RetryQueue::new(
            store.clone(),
            orchestrator.clone(),
            catalog.clone(),
            locks.clone(),
            options.retry,
        ));
        let teardown = TenantTeardown::new(
            store.clone(),
            providers.voice,
            release.clone(),
            retry.clone(),
        );

        Self {
            store,
            catalog,
            locks,
            orchestrator,
            pool,
            reconciler,
            release,
            teardown,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn ProvisioningStore> {
        &self.store
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn pool(&self) -> &Arc<PoolAllocator> {
        &self.pool
    }

    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retry
    }

    pub fn orchestrator(&self) -> &Arc<ProvisioningOrchestrator> {
        &self.orchestrator
    }

    pub async fn provision_tenant(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        profile: &TenantProfile,
    ) -> ProvisioningResult<ProvisionOutcome> {
        let _guard = self.locks.acquire(tenant_id).await;
        match self.orchestrator.provision(tenant_id, plan_id, profile).await {
            Ok(outcome) => {
                if !outcome.is_complete() {
                    self.queue_outcome(tenant_id, plan_id, &outcome).await;
                }
                Ok(outcome)
            }
            Err(err) => {
                let requested = self.catalog.quota_for(plan_id).number_count;
                self.queue_error(tenant_id, plan_id, requested, &err).await;
                Err(err)
            }
        }
    }

    pub async fn change_plan(
        &self,
        tenant_id: Uuid,
        old_plan_id: &str,
        new_plan_id: &str,
    ) -> ProvisioningResult<ReconcileOutcome> {
        let _guard = self.locks.acquire(tenant_id).await;
        match self
            .reconciler
            .reconcile(tenant_id, old_plan_id, new_plan_id)
            .await
        {
            Ok(outcome) => {
                if let Some(provision) = outcome.provision.as_ref() {
                    if !provision.is_complete() {
                        self.queue_outcome(tenant_id, new_plan_id, provision).await;
                    }
                }
                Ok(outcome)
            }
            Err(err) => {
                let requested = self.catalog.quota_for(new_plan_id).number_count;
                self.queue_error(tenant_id, new_plan_id, requested, &err).await;
                Err(err)
            }
        }
    }

    pub async fn cancel_tenant(&self, tenant_id: Uuid) -> ProvisioningResult<TeardownOutcome> {
        let _guard = self.locks.acquire(tenant_id).await;
        self.teardown.cancel_tenant(tenant_id).await
    }

    pub async fn release_resource(&self, resource_id: Uuid) -> ProvisioningResult<ReleaseOutcome> {
        let resource = self
            .store
            .phone_resource(resource_id)
            .await?
            .ok_or(ProvisioningError::ResourceNotFound(resource_id))?;
        let _guard = self.locks.acquire(resource.tenant_id).await;
        self.release.release(&resource).await
    }

    async fn queue_outcome(&self, tenant_id: Uuid, plan_id: &str, outcome: &ProvisionOutcome) {
        if let Err(err) = self.retry.enqueue_outcome(tenant_id, plan_id, outcome).await {
            error!(%tenant_id, ?err, "failed to queue provisioning retry");
        }
    }

    async fn queue_error(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        requested: u32,
        err: &ProvisioningError,
    ) {
        if !err.is_retryable() {
            return;
        }
        if let Err(queue_err) = self
            .retry
            .enqueue_failure(tenant_id, plan_id, requested, &err.to_string(), Vec::new())
            .await
        {
            error!(%tenant_id, ?queue_err, "failed to queue provisioning retry");
        }
    }
}

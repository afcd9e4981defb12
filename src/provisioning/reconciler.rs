use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::ProvisioningStore;
use crate::error::{ProvisioningError, ProvisioningResult};

use super::entitlements::PlanCatalog;
use super::models::{ReconcileAction, ReconcileOutcome, ReleaseFailure};
use super::orchestrator::ProvisioningOrchestrator;
use super::release::ReleaseWorkflow;

/// key: plan-reconciler -> converge active numbers on the new quota
pub struct PlanChangeReconciler {
    store: Arc<dyn ProvisioningStore>,
    catalog: Arc<PlanCatalog>,
    orchestrator: Arc<ProvisioningOrchestrator>,
    release: Arc<ReleaseWorkflow>,
}

impl PlanChangeReconciler {
    pub fn new(
        store: Arc<dyn ProvisioningStore>,
        catalog: Arc<PlanCatalog>,
        orchestrator: Arc<ProvisioningOrchestrator>,
        release: Arc<ReleaseWorkflow>,
    ) -> Self {
        Self {
            store,
            catalog,
            orchestrator,
            release,
        }
    }

    /// Growth runs through the tenant's number source. Shrinking releases the
    /// newest numbers first so long-held ones survive.
    pub async fn reconcile(
        &self,
        tenant_id: Uuid,
        old_plan_id: &str,
        new_plan_id: &str,
    ) -> ProvisioningResult<ReconcileOutcome> {
        let tenant = self
            .store
            .tenant(tenant_id)
            .await?
            .ok_or(ProvisioningError::TenantNotFound(tenant_id))?;
        let old_quota = self.catalog.quota_for(old_plan_id);
        let new_quota = self.catalog.quota_for(new_plan_id);

        self.store
            .update_tenant_plan(tenant_id, new_plan_id, new_quota)
            .await?;

        let current = self.store.count_active_phone_resources(tenant_id).await?.max(0) as u32;
        let target = new_quota.number_count;
        info!(
            %tenant_id,
            old_plan_id,
            new_plan_id,
            old_count = old_quota.number_count,
            target,
            current,
            "reconciling plan change"
        );

        if target > current {
            let delta = target - current;
            let provision = self
                .orchestrator
                .provision_count(tenant_id, new_plan_id, &tenant.profile(), delta, &[])
                .await?;
            return Ok(ReconcileOutcome {
                action: ReconcileAction::Grow,
                count_changed: provision.provisioned,
                provision: Some(provision),
                release_failures: Vec::new(),
            });
        }

        if target < current {
            let delta = (current - target) as usize;
            let active = self.store.active_phone_resources(tenant_id).await?;
            let mut count_changed = 0;
            let mut release_failures = Vec::new();
            for resource in active.iter().rev().take(delta) {
                match self.release.release(resource).await {
                    Ok(_) => count_changed += 1,
                    Err(err) => {
                        if matches!(err, ProvisioningError::CarrierReleaseFailed { .. }) {
                            count_changed += 1;
                        }
                        warn!(%tenant_id, resource_id = %resource.id, ?err, "shrink release failed");
                        release_failures.push(ReleaseFailure {
                            resource_id: resource.id,
                            phone_number: resource.phone_number.clone(),
                            error: err.to_string(),
                        });
                    }
                }
            }
            return Ok(ReconcileOutcome {
                action: ReconcileAction::Shrink,
                count_changed,
                provision: None,
                release_failures,
            });
        }

        Ok(ReconcileOutcome {
            action: ReconcileAction::NoChange,
            count_changed: 0,
            provision: None,
            release_failures: Vec::new(),
        })
    }
}

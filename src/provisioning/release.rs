use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::db::ProvisioningStore;
use crate::error::{ProvisioningError, ProvisioningResult};

use super::models::{PhoneResource, ReleaseOutcome};
use super::source::NumberSources;

/// key: release-workflow -> voice platform, then carrier, then ledger
pub struct ReleaseWorkflow {
    store: Arc<dyn ProvisioningStore>,
    sources: NumberSources,
}

fn tolerate_missing(result: ProvisioningResult<()>) -> ProvisioningResult<()> {
    match result {
        Err(ProvisioningError::Provider(err)) if err.is_not_found() => Ok(()),
        other => other,
    }
}

impl ReleaseWorkflow {
    pub fn new(store: Arc<dyn ProvisioningStore>, sources: NumberSources) -> Self {
        Self { store, sources }
    }

    /// Releasing an already-released resource makes no external call.
    ///
    /// A voice-platform failure leaves the ledger row active so the release
    /// can be retried. A carrier failure after routing has stopped still
    /// retires the row and is reported as [`ProvisioningError::CarrierReleaseFailed`].
    pub async fn release(&self, resource: &PhoneResource) -> ProvisioningResult<ReleaseOutcome> {
        let current = self
            .store
            .phone_resource(resource.id)
            .await?
            .ok_or(ProvisioningError::ResourceNotFound(resource.id))?;
        if !current.is_active() {
            debug!(resource_id = %current.id, "phone resource already released");
            return Ok(ReleaseOutcome::AlreadyReleased);
        }

        let source = self.sources.for_origin(current.origin)?;

        if let Err(err) = tolerate_missing(source.stop_routing(&current).await) {
            warn!(
                tenant_id = %current.tenant_id,
                resource_id = %current.id,
                ?err,
                "voice platform release failed; ledger left active"
            );
            return Err(err);
        }

        let relinquished = tolerate_missing(source.relinquish(&current).await);

        let marked = self.store.mark_phone_released(current.id, Utc::now()).await?;
        if !marked {
            debug!(resource_id = %current.id, "phone resource released concurrently");
        }

        match relinquished {
            Ok(()) => {
                info!(
                    tenant_id = %current.tenant_id,
                    resource_id = %current.id,
                    phone_number = %current.phone_number,
                    origin = current.origin.as_str(),
                    "phone resource released"
                );
                Ok(ReleaseOutcome::Released)
            }
            Err(ProvisioningError::Provider(source_err)) => {
                error!(
                    tenant_id = %current.tenant_id,
                    resource_id = %current.id,
                    carrier_id = %current.external_carrier_id,
                    err = %source_err,
                    "carrier release failed; reconcile against carrier billing"
                );
                Err(ProvisioningError::CarrierReleaseFailed {
                    resource_id: current.id,
                    source: source_err,
                })
            }
            Err(err) => {
                error!(resource_id = %current.id, ?err, "number could not be handed back");
                Err(err)
            }
        }
    }
}

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::ProvisioningStore;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::providers::{tolerate_not_found, VoiceAiProvider};

use super::models::{ReleaseFailure, ReleaseOutcome, TeardownOutcome};
use super::release::ReleaseWorkflow;
use super::retry::{RetryQueue, TENANT_CANCELED};

pub const CANCELED_STATUS: &str = "canceled";

/// key: tenant-teardown -> release everything, then drop the assistant
pub struct TenantTeardown {
    store: Arc<dyn ProvisioningStore>,
    voice: Arc<dyn VoiceAiProvider>,
    release: Arc<ReleaseWorkflow>,
    retry: Arc<RetryQueue>,
}

impl TenantTeardown {
    pub fn new(
        store: Arc<dyn ProvisioningStore>,
        voice: Arc<dyn VoiceAiProvider>,
        release: Arc<ReleaseWorkflow>,
        retry: Arc<RetryQueue>,
    ) -> Self {
        Self {
            store,
            voice,
            release,
            retry,
        }
    }

    /// `assistant_deleted` is true once the tenant has no active assistant.
    pub async fn cancel_tenant(&self, tenant_id: Uuid) -> ProvisioningResult<TeardownOutcome> {
        if self.store.tenant(tenant_id).await?.is_none() {
            return Err(ProvisioningError::TenantNotFound(tenant_id));
        }

        // Pending retries would otherwise buy numbers for a closed account.
        let closed_retries = self.retry.close_for_tenant(tenant_id, TENANT_CANCELED).await?;

        let mut outcome = TeardownOutcome {
            tenant_id,
            released: 0,
            release_failures: Vec::new(),
            assistant_deleted: false,
        };

        for resource in self.store.active_phone_resources(tenant_id).await? {
            match self.release.release(&resource).await {
                Ok(ReleaseOutcome::Released) => outcome.released += 1,
                Ok(ReleaseOutcome::AlreadyReleased) => {}
                Err(err) => {
                    if matches!(err, ProvisioningError::CarrierReleaseFailed { .. }) {
                        outcome.released += 1;
                    }
                    outcome.release_failures.push(ReleaseFailure {
                        resource_id: resource.id,
                        phone_number: resource.phone_number.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        outcome.assistant_deleted = match self.store.active_assistant(tenant_id).await? {
            None => true,
            Some(assistant) => {
                match tolerate_not_found(self.voice.delete_assistant(&assistant.external_voice_id).await) {
                    Ok(()) => {
                        self.store.retire_assistant(assistant.id, Utc::now()).await?;
                        true
                    }
                    Err(err) => {
                        warn!(%tenant_id, assistant_id = %assistant.external_voice_id, ?err, "assistant deletion failed");
                        false
                    }
                }
            }
        };

        self.store
            .set_subscription_status(tenant_id, CANCELED_STATUS)
            .await?;

        info!(
            %tenant_id,
            released = outcome.released,
            failures = outcome.release_failures.len(),
            assistant_deleted = outcome.assistant_deleted,
            closed_retries,
            "tenant torn down"
        );
        Ok(outcome)
    }
}

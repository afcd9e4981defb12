//! Number acquisition strategies shared by the orchestrator, reconciler and
//! release workflow.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::ProvisioningStore;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::providers::{
    tolerate_not_found, ImportOptions, OwnedNumber, TelephonyProvider, VoiceAiProvider,
};

use super::models::{
    FailureStage, NumberFailure, PhoneResource, PhoneResourceStatus, ResourceOrigin,
    TenantProfile,
};

static E164: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("invalid E.164 regex"));

pub fn is_e164(phone_number: &str) -> bool {
    E164.is_match(phone_number)
}

pub struct AcquireRequest<'a> {
    pub tenant_id: Uuid,
    /// External voice-platform id of the tenant's assistant.
    pub assistant_id: &'a str,
    pub profile: &'a TenantProfile,
    pub count: u32,
    /// Numbers already owned on the carrier that should be imported before
    /// anything new is bought.
    pub adopt: &'a [OwnedNumber],
}

#[derive(Debug, Default)]
pub struct AcquireBatch {
    pub resources: Vec<PhoneResource>,
    pub failures: Vec<NumberFailure>,
}

impl AcquireBatch {
    pub(crate) fn fail(&mut self, failure: NumberFailure) {
        warn!(
            phone_number = failure.phone_number.as_deref().unwrap_or("-"),
            stage = ?failure.stage,
            error = %failure.error,
            "number failed provisioning"
        );
        self.failures.push(failure);
    }
}

/// key: number-source -> one way of obtaining and giving back numbers
#[async_trait]
pub trait NumberSource: Send + Sync {
    fn origin(&self) -> ResourceOrigin;

    /// Checks that abort the whole pass before anything is bought or claimed.
    async fn preflight(&self, profile: &TenantProfile) -> ProvisioningResult<()>;

    async fn acquire(&self, request: &AcquireRequest<'_>) -> ProvisioningResult<AcquireBatch>;

    /// Stops calls reaching the tenant's assistant through this number.
    async fn stop_routing(&self, resource: &PhoneResource) -> ProvisioningResult<()>;

    /// Hands the number back to wherever it came from.
    async fn relinquish(&self, resource: &PhoneResource) -> ProvisioningResult<()>;
}

/// Picks the number source for a region or an existing resource.
#[derive(Clone)]
pub struct NumberSources {
    purchased: Arc<dyn NumberSource>,
    pool: Option<Arc<dyn NumberSource>>,
    pool_regions: HashSet<String>,
}

impl NumberSources {
    pub fn new(purchased: Arc<dyn NumberSource>) -> Self {
        Self {
            purchased,
            pool: None,
            pool_regions: HashSet::new(),
        }
    }

    pub fn with_pool<I, S>(mut self, pool: Arc<dyn NumberSource>, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.pool = Some(pool);
        self.pool_regions = regions
            .into_iter()
            .map(|region| normalize_region(region.as_ref()))
            .filter(|region| !region.is_empty())
            .collect();
        self
    }

    pub fn is_pooled(&self, region: Option<&str>) -> bool {
        self.pool.is_some()
            && region
                .map(|region| self.pool_regions.contains(&normalize_region(region)))
                .unwrap_or(false)
    }

    pub fn for_region(&self, region: Option<&str>) -> Arc<dyn NumberSource> {
        match &self.pool {
            Some(pool) if self.is_pooled(region) => pool.clone(),
            _ => self.purchased.clone(),
        }
    }

    pub fn for_origin(&self, origin: ResourceOrigin) -> ProvisioningResult<Arc<dyn NumberSource>> {
        match origin {
            ResourceOrigin::Purchased => Ok(self.purchased.clone()),
            ResourceOrigin::Pool => self
                .pool
                .clone()
                .ok_or(ProvisioningError::SourceUnavailable("pool")),
        }
    }
}

pub(crate) fn normalize_region(region: &str) -> String {
    region.trim().to_ascii_lowercase()
}

/// A number that already has a voice-platform id and needs its assistant
/// bound and its ledger row written.
pub(crate) struct NumberBinding<'a> {
    pub tenant_id: Uuid,
    pub assistant_id: &'a str,
    pub phone_number: &'a str,
    pub carrier_id: &'a str,
    pub voice_id: &'a str,
    pub origin: ResourceOrigin,
    pub pool_entry_id: Option<Uuid>,
}

pub(crate) async fn bind_and_record(
    store: &dyn ProvisioningStore,
    voice: &dyn VoiceAiProvider,
    binding: NumberBinding<'_>,
) -> Result<PhoneResource, (FailureStage, ProvisioningError)> {
    voice
        .assign_assistant_to_number(binding.voice_id, binding.assistant_id)
        .await
        .map_err(|err| (FailureStage::Assign, err.into()))?;

    let resource = PhoneResource {
        id: Uuid::new_v4(),
        tenant_id: binding.tenant_id,
        phone_number: binding.phone_number.to_string(),
        external_carrier_id: binding.carrier_id.to_string(),
        external_voice_id: binding.voice_id.to_string(),
        assigned_assistant_id: Some(binding.assistant_id.to_string()),
        origin: binding.origin,
        pool_entry_id: binding.pool_entry_id,
        status: PhoneResourceStatus::Active,
        created_at: Utc::now(),
        released_at: None,
    };
    store
        .insert_phone_resource(&resource)
        .await
        .map_err(|err| (FailureStage::Persist, err.into()))?;

    info!(
        tenant_id = %resource.tenant_id,
        resource_id = %resource.id,
        phone_number = %resource.phone_number,
        origin = resource.origin.as_str(),
        "phone resource recorded"
    );
    Ok(resource)
}

/// key: number-source -> realtime carrier purchase
pub struct PurchasedNumberSource {
    store: Arc<dyn ProvisioningStore>,
    telephony: Arc<dyn TelephonyProvider>,
    voice: Arc<dyn VoiceAiProvider>,
}

impl PurchasedNumberSource {
    pub fn new(
        store: Arc<dyn ProvisioningStore>,
        telephony: Arc<dyn TelephonyProvider>,
        voice: Arc<dyn VoiceAiProvider>,
    ) -> Self {
        Self {
            store,
            telephony,
            voice,
        }
    }

    /// Routing, import, assign and persist for one owned number. Failures
    /// keep the carrier-side number so a later pass can adopt it.
    async fn complete_number(
        &self,
        request: &AcquireRequest<'_>,
        owned: &OwnedNumber,
    ) -> Result<PhoneResource, NumberFailure> {
        let failed = |stage: FailureStage, err: ProvisioningError| NumberFailure {
            phone_number: Some(owned.phone_number.clone()),
            owned: Some(owned.clone()),
            stage,
            retryable: err.is_retryable(),
            error: err.to_string(),
        };

        if !is_e164(&owned.phone_number) {
            return Err(NumberFailure {
                phone_number: Some(owned.phone_number.clone()),
                owned: Some(owned.clone()),
                stage: FailureStage::Validate,
                error: format!("`{}` is not an E.164 number", owned.phone_number),
                retryable: false,
            });
        }

        if let Some(app_id) = self.telephony.routing_app_id() {
            self.telephony
                .assign_to_routing_app(&owned.carrier_id, app_id)
                .await
                .map_err(|err| failed(FailureStage::Routing, err.into()))?;
        }

        let options = ImportOptions {
            name: import_name(request.profile, &owned.phone_number),
            assistant_id: request.assistant_id.to_string(),
            credential_id: self.voice.credential_id().map(str::to_string),
        };
        let imported = self
            .voice
            .import_phone_number(&owned.phone_number, self.telephony.carrier_name(), &options)
            .await
            .map_err(|err| failed(FailureStage::Import, err.into()))?;

        let binding = NumberBinding {
            tenant_id: request.tenant_id,
            assistant_id: request.assistant_id,
            phone_number: &owned.phone_number,
            carrier_id: &owned.carrier_id,
            voice_id: &imported.id,
            origin: ResourceOrigin::Purchased,
            pool_entry_id: None,
        };
        match bind_and_record(self.store.as_ref(), self.voice.as_ref(), binding).await {
            Ok(resource) => Ok(resource),
            Err((stage, err)) => {
                // Drop the voice-side record so the next import starts clean.
                if let Err(cleanup) =
                    tolerate_not_found(self.voice.delete_phone_number(&imported.id).await)
                {
                    warn!(voice_id = %imported.id, ?cleanup, "failed to remove half-imported number");
                }
                Err(failed(stage, err))
            }
        }
    }

    /// Releases orphans beyond what the pass needs. Any the carrier refuses
    /// come back as failures so the retry item keeps them.
    async fn release_surplus(&self, surplus: &[OwnedNumber], batch: &mut AcquireBatch) {
        for owned in surplus {
            match tolerate_not_found(self.telephony.release_number(&owned.carrier_id).await) {
                Ok(()) => info!(phone_number = %owned.phone_number, "released surplus orphaned number"),
                Err(err) => batch.fail(NumberFailure {
                    phone_number: Some(owned.phone_number.clone()),
                    owned: Some(owned.clone()),
                    stage: FailureStage::Surplus,
                    retryable: false,
                    error: format!("surplus release failed: {err}"),
                }),
            }
        }
    }
}

fn import_name(profile: &TenantProfile, phone_number: &str) -> String {
    if profile.business_name.trim().is_empty() {
        phone_number.to_string()
    } else {
        format!("{} {}", profile.business_name.trim(), phone_number)
    }
}

#[async_trait]
impl NumberSource for PurchasedNumberSource {
    fn origin(&self) -> ResourceOrigin {
        ResourceOrigin::Purchased
    }

    async fn preflight(&self, _profile: &TenantProfile) -> ProvisioningResult<()> {
        let mut missing = self.telephony.missing_credentials();
        missing.extend(self.voice.missing_credentials());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProvisioningError::MissingCredentials(missing))
        }
    }

    async fn acquire(&self, request: &AcquireRequest<'_>) -> ProvisioningResult<AcquireBatch> {
        let mut batch = AcquireBatch::default();
        let wanted = request.count as usize;
        let adopt_count = request.adopt.len().min(wanted);
        let (adopted, surplus) = request.adopt.split_at(adopt_count);
        if !surplus.is_empty() {
            self.release_surplus(surplus, &mut batch).await;
        }

        let mut owned: Vec<OwnedNumber> = adopted.to_vec();
        let to_buy = request.count.saturating_sub(adopt_count as u32);
        if to_buy > 0 {
            let region = request.profile.region.as_deref();
            let candidates = self
                .telephony
                .search_available_numbers(to_buy, region)
                .await?;
            if candidates.is_empty() && owned.is_empty() {
                return Err(ProvisioningError::NoCandidates {
                    region: region.map(str::to_string),
                });
            }
            debug!(
                tenant_id = %request.tenant_id,
                wanted = to_buy,
                found = candidates.len(),
                "carrier search complete"
            );
            for _ in candidates.len()..to_buy as usize {
                batch.fail(NumberFailure {
                    phone_number: None,
                    owned: None,
                    stage: FailureStage::Inventory,
                    error: "carrier returned fewer candidates than requested".to_string(),
                    retryable: true,
                });
            }

            if !candidates.is_empty() {
                match self.telephony.purchase_numbers(&candidates).await {
                    Ok(report) => {
                        for rejected in report.rejected {
                            batch.fail(NumberFailure {
                                phone_number: Some(rejected.candidate.phone_number),
                                owned: None,
                                stage: FailureStage::Purchase,
                                retryable: rejected.error.is_transient(),
                                error: rejected.error.to_string(),
                            });
                        }
                        owned.extend(report.owned);
                    }
                    Err(err) => {
                        for candidate in candidates {
                            batch.fail(NumberFailure {
                                phone_number: Some(candidate.phone_number),
                                owned: None,
                                stage: FailureStage::Purchase,
                                retryable: err.is_transient(),
                                error: err.to_string(),
                            });
                        }
                    }
                }
            }
        }

        for number in &owned {
            match self.complete_number(request, number).await {
                Ok(resource) => batch.resources.push(resource),
                Err(failure) => batch.fail(failure),
            }
        }
        Ok(batch)
    }

    async fn stop_routing(&self, resource: &PhoneResource) -> ProvisioningResult<()> {
        self.voice
            .delete_phone_number(&resource.external_voice_id)
            .await?;
        Ok(())
    }

    async fn relinquish(&self, resource: &PhoneResource) -> ProvisioningResult<()> {
        self.telephony
            .release_number(&resource.external_carrier_id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e164_accepts_only_plus_prefixed_digits() {
        assert!(is_e164("+15551234567"));
        assert!(is_e164("+442071838750"));
        assert!(!is_e164("15551234567"));
        assert!(!is_e164("+0123"));
        assert!(!is_e164("+1 555 123 4567"));
        assert!(!is_e164("+1234567890123456"));
    }

    #[test]
    fn import_name_prefers_business_name() {
        let mut profile = TenantProfile::default();
        assert_eq!(import_name(&profile, "+15550000001"), "+15550000001");
        profile.business_name = "Acme Dental ".into();
        assert_eq!(import_name(&profile, "+15550000001"), "Acme Dental +15550000001");
    }
}

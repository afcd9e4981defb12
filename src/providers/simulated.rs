//! In-process stand-ins for the carrier and the voice platform.
//!
//! Used when `PROVIDER_MODE=simulated` and throughout the test suite. Both
//! providers append to a shared [`CallLog`] so callers can assert on the
//! order of external side effects.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    AssistantConfig, CandidateNumber, CreatedAssistant, ImportOptions, ImportedNumber,
    OwnedNumber, ProviderError, PurchaseReport, TelephonyProvider, VoiceAiProvider,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    fn record(&self, entry: String) {
        lock(&self.entries).push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    /// Number of calls whose entry starts with `prefix`, e.g. `voice.import`.
    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        lock(&self.entries).iter().position(|e| e == entry)
    }
}

#[derive(Default)]
struct TelephonyState {
    sequence: u64,
    inventory: Option<u32>,
    owned: HashSet<String>,
    release_failures: usize,
    missing_credentials: bool,
}

pub struct SimulatedTelephonyProvider {
    log: CallLog,
    routing_app_id: Option<String>,
    state: Mutex<TelephonyState>,
}

impl SimulatedTelephonyProvider {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            routing_app_id: Some("AP-simulated".to_string()),
            state: Mutex::new(TelephonyState::default()),
        }
    }

    /// Caps how many more numbers the carrier can hand out.
    pub fn set_inventory(&self, remaining: u32) {
        lock(&self.state).inventory = Some(remaining);
    }

    pub fn fail_next_releases(&self, count: usize) {
        lock(&self.state).release_failures = count;
    }

    pub fn set_missing_credentials(&self, missing: bool) {
        lock(&self.state).missing_credentials = missing;
    }

    pub fn owned_count(&self) -> usize {
        lock(&self.state).owned.len()
    }
}

#[async_trait]
impl TelephonyProvider for SimulatedTelephonyProvider {
    fn carrier_name(&self) -> &str {
        "twilio"
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        if lock(&self.state).missing_credentials {
            vec!["TELEPHONY_ACCOUNT_SID", "TELEPHONY_AUTH_TOKEN"]
        } else {
            Vec::new()
        }
    }

    fn routing_app_id(&self) -> Option<&str> {
        self.routing_app_id.as_deref()
    }

    async fn search_available_numbers(
        &self,
        count: u32,
        region: Option<&str>,
    ) -> Result<Vec<CandidateNumber>, ProviderError> {
        self.log.record(format!("telephony.search:{count}"));
        let mut state = lock(&self.state);
        let available = state.inventory.map_or(count, |remaining| remaining.min(count));
        let mut candidates = Vec::with_capacity(available as usize);
        for _ in 0..available {
            state.sequence += 1;
            candidates.push(CandidateNumber {
                phone_number: format!("+1555{:07}", state.sequence),
                region: region.map(str::to_string),
                locality: None,
            });
        }
        Ok(candidates)
    }

    async fn purchase_numbers(
        &self,
        candidates: &[CandidateNumber],
    ) -> Result<PurchaseReport, ProviderError> {
        let mut report = PurchaseReport::default();
        let mut state = lock(&self.state);
        for candidate in candidates {
            if let Some(remaining) = state.inventory.as_mut() {
                if *remaining == 0 {
                    report.rejected.push(super::RejectedPurchase {
                        candidate: candidate.clone(),
                        error: ProviderError::Permanent("number no longer available".into()),
                    });
                    continue;
                }
                *remaining -= 1;
            }
            let carrier_id = format!("PN{}", candidate.phone_number.trim_start_matches('+'));
            self.log.record(format!("telephony.purchase:{carrier_id}"));
            state.owned.insert(carrier_id.clone());
            report.owned.push(OwnedNumber {
                phone_number: candidate.phone_number.clone(),
                carrier_id,
            });
        }
        Ok(report)
    }

    async fn release_number(&self, carrier_id: &str) -> Result<(), ProviderError> {
        self.log.record(format!("telephony.release:{carrier_id}"));
        let mut state = lock(&self.state);
        if state.release_failures > 0 {
            state.release_failures -= 1;
            return Err(ProviderError::Transient("carrier unavailable".into()));
        }
        if !state.owned.remove(carrier_id) {
            return Err(ProviderError::NotFound(carrier_id.to_string()));
        }
        Ok(())
    }

    async fn assign_to_routing_app(
        &self,
        carrier_id: &str,
        app_id: &str,
    ) -> Result<(), ProviderError> {
        self.log.record(format!("telephony.route:{carrier_id}:{app_id}"));
        Ok(())
    }
}

#[derive(Default)]
struct VoiceState {
    assistants: HashSet<String>,
    numbers: HashMap<String, Option<String>>,
    import_calls: usize,
    failing_import_calls: HashSet<usize>,
    number_delete_failures: usize,
    malformed_assistant_ids: bool,
    missing_credentials: bool,
}

pub struct SimulatedVoiceAiProvider {
    log: CallLog,
    state: Mutex<VoiceState>,
}

impl SimulatedVoiceAiProvider {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            state: Mutex::new(VoiceState::default()),
        }
    }

    /// Makes the `nth` (1-based) import call fail with a transient error.
    pub fn fail_import_call(&self, nth: usize) {
        lock(&self.state).failing_import_calls.insert(nth);
    }

    pub fn fail_next_number_deletes(&self, count: usize) {
        lock(&self.state).number_delete_failures = count;
    }

    pub fn set_malformed_assistant_ids(&self, malformed: bool) {
        lock(&self.state).malformed_assistant_ids = malformed;
    }

    pub fn set_missing_credentials(&self, missing: bool) {
        lock(&self.state).missing_credentials = missing;
    }

    /// Drops an assistant on the platform side without going through the API.
    pub fn forget_assistant(&self, assistant_id: &str) {
        lock(&self.state).assistants.remove(assistant_id);
    }

    pub fn has_assistant(&self, assistant_id: &str) -> bool {
        lock(&self.state).assistants.contains(assistant_id)
    }

    pub fn number_binding(&self, voice_id: &str) -> Option<Option<String>> {
        lock(&self.state).numbers.get(voice_id).cloned()
    }
}

#[async_trait]
impl VoiceAiProvider for SimulatedVoiceAiProvider {
    fn missing_credentials(&self) -> Vec<&'static str> {
        if lock(&self.state).missing_credentials {
            vec!["VOICE_AI_API_KEY", "VOICE_AI_CREDENTIAL_ID"]
        } else {
            Vec::new()
        }
    }

    fn credential_id(&self) -> Option<&str> {
        Some("cred-simulated")
    }

    async fn import_phone_number(
        &self,
        number: &str,
        _carrier_name: &str,
        options: &ImportOptions,
    ) -> Result<ImportedNumber, ProviderError> {
        self.log.record(format!("voice.import:{number}"));
        let mut state = lock(&self.state);
        state.import_calls += 1;
        let call = state.import_calls;
        if state.failing_import_calls.contains(&call) {
            return Err(ProviderError::Transient(format!("import of {number} timed out")));
        }
        let id = format!("pn_{}", Uuid::new_v4().simple());
        state
            .numbers
            .insert(id.clone(), Some(options.assistant_id.clone()));
        Ok(ImportedNumber { id })
    }

    async fn delete_phone_number(&self, voice_id: &str) -> Result<(), ProviderError> {
        self.log.record(format!("voice.delete_number:{voice_id}"));
        let mut state = lock(&self.state);
        if state.number_delete_failures > 0 {
            state.number_delete_failures -= 1;
            return Err(ProviderError::Transient("voice platform unavailable".into()));
        }
        match state.numbers.remove(voice_id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(voice_id.to_string())),
        }
    }

    async fn assign_assistant_to_number(
        &self,
        voice_id: &str,
        assistant_id: &str,
    ) -> Result<(), ProviderError> {
        self.log.record(format!("voice.assign:{voice_id}:{assistant_id}"));
        match lock(&self.state).numbers.get_mut(voice_id) {
            Some(binding) => {
                *binding = Some(assistant_id.to_string());
                Ok(())
            }
            None => Err(ProviderError::NotFound(voice_id.to_string())),
        }
    }

    async fn detach_assistant(&self, voice_id: &str) -> Result<(), ProviderError> {
        self.log.record(format!("voice.detach:{voice_id}"));
        match lock(&self.state).numbers.get_mut(voice_id) {
            Some(binding) => {
                *binding = None;
                Ok(())
            }
            None => Err(ProviderError::NotFound(voice_id.to_string())),
        }
    }

    async fn create_assistant(
        &self,
        config: &AssistantConfig,
    ) -> Result<CreatedAssistant, ProviderError> {
        self.log.record(format!("voice.create_assistant:{}", config.name));
        let mut state = lock(&self.state);
        let id = if state.malformed_assistant_ids {
            "assistant-pending".to_string()
        } else {
            Uuid::new_v4().to_string()
        };
        state.assistants.insert(id.clone());
        Ok(CreatedAssistant { id })
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<(), ProviderError> {
        self.log.record(format!("voice.delete_assistant:{assistant_id}"));
        if lock(&self.state).assistants.remove(assistant_id) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(assistant_id.to_string()))
        }
    }
}

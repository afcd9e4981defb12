//! Collaborator contracts for the telephony carrier and the voice-AI platform.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod simulated;
pub mod telephony;
pub mod voice;

pub use simulated::{CallLog, SimulatedTelephonyProvider, SimulatedVoiceAiProvider};
pub use telephony::{HttpTelephonyProvider, TelephonySettings};
pub use voice::{HttpVoiceAiProvider, VoiceAiSettings};

/// key: provider-errors -> collaborator failure classes
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("rejected: {0}")]
    Permanent(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub(crate) fn from_status(status: StatusCode, body: String) -> Self {
        let detail = if body.trim().is_empty() {
            status.to_string()
        } else {
            format!("{status}: {}", body.trim())
        };
        match status {
            StatusCode::NOT_FOUND => ProviderError::NotFound(detail),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(detail),
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                ProviderError::Transient(detail)
            }
            status if status.is_server_error() => ProviderError::Transient(detail),
            _ => ProviderError::Permanent(detail),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ProviderError::Malformed(err.to_string());
        }
        if let Some(status) = err.status() {
            return ProviderError::from_status(status, String::new());
        }
        ProviderError::Transient(err.to_string())
    }
}

/// Treats "already gone" as success for idempotent deletes.
pub fn tolerate_not_found(result: Result<(), ProviderError>) -> Result<(), ProviderError> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateNumber {
    pub phone_number: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub locality: Option<String>,
}

/// A number the platform now owns on the carrier side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedNumber {
    pub phone_number: String,
    pub carrier_id: String,
}

#[derive(Debug, Clone)]
pub struct RejectedPurchase {
    pub candidate: CandidateNumber,
    pub error: ProviderError,
}

#[derive(Debug, Clone, Default)]
pub struct PurchaseReport {
    pub owned: Vec<OwnedNumber>,
    pub rejected: Vec<RejectedPurchase>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOptions {
    pub name: String,
    pub assistant_id: String,
    pub credential_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportedNumber {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantConfig {
    pub name: String,
    pub first_message: String,
    pub max_concurrent_sessions: u32,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedAssistant {
    pub id: String,
}

/// key: telephony-provider -> carrier number inventory
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    fn carrier_name(&self) -> &str;

    /// Names of configuration keys that must be set before anything is bought.
    fn missing_credentials(&self) -> Vec<&'static str>;

    fn routing_app_id(&self) -> Option<&str>;

    async fn search_available_numbers(
        &self,
        count: u32,
        region: Option<&str>,
    ) -> Result<Vec<CandidateNumber>, ProviderError>;

    async fn purchase_numbers(
        &self,
        candidates: &[CandidateNumber],
    ) -> Result<PurchaseReport, ProviderError>;

    async fn release_number(&self, carrier_id: &str) -> Result<(), ProviderError>;

    async fn assign_to_routing_app(&self, carrier_id: &str, app_id: &str)
        -> Result<(), ProviderError>;
}

/// key: voice-ai-provider -> assistant and number bindings
#[async_trait]
pub trait VoiceAiProvider: Send + Sync {
    fn missing_credentials(&self) -> Vec<&'static str>;

    /// Carrier credential registered on the voice platform, used for imports.
    fn credential_id(&self) -> Option<&str>;

    async fn import_phone_number(
        &self,
        number: &str,
        carrier_name: &str,
        options: &ImportOptions,
    ) -> Result<ImportedNumber, ProviderError>;

    async fn delete_phone_number(&self, voice_id: &str) -> Result<(), ProviderError>;

    async fn assign_assistant_to_number(
        &self,
        voice_id: &str,
        assistant_id: &str,
    ) -> Result<(), ProviderError>;

    async fn detach_assistant(&self, voice_id: &str) -> Result<(), ProviderError>;

    async fn create_assistant(
        &self,
        config: &AssistantConfig,
    ) -> Result<CreatedAssistant, ProviderError>;

    async fn delete_assistant(&self, assistant_id: &str) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    Live,
    Simulated,
}

impl ProviderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderMode::Live => "live",
            ProviderMode::Simulated => "simulated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub telephony: TelephonySettings,
    pub voice: VoiceAiSettings,
}

/// Concrete collaborators handed to the provisioning components.
#[derive(Clone)]
pub struct ProviderBundle {
    pub telephony: Arc<dyn TelephonyProvider>,
    pub voice: Arc<dyn VoiceAiProvider>,
}

impl ProviderBundle {
    pub fn new(telephony: Arc<dyn TelephonyProvider>, voice: Arc<dyn VoiceAiProvider>) -> Self {
        Self { telephony, voice }
    }

    pub fn from_settings(mode: ProviderMode, settings: &ProviderSettings) -> anyhow::Result<Self> {
        match mode {
            ProviderMode::Live => Ok(Self::new(
                Arc::new(HttpTelephonyProvider::new(settings.telephony.clone())?),
                Arc::new(HttpVoiceAiProvider::new(settings.voice.clone())?),
            )),
            ProviderMode::Simulated => {
                let log = CallLog::default();
                Ok(Self::new(
                    Arc::new(SimulatedTelephonyProvider::new(log.clone())),
                    Arc::new(SimulatedVoiceAiProvider::new(log)),
                ))
            }
        }
    }
}

use thiserror::Error;
use uuid::Uuid;

use crate::providers::ProviderError;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("missing credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),
    #[error("no candidate numbers available in region {}", .region.as_deref().unwrap_or("any"))]
    NoCandidates { region: Option<String> },
    #[error("number pool exhausted for region {region}")]
    PoolExhausted { region: String },
    #[error("collaborator returned malformed id `{0}`")]
    InvalidExternalId(String),
    #[error("tenant {0} not found")]
    TenantNotFound(Uuid),
    #[error("phone resource {0} not found")]
    ResourceNotFound(Uuid),
    #[error("no number source configured for {0}")]
    SourceUnavailable(&'static str),
    #[error("phone resource {resource_id} retired locally but carrier release failed: {source}")]
    CarrierReleaseFailed {
        resource_id: Uuid,
        #[source]
        source: ProviderError,
    },
    #[error("{0}")]
    Message(String),
}

impl ProvisioningError {
    /// Whether the retry queue should pick this failure up again.
    ///
    /// Configuration and inventory problems need an operator; everything
    /// else is assumed to clear on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvisioningError::Db(_) | ProvisioningError::NoCandidates { .. } => true,
            ProvisioningError::Provider(err) => err.is_transient(),
            ProvisioningError::MissingCredentials(_)
            | ProvisioningError::PoolExhausted { .. }
            | ProvisioningError::InvalidExternalId(_)
            | ProvisioningError::TenantNotFound(_)
            | ProvisioningError::ResourceNotFound(_)
            | ProvisioningError::SourceUnavailable(_)
            | ProvisioningError::CarrierReleaseFailed { .. }
            | ProvisioningError::Message(_) => false,
        }
    }
}

pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

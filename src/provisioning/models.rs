use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::providers::OwnedNumber;

/// key: provisioning-tenant -> plan and profile of a paying account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub plan_id: String,
    pub subscription_status: String,
    pub business_name: String,
    pub region: Option<String>,
    pub max_concurrent_sessions: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn profile(&self) -> TenantProfile {
        TenantProfile {
            business_name: self.business_name.clone(),
            region: self.region.clone(),
            greeting: None,
            preferred_pool_entry: None,
        }
    }
}

/// Caller-supplied tenant details used when numbers and assistants are created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantProfile {
    pub business_name: String,
    pub region: Option<String>,
    #[serde(default)]
    pub greeting: Option<String>,
    /// Pool entry reserved for the tenant at checkout, if any.
    #[serde(default)]
    pub preferred_pool_entry: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub number_count: u32,
    pub max_concurrent_sessions: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssistantStatus {
    Active,
    Deleted,
}

impl AssistantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssistantStatus::Active => "active",
            AssistantStatus::Deleted => "deleted",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "active" => AssistantStatus::Active,
            _ => AssistantStatus::Deleted,
        }
    }
}

/// key: provisioning-assistant -> one voice assistant per tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantResource {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub external_voice_id: String,
    pub status: AssistantStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhoneResourceStatus {
    Active,
    Released,
}

impl PhoneResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhoneResourceStatus::Active => "active",
            PhoneResourceStatus::Released => "released",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "active" => PhoneResourceStatus::Active,
            _ => PhoneResourceStatus::Released,
        }
    }
}

/// Where a phone resource's number came from, and therefore how it is given back.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceOrigin {
    Purchased,
    Pool,
}

impl ResourceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceOrigin::Purchased => "purchased",
            ResourceOrigin::Pool => "pool",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "pool" => ResourceOrigin::Pool,
            _ => ResourceOrigin::Purchased,
        }
    }
}

/// key: provisioning-phone-resource -> ledger row linking carrier and voice identities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneResource {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub phone_number: String,
    pub external_carrier_id: String,
    pub external_voice_id: String,
    pub assigned_assistant_id: Option<String>,
    pub origin: ResourceOrigin,
    pub pool_entry_id: Option<Uuid>,
    pub status: PhoneResourceStatus,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl PhoneResource {
    pub fn is_active(&self) -> bool {
        self.status == PhoneResourceStatus::Active
    }
}

/// key: provisioning-pool-entry -> shared regional inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    pub id: Uuid,
    pub phone_number: String,
    pub external_carrier_id: String,
    pub external_voice_id: Option<String>,
    pub assigned_tenant_id: Option<Uuid>,
    pub region: String,
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Pending,
    Failed,
    Succeeded,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStatus::Pending => "pending",
            RetryStatus::Failed => "failed",
            RetryStatus::Succeeded => "succeeded",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "succeeded" => RetryStatus::Succeeded,
            "failed" => RetryStatus::Failed,
            _ => RetryStatus::Pending,
        }
    }
}

/// key: provisioning-retry-item -> durable record of a failed provisioning pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryQueueItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: String,
    pub requested_count: i32,
    pub status: RetryStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    /// Numbers bought on the carrier whose import never completed.
    pub orphaned_numbers: Vec<OwnedNumber>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetryQueueItem {
    pub fn is_open(&self) -> bool {
        self.status != RetryStatus::Succeeded
    }

    pub fn is_exhausted(&self, max_attempts: i32) -> bool {
        self.status == RetryStatus::Failed && self.attempts >= max_attempts
    }
}

/// Pipeline step a per-number failure happened in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Purchase,
    Validate,
    Routing,
    Import,
    Assign,
    Persist,
    Inventory,
    /// An orphaned number that could be neither adopted nor released.
    Surplus,
}

/// key: provisioning-failure -> one number that did not make it through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberFailure {
    pub phone_number: Option<String>,
    /// Set when the number is already owned on the carrier side.
    pub owned: Option<OwnedNumber>,
    pub stage: FailureStage,
    pub error: String,
    pub retryable: bool,
}

/// key: provisioning-outcome -> partial-success summary of one pass
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionOutcome {
    pub tenant_id: Uuid,
    pub requested: u32,
    pub provisioned: u32,
    pub resources: Vec<PhoneResource>,
    pub failures: Vec<NumberFailure>,
}

impl ProvisionOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.provisioned >= self.requested
    }

    /// Owned-but-unimported numbers the retry queue must keep tracking.
    pub fn orphaned_numbers(&self) -> Vec<OwnedNumber> {
        self.failures
            .iter()
            .filter_map(|failure| failure.owned.clone())
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    Grow,
    Shrink,
    NoChange,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseFailure {
    pub resource_id: Uuid,
    pub phone_number: String,
    pub error: String,
}

/// key: provisioning-reconcile-outcome
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub action: ReconcileAction,
    pub count_changed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provision: Option<ProvisionOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub release_failures: Vec<ReleaseFailure>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released,
    AlreadyReleased,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeardownOutcome {
    pub tenant_id: Uuid,
    pub released: u32,
    pub release_failures: Vec<ReleaseFailure>,
    pub assistant_deleted: bool,
}

//! Phone-number provisioning and lifecycle reconciliation.

pub mod entitlements;
pub mod locks;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod reconciler;
pub mod release;
pub mod retry;
pub mod service;
pub mod source;
pub mod teardown;

pub use entitlements::PlanCatalog;
pub use locks::{TenantGuard, TenantLocks};
pub use models::*;
pub use orchestrator::ProvisioningOrchestrator;
pub use pool::{PoolAllocator, PoolAssignment, PoolNumberSource};
pub use reconciler::PlanChangeReconciler;
pub use release::ReleaseWorkflow;
pub use retry::{backoff_for, RetryPolicy, RetryQueue, SweepSummary};
pub use service::{ProvisioningService, ServiceOptions};
pub use source::{AcquireBatch, AcquireRequest, NumberSource, NumberSources, PurchasedNumberSource};
pub use teardown::TenantTeardown;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::ProvisioningStore;
use crate::error::ProvisioningResult;
use crate::providers::OwnedNumber;

use super::entitlements::PlanCatalog;
use super::locks::TenantLocks;
use super::models::{ProvisionOutcome, RetryQueueItem, RetryStatus};
use super::orchestrator::ProvisioningOrchestrator;
use super::teardown::CANCELED_STATUS;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 6;
pub const DEFAULT_SWEEP_BATCH: i64 = 25;
pub const TENANT_CANCELED: &str = "tenant canceled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub batch: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            batch: DEFAULT_SWEEP_BATCH,
        }
    }
}

/// Delay before the next attempt once an item has failed `attempts` times.
/// The first failure is retried immediately; later ones back off to a 2h cap.
pub fn backoff_for(attempts: i32) -> Duration {
    match attempts {
        i32::MIN..=1 => Duration::zero(),
        2 => Duration::minutes(1),
        3 => Duration::minutes(5),
        4 => Duration::minutes(15),
        5 => Duration::hours(1),
        _ => Duration::hours(2),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// Items left for the next tick because their tenant was busy.
    pub deferred: u32,
}

/// key: retry-queue -> durable out-of-band provisioning retries
pub struct RetryQueue {
    store: Arc<dyn ProvisioningStore>,
    orchestrator: Arc<ProvisioningOrchestrator>,
    catalog: Arc<PlanCatalog>,
    locks: TenantLocks,
    policy: RetryPolicy,
}

impl RetryQueue {
    pub fn new(
        store: Arc<dyn ProvisioningStore>,
        orchestrator: Arc<ProvisioningOrchestrator>,
        catalog: Arc<PlanCatalog>,
        locks: TenantLocks,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            orchestrator,
            catalog,
            locks,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Records a failed pass. A tenant with an open item has the failure
    /// folded into it and counted as a further attempt.
    pub async fn enqueue_failure(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        requested_count: u32,
        error: &str,
        orphaned: Vec<OwnedNumber>,
    ) -> ProvisioningResult<RetryQueueItem> {
        let now = Utc::now();
        if let Some(mut item) = self
            .store
            .open_retry_item(tenant_id, self.policy.max_attempts)
            .await?
        {
            item.plan_id = plan_id.to_string();
            item.requested_count += requested_count as i32;
            item.orphaned_numbers.extend(orphaned);
            self.record_failure(&mut item, error, now).await?;
            return Ok(item);
        }

        let item = RetryQueueItem {
            id: Uuid::new_v4(),
            tenant_id,
            plan_id: plan_id.to_string(),
            requested_count: requested_count as i32,
            status: RetryStatus::Pending,
            attempts: 1,
            last_error: Some(error.to_string()),
            orphaned_numbers: orphaned,
            next_attempt_at: now + backoff_for(1),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_retry_item(&item).await?;
        info!(%tenant_id, item_id = %item.id, requested = requested_count, error, "provisioning failure queued for retry");
        Ok(item)
    }

    /// Queues the retryable part of a partially failed pass, if any.
    pub async fn enqueue_outcome(
        &self,
        tenant_id: Uuid,
        plan_id: &str,
        outcome: &ProvisionOutcome,
    ) -> ProvisioningResult<Option<RetryQueueItem>> {
        // Owned numbers stay on the item even when their failure is final.
        let retryable = outcome.failures.iter().filter(|f| f.retryable).count();
        let orphaned = outcome.orphaned_numbers();
        if retryable == 0 && orphaned.is_empty() {
            return Ok(None);
        }
        let last_error = outcome
            .failures
            .iter()
            .rev()
            .find(|f| f.retryable || f.owned.is_some())
            .map(|f| f.error.as_str())
            .unwrap_or("provisioning incomplete");
        let item = self
            .enqueue_failure(tenant_id, plan_id, retryable as u32, last_error, orphaned)
            .await?;
        Ok(Some(item))
    }

    /// Closes every open item for the tenant without deleting it. Closed items
    /// are left `failed` at the attempt limit so they show up as exhausted.
    pub async fn close_for_tenant(&self, tenant_id: Uuid, reason: &str) -> ProvisioningResult<u32> {
        let now = Utc::now();
        let mut closed = 0;
        while let Some(mut item) = self
            .store
            .open_retry_item(tenant_id, self.policy.max_attempts)
            .await?
        {
            self.close_item(&mut item, reason, now).await?;
            closed += 1;
        }
        Ok(closed)
    }

    pub async fn exhausted_items(&self) -> ProvisioningResult<Vec<RetryQueueItem>> {
        Ok(self
            .store
            .exhausted_retry_items(self.policy.max_attempts)
            .await?)
    }

    pub async fn process_tick(&self, now: DateTime<Utc>) -> ProvisioningResult<SweepSummary> {
        let due = self
            .store
            .due_retry_items(now, self.policy.max_attempts, self.policy.batch)
            .await?;
        let mut summary = SweepSummary::default();

        for item in due {
            let Some(_guard) = self.locks.try_acquire(item.tenant_id) else {
                debug!(tenant_id = %item.tenant_id, item_id = %item.id, "tenant busy; deferring retry");
                summary.deferred += 1;
                continue;
            };
            // Re-read under the lock; a concurrent enqueue may have moved it.
            let Some(mut item) = self.store.retry_item(item.id).await? else {
                continue;
            };
            if !item.is_open() || item.attempts >= self.policy.max_attempts {
                continue;
            }

            summary.processed += 1;
            if self.attempt(&mut item, now).await? {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }

        if summary.processed > 0 || summary.deferred > 0 {
            info!(
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                deferred = summary.deferred,
                "retry sweep finished"
            );
        }
        Ok(summary)
    }

    async fn attempt(&self, item: &mut RetryQueueItem, now: DateTime<Utc>) -> ProvisioningResult<bool> {
        let Some(tenant) = self.store.tenant(item.tenant_id).await? else {
            self.record_failure(item, "tenant no longer exists", now).await?;
            return Ok(false);
        };
        if tenant.subscription_status == CANCELED_STATUS {
            self.close_item(item, TENANT_CANCELED, now).await?;
            return Ok(false);
        }

        let quota = self.catalog.quota_for(&tenant.plan_id);
        let active = self.store.count_active_phone_resources(tenant.id).await?.max(0) as u32;
        let room = quota.number_count.saturating_sub(active);
        let count = (item.requested_count.max(0) as u32).min(room);

        if count == 0 && item.orphaned_numbers.is_empty() {
            self.record_success(item, now).await?;
            return Ok(true);
        }

        let result = self
            .orchestrator
            .provision_count(
                tenant.id,
                &tenant.plan_id,
                &tenant.profile(),
                count,
                &item.orphaned_numbers,
            )
            .await;

        match result {
            Ok(outcome) if outcome.is_complete() => {
                self.record_success(item, now).await?;
                Ok(true)
            }
            Ok(outcome) => {
                item.requested_count = (count - outcome.provisioned.min(count)) as i32;
                item.orphaned_numbers = outcome.orphaned_numbers();
                let error = outcome
                    .failures
                    .last()
                    .map(|failure| failure.error.clone())
                    .unwrap_or_else(|| "provisioning incomplete".to_string());
                self.record_failure(item, &error, now).await?;
                Ok(false)
            }
            Err(err) => {
                self.record_failure(item, &err.to_string(), now).await?;
                Ok(false)
            }
        }
    }

    async fn record_success(&self, item: &mut RetryQueueItem, now: DateTime<Utc>) -> ProvisioningResult<()> {
        item.status = RetryStatus::Succeeded;
        item.orphaned_numbers.clear();
        item.last_error = None;
        item.updated_at = now;
        self.store.update_retry_item(item).await?;
        info!(tenant_id = %item.tenant_id, item_id = %item.id, attempts = item.attempts, "retry succeeded");
        Ok(())
    }

    async fn close_item(
        &self,
        item: &mut RetryQueueItem,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ProvisioningResult<()> {
        item.status = RetryStatus::Failed;
        item.attempts = item.attempts.max(self.policy.max_attempts);
        item.last_error = Some(reason.to_string());
        item.updated_at = now;
        self.store.update_retry_item(item).await?;
        warn!(
            tenant_id = %item.tenant_id,
            item_id = %item.id,
            orphaned = item.orphaned_numbers.len(),
            reason,
            "retry item closed"
        );
        Ok(())
    }

    async fn record_failure(
        &self,
        item: &mut RetryQueueItem,
        error: &str,
        now: DateTime<Utc>,
    ) -> ProvisioningResult<()> {
        item.attempts += 1;
        item.status = RetryStatus::Failed;
        item.last_error = Some(error.to_string());
        item.next_attempt_at = now + backoff_for(item.attempts);
        item.updated_at = now;
        self.store.update_retry_item(item).await?;

        if item.attempts >= self.policy.max_attempts {
            error!(
                tenant_id = %item.tenant_id,
                item_id = %item.id,
                attempts = item.attempts,
                error,
                "retry item exhausted; needs operator attention"
            );
        } else {
            warn!(
                tenant_id = %item.tenant_id,
                item_id = %item.id,
                attempts = item.attempts,
                next_attempt_at = %item.next_attempt_at,
                error,
                "retry attempt failed"
            );
        }
        Ok(())
    }
}

/// key: retry-queue -> background sweep loop
pub fn spawn(queue: Arc<RetryQueue>, interval: TokioDuration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = queue.process_tick(Utc::now()).await {
                warn!(?err, "retry sweep tick failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_for(1), Duration::zero());
        assert_eq!(backoff_for(2), Duration::minutes(1));
        assert_eq!(backoff_for(3), Duration::minutes(5));
        assert_eq!(backoff_for(4), Duration::minutes(15));
        assert_eq!(backoff_for(5), Duration::hours(1));
        assert_eq!(backoff_for(6), Duration::hours(2));
        assert_eq!(backoff_for(40), Duration::hours(2));
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.batch, 25);
    }
}

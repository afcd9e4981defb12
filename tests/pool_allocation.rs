mod common;

use std::collections::HashSet;

use common::{pooled_profile, Harness, POOL_REGION};
use futures_util::future::join_all;
use line_provisioning::db::ProvisioningStore;
use line_provisioning::provisioning::{ReleaseOutcome, ResourceOrigin};
use line_provisioning::ProvisioningError;
use uuid::Uuid;

// key: pool-allocation-tests -> shared inventory assignment

async fn stock(harness: &Harness, count: usize) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for n in 0..count {
        let entry = harness
            .service
            .pool()
            .add_inventory(&format!("+1415555{n:04}"), &format!("PNPOOL{n}"), POOL_REGION)
            .await
            .unwrap();
        ids.push(entry.id);
    }
    ids
}

#[tokio::test]
async fn parallel_assignment_never_double_books() {
    let harness = Harness::new();
    stock(&harness, 3).await;
    let pool = harness.service.pool().clone();

    let tenants: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    let results = join_all(
        tenants
            .iter()
            .map(|tenant_id| pool.assign(*tenant_id, POOL_REGION, "asst-shared", None)),
    )
    .await;

    let successes: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let exhausted = results
        .iter()
        .filter(|r| matches!(r, Err(ProvisioningError::PoolExhausted { .. })))
        .count();
    assert_eq!(successes.len(), 3);
    assert_eq!(exhausted, 5);

    let entries: HashSet<Uuid> = successes.iter().map(|a| a.pool_entry.id).collect();
    assert_eq!(entries.len(), 3);
    let holders: HashSet<Uuid> = successes
        .iter()
        .filter_map(|a| a.pool_entry.assigned_tenant_id)
        .collect();
    assert_eq!(holders.len(), 3);

    for assignment in &successes {
        let stored = harness
            .store
            .pool_entry(assignment.pool_entry.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.assigned_tenant_id, assignment.pool_entry.assigned_tenant_id);
    }
    assert_eq!(pool.available(POOL_REGION).await.unwrap(), 0);
}

#[tokio::test]
async fn reassignment_after_release_skips_import() {
    let harness = Harness::new();
    let entry_ids = stock(&harness, 1).await;
    let pool = harness.service.pool().clone();
    let first_tenant = Uuid::new_v4();

    let first = pool
        .assign(first_tenant, POOL_REGION, "asst-first", None)
        .await
        .unwrap();
    assert_eq!(harness.log.count("voice.import"), 1);
    let voice_id = first.pool_entry.external_voice_id.clone().unwrap();

    let released = harness
        .service
        .release_resource(first.phone_resource_id)
        .await
        .unwrap();
    assert_eq!(released, ReleaseOutcome::Released);
    assert_eq!(harness.voice.number_binding(&voice_id), Some(None));
    assert_eq!(harness.log.count("telephony.release"), 0);

    let returned = harness.store.pool_entry(entry_ids[0]).await.unwrap().unwrap();
    assert!(returned.assigned_tenant_id.is_none());
    assert_eq!(returned.external_voice_id.as_deref(), Some(voice_id.as_str()));

    let second = pool
        .assign(Uuid::new_v4(), POOL_REGION, "asst-second", None)
        .await
        .unwrap();
    assert_eq!(second.pool_entry.id, entry_ids[0]);
    assert_eq!(harness.log.count("voice.import"), 1);
    assert_eq!(
        harness.voice.number_binding(&voice_id),
        Some(Some("asst-second".to_string()))
    );
}

#[tokio::test]
async fn preferred_entry_is_claimed_first() {
    let harness = Harness::new();
    let entry_ids = stock(&harness, 2).await;

    let assignment = harness
        .service
        .pool()
        .assign(Uuid::new_v4(), POOL_REGION, "asst-pref", Some(entry_ids[1]))
        .await
        .unwrap();
    assert_eq!(assignment.pool_entry.id, entry_ids[1]);

    // Already taken, so the next caller falls back to whatever is left.
    let fallback = harness
        .service
        .pool()
        .assign(Uuid::new_v4(), POOL_REGION, "asst-other", Some(entry_ids[1]))
        .await
        .unwrap();
    assert_eq!(fallback.pool_entry.id, entry_ids[0]);
}

#[tokio::test]
async fn pooled_region_provisions_from_inventory() {
    let harness = Harness::new();
    stock(&harness, 2).await;
    let tenant_id = Uuid::new_v4();

    let outcome = harness
        .service
        .provision_tenant(tenant_id, "growth", &pooled_profile("Pool Tenant"))
        .await
        .unwrap();

    assert_eq!(outcome.provisioned, 2);
    assert!(outcome
        .resources
        .iter()
        .all(|resource| resource.origin == ResourceOrigin::Pool && resource.pool_entry_id.is_some()));
    assert_eq!(harness.log.count("telephony.search"), 0);
    assert_eq!(harness.log.count("telephony.purchase"), 0);
}

#[tokio::test]
async fn empty_pool_is_not_queued_for_retry() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();

    let err = harness
        .service
        .provision_tenant(tenant_id, "starter", &pooled_profile("Nothing Left"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisioningError::PoolExhausted { ref region } if region == POOL_REGION));
    assert!(harness.store.retry_items().await.is_empty());
    assert_eq!(harness.log.count("voice.create_assistant"), 0);
}

#[tokio::test]
async fn failed_import_hands_the_claim_back() {
    let harness = Harness::new();
    stock(&harness, 1).await;
    harness.voice.fail_import_call(1);
    let pool = harness.service.pool().clone();

    let err = pool
        .assign(Uuid::new_v4(), POOL_REGION, "asst-retry", None)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(pool.available(POOL_REGION).await.unwrap(), 1);

    pool.assign(Uuid::new_v4(), POOL_REGION, "asst-retry", None)
        .await
        .unwrap();
    assert_eq!(pool.available(POOL_REGION).await.unwrap(), 0);
}

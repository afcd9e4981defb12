mod common;

use chrono::{Duration, Utc};
use common::{default_options, pooled_profile, profile, Harness, POOL_REGION};
use line_provisioning::db::ProvisioningStore;
use line_provisioning::providers::OwnedNumber;
use line_provisioning::provisioning::{ResourceQuota, RetryPolicy, RetryStatus};
use uuid::Uuid;

// key: retry-queue-tests -> sweeper backoff, exhaustion and orphan adoption

fn harness_with_max_attempts(max_attempts: i32) -> Harness {
    let mut options = default_options();
    options.retry = RetryPolicy {
        max_attempts,
        ..RetryPolicy::default()
    };
    Harness::with_options(options)
}

#[tokio::test]
async fn exhausted_item_stops_being_swept() {
    let harness = harness_with_max_attempts(2);
    harness.telephony.set_inventory(0);
    let tenant_id = Uuid::new_v4();

    harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Never Lucky"))
        .await
        .unwrap_err();

    let now = Utc::now();
    let queue = harness.service.retry_queue();
    let summary = queue.process_tick(now).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);

    let items = harness.store.retry_items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].attempts, 2);
    assert_eq!(items[0].status, RetryStatus::Failed);

    let later = queue.process_tick(now + Duration::hours(3)).await.unwrap();
    assert_eq!(later.processed, 0);

    let exhausted = queue.exhausted_items().await.unwrap();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].tenant_id, tenant_id);
    assert!(exhausted[0].last_error.is_some());
}

#[tokio::test]
async fn failed_attempt_waits_out_its_backoff() {
    let harness = Harness::new();
    harness.telephony.set_inventory(0);
    let tenant_id = Uuid::new_v4();
    harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Backing Off"))
        .await
        .unwrap_err();

    let now = Utc::now();
    let queue = harness.service.retry_queue();
    queue.process_tick(now).await.unwrap();

    let item = harness.store.retry_items().await.remove(0);
    assert_eq!(item.attempts, 2);
    assert_eq!(item.next_attempt_at, now + Duration::minutes(1));

    let early = queue.process_tick(now + Duration::seconds(30)).await.unwrap();
    assert_eq!(early.processed, 0);

    let due = queue.process_tick(now + Duration::seconds(61)).await.unwrap();
    assert_eq!(due.processed, 1);
    assert_eq!(harness.store.retry_items().await[0].attempts, 3);
}

#[tokio::test]
async fn sweep_completes_once_inventory_returns() {
    let harness = Harness::new();
    harness.telephony.set_inventory(0);
    let tenant_id = Uuid::new_v4();
    harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Restocked"))
        .await
        .unwrap_err();
    assert!(harness.active(tenant_id).await.is_empty());

    harness.telephony.set_inventory(5);
    let summary = harness
        .service
        .retry_queue()
        .process_tick(Utc::now())
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(harness.active(tenant_id).await.len(), 1);
    let item = harness.store.retry_items().await.remove(0);
    assert_eq!(item.status, RetryStatus::Succeeded);
    assert!(item.last_error.is_none());

    let again = harness
        .service
        .retry_queue()
        .process_tick(Utc::now() + Duration::hours(3))
        .await
        .unwrap();
    assert_eq!(again.processed, 0);
}

#[tokio::test]
async fn orphaned_number_is_adopted_instead_of_repurchased() {
    let harness = Harness::new();
    harness.voice.fail_import_call(2);
    let tenant_id = Uuid::new_v4();

    let outcome = harness
        .service
        .provision_tenant(tenant_id, "growth", &profile("Orphan Rescue"))
        .await
        .unwrap();
    assert_eq!(outcome.provisioned, 1);

    let queued = harness.store.retry_items().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].requested_count, 1);
    assert_eq!(queued[0].orphaned_numbers.len(), 1);
    assert_eq!(queued[0].orphaned_numbers[0].phone_number, "+15550000002");

    let summary = harness
        .service
        .retry_queue()
        .process_tick(Utc::now())
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 1);

    assert_eq!(harness.log.count("telephony.purchase"), 2);
    assert_eq!(harness.log.count("telephony.search"), 1);
    assert_eq!(harness.log.count("voice.import"), 3);
    assert_eq!(harness.log.count("telephony.release"), 0);

    let active = harness.active(tenant_id).await;
    assert_eq!(active.len(), 2);
    assert!(active
        .iter()
        .any(|resource| resource.phone_number == "+15550000002"));
    assert_eq!(
        harness.store.retry_items().await[0].status,
        RetryStatus::Succeeded
    );
}

#[tokio::test]
async fn second_failure_merges_into_the_open_item() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();
    let queue = harness.service.retry_queue();

    let first = queue
        .enqueue_failure(tenant_id, "growth", 1, "carrier timed out", Vec::new())
        .await
        .unwrap();
    let second = queue
        .enqueue_failure(tenant_id, "growth", 1, "carrier timed out again", Vec::new())
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    let items = harness.store.retry_items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].attempts, 2);
    assert_eq!(items[0].requested_count, 2);
    assert_eq!(items[0].status, RetryStatus::Failed);
    assert_eq!(items[0].last_error.as_deref(), Some("carrier timed out again"));
}

#[tokio::test]
async fn quota_already_met_closes_the_item_without_calls() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();
    harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Already Whole"))
        .await
        .unwrap();
    harness
        .service
        .retry_queue()
        .enqueue_failure(tenant_id, "starter", 1, "stale failure", Vec::new())
        .await
        .unwrap();
    let calls_before = harness.log.entries().len();

    let summary = harness
        .service
        .retry_queue()
        .process_tick(Utc::now())
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(harness.log.entries().len(), calls_before);
    assert_eq!(harness.active(tenant_id).await.len(), 1);
}

#[tokio::test]
async fn canceled_tenant_is_closed_without_provider_calls() {
    let harness = Harness::new();
    harness.telephony.set_inventory(0);
    let tenant_id = Uuid::new_v4();
    harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Quietly Gone"))
        .await
        .unwrap_err();
    assert!(harness
        .store
        .set_subscription_status(tenant_id, "canceled")
        .await
        .unwrap());
    harness.telephony.set_inventory(5);
    let calls_before = harness.log.entries().len();

    let queue = harness.service.retry_queue();
    let summary = queue.process_tick(Utc::now()).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(harness.log.entries().len(), calls_before);
    assert!(harness.active(tenant_id).await.is_empty());
    let item = harness.store.retry_items().await.remove(0);
    assert_eq!(item.status, RetryStatus::Failed);
    assert_eq!(item.last_error.as_deref(), Some("tenant canceled"));
    assert_eq!(queue.exhausted_items().await.unwrap().len(), 1);
}

#[tokio::test]
async fn pooled_tenant_keeps_orphans_it_cannot_adopt() {
    let harness = Harness::new();
    for n in 0..2 {
        harness
            .service
            .pool()
            .add_inventory(&format!("+1415555{n:04}"), &format!("PNPOOL{n}"), POOL_REGION)
            .await
            .unwrap();
    }
    let tenant_id = Uuid::new_v4();
    harness
        .service
        .provision_tenant(tenant_id, "starter", &pooled_profile("Pool Side"))
        .await
        .unwrap();
    let orphan = OwnedNumber {
        phone_number: "+15550009999".into(),
        carrier_id: "PN15550009999".into(),
    };
    harness
        .service
        .retry_queue()
        .enqueue_failure(tenant_id, "starter", 0, "import lost", vec![orphan.clone()])
        .await
        .unwrap();

    let summary = harness
        .service
        .retry_queue()
        .process_tick(Utc::now())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(harness.log.count("telephony.release"), 0);
    assert_eq!(harness.active(tenant_id).await.len(), 1);
    let item = harness.store.retry_items().await.remove(0);
    assert_eq!(item.status, RetryStatus::Failed);
    assert_eq!(item.orphaned_numbers, vec![orphan]);
    assert!(item
        .last_error
        .as_deref()
        .is_some_and(|error| error.contains("cannot adopt")));
}

#[tokio::test]
async fn surplus_orphan_survives_a_failed_release() {
    let harness = Harness::new();
    harness.voice.fail_import_call(2);
    let tenant_id = Uuid::new_v4();
    harness
        .service
        .provision_tenant(tenant_id, "growth", &profile("Downsized"))
        .await
        .unwrap();
    // Downgrade behind the sweep's back so the orphan is no longer needed.
    harness
        .store
        .update_tenant_plan(
            tenant_id,
            "starter",
            ResourceQuota {
                number_count: 1,
                max_concurrent_sessions: 2,
            },
        )
        .await
        .unwrap();
    harness.telephony.fail_next_releases(1);

    let now = Utc::now();
    let queue = harness.service.retry_queue();
    let first = queue.process_tick(now).await.unwrap();
    assert_eq!(first.failed, 1);

    let item = harness.store.retry_items().await.remove(0);
    assert_eq!(item.status, RetryStatus::Failed);
    assert_eq!(item.requested_count, 0);
    assert_eq!(item.orphaned_numbers.len(), 1);
    assert_eq!(item.orphaned_numbers[0].phone_number, "+15550000002");

    let second = queue.process_tick(now + Duration::minutes(2)).await.unwrap();
    assert_eq!(second.succeeded, 1);
    assert_eq!(harness.log.count("telephony.release"), 2);
    assert_eq!(harness.log.count("voice.import"), 2);
    assert_eq!(harness.telephony.owned_count(), 1);
    assert!(harness.store.retry_items().await[0].orphaned_numbers.is_empty());
}

mod common;

use chrono::Utc;
use common::{profile, Harness};
use line_provisioning::db::ProvisioningStore;
use line_provisioning::providers::VoiceAiProvider;
use line_provisioning::provisioning::{
    AssistantStatus, PhoneResourceStatus, ReleaseOutcome, RetryStatus,
};
use line_provisioning::ProvisioningError;
use uuid::Uuid;

// key: release-teardown-tests -> single releases and full cancellation

#[tokio::test]
async fn second_release_is_a_no_op() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();
    let outcome = harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Twice Released"))
        .await
        .unwrap();
    let resource_id = outcome.resources[0].id;

    let first = harness.service.release_resource(resource_id).await.unwrap();
    let second = harness.service.release_resource(resource_id).await.unwrap();

    assert_eq!(first, ReleaseOutcome::Released);
    assert_eq!(second, ReleaseOutcome::AlreadyReleased);
    assert_eq!(harness.log.count("voice.delete_number"), 1);
    assert_eq!(harness.log.count("telephony.release"), 1);
}

#[tokio::test]
async fn voice_platform_is_released_before_the_carrier() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();
    let outcome = harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Ordering"))
        .await
        .unwrap();
    let resource = outcome.resources[0].clone();

    harness.service.release_resource(resource.id).await.unwrap();

    let voice = harness
        .log
        .position(&format!("voice.delete_number:{}", resource.external_voice_id))
        .unwrap();
    let carrier = harness
        .log
        .position(&format!("telephony.release:{}", resource.external_carrier_id))
        .unwrap();
    assert!(voice < carrier);

    let stored = harness.store.phone_resource(resource.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PhoneResourceStatus::Released);
    assert!(stored.released_at.is_some());
}

#[tokio::test]
async fn carrier_failure_still_retires_the_ledger_row() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();
    let outcome = harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Carrier Down"))
        .await
        .unwrap();
    let resource_id = outcome.resources[0].id;
    harness.telephony.fail_next_releases(1);

    let err = harness.service.release_resource(resource_id).await.unwrap_err();
    assert!(matches!(
        err,
        ProvisioningError::CarrierReleaseFailed { resource_id: id, .. } if id == resource_id
    ));

    let stored = harness.store.phone_resource(resource_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PhoneResourceStatus::Released);

    // Retrying does not touch the voice platform again.
    let again = harness.service.release_resource(resource_id).await.unwrap();
    assert_eq!(again, ReleaseOutcome::AlreadyReleased);
    assert_eq!(harness.log.count("voice.delete_number"), 1);
}

#[tokio::test]
async fn voice_failure_leaves_the_row_active_for_retry() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();
    let outcome = harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Voice Down"))
        .await
        .unwrap();
    let resource_id = outcome.resources[0].id;
    harness.voice.fail_next_number_deletes(1);

    let err = harness.service.release_resource(resource_id).await.unwrap_err();
    assert!(matches!(err, ProvisioningError::Provider(_)));
    assert_eq!(harness.active(tenant_id).await.len(), 1);
    assert_eq!(harness.log.count("telephony.release"), 0);

    let retried = harness.service.release_resource(resource_id).await.unwrap();
    assert_eq!(retried, ReleaseOutcome::Released);
    assert!(harness.active(tenant_id).await.is_empty());
}

#[tokio::test]
async fn already_deleted_voice_number_counts_as_released() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();
    let outcome = harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Gone Already"))
        .await
        .unwrap();
    let resource = outcome.resources[0].clone();
    harness
        .voice
        .delete_phone_number(&resource.external_voice_id)
        .await
        .unwrap();

    let released = harness.service.release_resource(resource.id).await.unwrap();
    assert_eq!(released, ReleaseOutcome::Released);
    assert_eq!(harness.telephony.owned_count(), 0);
}

#[tokio::test]
async fn cancellation_releases_everything_and_tolerates_missing_assistant() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();
    harness
        .service
        .provision_tenant(tenant_id, "trio", &profile("Closing Down"))
        .await
        .unwrap();
    assert_eq!(harness.active(tenant_id).await.len(), 3);

    let assistant = harness
        .store
        .active_assistant(tenant_id)
        .await
        .unwrap()
        .unwrap();
    harness.voice.forget_assistant(&assistant.external_voice_id);

    let outcome = harness.service.cancel_tenant(tenant_id).await.unwrap();

    assert_eq!(outcome.released, 3);
    assert!(outcome.release_failures.is_empty());
    assert!(outcome.assistant_deleted);
    assert!(harness.active(tenant_id).await.is_empty());
    assert_eq!(harness.telephony.owned_count(), 0);

    let assistants = harness.store.assistants(tenant_id).await;
    assert_eq!(assistants.len(), 1);
    assert_eq!(assistants[0].status, AssistantStatus::Deleted);
    assert!(assistants[0].deleted_at.is_some());

    let tenant = harness.store.tenant(tenant_id).await.unwrap().unwrap();
    assert_eq!(tenant.subscription_status, "canceled");
}

#[tokio::test]
async fn cancellation_continues_past_a_failed_release() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();
    harness
        .service
        .provision_tenant(tenant_id, "trio", &profile("Partial Teardown"))
        .await
        .unwrap();
    harness.voice.fail_next_number_deletes(1);

    let outcome = harness.service.cancel_tenant(tenant_id).await.unwrap();

    assert_eq!(outcome.released, 2);
    assert_eq!(outcome.release_failures.len(), 1);
    assert_eq!(harness.active(tenant_id).await.len(), 1);
    assert!(outcome.assistant_deleted);
}

#[tokio::test]
async fn cancellation_closes_pending_retries() {
    let harness = Harness::new();
    harness.voice.fail_import_call(2);
    let tenant_id = Uuid::new_v4();
    harness
        .service
        .provision_tenant(tenant_id, "growth", &profile("Left Mid Retry"))
        .await
        .unwrap();
    assert_eq!(harness.store.retry_items().await.len(), 1);

    let outcome = harness.service.cancel_tenant(tenant_id).await.unwrap();
    assert_eq!(outcome.released, 1);

    let queue = harness.service.retry_queue();
    let summary = queue.process_tick(Utc::now()).await.unwrap();
    assert_eq!(summary.processed, 0);
    assert!(harness.active(tenant_id).await.is_empty());
    assert_eq!(harness.log.count("voice.create_assistant"), 1);
    assert_eq!(harness.log.count("telephony.purchase"), 2);

    let items = harness.store.retry_items().await;
    assert_eq!(items[0].status, RetryStatus::Failed);
    assert_eq!(items[0].last_error.as_deref(), Some("tenant canceled"));
    assert_eq!(items[0].orphaned_numbers.len(), 1);
    let exhausted = queue.exhausted_items().await.unwrap();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].id, items[0].id);
}

#[tokio::test]
async fn resubscribing_after_cancellation_is_active_again() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();
    harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Came Back"))
        .await
        .unwrap();
    harness.service.cancel_tenant(tenant_id).await.unwrap();

    let outcome = harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Came Back"))
        .await
        .unwrap();

    assert_eq!(outcome.provisioned, 1);
    assert_eq!(harness.active(tenant_id).await.len(), 1);
    let tenant = harness.store.tenant(tenant_id).await.unwrap().unwrap();
    assert_eq!(tenant.subscription_status, "active");
}

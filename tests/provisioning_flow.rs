mod common;

use common::{profile, Harness};
use line_provisioning::db::ProvisioningStore;
use line_provisioning::provisioning::{AssistantStatus, FailureStage, ResourceOrigin};
use line_provisioning::ProvisioningError;
use uuid::Uuid;

// key: provisioning-flow-tests -> first purchase through the orchestrator

#[tokio::test]
async fn single_number_plan_provisions_one_number_and_one_assistant() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();

    let outcome = harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Bright Smiles Dental"))
        .await
        .unwrap();

    assert_eq!(outcome.requested, 1);
    assert_eq!(outcome.provisioned, 1);
    assert!(outcome.failures.is_empty());

    let active = harness.active(tenant_id).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].origin, ResourceOrigin::Purchased);

    let assistants = harness.store.assistants(tenant_id).await;
    assert_eq!(assistants.len(), 1);
    assert_eq!(assistants[0].status, AssistantStatus::Active);
    assert_eq!(
        active[0].assigned_assistant_id.as_deref(),
        Some(assistants[0].external_voice_id.as_str())
    );

    let tenant = harness.store.tenant(tenant_id).await.unwrap().unwrap();
    assert_eq!(tenant.plan_id, "starter");
    assert_eq!(tenant.max_concurrent_sessions, 2);
    assert_eq!(tenant.subscription_status, "active");
}

#[tokio::test]
async fn failure_free_pass_matches_plan_quota() {
    let harness = Harness::new();
    for (plan_id, expected) in [("starter", 1), ("growth", 2), ("scale", 5), ("trio", 3)] {
        let tenant_id = Uuid::new_v4();
        let outcome = harness
            .service
            .provision_tenant(tenant_id, plan_id, &profile("Quota Check"))
            .await
            .unwrap();
        assert!(outcome.is_complete(), "{plan_id} pass had failures");
        assert_eq!(harness.active(tenant_id).await.len(), expected, "{plan_id}");
    }
}

#[tokio::test]
async fn import_failure_keeps_the_rest_of_the_batch() {
    let harness = Harness::new();
    harness.voice.fail_import_call(2);
    let tenant_id = Uuid::new_v4();

    let outcome = harness
        .service
        .provision_tenant(tenant_id, "growth", &profile("Two Lines LLC"))
        .await
        .unwrap();

    assert_eq!(outcome.requested, 2);
    assert_eq!(outcome.provisioned, 1);
    assert_eq!(outcome.failures.len(), 1);
    let failure = &outcome.failures[0];
    assert_eq!(failure.stage, FailureStage::Import);
    assert!(failure.retryable);
    assert_eq!(failure.phone_number.as_deref(), Some("+15550000002"));
    assert!(failure.error.contains("timed out"));

    assert_eq!(harness.store.all_phone_resources(tenant_id).await.len(), 1);
    assert_eq!(harness.log.count("telephony.purchase"), 2);
    assert_eq!(harness.log.count("telephony.release"), 0);

    let orphaned = outcome.orphaned_numbers();
    assert_eq!(orphaned.len(), 1);
    assert_eq!(orphaned[0].phone_number, "+15550000002");
}

#[tokio::test]
async fn missing_credentials_abort_before_any_purchase() {
    let harness = Harness::new();
    harness.telephony.set_missing_credentials(true);
    let tenant_id = Uuid::new_v4();

    let err = harness
        .service
        .provision_tenant(tenant_id, "growth", &profile("No Keys Inc"))
        .await
        .unwrap_err();

    match err {
        ProvisioningError::MissingCredentials(keys) => {
            assert!(keys.contains(&"TELEPHONY_ACCOUNT_SID"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(harness.log.count("telephony.search"), 0);
    assert_eq!(harness.log.count("telephony.purchase"), 0);
    assert_eq!(harness.log.count("voice.create_assistant"), 0);
    assert!(harness.store.retry_items().await.is_empty());
}

#[tokio::test]
async fn existing_assistant_is_reused() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();
    let details = profile("Repeat Customer");

    harness
        .service
        .provision_tenant(tenant_id, "starter", &details)
        .await
        .unwrap();
    harness
        .service
        .orchestrator()
        .provision_count(tenant_id, "growth", &details, 1, &[])
        .await
        .unwrap();

    assert_eq!(harness.log.count("voice.create_assistant"), 1);
    assert_eq!(harness.store.assistants(tenant_id).await.len(), 1);
    assert_eq!(harness.active(tenant_id).await.len(), 2);
}

#[tokio::test]
async fn malformed_assistant_id_is_rejected_before_purchase() {
    let harness = Harness::new();
    harness.voice.set_malformed_assistant_ids(true);
    let tenant_id = Uuid::new_v4();

    let err = harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Bad Ids"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisioningError::InvalidExternalId(ref id) if id == "assistant-pending"));
    assert!(harness.store.assistants(tenant_id).await.is_empty());
    assert_eq!(harness.log.count("telephony.purchase"), 0);
    assert_eq!(
        harness.log.count("voice.delete_assistant:assistant-pending"),
        1
    );
    assert!(harness.store.retry_items().await.is_empty());
}

#[tokio::test]
async fn each_number_is_routed_then_imported_then_assigned() {
    let harness = Harness::new();
    let tenant_id = Uuid::new_v4();

    let outcome = harness
        .service
        .provision_tenant(tenant_id, "starter", &profile("Ordered Calls"))
        .await
        .unwrap();
    let resource = &outcome.resources[0];

    let route = harness
        .log
        .position(&format!(
            "telephony.route:{}:AP-simulated",
            resource.external_carrier_id
        ))
        .unwrap();
    let import = harness
        .log
        .position(&format!("voice.import:{}", resource.phone_number))
        .unwrap();
    let assign = harness
        .log
        .position(&format!(
            "voice.assign:{}:{}",
            resource.external_voice_id,
            resource.assigned_assistant_id.as_deref().unwrap()
        ))
        .unwrap();
    assert!(route < import);
    assert!(import < assign);
}

#[tokio::test]
async fn empty_carrier_search_fails_the_pass_and_queues_a_retry() {
    let harness = Harness::new();
    harness.telephony.set_inventory(0);
    let tenant_id = Uuid::new_v4();

    let err = harness
        .service
        .provision_tenant(tenant_id, "growth", &profile("Sold Out"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisioningError::NoCandidates { .. }));
    let items = harness.store.retry_items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].requested_count, 2);
    assert_eq!(items[0].attempts, 1);
}

//! Integration tests for labvm-orchestrator
//!
//! Tests the full approval workflow against the mock control plane:
//! fan-out, partial failures, name collisions, TTL reaping, and the
//! concurrency guards around approval.

use std::sync::Arc;

use labvm_orchestrator::test_utils::create_test_db;
use labvm_orchestrator::{
    reaper, FleetConfig, FleetOrchestrator, FleetStore, OrchestratorError, SubmitRequest,
};
use labvm_provider::mock::{MockCloudProvider, ResourceKind};
use labvm_provider::{CloudProvider, ProfileRegistry};

const COURSE: &str = "CS101";
const PROFILE: &str = "windows-basic";

async fn setup(ttl_secs: i64) -> (FleetOrchestrator, Arc<MockCloudProvider>, FleetStore) {
    let pool = create_test_db().await;
    let store = FleetStore::new(pool);
    let provider = Arc::new(MockCloudProvider::new());

    let orchestrator = FleetOrchestrator::new(
        store.clone(),
        Arc::clone(&provider) as Arc<dyn CloudProvider>,
        Arc::new(ProfileRegistry::builtin()),
        FleetConfig {
            location: "southeastasia".to_string(),
            ttl_secs,
            max_concurrency: 2,
        },
    );

    (orchestrator, provider, store)
}

/// Submit a request and enroll the given students.
async fn seed_request(store: &FleetStore, profile: &str, students: &[&str]) -> i64 {
    for email in students {
        store
            .add_roster_entry(COURSE, email)
            .await
            .expect("Failed to add roster entry");
    }

    store
        .submit_request(SubmitRequest {
            submitter_email: "instructor@x.com".to_string(),
            course_name: COURSE.to_string(),
            vm_profile: profile.to_string(),
        })
        .await
        .expect("Failed to submit request")
        .id
}

#[tokio::test]
async fn test_approve_provisions_full_fleet() {
    let (orchestrator, provider, store) = setup(3600).await;
    let request_id = seed_request(
        &store,
        PROFILE,
        &[
            "std2024101@x.com",
            "std2024102@x.com",
            "std2024103@x.com",
        ],
    )
    .await;

    let outcome = orchestrator
        .approve(request_id)
        .await
        .expect("Approval should succeed");

    assert_eq!(outcome.created.len(), 3);
    assert!(outcome.failures.is_empty());
    assert!(!outcome.is_partial());

    // One machine and one full network stack per member
    assert_eq!(provider.live_count(ResourceKind::Machine), 3);
    assert_eq!(provider.live_count(ResourceKind::VirtualNetwork), 3);
    assert_eq!(provider.live_count(ResourceKind::Interface), 3);

    // Records carry the derived identity and the allocated address
    let vms = store
        .list_provisioned_vms("std2024101@x.com")
        .await
        .expect("Failed to list VMs");
    assert_eq!(vms.len(), 1);
    let vm = &vms[0];
    assert_eq!(vm.vm_name, "CS101-101");
    assert_eq!(vm.username, "2024101");
    assert!(vm.password.starts_with("101@"));
    assert!(vm.ip_address.starts_with("20.10.0."));
    assert!(vm.expires_at > vm.created_at);
    assert_eq!(vm.connect_string(), format!("mstsc /v:{}", vm.ip_address));

    // Approval flag was committed
    let request = store
        .get_request(request_id)
        .await
        .expect("Failed to get request")
        .expect("Request should exist");
    assert!(request.is_approved);
}

#[tokio::test]
async fn test_second_approval_is_rejected_without_second_fleet() {
    let (orchestrator, provider, store) = setup(3600).await;
    let request_id = seed_request(&store, PROFILE, &["std2024101@x.com", "std2024102@x.com"]).await;

    orchestrator
        .approve(request_id)
        .await
        .expect("First approval should succeed");

    let err = orchestrator
        .approve(request_id)
        .await
        .expect_err("Second approval must fail");
    assert!(matches!(err, OrchestratorError::RequestNotActionable(_)));

    // Still exactly one record per original roster member, one fleet total
    assert_eq!(provider.live_count(ResourceKind::Machine), 2);
    for email in ["std2024101@x.com", "std2024102@x.com"] {
        let vms = store
            .list_provisioned_vms(email)
            .await
            .expect("Failed to list VMs");
        assert_eq!(vms.len(), 1, "exactly one VM for {}", email);
    }
}

#[tokio::test]
async fn test_empty_roster_leaves_request_unapproved() {
    let (orchestrator, provider, store) = setup(3600).await;
    let request_id = seed_request(&store, PROFILE, &[]).await;

    let err = orchestrator
        .approve(request_id)
        .await
        .expect_err("Empty roster must fail");
    assert!(matches!(err, OrchestratorError::EmptyRoster(_)));
    assert_eq!(provider.live_count(ResourceKind::Machine), 0);

    let request = store
        .get_request(request_id)
        .await
        .expect("Failed to get request")
        .expect("Request should exist");
    assert!(!request.is_approved, "request must stay retryable");

    // Once the roster is populated the same request can be approved
    store
        .add_roster_entry(COURSE, "std2024101@x.com")
        .await
        .expect("Failed to add roster entry");
    let outcome = orchestrator
        .approve(request_id)
        .await
        .expect("Retry after roster fill should succeed");
    assert_eq!(outcome.created.len(), 1);
}

#[tokio::test]
async fn test_unknown_profile_rejected_before_any_state_change() {
    let (orchestrator, provider, store) = setup(3600).await;
    let request_id = seed_request(&store, "no-such-profile", &["std2024101@x.com"]).await;

    let err = orchestrator
        .approve(request_id)
        .await
        .expect_err("Unknown profile must fail");
    assert!(matches!(err, OrchestratorError::Validation(_)));

    // No cloud call was made and the request was not burned
    assert_eq!(provider.created_names(ResourceKind::VirtualNetwork).len(), 0);
    let request = store
        .get_request(request_id)
        .await
        .expect("Failed to get request")
        .expect("Request should exist");
    assert!(!request.is_approved);
}

#[tokio::test]
async fn test_partial_failure_keeps_siblings_and_rolls_back_failed_member() {
    let (orchestrator, provider, store) = setup(3600).await;
    let request_id = seed_request(
        &store,
        PROFILE,
        &[
            "std2024101@x.com",
            "std2024102@x.com",
            "std2024103@x.com",
        ],
    )
    .await;

    // Simulate a compute failure for the second member only
    provider.fail_create(ResourceKind::Machine, "CS101-102");

    let outcome = orchestrator
        .approve(request_id)
        .await
        .expect("Partial success is not fatal");

    assert_eq!(outcome.created.len(), 2);
    assert_eq!(outcome.failures.len(), 1);
    assert!(outcome.is_partial());
    assert_eq!(outcome.failures[0].student_email, "std2024102@x.com");

    // The failed member's partial network stack was rolled back
    assert!(!provider.is_live(ResourceKind::VirtualNetwork, "CS101-102-vnet"));
    assert!(!provider.is_live(ResourceKind::PublicAddress, "CS101-102-ip"));
    assert!(!provider.is_live(ResourceKind::SecurityPolicy, "CS101-102-nsg"));
    assert!(!provider.is_live(ResourceKind::Interface, "CS101-102-nic"));

    // Siblings were persisted and remain live
    assert_eq!(provider.live_count(ResourceKind::Machine), 2);
    assert!(store
        .get_provisioned_vm("CS101-101")
        .await
        .expect("Failed to get VM")
        .is_some());
    assert!(store
        .get_provisioned_vm("CS101-103")
        .await
        .expect("Failed to get VM")
        .is_some());
    assert!(store
        .get_provisioned_vm("CS101-102")
        .await
        .expect("Failed to get VM")
        .is_none());
}

#[tokio::test]
async fn test_all_members_failing_fails_the_fleet() {
    let (orchestrator, provider, store) = setup(3600).await;
    let request_id = seed_request(&store, PROFILE, &["std2024101@x.com"]).await;

    provider.fail_create(ResourceKind::Machine, "CS101-101");

    let err = orchestrator
        .approve(request_id)
        .await
        .expect_err("All-failed fleet must fail");
    assert!(matches!(err, OrchestratorError::FleetProvisioningFailed(1)));
}

#[tokio::test]
async fn test_duplicate_trailing_digits_surface_as_conflict() {
    let (orchestrator, _provider, store) = setup(3600).await;
    // Both emails end in 101, so both derive CS101-101
    let request_id = seed_request(
        &store,
        PROFILE,
        &["aaa2020101@x.com", "bbb2024101@x.com", "std2024103@x.com"],
    )
    .await;

    let outcome = orchestrator
        .approve(request_id)
        .await
        .expect("Conflict must not abort siblings");

    assert_eq!(outcome.created.len(), 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].vm_name, "CS101-101");
    assert!(outcome.failures[0].error.contains("already in use"));
}

#[tokio::test]
async fn test_reaper_tears_down_expired_vms() {
    // Negative TTL: every VM is already expired when provisioned
    let (orchestrator, provider, store) = setup(-3600).await;
    let request_id = seed_request(&store, PROFILE, &["std2024101@x.com", "std2024102@x.com"]).await;

    orchestrator
        .approve(request_id)
        .await
        .expect("Approval should succeed");
    assert_eq!(provider.live_count(ResourceKind::Machine), 2);

    reaper::sweep_expired(&store, provider.as_ref())
        .await
        .expect("Sweep should succeed");

    assert_eq!(provider.live_count(ResourceKind::Machine), 0);
    assert_eq!(provider.live_count(ResourceKind::VirtualNetwork), 0);
    assert!(store
        .get_provisioned_vm("CS101-101")
        .await
        .expect("Failed to get VM")
        .is_none());

    // A second sweep over the already-reaped fleet is a no-op
    reaper::sweep_expired(&store, provider.as_ref())
        .await
        .expect("Re-entrant sweep must be a no-op");
}

#[tokio::test]
async fn test_reaping_an_already_removed_vm_is_a_noop() {
    let (_orchestrator, provider, store) = setup(3600).await;

    reaper::reap_vm(&store, provider.as_ref(), "CS101-999")
        .await
        .expect("Reaping a nonexistent VM must succeed");
    reaper::reap_vm(&store, provider.as_ref(), "CS101-999")
        .await
        .expect("And stay idempotent");
}

#[tokio::test]
async fn test_cancel_removes_vm_and_pending_reap() {
    let (orchestrator, provider, store) = setup(3600).await;
    let request_id = seed_request(&store, PROFILE, &["std2024101@x.com"]).await;

    orchestrator
        .approve(request_id)
        .await
        .expect("Approval should succeed");
    assert!(provider.is_live(ResourceKind::Machine, "CS101-101"));

    orchestrator
        .cancel_vm("CS101-101")
        .await
        .expect("Cancel should succeed");

    assert!(!provider.is_live(ResourceKind::Machine, "CS101-101"));
    assert!(!provider.is_live(ResourceKind::VirtualNetwork, "CS101-101-vnet"));
    assert!(store
        .get_provisioned_vm("CS101-101")
        .await
        .expect("Failed to get VM")
        .is_none());

    // The sweep has nothing left to act on for this VM
    reaper::sweep_expired(&store, provider.as_ref())
        .await
        .expect("Sweep after cancel should succeed");
}

#[tokio::test]
async fn test_failed_reaps_are_bounded_then_escalated() {
    let (orchestrator, provider, store) = setup(-3600).await;
    let request_id = seed_request(&store, PROFILE, &["std2024101@x.com"]).await;

    orchestrator
        .approve(request_id)
        .await
        .expect("Approval should succeed");

    // Make every machine delete fail so each sweep burns one attempt
    for _ in 0..labvm_orchestrator::MAX_REAP_ATTEMPTS {
        provider.fail_delete(ResourceKind::Machine, "CS101-101");
        reaper::sweep_expired(&store, provider.as_ref())
            .await
            .expect("Sweep itself should not error");
    }

    // Attempts exhausted: the row is excluded from future sweeps but kept
    // for the operator
    let vm = store
        .get_provisioned_vm("CS101-101")
        .await
        .expect("Failed to get VM")
        .expect("Record must be kept for escalation");
    assert_eq!(vm.reap_attempts, labvm_orchestrator::MAX_REAP_ATTEMPTS);

    reaper::sweep_expired(&store, provider.as_ref())
        .await
        .expect("Sweep should skip escalated rows");
    assert!(provider.is_live(ResourceKind::Machine, "CS101-101"));
}

#[tokio::test]
async fn test_concurrent_approvals_provision_exactly_one_fleet() {
    let (orchestrator, provider, store) = setup(3600).await;
    let request_id = seed_request(&store, PROFILE, &["std2024101@x.com", "std2024102@x.com"]).await;

    let a = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.approve(request_id).await }
    });
    let b = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.approve(request_id).await }
    });

    let results = [
        a.await.expect("Task should not panic"),
        b.await.expect("Task should not panic"),
    ];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one approval may win the CAS");

    assert_eq!(provider.live_count(ResourceKind::Machine), 2);
    for email in ["std2024101@x.com", "std2024102@x.com"] {
        let vms = store
            .list_provisioned_vms(email)
            .await
            .expect("Failed to list VMs");
        assert_eq!(vms.len(), 1);
    }
}

#[tokio::test]
async fn test_losing_fleet_never_tears_down_the_winning_record() {
    // Two pending requests for the same course (different submitters) are
    // legal; approving both concurrently races two pipelines onto the same
    // derived names. Whatever record wins the name must keep its resources.
    for _ in 0..5 {
        let (orchestrator, provider, store) = setup(3600).await;
        store
            .add_roster_entry(COURSE, "std2024101@x.com")
            .await
            .expect("Failed to add roster entry");

        let mut ids = Vec::new();
        for submitter in ["instructor@x.com", "assistant@x.com"] {
            let id = store
                .submit_request(SubmitRequest {
                    submitter_email: submitter.to_string(),
                    course_name: COURSE.to_string(),
                    vm_profile: PROFILE.to_string(),
                })
                .await
                .expect("Failed to submit request")
                .id;
            ids.push(id);
        }

        let a = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let id = ids[0];
            async move { orchestrator.approve(id).await }
        });
        let b = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let id = ids[1];
            async move { orchestrator.approve(id).await }
        });
        let _ = a.await.expect("Task should not panic");
        let _ = b.await.expect("Task should not panic");

        // Exactly one record owns the name, and the cloud resources it
        // references are still live
        store
            .get_provisioned_vm("CS101-101")
            .await
            .expect("Failed to get VM")
            .expect("One fleet must own the record");
        assert!(
            provider.is_live(ResourceKind::Machine, "CS101-101"),
            "record survives but its machine is gone"
        );
        assert!(
            provider.is_live(ResourceKind::VirtualNetwork, "CS101-101-vnet"),
            "record survives but its network is gone"
        );
        assert!(provider.is_live(ResourceKind::Interface, "CS101-101-nic"));
        assert!(provider.is_live(ResourceKind::PublicAddress, "CS101-101-ip"));
    }
}

#[tokio::test]
async fn test_storage_error_during_fan_out_checks_creates_nothing() {
    let (orchestrator, provider, store) = setup(3600).await;
    let request_id = seed_request(&store, PROFILE, &["std2024101@x.com", "std2024102@x.com"]).await;

    // Break the table the collision pre-check reads
    sqlx::query("ALTER TABLE provisioned_vms RENAME TO provisioned_vms_gone")
        .execute(store.pool())
        .await
        .expect("Failed to rename table");

    let err = orchestrator
        .approve(request_id)
        .await
        .expect_err("Storage error must surface");
    assert!(matches!(err, OrchestratorError::Database(_)));

    // No pipeline was started, so nothing exists in the cloud without a
    // record to reap it by
    assert_eq!(provider.created_names(ResourceKind::VirtualNetwork).len(), 0);
    assert_eq!(provider.created_names(ResourceKind::Machine).len(), 0);
}

#[tokio::test]
async fn test_duplicate_pending_request_is_rejected() {
    let (_orchestrator, _provider, store) = setup(3600).await;

    let submit = SubmitRequest {
        submitter_email: "std2024101@x.com".to_string(),
        course_name: COURSE.to_string(),
        vm_profile: PROFILE.to_string(),
    };

    store
        .submit_request(submit.clone())
        .await
        .expect("First submission should succeed");

    let err = store
        .submit_request(submit)
        .await
        .expect_err("Second pending submission must fail");
    assert!(matches!(err, OrchestratorError::DuplicateRequest { .. }));
}

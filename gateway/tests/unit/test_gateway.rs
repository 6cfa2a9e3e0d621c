//! Gateway operation tests that do not spawn deploy scripts

use opsgate::audit::{AuditOutcome, AuditQuery};
use opsgate::authn::{Identity, Role};
use opsgate::directory::DirectorySnapshot;
use opsgate::errors::ErrorKind;
use opsgate::supervisor::ProcessStatus;

use crate::common::{fast_settings, fixture, service, snapshot, user};

#[tokio::test]
async fn test_team_lists_only_assigned_services() {
    let f = fixture(snapshot(None), fast_settings());

    let alice = f.gateway.list_services(&Identity::team("alice")).await.unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].id, "api");
    assert_eq!(alice[0].status, Some(ProcessStatus::Online));

    let bob = f.gateway.list_services(&Identity::team("bob")).await.unwrap();
    assert!(bob.is_empty());

    let root = f.gateway.list_services(&Identity::admin("root")).await.unwrap();
    let ids: Vec<_> = root.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["api", "web"]);
}

#[tokio::test]
async fn test_list_services_survives_supervisor_outage() {
    let f = fixture(snapshot(None), fast_settings());
    f.supervisor.set_down(true);

    let services = f.gateway.list_services(&Identity::admin("root")).await.unwrap();
    assert_eq!(services.len(), 2);
    assert!(services.iter().all(|s| s.status.is_none()));
}

#[tokio::test]
async fn test_restart_calls_supervisor_and_audits_once() {
    let f = fixture(snapshot(None), fast_settings());

    f.gateway.restart(&Identity::team("alice"), "api").await.unwrap();
    assert_eq!(f.supervisor.restarted(), vec![3]);

    let entries = f.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].actor_id, "alice");
    assert_eq!(entries[0].action, "restart api");
    assert_eq!(entries[0].details.outcome, AuditOutcome::Succeeded);
}

#[tokio::test]
async fn test_restart_supervisor_down() {
    let f = fixture(snapshot(None), fast_settings());
    f.supervisor.set_down(true);

    let err = f.gateway.restart(&Identity::admin("root"), "web").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SupervisorUnavailable);
    // One call plus exactly one retry
    assert_eq!(f.supervisor.calls(), 2);

    let entries = f.audit.entries();
    assert_eq!(entries.len(), 1);
    assert!(matches!(entries[0].details.outcome, AuditOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_restart_of_missing_process_fails() {
    let mut snap = snapshot(None);
    snap.services.push(service("ghost-proc", 9, None, &[]));
    let f = fixture(snap, fast_settings());

    let err = f.gateway.restart(&Identity::admin("root"), "ghost-proc").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SupervisorUnavailable);
    // Not transient, so no retry
    assert_eq!(f.supervisor.calls(), 1);

    let entries = f.audit.entries();
    assert_eq!(entries.len(), 1);
    assert!(matches!(entries[0].details.outcome, AuditOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_forbidden_has_no_side_effects() {
    let f = fixture(snapshot(None), fast_settings());
    let bob = Identity::team("bob");

    let err = f.gateway.restart(&bob, "api").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    let err = f.gateway.get_logs(&bob, "api", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    let err = f.gateway.deploy(&bob, "api").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    assert_eq!(f.supervisor.calls(), 0);
    assert!(f.audit.is_empty());
    assert_eq!(f.gateway.runner().retained(), 0);
}

#[tokio::test]
async fn test_unknown_service_is_not_found_for_everyone() {
    let f = fixture(snapshot(None), fast_settings());

    for identity in [Identity::admin("root"), Identity::team("alice")] {
        let err = f.gateway.restart(&identity, "ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = f.gateway.deploy(&identity, "ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert!(f.audit.is_empty());
}

#[tokio::test]
async fn test_get_logs_clamps_line_count() {
    let f = fixture(snapshot(None), fast_settings());
    let alice = Identity::team("alice");

    assert_eq!(f.gateway.get_logs(&alice, "api", None).await.unwrap().len(), 100);
    assert_eq!(f.gateway.get_logs(&alice, "api", Some(0)).await.unwrap().len(), 1);
    assert_eq!(f.gateway.get_logs(&alice, "api", Some(5)).await.unwrap().len(), 5);
    assert_eq!(f.gateway.get_logs(&alice, "api", Some(50_000)).await.unwrap().len(), 1000);

    // Reads are not audited
    assert!(f.audit.is_empty());
}

#[tokio::test]
async fn test_deploy_without_script_is_rejected_and_audited() {
    let f = fixture(snapshot(None), fast_settings());

    let err = f.gateway.deploy(&Identity::admin("root"), "web").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeployNotConfigured);

    let entries = f.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "deploy web");
    assert!(matches!(entries[0].details.outcome, AuditOutcome::Rejected { .. }));
    assert_eq!(f.gateway.runner().retained(), 0);
}

#[tokio::test]
async fn test_diverged_assignment_is_denied() {
    // The service lists carol but carol's record does not list the service
    let snapshot = DirectorySnapshot {
        services: vec![service("api", 3, None, &["carol"])],
        users: vec![user("carol", Role::Team, &[])],
    };
    let f = fixture(snapshot, fast_settings());
    let carol = Identity::team("carol");

    let err = f.gateway.restart(&carol, "api").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(f.gateway.list_services(&carol).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_revoked_assignment_applies_immediately() {
    let f = fixture(snapshot(None), fast_settings());
    let alice = Identity::team("alice");
    f.gateway.restart(&alice, "api").await.unwrap();

    let mut revoked = snapshot(None);
    revoked.services[0].assigned_user_ids.clear();
    revoked.users[1].assigned_service_ids.clear();
    f.repo.replace(revoked).unwrap();

    let err = f.gateway.restart(&alice, "api").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_admin_only_operations() {
    let f = fixture(snapshot(None), fast_settings());
    let alice = Identity::team("alice");
    let root = Identity::admin("root");

    let err = f.gateway.list_processes(&alice).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    let err = f.gateway.audit_log(&alice, AuditQuery::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    assert_eq!(f.gateway.list_processes(&root).await.unwrap().len(), 2);

    f.gateway.restart(&root, "api").await.unwrap();
    f.gateway.restart(&root, "web").await.unwrap();
    let page = f.gateway.audit_log(&root, AuditQuery::new(Some(1), Some(1))).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].action, "restart web");
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let f = fixture(snapshot(None), fast_settings());
    let err = f
        .gateway
        .deploy_status(&Identity::admin("root"), uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = f
        .gateway
        .cancel_deploy(&Identity::admin("root"), uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

//! Deploy jobs against real child processes

#![cfg(unix)]

use std::time::{Duration, Instant};

use opsgate::audit::AuditOutcome;
use opsgate::authn::Identity;
use opsgate::deploy::{DeployError, DeployRunner, FailureReason, JobState, RunnerSettings};
use opsgate::errors::ErrorKind;

use crate::common::{fast_settings, fixture, service, snapshot, wait_for_audit, write_script};

#[tokio::test]
async fn test_deploy_success_is_judged_after_exit() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "deploy.sh", "sleep 0.2\necho deployed\nexit 0");
    let f = fixture(snapshot(Some(script)), fast_settings());
    let alice = Identity::team("alice");

    let mut handle = f.gateway.deploy(&alice, "api").await.unwrap();
    let queued = handle.snapshot();
    assert!(queued.state == JobState::Queued || queued.state == JobState::Running);
    assert_eq!(queued.exit_code, None);

    let job = handle.wait_terminal().await;
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.exit_code, Some(0));
    assert!(job.stdout_tail.contains("deployed"));
    assert!(job.finished_at.is_some());

    let status = f.gateway.deploy_status(&alice, job.job_id).await.unwrap();
    assert_eq!(status.state, JobState::Succeeded);

    let entries = wait_for_audit(&f.audit, 2).await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].action, "deploy api");
    assert_eq!(entries[0].details.outcome, AuditOutcome::Accepted);
    assert_eq!(entries[0].details.job_id, Some(job.job_id));
    assert_eq!(entries[1].action, "deploy-result api");
    assert_eq!(entries[1].details.outcome, AuditOutcome::Succeeded);
}

#[tokio::test]
async fn test_deploy_nonzero_exit_fails_with_code() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "deploy.sh", "echo boom >&2\nexit 1");
    let f = fixture(snapshot(Some(script)), fast_settings());

    let mut handle = f.gateway.deploy(&Identity::admin("root"), "api").await.unwrap();
    let job = handle.wait_terminal().await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.exit_code, Some(1));
    assert_eq!(job.failure, Some(FailureReason::NonZeroExit));
    assert!(job.stderr_tail.contains("boom"));

    let err = job.outcome().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeployFailed);

    let entries = wait_for_audit(&f.audit, 2).await;
    assert!(matches!(entries[1].details.outcome, AuditOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_deploy_runs_in_script_directory() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "deploy.sh", "pwd");
    let f = fixture(snapshot(Some(script)), fast_settings());

    let job = f.gateway.deploy(&Identity::admin("root"), "api").await.unwrap().wait_terminal().await;
    assert_eq!(job.state, JobState::Succeeded);

    let expected = dir.path().canonicalize().unwrap();
    let actual = std::path::PathBuf::from(job.stdout_tail.trim()).canonicalize().unwrap();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_missing_script_is_a_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("not-there.sh");
    let f = fixture(snapshot(Some(script)), fast_settings());

    let job = f.gateway.deploy(&Identity::admin("root"), "api").await.unwrap().wait_terminal().await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.exit_code, None);
    assert!(matches!(job.failure, Some(FailureReason::Spawn { .. })));

    // The slot is free again
    assert_eq!(f.gateway.runner().active_job("api"), None);
}

#[tokio::test]
async fn test_timeout_kills_the_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("child.pid");
    let script = write_script(
        dir.path(),
        "deploy.sh",
        &format!("sleep 30 &\necho $! > {}\nwait", pid_file.display()),
    );
    let settings = RunnerSettings {
        timeout: Duration::from_millis(500),
        ..fast_settings()
    };
    let f = fixture(snapshot(Some(script)), settings);

    let started = Instant::now();
    let job = f.gateway.deploy(&Identity::admin("root"), "api").await.unwrap().wait_terminal().await;

    assert_eq!(job.state, JobState::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(job.outcome(), Some(Err(DeployError::TimedOut { .. }))));

    let entries = wait_for_audit(&f.audit, 2).await;
    assert_eq!(entries[1].details.outcome, AuditOutcome::TimedOut);

    #[cfg(target_os = "linux")]
    {
        let pid: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        assert!(wait_until_gone(pid).await, "background child {} survived", pid);
    }
}

/// A pid counts as gone once it no longer exists or is a zombie
#[cfg(target_os = "linux")]
async fn wait_until_gone(pid: u32) -> bool {
    for _ in 0..100 {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => return true,
            Ok(stat) => {
                let state = stat.rsplit(") ").next().and_then(|rest| rest.chars().next());
                if state == Some('Z') {
                    return true;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_second_deploy_is_rejected_until_first_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "deploy.sh", "sleep 30");
    let f = fixture(snapshot(Some(script)), fast_settings());
    let root = Identity::admin("root");

    let first = f.gateway.deploy(&root, "api").await.unwrap();
    let err = f.gateway.deploy(&Identity::team("alice"), "api").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeployAlreadyRunning);

    let cancelled = f.gateway.cancel_deploy(&root, first.job_id).await.unwrap();
    assert_eq!(cancelled.state, JobState::Failed);
    assert_eq!(cancelled.failure, Some(FailureReason::Cancelled));

    // Accepted, rejected, cancel request, outcome
    let entries = wait_for_audit(&f.audit, 4).await;
    let mut actions: Vec<_> = entries.iter().map(|e| e.action.as_str()).collect();
    actions[2..].sort();
    assert_eq!(actions, ["deploy api", "deploy api", "cancel-deploy api", "deploy-result api"]);
    assert!(matches!(entries[1].details.outcome, AuditOutcome::Rejected { .. }));

    let again = f.gateway.deploy(&root, "api").await.unwrap();
    assert_ne!(again.job_id, first.job_id);
    f.gateway.cancel_deploy(&root, again.job_id).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_deploys_admit_exactly_one() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "deploy.sh", "sleep 30");
    let f = fixture(snapshot(Some(script)), fast_settings());

    let attempts = (0..8).map(|_| {
        let gateway = f.gateway.clone();
        tokio::spawn(async move { gateway.deploy(&Identity::admin("root"), "api").await })
    });
    let results = futures::future::join_all(attempts).await;

    let accepted: Vec<_> = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter_map(|r| match r {
            Ok(handle) => Some(handle),
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::DeployAlreadyRunning);
                None
            }
        })
        .collect();
    assert_eq!(accepted.len(), 1);

    f.gateway.runner().shutdown(Duration::from_secs(5)).await;
    assert!(accepted[0].snapshot().is_terminal());
}

#[tokio::test]
async fn test_status_is_authorized_per_service() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "deploy.sh", "exit 0");
    let f = fixture(snapshot(Some(script)), fast_settings());

    let mut handle = f.gateway.deploy(&Identity::team("alice"), "api").await.unwrap();
    handle.wait_terminal().await;

    let err = f
        .gateway
        .deploy_status(&Identity::team("bob"), handle.job_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(f.gateway.deploy_status(&Identity::admin("root"), handle.job_id).await.is_ok());
}

#[tokio::test]
async fn test_output_is_capped_with_marker() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "deploy.sh",
        "i=0\nwhile [ $i -lt 200 ]; do echo line-$i; i=$((i+1)); done",
    );
    let settings = RunnerSettings {
        output_cap_bytes: 64,
        ..fast_settings()
    };
    let f = fixture(snapshot(Some(script)), settings);

    let job = f.gateway.deploy(&Identity::admin("root"), "api").await.unwrap().wait_terminal().await;
    assert_eq!(job.state, JobState::Succeeded);
    assert!(job.stdout_truncated);
    assert!(job.stdout_tail.starts_with("[... "));
    assert!(job.stdout_tail.contains("line-199"));
    assert!(!job.stdout_tail.contains("line-0\n"));
    assert!(!job.stderr_truncated);
}

#[tokio::test]
async fn test_runner_retention() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "deploy.sh", "exit 0");
    let api = service("api", 3, Some(script), &[]);

    let runner = DeployRunner::new(
        RunnerSettings {
            history_per_service: 2,
            retention: Duration::from_millis(100),
            ..fast_settings()
        },
        None,
    );

    let mut ids = Vec::new();
    for _ in 0..3 {
        let mut handle = runner.start_deploy(&api, "root").unwrap();
        handle.wait_terminal().await;
        ids.push(handle.job_id);
    }

    // Only the newest two survive the per-service cap
    assert!(runner.get_status(ids[0]).is_none());
    assert!(runner.get_status(ids[1]).is_some());
    assert!(runner.get_status(ids[2]).is_some());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(runner.prune_expired(), 2);
    assert_eq!(runner.retained(), 0);
}

#[tokio::test]
async fn test_shutdown_cancels_and_refuses() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "deploy.sh", "sleep 30");
    let api = service("api", 3, Some(script), &[]);
    let runner = DeployRunner::new(fast_settings(), None);

    let handle = runner.start_deploy(&api, "root").unwrap();
    runner.shutdown(Duration::from_secs(5)).await;

    let job = handle.snapshot();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure, Some(FailureReason::Cancelled));
    assert_eq!(runner.start_deploy(&api, "root").unwrap_err(), DeployError::ShuttingDown);
}

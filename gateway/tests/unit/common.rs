//! Shared fixtures

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use opsgate::audit::{AuditEntry, Auditor, MemoryAuditSink};
use opsgate::authn::Role;
use opsgate::deploy::RunnerSettings;
use opsgate::directory::{DirectorySnapshot, SnapshotRepository};
use opsgate::gateway::Gateway;
use opsgate::models::{Service, User};
use opsgate::supervisor::{
    LogLine, LogStream, ProcessInfo, ProcessStatus, ProcessSupervisor, SupervisorClient,
    SupervisorError, SupervisorOptions,
};

/// In-process stand-in for PM2
pub struct FakeSupervisor {
    pub processes: Vec<ProcessInfo>,
    pub restarts: Mutex<Vec<u32>>,
    pub calls: AtomicUsize,
    pub down: AtomicBool,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self {
            processes: vec![
                ProcessInfo {
                    supervisor_id: 3,
                    name: "api".to_string(),
                    status: ProcessStatus::Online,
                    pid: Some(4242),
                    restarts: 0,
                },
                ProcessInfo {
                    supervisor_id: 4,
                    name: "web".to_string(),
                    status: ProcessStatus::Stopped,
                    pid: None,
                    restarts: 1,
                },
            ],
            restarts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn restarted(&self) -> Vec<u32> {
        self.restarts.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), SupervisorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(SupervisorError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, SupervisorError> {
        self.check()?;
        Ok(self.processes.clone())
    }

    async fn restart(&self, supervisor_process_id: u32) -> Result<(), SupervisorError> {
        self.check()?;
        if !self.processes.iter().any(|p| p.supervisor_id == supervisor_process_id) {
            return Err(SupervisorError::CommandFailed {
                command: format!("pm2 restart {}", supervisor_process_id),
                status: "exit code 1".to_string(),
                message: format!("Process or Namespace {} not found", supervisor_process_id),
            });
        }
        self.restarts.lock().unwrap().push(supervisor_process_id);
        Ok(())
    }

    async fn fetch_logs(&self, supervisor_process_id: u32, max_lines: usize) -> Result<Vec<LogLine>, SupervisorError> {
        self.check()?;
        Ok((0..max_lines)
            .map(|n| LogLine {
                captured_at: Utc::now(),
                stream: LogStream::Stdout,
                process: Some(format!("{}", supervisor_process_id)),
                message: format!("line {}", n),
            })
            .collect())
    }
}

pub fn service(id: &str, pm2_id: u32, script: Option<PathBuf>, users: &[&str]) -> Service {
    Service {
        id: id.to_string(),
        name: id.to_uppercase(),
        description: None,
        supervisor_process_id: pm2_id,
        deploy_script_path: script,
        assigned_user_ids: users.iter().map(|u| u.to_string()).collect(),
    }
}

pub fn user(id: &str, role: Role, services: &[&str]) -> User {
    User {
        id: id.to_string(),
        username: id.to_string(),
        role,
        assigned_service_ids: services.iter().map(|s| s.to_string()).collect(),
    }
}

/// `api` (pm2 3, deployable with `script`) assigned to alice, `web` (pm2 4,
/// no script) assigned to nobody. bob is a team user with no services.
pub fn snapshot(script: Option<PathBuf>) -> DirectorySnapshot {
    DirectorySnapshot {
        services: vec![
            service("api", 3, script, &["alice"]),
            service("web", 4, None, &[]),
        ],
        users: vec![
            user("root", Role::Admin, &[]),
            user("alice", Role::Team, &["api"]),
            user("bob", Role::Team, &[]),
        ],
    }
}

pub fn fast_settings() -> RunnerSettings {
    RunnerSettings {
        timeout: Duration::from_secs(20),
        kill_grace: Duration::from_millis(500),
        drain_window: Duration::from_millis(500),
        ..RunnerSettings::default()
    }
}

pub fn supervisor_options() -> SupervisorOptions {
    SupervisorOptions {
        call_timeout: Duration::from_secs(2),
        retry_backoff: Duration::from_millis(10),
        ..SupervisorOptions::default()
    }
}

pub struct Fixture {
    pub gateway: Arc<Gateway>,
    pub audit: Arc<MemoryAuditSink>,
    pub supervisor: Arc<FakeSupervisor>,
    pub repo: Arc<SnapshotRepository>,
}

pub fn fixture(snapshot: DirectorySnapshot, settings: RunnerSettings) -> Fixture {
    let repo = Arc::new(SnapshotRepository::from_snapshot(snapshot).unwrap());
    let supervisor = Arc::new(FakeSupervisor::new());
    let audit = Arc::new(MemoryAuditSink::new());

    let gateway = Arc::new(Gateway::new(
        repo.clone(),
        SupervisorClient::new(supervisor.clone(), supervisor_options()),
        settings,
        Auditor::new(audit.clone()),
    ));

    Fixture {
        gateway,
        audit,
        supervisor,
        repo,
    }
}

/// Write an executable shell script
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Poll the sink until it holds at least `n` entries
pub async fn wait_for_audit(sink: &MemoryAuditSink, n: usize) -> Vec<AuditEntry> {
    for _ in 0..500 {
        if sink.len() >= n {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sink.entries()
}

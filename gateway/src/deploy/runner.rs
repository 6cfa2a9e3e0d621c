//! Deploy runner
//!
//! Owns the job registry. Each accepted job gets a supervising task that is
//! the only writer of the job's snapshot; everybody else reads the latest
//! value out of the job's watch channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::deploy::capture::{self, SharedTail};
use crate::deploy::fsm::JobEvent;
use crate::deploy::job::{DeployJob, JobHandle};
use crate::deploy::process;
use crate::deploy::DeployError;
use crate::models::Service;

/// Deploy runner settings
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Wall-clock limit per job
    pub timeout: Duration,

    /// Time between SIGTERM and SIGKILL
    pub kill_grace: Duration,

    /// Bytes kept from the end of each output stream
    pub output_cap_bytes: usize,

    /// Fixed working directory. Defaults to the script's directory.
    pub working_dir: Option<PathBuf>,

    /// How long finished jobs stay queryable
    pub retention: Duration,

    /// Finished jobs kept per service
    pub history_per_service: usize,

    /// How long to keep reading output after the child exits
    pub drain_window: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            kill_grace: Duration::from_secs(5),
            output_cap_bytes: 64 * 1024,
            working_dir: None,
            retention: Duration::from_secs(3600),
            history_per_service: 10,
            drain_window: Duration::from_secs(2),
        }
    }
}

/// Told about every job that reaches a terminal state
#[async_trait]
pub trait DeployObserver: Send + Sync {
    async fn job_finished(&self, job: &DeployJob);
}

#[derive(Default)]
struct JobControl {
    cancel_requested: AtomicBool,
    notify: Notify,
}

impl JobControl {
    fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        // Stores a permit if the supervising task is not waiting yet
        self.notify.notify_one();
    }
}

struct JobEntry {
    service_id: String,
    tx: Arc<watch::Sender<DeployJob>>,
    control: Arc<JobControl>,
    finished: Option<Instant>,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<Uuid, JobEntry>,
    /// service id -> its Queued or Running job
    active: HashMap<String, Uuid>,
    shutting_down: bool,
}

struct Outputs {
    stdout: (String, bool),
    stderr: (String, bool),
}

impl Outputs {
    fn collect(stdout: &SharedTail, stderr: &SharedTail) -> Self {
        Self {
            stdout: capture::snapshot(stdout),
            stderr: capture::snapshot(stderr),
        }
    }

    fn apply_to(self, job: &mut DeployJob) {
        (job.stdout_tail, job.stdout_truncated) = self.stdout;
        (job.stderr_tail, job.stderr_truncated) = self.stderr;
    }
}

struct Inner {
    settings: RunnerSettings,
    registry: Mutex<Registry>,
    observer: Option<Arc<dyn DeployObserver>>,
}

/// Runs deploy scripts, at most one active job per service
#[derive(Clone)]
pub struct DeployRunner {
    inner: Arc<Inner>,
}

impl DeployRunner {
    pub fn new(settings: RunnerSettings, observer: Option<Arc<dyn DeployObserver>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                registry: Mutex::new(Registry::default()),
                observer,
            }),
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.inner.settings
    }

    /// Accept a deploy for `service` and return at once with a handle to the
    /// queued job. Callers are trusted to have authorized `requested_by`.
    pub fn start_deploy(&self, service: &Service, requested_by: &str) -> Result<JobHandle, DeployError> {
        let script = service
            .deploy_script_path
            .clone()
            .ok_or_else(|| DeployError::NotConfigured {
                service_id: service.id.clone(),
            })?;

        let job = DeployJob::queued(&service.id, &service.name, requested_by, self.inner.settings.timeout);
        let job_id = job.job_id;
        let (tx, rx) = watch::channel(job);
        let tx = Arc::new(tx);
        let control = Arc::new(JobControl::default());

        // Test-and-set under one lock: no window for a second start
        {
            let mut registry = self.inner.lock_registry();
            if registry.shutting_down {
                return Err(DeployError::ShuttingDown);
            }
            if let Some(existing) = registry.active.get(&service.id) {
                return Err(DeployError::AlreadyRunning {
                    service_id: service.id.clone(),
                    job_id: *existing,
                });
            }
            registry.active.insert(service.id.clone(), job_id);
            registry.jobs.insert(
                job_id,
                JobEntry {
                    service_id: service.id.clone(),
                    tx: tx.clone(),
                    control: control.clone(),
                    finished: None,
                },
            );
        }

        info!(
            "Deploy job {} queued for service {} by {} ({})",
            job_id,
            service.id,
            requested_by,
            script.display()
        );

        let inner = self.inner.clone();
        tokio::spawn(inner.run_job(job_id, script, tx, control));

        Ok(JobHandle::new(rx))
    }

    /// Latest snapshot of a job, if it is still retained
    pub fn get_status(&self, job_id: Uuid) -> Option<DeployJob> {
        let registry = self.inner.lock_registry();
        registry.jobs.get(&job_id).map(|entry| entry.tx.borrow().clone())
    }

    pub fn subscribe(&self, job_id: Uuid) -> Option<JobHandle> {
        let registry = self.inner.lock_registry();
        registry.jobs.get(&job_id).map(|entry| JobHandle::new(entry.tx.subscribe()))
    }

    /// The Queued or Running job for a service
    pub fn active_job(&self, service_id: &str) -> Option<Uuid> {
        self.inner.lock_registry().active.get(service_id).copied()
    }

    /// Ask a job to stop. Returns the snapshot at the time of the request;
    /// a job that already finished is returned unchanged.
    pub fn cancel(&self, job_id: Uuid) -> Result<DeployJob, DeployError> {
        let registry = self.inner.lock_registry();
        let entry = registry.jobs.get(&job_id).ok_or(DeployError::JobNotFound(job_id))?;

        let job = entry.tx.borrow().clone();
        if job.is_terminal() {
            debug!("Deploy job {} already finished, nothing to cancel", job_id);
        } else {
            info!("Cancelling deploy job {} for service {}", job_id, entry.service_id);
            entry.control.cancel();
        }
        Ok(job)
    }

    /// Drop finished jobs older than the retention window. Returns how many went.
    pub fn prune_expired(&self) -> usize {
        let retention = self.inner.settings.retention;
        let mut registry = self.inner.lock_registry();
        let before = registry.jobs.len();
        registry
            .jobs
            .retain(|_, entry| entry.finished.map_or(true, |at| at.elapsed() < retention));
        before - registry.jobs.len()
    }

    /// Number of jobs currently retained, active or finished
    pub fn retained(&self) -> usize {
        self.inner.lock_registry().jobs.len()
    }

    /// Refuse new deploys, cancel every active job and wait up to `max_wait`
    /// for them to finish.
    pub async fn shutdown(&self, max_wait: Duration) {
        let mut handles = Vec::new();
        {
            let mut registry = self.inner.lock_registry();
            registry.shutting_down = true;
            for job_id in registry.active.values() {
                if let Some(entry) = registry.jobs.get(job_id) {
                    entry.control.cancel();
                    handles.push(JobHandle::new(entry.tx.subscribe()));
                }
            }
        }

        if handles.is_empty() {
            return;
        }

        info!("Cancelling {} active deploy job(s)...", handles.len());
        let all = futures::future::join_all(handles.iter_mut().map(|handle| handle.wait_terminal()));
        if tokio::time::timeout(max_wait, all).await.is_err() {
            warn!("Deploy jobs still running after {:?}", max_wait);
        }
    }
}

impl Inner {
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run_job(
        self: Arc<Self>,
        job_id: Uuid,
        script: PathBuf,
        tx: Arc<watch::Sender<DeployJob>>,
        control: Arc<JobControl>,
    ) {
        let supervised = tokio::spawn(self.clone().supervise(script, tx.clone(), control));
        if let Err(e) = supervised.await {
            error!("Supervising task for deploy job {} died: {}", job_id, e);
            self.complete(&tx, JobEvent::WaitFailed(format!("supervising task died: {}", e)), None)
                .await;
        }
    }

    async fn supervise(
        self: Arc<Self>,
        script: PathBuf,
        tx: Arc<watch::Sender<DeployJob>>,
        control: Arc<JobControl>,
    ) {
        let job_id = tx.borrow().job_id;

        if control.cancel_requested.load(Ordering::SeqCst) {
            info!("Deploy job {} cancelled before start", job_id);
            self.complete(&tx, JobEvent::Cancelled, None).await;
            return;
        }

        let working_dir = process::working_dir_for(&script, self.settings.working_dir.as_deref());
        let mut child = match process::spawn_script(&script, working_dir.as_deref()) {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn deploy script {}: {}", script.display(), e);
                self.complete(&tx, JobEvent::SpawnFailed(e.to_string()), None).await;
                return;
            }
        };

        let pid = child.id();
        transition(&tx, JobEvent::Started { pid });
        info!("Deploy job {} running (pid {:?})", job_id, pid);

        let stdout = capture::shared(self.settings.output_cap_bytes);
        let stderr = capture::shared(self.settings.output_cap_bytes);
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(capture::drain_into(out, stdout.clone(), "stdout")));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(capture::drain_into(err, stderr.clone(), "stderr")));
        }

        let event = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => process::exit_event(status),
                Err(e) => {
                    error!("Failed to wait on deploy job {}: {}", job_id, e);
                    process::terminate_group(&mut child, pid, self.settings.kill_grace).await;
                    JobEvent::WaitFailed(e.to_string())
                }
            },
            _ = tokio::time::sleep(self.settings.timeout) => {
                warn!("Deploy job {} exceeded {:?}, terminating", job_id, self.settings.timeout);
                process::terminate_group(&mut child, pid, self.settings.kill_grace).await;
                JobEvent::TimedOut
            }
            _ = control.notify.notified() => {
                process::terminate_group(&mut child, pid, self.settings.kill_grace).await;
                JobEvent::Cancelled
            }
        };

        // Detached descendants can hold the pipes open past the child's exit
        for reader in readers {
            let abort = reader.abort_handle();
            if tokio::time::timeout(self.settings.drain_window, reader).await.is_err() {
                debug!("Output of deploy job {} still open, abandoning reader", job_id);
                abort.abort();
            }
        }

        let outputs = Outputs::collect(&stdout, &stderr);
        self.complete(&tx, event, Some(outputs)).await;
    }

    async fn complete(&self, tx: &watch::Sender<DeployJob>, event: JobEvent, outputs: Option<Outputs>) {
        let Some(job) = self.finish(tx, event, outputs) else {
            return;
        };

        match &job.failure {
            None => info!("Deploy job {} for service {} ended: {:?}", job.job_id, job.service_id, job.state),
            Some(_) => warn!(
                "Deploy job {} for service {} ended: {:?} ({})",
                job.job_id,
                job.service_id,
                job.state,
                job.failure_summary()
            ),
        }

        if let Some(observer) = &self.observer {
            observer.job_finished(&job).await;
        }
    }

    /// Publish the terminal snapshot and release the service's slot under the
    /// registry lock, so a new start never sees a stale active job.
    fn finish(&self, tx: &watch::Sender<DeployJob>, event: JobEvent, outputs: Option<Outputs>) -> Option<DeployJob> {
        let mut registry = self.lock_registry();

        let mut job = tx.borrow().clone();
        if let Some(outputs) = outputs {
            outputs.apply_to(&mut job);
        }
        let applied = match job.apply(event) {
            Ok(()) => {
                tx.send_replace(job.clone());
                true
            }
            Err(e) => {
                warn!("Deploy job {}: {}", job.job_id, e);
                false
            }
        };

        // The supervising task is done either way; the slot must not outlive it
        if registry.active.get(&job.service_id) == Some(&job.job_id) {
            registry.active.remove(&job.service_id);
        }
        if let Some(entry) = registry.jobs.get_mut(&job.job_id) {
            entry.finished.get_or_insert_with(Instant::now);
        }
        trim_history(&mut registry, &job.service_id, self.settings.history_per_service.max(1));

        applied.then_some(job)
    }
}

fn transition(tx: &watch::Sender<DeployJob>, event: JobEvent) {
    tx.send_if_modified(|job| match job.apply(event) {
        Ok(()) => true,
        Err(e) => {
            warn!("Deploy job {}: {}", job.job_id, e);
            false
        }
    });
}

/// Keep only the newest `limit` finished jobs of a service
fn trim_history(registry: &mut Registry, service_id: &str, limit: usize) {
    let mut finished: Vec<(Instant, Uuid)> = registry
        .jobs
        .iter()
        .filter(|(_, entry)| entry.service_id == service_id)
        .filter_map(|(id, entry)| entry.finished.map(|at| (at, *id)))
        .collect();

    if finished.len() <= limit {
        return;
    }

    finished.sort_by_key(|(at, _)| *at);
    let excess = finished.len() - limit;
    for (_, id) in finished.into_iter().take(excess) {
        registry.jobs.remove(&id);
    }
}

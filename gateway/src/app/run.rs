//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::GatewayError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::job_reaper;

/// Run the gateway until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), GatewayError> {
    info!("Initializing opsgate...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start opsgate: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, GatewayError> {
    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_job_reaper_worker(
        options.job_reaper.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    #[cfg(unix)]
    init_directory_reload(app_state.clone(), shutdown_manager, shutdown_tx.subscribe())?;

    if options.enable_server {
        init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(app_state)
}

fn init_job_reaper_worker(
    options: job_reaper::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GatewayError> {
    info!("Initializing job reaper worker...");

    let gateway = app_state.gateway.clone();

    let handle = tokio::spawn(async move {
        job_reaper::run(
            &options,
            gateway.runner(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_job_reaper_handle(handle)
}

/// Re-read the directory file on SIGHUP
#[cfg(unix)]
fn init_directory_reload(
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GatewayError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    match app_state.directory.reload().await {
                        Ok(()) => info!("Directory reloaded"),
                        Err(e) => error!("Directory reload failed, keeping previous snapshot: {}", e),
                    }
                }
            }
        }
    });

    shutdown_manager.with_reload_handle(handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GatewayError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.gateway.clone(), app_state.verifier.clone());

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), GatewayError>>>,
    job_reaper_handle: Option<JoinHandle<()>>,
    reload_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            job_reaper_handle: None,
            reload_handle: None,
        }
    }

    fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), GatewayError> {
        if self.app_state.is_some() {
            return Err(GatewayError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    fn with_job_reaper_handle(&mut self, handle: JoinHandle<()>) -> Result<(), GatewayError> {
        if self.job_reaper_handle.is_some() {
            return Err(GatewayError::ShutdownError("job_reaper_handle already set".to_string()));
        }
        self.job_reaper_handle = Some(handle);
        Ok(())
    }

    fn with_reload_handle(&mut self, handle: JoinHandle<()>) -> Result<(), GatewayError> {
        if self.reload_handle.is_some() {
            return Err(GatewayError::ShutdownError("reload_handle already set".to_string()));
        }
        self.reload_handle = Some(handle);
        Ok(())
    }

    fn with_server_handle(&mut self, handle: JoinHandle<Result<(), GatewayError>>) -> Result<(), GatewayError> {
        if self.server_handle.is_some() {
            return Err(GatewayError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), GatewayError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.lifecycle_options.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), GatewayError> {
        info!("Shutting down opsgate...");

        // 1. Stop accepting requests
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| GatewayError::ShutdownError(e.to_string()))??;
        }

        // 2. Job reaper
        if let Some(handle) = self.job_reaper_handle.take() {
            handle.await.map_err(|e| GatewayError::ShutdownError(e.to_string()))?;
        }

        if let Some(handle) = self.reload_handle.take() {
            handle.await.map_err(|e| GatewayError::ShutdownError(e.to_string()))?;
        }

        // 3. Cancel running deploys
        if let Some(state) = self.app_state.take() {
            state.shutdown(self.lifecycle_options.deploy_drain).await;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

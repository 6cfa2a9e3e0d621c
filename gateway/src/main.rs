//! opsgate - entry point
//!
//! Serves the operations gateway over HTTP. Also signs bootstrap tokens for
//! operators (`--issue-token=<user_id> --role=<admin|team>`).

use std::env;

use opsgate::app::options::AppOptions;
use opsgate::app::run::run;
use opsgate::authn::{Identity, JwtVerifier, Role};
use opsgate::filesys::file::File;
use opsgate::logs::{init_logging, LogOptions};
use opsgate::storage::settings::{Settings, DEFAULT_SETTINGS_PATH};
use opsgate::utils::{parse_cli_args, parse_ttl_hours, version_info};
use secrecy::SecretString;

use tracing::{error, info};

const SECRET_ENV: &str = "OPSGATE_JWT_SECRET";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli_args = parse_cli_args(env::args().skip(1));

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version: {}", e),
        }
        return;
    }

    // Retrieve the settings file
    let settings_path = cli_args
        .get("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string());
    let settings_file = File::new(&settings_path);
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file {}: {}", settings_path, e);
                std::process::exit(1);
            }
        }
    } else {
        eprintln!("Settings file {} not found, using defaults", settings_path);
        Settings::default()
    };

    let Some(jwt_secret) = settings
        .auth
        .jwt_secret
        .clone()
        .or_else(|| env::var(SECRET_ENV).ok().map(SecretString::from))
    else {
        eprintln!("No token secret: set auth.jwt_secret in {} or {}", settings_path, SECRET_ENV);
        std::process::exit(1);
    };

    // Sign an operator token and exit
    if let Some(user_id) = cli_args.get("issue-token") {
        issue_token(user_id, &cli_args, jwt_secret);
        return;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings, jwt_secret);
    info!(
        "Running opsgate {} on {}:{}",
        version.version, options.server.host, options.server.port
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run opsgate: {e}");
        std::process::exit(1);
    }
}

fn issue_token(user_id: &str, cli_args: &std::collections::HashMap<String, String>, secret: SecretString) {
    let role = match cli_args.get("role").map(|r| r.parse::<Role>()) {
        Some(Ok(role)) => role,
        Some(Err(e)) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
        None => Role::Team,
    };
    let ttl = match parse_ttl_hours(cli_args.get("ttl-hours").map(String::as_str)) {
        Ok(ttl) => ttl,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let verifier = JwtVerifier::new(secret);
    match verifier.issue(&Identity::new(user_id, role), ttl) {
        Ok(token) => println!("{}", token),
        Err(e) => {
            eprintln!("Failed to issue token: {}", e);
            std::process::exit(1);
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}

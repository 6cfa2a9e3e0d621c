//! Utility functions

use serde::{Deserialize, Serialize};

/// Version information for the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Parse `--key=value` and bare `--flag` arguments. Flags map to `"true"`.
pub fn parse_cli_args<I>(args: I) -> std::collections::HashMap<String, String>
where
    I: IntoIterator<Item = String>,
{
    let mut cli_args = std::collections::HashMap::new();
    for arg in args {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }
    cli_args
}

/// Token lifetime from `--ttl-hours`. Defaults to 24 hours when absent.
pub fn parse_ttl_hours(value: Option<&str>) -> Result<std::time::Duration, String> {
    let Some(raw) = value else {
        return Ok(std::time::Duration::from_secs(24 * 3600));
    };
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|hours| *hours > 0)
        .and_then(|hours| hours.checked_mul(3600))
        .filter(|secs| i64::try_from(*secs).is_ok())
        .map(std::time::Duration::from_secs)
        .ok_or_else(|| format!("Invalid --ttl-hours value: {}", raw))
}

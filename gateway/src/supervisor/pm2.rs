//! PM2 command-line transport

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::supervisor::ansi::strip_ansi;
use crate::supervisor::{
    LogLine, LogStream, ProcessInfo, ProcessStatus, ProcessSupervisor, SupervisorError,
};

/// Talks to PM2 by spawning its CLI once per call.
///
/// Each invocation is a child process with `kill_on_drop`, so a call that is
/// abandoned by a timeout tears the CLI down instead of leaking it.
#[derive(Debug, Clone)]
pub struct Pm2Cli {
    bin: PathBuf,
}

impl Pm2Cli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: &[String]) -> Result<String, SupervisorError> {
        let command = format!("{} {}", self.bin.display(), args.join(" "));
        debug!("Running supervisor command: {}", command);

        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SupervisorError::Unreachable(format!("failed to run `{}`: {}", command, e)))?;

        if !output.status.success() {
            let stderr = strip_ansi(&String::from_utf8_lossy(&output.stderr));
            let stdout = strip_ansi(&String::from_utf8_lossy(&output.stdout));
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(SupervisorError::CommandFailed {
                command,
                status: output
                    .status
                    .code()
                    .map(|c| format!("exit code {}", c))
                    .unwrap_or_else(|| "terminated by signal".to_string()),
                message,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ProcessSupervisor for Pm2Cli {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, SupervisorError> {
        let stdout = self.run(&["jlist".to_string()]).await?;
        let processes = parse_jlist(&stdout)?;
        debug!("Retrieved {} process(es)", processes.len());
        Ok(processes)
    }

    async fn restart(&self, supervisor_process_id: u32) -> Result<(), SupervisorError> {
        self.run(&["restart".to_string(), supervisor_process_id.to_string()])
            .await?;
        info!("Restarted supervisor process {}", supervisor_process_id);
        Ok(())
    }

    async fn fetch_logs(
        &self,
        supervisor_process_id: u32,
        max_lines: usize,
    ) -> Result<Vec<LogLine>, SupervisorError> {
        let stdout = self
            .run(&[
                "logs".to_string(),
                supervisor_process_id.to_string(),
                "--lines".to_string(),
                max_lines.to_string(),
                "--nostream".to_string(),
            ])
            .await?;
        Ok(parse_logs(&strip_ansi(&stdout), Utc::now()))
    }
}

#[derive(Debug, Deserialize)]
struct JlistEntry {
    pm_id: u32,
    name: String,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    pm2_env: JlistEnv,
}

#[derive(Debug, Default, Deserialize)]
struct JlistEnv {
    #[serde(default)]
    status: Option<ProcessStatus>,
    #[serde(default)]
    restart_time: u32,
}

/// Parse `pm2 jlist` output. PM2 may print daemon banners before the JSON array.
pub fn parse_jlist(stdout: &str) -> Result<Vec<ProcessInfo>, SupervisorError> {
    let mut offset = 0;
    let mut start = None;
    for line in stdout.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with("[{") || trimmed == "[]" {
            start = Some(offset);
            break;
        }
        offset += line.len();
    }
    let json = start
        .map(|start| &stdout[start..])
        .ok_or_else(|| SupervisorError::InvalidResponse("no process list in output".to_string()))?;

    let entries: Vec<JlistEntry> = serde_json::from_str(json.trim())
        .map_err(|e| SupervisorError::InvalidResponse(format!("process list: {}", e)))?;

    Ok(entries
        .into_iter()
        .map(|e| ProcessInfo {
            supervisor_id: e.pm_id,
            name: e.name,
            status: e.pm2_env.status.unwrap_or(ProcessStatus::Unknown),
            pid: e.pid.filter(|pid| *pid != 0),
            restarts: e.pm2_env.restart_time,
        })
        .collect())
}

/// Parse `pm2 logs --nostream` output into structured lines.
///
/// Section headers (`.../api-out.log last 100 lines:`) select the stream for
/// the lines that follow; `3|api | message` prefixes are split off.
pub fn parse_logs(output: &str, captured_at: DateTime<Utc>) -> Vec<LogLine> {
    let mut stream = LogStream::Unknown;
    let mut lines = Vec::new();

    for raw in output.lines() {
        let line = raw.trim_end();
        if line.trim().is_empty() || line.starts_with("[TAILING]") {
            continue;
        }

        if line.ends_with("lines:") && line.contains(".log") {
            stream = if line.contains("-error") || line.contains("-err.") {
                LogStream::Stderr
            } else if line.contains("-out") {
                LogStream::Stdout
            } else {
                LogStream::Unknown
            };
            continue;
        }

        let (process, message) = split_process_prefix(line);
        lines.push(LogLine {
            captured_at,
            stream,
            process,
            message,
        });
    }

    lines
}

fn split_process_prefix(line: &str) -> (Option<String>, String) {
    let mut parts = line.splitn(3, '|');
    if let (Some(id), Some(name), Some(message)) = (parts.next(), parts.next(), parts.next()) {
        if !id.trim().is_empty() && id.trim().chars().all(|c| c.is_ascii_digit()) {
            let message = message.strip_prefix(' ').unwrap_or(message);
            return (Some(name.trim().to_string()), message.to_string());
        }
    }
    (None, line.to_string())
}

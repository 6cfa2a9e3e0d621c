//! Spawning deploy scripts and tearing down their process groups

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::deploy::fsm::JobEvent;

/// Working directory for a script: the configured one, else the script's own directory
pub fn working_dir_for(script: &Path, configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = configured {
        return Some(dir.to_path_buf());
    }
    script
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

/// Spawn `script` directly (no shell) in its own process group with
/// stdin closed and both output streams piped.
pub fn spawn_script(script: &Path, working_dir: Option<&Path>) -> std::io::Result<Child> {
    let mut cmd = Command::new(script);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn()
}

/// Map how the child ended to the event fed to the job state machine
pub fn exit_event(status: ExitStatus) -> JobEvent {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    JobEvent::Exited {
        code: status.code(),
        signal,
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pgid as i32), signal) {
        // ESRCH just means the group is already gone
        if e != nix::errno::Errno::ESRCH {
            warn!("Failed to send {} to process group {}: {}", signal, pgid, e);
        }
    }
}

/// Terminate the child and every process in its group: SIGTERM, wait up to
/// `grace`, then SIGKILL. Always reaps the child before returning.
pub async fn terminate_group(child: &mut Child, pgid: Option<u32>, grace: Duration) -> Option<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;

        if let Some(pgid) = pgid {
            debug!("Sending SIGTERM to process group {}", pgid);
            signal_group(pgid, Signal::SIGTERM);

            let status = match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => status.ok(),
                Err(_) => {
                    warn!("Process group {} did not respond to SIGTERM, sending SIGKILL", pgid);
                    signal_group(pgid, Signal::SIGKILL);
                    child.wait().await.ok()
                }
            };

            // Descendants that ignored SIGTERM keep the group alive after the leader exits
            signal_group(pgid, Signal::SIGKILL);
            return status;
        }
    }

    #[cfg(not(unix))]
    let _ = (pgid, grace);

    if let Err(e) = child.start_kill() {
        debug!("Child already exited: {}", e);
    }
    child.wait().await.ok()
}

// OpenSSH client transport: one ControlMaster socket per host, commands multiplexed over it.

use super::{CommandOutput, Connector, Session};
use crate::error::TransportError;
use crate::models::HostTarget;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Exit status the OpenSSH client uses for its own failures.
const SSH_CLIENT_FAILURE: i32 = 255;

pub struct SshConnector {
    ssh_binary: PathBuf,
    control_dir: PathBuf,
}

impl SshConnector {
    /// Uses `ssh` from `PATH` and a control socket directory of its own under the temp dir.
    /// The directory is removed when the connector is dropped.
    pub fn new() -> std::io::Result<Self> {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let control_dir =
            std::env::temp_dir().join(format!("rsmon-{}-{}", std::process::id(), id));
        std::fs::create_dir_all(&control_dir)?;
        Ok(Self {
            ssh_binary: PathBuf::from("ssh"),
            control_dir,
        })
    }

    pub fn with_binary(mut self, ssh_binary: impl Into<PathBuf>) -> Self {
        self.ssh_binary = ssh_binary.into();
        self
    }

    fn control_path(&self, host_name: &str) -> PathBuf {
        let safe: String = host_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.control_dir.join(format!("{safe}.sock"))
    }
}

impl Drop for SshConnector {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.control_dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            debug!(dir = %self.control_dir.display(), error = %e, "control dir cleanup failed");
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    #[instrument(skip(self, target), fields(host = %target.name, operation = "ssh_connect"))]
    async fn connect(&self, target: &HostTarget) -> Result<Arc<dyn Session>, TransportError> {
        let control_path = self.control_path(&target.name);
        // A socket left by a dead master makes the new master refuse to bind.
        let _ = std::fs::remove_file(&control_path);

        let mut cmd = Command::new(&self.ssh_binary);
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", target.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg("ControlMaster=yes")
            .arg("-o")
            .arg("ControlPersist=yes")
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .arg("-p")
            .arg(target.port.to_string());
        if let Some(key) = &target.key_filename {
            cmd.arg("-i").arg(key);
        }
        cmd.arg("-f").arg("-N").arg(target.destination());

        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(TransportError::Client {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(control_path = %control_path.display(), "ssh master started");

        Ok(Arc::new(SshSession {
            ssh_binary: self.ssh_binary.clone(),
            control_path,
            destination: target.destination(),
            port: target.port,
            broken: AtomicBool::new(false),
            master_stopped: AtomicBool::new(false),
        }))
    }
}

pub struct SshSession {
    ssh_binary: PathBuf,
    control_path: PathBuf,
    destination: String,
    port: u16,
    /// Set when the master stopped answering; no more commands go through this session.
    broken: AtomicBool,
    /// Set once `-O exit` has been sent.
    master_stopped: AtomicBool,
}

impl SshSession {
    fn client(&self) -> Command {
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("ControlMaster=no")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-p")
            .arg(self.port.to_string());
        cmd
    }

    /// Asks the master whether it is still alive.
    async fn master_alive(&self) -> bool {
        let checked = self
            .client()
            .arg("-O")
            .arg("check")
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        matches!(checked, Ok(status) if status.success())
    }
}

#[async_trait]
impl Session for SshSession {
    async fn run(&self, command: &str) -> Result<CommandOutput, TransportError> {
        if self.is_closed() {
            return Err(TransportError::SessionClosed);
        }
        let output = self
            .client()
            .arg(&self.destination)
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let exit_status = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        // 255 is also a legal remote exit status; only a dead master means a broken link.
        if exit_status == SSH_CLIENT_FAILURE && !self.master_alive().await {
            self.broken.store(true, Ordering::Release);
            return Err(TransportError::Client {
                status: exit_status,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(CommandOutput {
            exit_status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    fn is_closed(&self) -> bool {
        self.broken.load(Ordering::Acquire) || self.master_stopped.load(Ordering::Acquire)
    }

    /// Stops the master even when the session is already broken, so no master outlives it.
    async fn close(&self) -> Result<(), TransportError> {
        if self.master_stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let output = self
            .client()
            .arg("-O")
            .arg("exit")
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        let _ = std::fs::remove_file(&self.control_path);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if self.broken.load(Ordering::Acquire) {
                warn!(control_path = %self.control_path.display(), stderr = %stderr, "master already gone");
                return Ok(());
            }
            return Err(TransportError::Client {
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(())
    }
}

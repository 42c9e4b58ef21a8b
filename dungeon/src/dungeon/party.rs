//! Worker process management
//!
//! The dungeon re-runs its own executable once per role with the hidden
//! `worker <role>` subcommand, forwarding the config path and log level so
//! all four processes share one effective configuration.

use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use eyre::{Context, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::ipc::{IpcError, Notification, Notifier, notify};
use crate::poll::Poller;
use crate::role::Role;

/// How to start a worker process
#[derive(Debug, Clone)]
pub struct Launch {
    /// Binary providing the `worker` subcommand
    pub executable: PathBuf,
    /// Forwarded as `--config`
    pub config_path: Option<PathBuf>,
    /// Forwarded as `--log-level`
    pub log_level: Option<String>,
}

impl Launch {
    /// Launch workers from `executable`, or from the running binary when `None`
    pub fn new(executable: Option<PathBuf>) -> Result<Self> {
        let executable = match executable {
            Some(path) => path,
            None => std::env::current_exe().context("Failed to get current executable")?,
        };
        debug!(?executable, "Launch::new: resolved worker executable");
        Ok(Self {
            executable,
            config_path: None,
            log_level: None,
        })
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn with_log_level(mut self, level: Option<String>) -> Self {
        self.log_level = level;
        self
    }

    fn command(&self, role: Role) -> Command {
        let mut cmd = Command::new(&self.executable);
        if let Some(path) = &self.config_path {
            cmd.arg("--config").arg(path);
        }
        if let Some(level) = &self.log_level {
            cmd.arg("--log-level").arg(level);
        }
        cmd.arg("worker")
            .arg(role.name())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        cmd
    }
}

struct Member {
    role: Role,
    child: Child,
    status: Option<ExitStatus>,
}

impl Member {
    fn pid(&self) -> i32 {
        self.child.id() as i32
    }

    /// Reap the child if it has exited; true once it is gone
    fn reap(&mut self) -> bool {
        if self.status.is_some() {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                info!(role = %self.role, %status, "Worker exited");
                self.status = Some(status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(role = %self.role, error = %e, "Failed to poll worker");
                false
            }
        }
    }

    fn kill(&mut self) {
        if self.reap() {
            return;
        }
        warn!(role = %self.role, pid = self.pid(), "Worker did not stop gracefully, sending SIGKILL");
        let _ = kill(Pid::from_raw(self.pid()), Signal::SIGKILL);
        match self.child.wait() {
            Ok(status) => self.status = Some(status),
            Err(e) => warn!(role = %self.role, error = %e, "Failed to reap worker"),
        }
    }
}

/// The three running worker processes
pub struct Party {
    members: Vec<Member>,
}

impl Party {
    /// Spawn one worker per role
    ///
    /// If any spawn fails, the workers already started are killed before the
    /// error is returned.
    pub fn spawn(launch: &Launch) -> Result<Self, IpcError> {
        debug!(executable = ?launch.executable, "Party::spawn: called");
        let mut party = Self { members: Vec::new() };
        for role in Role::ALL {
            let child = launch
                .command(role)
                .spawn()
                .map_err(|source| IpcError::Spawn { role, source })?;
            info!(%role, pid = child.id(), "Worker spawned");
            party.members.push(Member {
                role,
                child,
                status: None,
            });
        }
        Ok(party)
    }

    pub fn pid(&self, role: Role) -> Option<i32> {
        self.member(role).map(Member::pid)
    }

    /// First role whose process has already exited, if any
    pub fn first_exited(&mut self) -> Option<Role> {
        self.members.iter_mut().find_map(|m| m.reap().then_some(m.role))
    }

    /// Deliver `kind` to every worker still running; failures are logged
    pub fn broadcast(&mut self, kind: Notification) {
        for member in &mut self.members {
            if member.reap() {
                continue;
            }
            if let Err(e) = notify(member.pid(), kind) {
                warn!(role = %member.role, error = %e, "Broadcast not delivered");
            }
        }
    }

    /// Ask every worker to stop, wait up to `grace`, then kill stragglers
    pub async fn shutdown(&mut self, grace: Duration) {
        debug!(?grace, "Party::shutdown: called");
        self.broadcast(Notification::ShutdownRequested);

        let poller = Poller::new(Duration::from_millis(20), grace);
        let members = &mut self.members;
        let exited = poller.wait(|| false, || members.iter_mut().all(Member::reap)).await;
        debug!(?exited, "Party::shutdown: waited for workers");

        for member in &mut self.members {
            member.kill();
        }
        info!("All workers stopped");
    }

    /// Exit status of `role`, once reaped
    pub fn status(&self, role: Role) -> Option<ExitStatus> {
        self.member(role).and_then(|m| m.status)
    }

    fn member(&self, role: Role) -> Option<&Member> {
        self.members.iter().find(|m| m.role == role)
    }
}

impl Notifier for Party {
    fn notify(&self, role: Role, kind: Notification) -> Result<(), IpcError> {
        match self.pid(role) {
            Some(pid) => notify(pid, kind),
            None => Err(IpcError::Signal {
                pid: 0,
                signal: kind.signal().as_str(),
                source: nix::Error::ESRCH,
            }),
        }
    }
}

impl Drop for Party {
    fn drop(&mut self) {
        for member in &mut self.members {
            member.kill();
        }
    }
}

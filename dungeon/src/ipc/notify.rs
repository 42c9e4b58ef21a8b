//! Process-targeted notifications carried by signals
//!
//! A notification carries only its kind. Payloads travel through the shared
//! [`DungeonState`](super::DungeonState); a notification just tells the target
//! to go and look.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::signal::unix::{Signal as SignalStream, SignalKind, signal};
use tracing::{debug, trace};

use super::error::IpcError;
use crate::role::Role;
use crate::shutdown::ShutdownToken;

/// The three notification kinds of the game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A challenge payload is waiting in shared memory
    ChallengeReady,
    /// The treasure room is open
    RendezvousReady,
    /// Stop whatever is in progress and exit
    ShutdownRequested,
}

impl Notification {
    /// Signal used to deliver this notification
    pub fn signal(self) -> Signal {
        match self {
            Notification::ChallengeReady => Signal::SIGUSR1,
            Notification::RendezvousReady => Signal::SIGUSR2,
            Notification::ShutdownRequested => Signal::SIGINT,
        }
    }

    /// Map a received signal back to its notification
    pub fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::SIGUSR1 => Some(Notification::ChallengeReady),
            Signal::SIGUSR2 => Some(Notification::RendezvousReady),
            Signal::SIGINT | Signal::SIGTERM => Some(Notification::ShutdownRequested),
            _ => None,
        }
    }
}

/// Deliver `kind` to process `pid`; best effort, asynchronous
pub fn notify(pid: i32, kind: Notification) -> Result<(), IpcError> {
    let signal = kind.signal();
    debug!(pid, ?kind, %signal, "notify: sending");
    kill(Pid::from_raw(pid), signal).map_err(|source| IpcError::Signal {
        pid,
        signal: signal.as_str(),
        source,
    })
}

/// Check if a process with the given PID is running
pub fn is_process_running(pid: i32) -> bool {
    // Sending signal 0 checks if the process exists without affecting it
    let result = pid > 0 && kill(Pid::from_raw(pid), None).is_ok();
    trace!(pid, result, "is_process_running: checked");
    result
}

/// Something that can deliver notifications to a worker role
///
/// The dungeon talks to its party through this seam so the challenge drivers
/// can be exercised without spawning processes.
pub trait Notifier {
    fn notify(&self, role: Role, kind: Notification) -> Result<(), IpcError>;
}

/// Worker-side receiver for `ChallengeReady` and `RendezvousReady`
///
/// Installing the listener replaces the default (terminating) action of
/// SIGUSR1/SIGUSR2, so it must exist before the worker reports ready.
/// `ShutdownRequested` is not received here: a separate handler trips the
/// process [`ShutdownToken`], which `next` also watches.
pub struct NotificationListener {
    challenge: SignalStream,
    rendezvous: SignalStream,
}

impl NotificationListener {
    pub fn install() -> Result<Self, std::io::Error> {
        debug!("NotificationListener::install: called");
        Ok(Self {
            challenge: signal(SignalKind::user_defined1())?,
            rendezvous: signal(SignalKind::user_defined2())?,
        })
    }

    /// Idle until the next notification arrives
    ///
    /// Returns `ShutdownRequested` as soon as `shutdown` is triggered, even if
    /// other notifications are pending.
    pub async fn next(&mut self, shutdown: &ShutdownToken) -> Notification {
        if shutdown.is_triggered() {
            return Notification::ShutdownRequested;
        }
        tokio::select! {
            biased;
            _ = shutdown.triggered() => Notification::ShutdownRequested,
            _ = self.challenge.recv() => Notification::ChallengeReady,
            _ = self.rendezvous.recv() => Notification::RendezvousReady,
        }
    }
}

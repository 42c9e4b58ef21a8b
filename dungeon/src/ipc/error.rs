//! IPC error types

use thiserror::Error;

use crate::role::Role;

/// Errors raised while creating, attaching to or using the shared IPC objects
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Shared memory {name}: {action} failed")]
    SharedMemory {
        name: String,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Shared memory {name} does not hold a dungeon ({reason})")]
    LayoutMismatch { name: String, reason: String },

    #[error("Semaphore {name}: {action} failed")]
    Semaphore {
        name: String,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid IPC object name: {0}")]
    InvalidName(String),

    #[error("Failed to deliver {signal} to pid {pid}")]
    Signal {
        pid: i32,
        signal: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to spawn {role}")]
    Spawn {
        role: Role,
        #[source]
        source: std::io::Error,
    },
}

impl IpcError {
    pub(crate) fn shm(name: &str, action: &'static str, source: impl Into<std::io::Error>) -> Self {
        IpcError::SharedMemory {
            name: name.to_string(),
            action,
            source: source.into(),
        }
    }

    pub(crate) fn sem(name: &str, action: &'static str) -> Self {
        IpcError::Semaphore {
            name: name.to_string(),
            action,
            source: std::io::Error::last_os_error(),
        }
    }

    /// True when the target process no longer exists
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            IpcError::Signal {
                source: nix::Error::ESRCH,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_error_message() {
        let err = IpcError::Signal {
            pid: 4242,
            signal: "SIGUSR1",
            source: nix::Error::ESRCH,
        };
        let msg = err.to_string();
        assert!(msg.contains("4242"));
        assert!(msg.contains("SIGUSR1"));
        assert!(err.is_gone());
    }

    #[test]
    fn test_permission_denied_is_not_gone() {
        let err = IpcError::Signal {
            pid: 1,
            signal: "SIGINT",
            source: nix::Error::EPERM,
        };
        assert!(!err.is_gone());
    }
}

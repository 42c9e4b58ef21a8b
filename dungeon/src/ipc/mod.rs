//! Cross-process plumbing: shared memory, levers and notifications
//!
//! - [`SharedRegion`] maps the [`DungeonState`] block shared by all four processes
//! - [`Lever`] is one of the two named binary semaphores of the treasure room
//! - [`notify`] and [`NotificationListener`] carry the signal-based notifications

mod error;
pub mod lever;
pub mod notify;
pub mod region;
pub mod state;

pub use error::IpcError;
pub use lever::{Lever, LeverGuard, Levers};
pub use notify::{Notification, NotificationListener, Notifier, is_process_running, notify};
pub use region::SharedRegion;
pub use state::{Direction, DungeonState, SPELL_BUFFER_SIZE, TREASURE_LEN};

use tracing::warn;

/// Names of the shared objects for one game namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcNames {
    pub shm: String,
    pub lever_one: String,
    pub lever_two: String,
}

impl IpcNames {
    pub fn for_namespace(namespace: &str) -> Self {
        Self {
            shm: format!("/{}_shm", namespace),
            lever_one: format!("/{}_lever_one", namespace),
            lever_two: format!("/{}_lever_two", namespace),
        }
    }

    /// Unlink every object of the namespace; returns how many existed
    ///
    /// A failure on one object does not stop the others from being removed;
    /// the first error is returned once all three were attempted.
    pub fn remove_all(&self) -> Result<usize, IpcError> {
        let results = [
            region::remove_stale(&self.shm),
            lever::remove_stale(&self.lever_one),
            lever::remove_stale(&self.lever_two),
        ];

        let mut removed = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to remove shared object");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}

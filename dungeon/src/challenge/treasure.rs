//! Treasure room: two lever holders and one drain
//!
//! On `RendezvousReady` the barbarian and the wizard each take a lever and
//! hold it until the rogue has copied the whole treasure into the spoils.
//! Holding is an idle poll on the last spoils slot; the lever is released by
//! dropping its [`LeverGuard`].

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::ipc::{DungeonState, IpcError, Lever, LeverGuard, Levers, TREASURE_LEN};
use crate::poll::{PollOutcome, Poller};
use crate::shutdown::ShutdownToken;

/// How the rogue's drain ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every treasure character was copied
    Complete(String),
    /// The deadline passed after `collected` characters
    TimedOut { collected: usize },
    /// Shutdown or game stop after `collected` characters
    Stopped { collected: usize },
}

/// How a lever holder's part of the rendezvous ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    /// The lever was held and has been released; `waited` says why the hold ended
    Released { lever: String, waited: PollOutcome },
    /// No lever could be taken before the deadline or a stop
    NotAcquired,
}

/// Copy `treasure` into `spoils` one character at a time
///
/// The spoils are emptied first. Slot `i` is only copied once the dungeon has
/// filled `treasure[i]`, so the treasure may be revealed while the drain is
/// already running.
pub async fn drain_treasure(
    state: &DungeonState,
    spin: Duration,
    timeout: Duration,
    shutdown: &ShutdownToken,
) -> DrainOutcome {
    let stopped = || shutdown.is_triggered() || !state.running();
    if stopped() {
        return DrainOutcome::Stopped { collected: 0 };
    }
    state.clear_spoils();
    let poller = Poller::new(spin, timeout);

    for index in 0..TREASURE_LEN {
        match poller.wait(stopped, || state.treasure_at(index).is_some()).await {
            PollOutcome::Ready => {
                if let Some(byte) = state.treasure_at(index) {
                    state.set_spoils_at(index, byte);
                    debug!(index, byte = %char::from(byte), "drain_treasure: copied");
                }
            }
            PollOutcome::TimedOut => {
                warn!(collected = index, "Treasure drain timed out");
                return DrainOutcome::TimedOut { collected: index };
            }
            PollOutcome::Stopped => return DrainOutcome::Stopped { collected: index },
        }
    }

    let spoils = state.spoils();
    info!(%spoils, "Treasure drained");
    DrainOutcome::Complete(spoils)
}

/// Take `lever`, waiting in slices of `slice` until `deadline`
///
/// Each slice is a bounded semaphore wait on a blocking thread; shutdown and
/// the `running` flag are re-checked between slices. A lever taken just as a
/// stop arrives is handed back immediately through the guard.
pub async fn acquire_until(
    state: &DungeonState,
    lever: &Arc<Lever>,
    slice: Duration,
    deadline: Instant,
    shutdown: &ShutdownToken,
) -> Result<Option<LeverGuard>, IpcError> {
    debug!(lever = %lever.name(), "acquire_until: called");
    loop {
        if shutdown.is_triggered() || !state.running() {
            return Ok(None);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }

        let wait = slice.min(remaining);
        let blocking = Arc::clone(lever);
        let acquired = tokio::task::spawn_blocking(move || blocking.acquire_timeout(wait))
            .await
            .map_err(|e| IpcError::Semaphore {
                name: lever.name().to_string(),
                action: "acquire",
                source: io::Error::other(e),
            })??;

        if acquired {
            let guard = LeverGuard::held(Arc::clone(lever));
            if shutdown.is_triggered() || !state.running() {
                return Ok(None);
            }
            return Ok(Some(guard));
        }
    }
}

/// Hold `guard` until the spoils are complete, the deadline passes, or a stop
pub async fn hold_until_spoils(
    state: &DungeonState,
    guard: LeverGuard,
    poll_interval: Duration,
    deadline: Instant,
    shutdown: &ShutdownToken,
) -> HoldOutcome {
    info!(lever = %guard.name(), "Holding lever");
    let waited = Poller::until(poll_interval, deadline)
        .wait(|| shutdown.is_triggered() || !state.running(), || state.spoils_complete())
        .await;

    let lever = guard.name().to_string();
    drop(guard);
    info!(%lever, ?waited, "Lever released");
    HoldOutcome::Released { lever, waited }
}

/// Barbarian's part: lever one, unconditionally
pub async fn barbarian_hold(
    state: &DungeonState,
    levers: &Levers,
    poll_interval: Duration,
    deadline: Instant,
    shutdown: &ShutdownToken,
) -> Result<HoldOutcome, IpcError> {
    match acquire_until(state, &levers.one, poll_interval, deadline, shutdown).await? {
        Some(guard) => Ok(hold_until_spoils(state, guard, poll_interval, deadline, shutdown).await),
        None => {
            warn!(lever = %levers.one.name(), "Barbarian could not take a lever");
            Ok(HoldOutcome::NotAcquired)
        }
    }
}

/// Wizard's part: lever two if it is free right now, else wait for lever one
pub async fn wizard_hold(
    state: &DungeonState,
    levers: &Levers,
    poll_interval: Duration,
    deadline: Instant,
    shutdown: &ShutdownToken,
) -> Result<HoldOutcome, IpcError> {
    if levers.two.try_acquire()? {
        let guard = LeverGuard::held(Arc::clone(&levers.two));
        return Ok(hold_until_spoils(state, guard, poll_interval, deadline, shutdown).await);
    }

    debug!(lever = %levers.two.name(), "wizard_hold: lever taken, falling back");
    match acquire_until(state, &levers.one, poll_interval, deadline, shutdown).await? {
        Some(guard) => Ok(hold_until_spoils(state, guard, poll_interval, deadline, shutdown).await),
        None => {
            warn!("Wizard could not take either lever");
            Ok(HoldOutcome::NotAcquired)
        }
    }
}

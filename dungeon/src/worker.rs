//! Worker process runtime
//!
//! A worker attaches to the dungeon's shared objects, installs its
//! notification handlers, reports ready, and then idles on a single control
//! path: wait for a notification, run the role's handler to completion, wait
//! again. It wakes every poll interval even without a notification so it can
//! notice a stopped game or a vanished dungeon.

use std::time::Instant;

use eyre::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::challenge::{self, DrainOutcome, HoldOutcome, PickState};
use crate::config::Config;
use crate::ipc::{DungeonState, Levers, Notification, NotificationListener, SharedRegion, is_process_running};
use crate::role::Role;
use crate::shutdown::{self, ShutdownToken};

/// One attached worker process
pub struct Worker {
    role: Role,
    config: Config,
    region: SharedRegion,
    levers: Levers,
    shutdown: ShutdownToken,
    search: PickState,
}

impl Worker {
    /// Open the shared segment and both levers created by the dungeon
    pub fn attach(role: Role, config: &Config) -> Result<Self> {
        debug!(%role, "Worker::attach: called");
        let names = config.ipc.names();
        let region = SharedRegion::open(&names.shm).context("Failed to attach to the dungeon")?;
        let levers = Levers::open(&names.lever_one, &names.lever_two).context("Failed to open the levers")?;

        info!(%role, shm = %names.shm, coordinator = region.state().coordinator_pid(), "Worker attached");
        Ok(Self {
            role,
            config: config.clone(),
            region,
            levers,
            shutdown: ShutdownToken::new(),
            search: PickState::new(config.challenges.max_pick_angle),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Token tripped by SIGINT/SIGTERM once `run` has installed its handlers
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Serve notifications until shutdown, game stop, or loss of the dungeon
    pub async fn run(mut self) -> Result<()> {
        debug!(role = %self.role, "Worker::run: called");
        shutdown::install_handlers(self.shutdown.clone()).context("Failed to install shutdown handlers")?;
        let mut listener = NotificationListener::install().context("Failed to install notification handlers")?;

        self.region.state().mark_ready(self.role.ready_bit());
        info!(role = %self.role, pid = std::process::id(), "Worker ready");

        let tick = self.config.timing.poll_interval();
        loop {
            if let Some(reason) = self.exit_reason() {
                info!(role = %self.role, reason, "Worker exiting");
                break;
            }

            let notification = match tokio::time::timeout(tick, listener.next(&self.shutdown)).await {
                Ok(notification) => notification,
                Err(_) => continue,
            };
            debug!(role = %self.role, ?notification, "Worker::run: notification received");

            match notification {
                Notification::ShutdownRequested => self.shutdown.trigger(),
                Notification::ChallengeReady => self.on_challenge().await,
                Notification::RendezvousReady => self.on_rendezvous().await,
            }
        }
        Ok(())
    }

    fn exit_reason(&self) -> Option<&'static str> {
        let state = self.region.state();
        if self.shutdown.is_triggered() {
            Some("shutdown requested")
        } else if !state.running() {
            Some("game stopped")
        } else if !is_process_running(state.coordinator_pid()) {
            Some("dungeon is gone")
        } else {
            None
        }
    }

    async fn on_challenge(&mut self) {
        let state: &DungeonState = self.region.state();
        let timing = &self.config.timing;
        match self.role {
            Role::Barbarian => {
                if let Some(attack) = challenge::mirror_attack(state, timing.mirror_yield()).await {
                    info!(attack, "Attack mirrored");
                }
            }
            Role::Wizard => {
                if let Some(spell) = challenge::solve_barrier(state) {
                    info!(spell = %String::from_utf8_lossy(&spell), "Barrier spell decoded");
                }
            }
            Role::Rogue => {
                let outcome = challenge::pick_lock(
                    state,
                    &mut self.search,
                    timing.spin_interval(),
                    timing.pick_timeout(),
                    &self.shutdown,
                )
                .await;
                debug!(?outcome, "Worker::on_challenge: pick_lock returned");
            }
        }
    }

    async fn on_rendezvous(&mut self) {
        let state = self.region.state();
        let timing = &self.config.timing;
        let deadline = Instant::now() + timing.treasure_timeout();

        let held = match self.role {
            Role::Rogue => {
                match challenge::drain_treasure(state, timing.spin_interval(), timing.treasure_timeout(), &self.shutdown)
                    .await
                {
                    DrainOutcome::Complete(spoils) => info!(%spoils, "Treasure collected"),
                    outcome => warn!(?outcome, "Treasure not collected"),
                }
                return;
            }
            Role::Barbarian => {
                challenge::barbarian_hold(state, &self.levers, timing.poll_interval(), deadline, &self.shutdown).await
            }
            Role::Wizard => {
                challenge::wizard_hold(state, &self.levers, timing.poll_interval(), deadline, &self.shutdown).await
            }
        };

        match held {
            Ok(HoldOutcome::Released { lever, waited }) => debug!(%lever, ?waited, "Worker::on_rendezvous: done"),
            Ok(HoldOutcome::NotAcquired) => warn!(role = %self.role, "Rendezvous ended without holding a lever"),
            Err(e) => error!(role = %self.role, error = %e, "Lever failure during rendezvous"),
        }
    }
}

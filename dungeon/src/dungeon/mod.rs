//! The dungeon: coordinator of the whole game
//!
//! Owns the shared segment and both levers, spawns the party, waits for every
//! worker to report ready, runs the challenges strictly in order and tears
//! everything down again. Setup failures abort the run with an error after
//! whatever was already created has been released; challenge failures are
//! only recorded.

pub mod party;
pub mod report;
pub mod trials;

use std::time::Instant;

use eyre::{Context, Result};
use tracing::{debug, error, info, warn};

pub use party::{Launch, Party};
pub use report::{ChallengeRecord, DungeonReport, Verdict};
pub use trials::Trials;

use crate::config::Config;
use crate::ipc::{DungeonState, Levers, Notifier, SharedRegion};
use crate::poll::{PollOutcome, Poller};
use crate::role::Role;
use crate::shutdown::{self, ShutdownToken};

/// The coordinator process
pub struct Dungeon {
    config: Config,
    launch: Launch,
    shutdown: ShutdownToken,
    progress: bool,
}

impl Dungeon {
    pub fn new(config: Config, launch: Launch) -> Self {
        Self {
            config,
            launch,
            shutdown: ShutdownToken::new(),
            progress: false,
        }
    }

    /// Print one line per finished challenge to stdout
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Play one full game
    pub async fn run(&self) -> Result<DungeonReport> {
        debug!("Dungeon::run: called");
        shutdown::install_handlers(self.shutdown.clone()).context("Failed to install shutdown handlers")?;

        let names = self.config.ipc.names();
        let region = SharedRegion::create(&names.shm).context("Failed to create the dungeon state")?;
        let levers = Levers::create(&names.lever_one, &names.lever_two).context("Failed to create the levers")?;
        let mut party = Party::spawn(&self.launch).context("Failed to spawn the party")?;

        let result = self.play(region.state(), &levers, &mut party).await;
        if let Err(e) = &result {
            error!(error = %e, "Game aborted");
        }

        info!("Stopping the game");
        region.state().set_running(false);
        party.shutdown(self.config.timing.shutdown_grace()).await;
        drop(party);
        drop(levers);
        drop(region);
        info!("Dungeon released");
        result
    }

    async fn play(&self, state: &DungeonState, levers: &Levers, party: &mut Party) -> Result<DungeonReport> {
        let mut report = DungeonReport::new();
        match self.wait_ready(state, party).await {
            PollOutcome::Ready => info!("All workers ready"),
            PollOutcome::Stopped if self.shutdown.is_triggered() => {
                report.mark_interrupted();
                return Ok(report);
            }
            PollOutcome::Stopped => {
                let role = party.first_exited().map(|r| r.name()).unwrap_or("a worker");
                return Err(eyre::eyre!("{} exited before reporting ready", role));
            }
            PollOutcome::TimedOut => {
                let missing: Vec<_> = Role::ALL
                    .iter()
                    .filter(|r| state.ready_mask() & r.ready_bit() == 0)
                    .map(|r| r.name())
                    .collect();
                return Err(eyre::eyre!("Workers not ready in time: {}", missing.join(", ")));
            }
        }

        let notifier: &dyn Notifier = &*party;
        self.play_challenges(state, levers, notifier, &mut report).await;
        Ok(report)
    }

    /// Run every challenge against `notifier`'s workers, recording each result
    ///
    /// Stops early, marking the report interrupted, once shutdown is requested.
    pub async fn play_challenges(
        &self,
        state: &DungeonState,
        levers: &Levers,
        notifier: &dyn Notifier,
        report: &mut DungeonReport,
    ) {
        let challenges = &self.config.challenges;
        let mut trials = Trials::new(state, levers, notifier, &self.config.timing, challenges, &self.shutdown);
        let multi = challenges.rounds > 1;

        for round in 1..=challenges.rounds {
            let label = |name: &str| if multi { format!("{name} #{round}") } else { name.to_string() };

            let started = Instant::now();
            let verdict = trials.attack().await;
            self.record(report, label("attack"), verdict, started);
            if report.interrupted() {
                return;
            }

            let started = Instant::now();
            let verdict = trials.barrier().await;
            self.record(report, label("barrier"), verdict, started);
            if report.interrupted() {
                return;
            }

            let started = Instant::now();
            let verdict = trials.trap().await;
            self.record(report, label("trap"), verdict, started);
            if report.interrupted() {
                return;
            }
        }

        let started = Instant::now();
        let verdict = trials.treasure().await;
        self.record(report, "treasure".to_string(), verdict, started);
    }

    fn record(&self, report: &mut DungeonReport, name: String, verdict: Verdict, started: Instant) {
        if let Verdict::Failed(reason) = &verdict {
            warn!(challenge = %name, %reason, "Challenge failed");
        }
        let record = report.record(name, verdict, started.elapsed());
        if self.progress {
            println!("{}", record);
        }
    }

    async fn wait_ready(&self, state: &DungeonState, party: &mut Party) -> PollOutcome {
        let all = Role::all_ready_mask();
        let poller = Poller::new(self.config.timing.spin_interval(), self.config.timing.readiness_timeout());
        poller
            .wait(
                || self.shutdown.is_triggered() || party.first_exited().is_some(),
                || state.ready_mask() & all == all,
            )
            .await
    }
}

/// Unlink every shared object of the configured namespace
pub fn clean(config: &Config) -> Result<usize> {
    let names = config.ipc.names();
    let removed = names.remove_all().context("Failed to remove shared objects")?;
    info!(removed, namespace = %config.ipc.namespace, "Removed stale shared objects");
    Ok(removed)
}

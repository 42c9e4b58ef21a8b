//! Dungeon side of each challenge
//!
//! Every trial writes its payload into the shared state, notifies the
//! worker(s) concerned, and polls for the response until its deadline. A
//! trial that runs out of time is recorded as failed and the game moves on.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::report::Verdict;
use crate::challenge::seal_spell;
use crate::config::{ChallengeConfig, TimingConfig};
use crate::ipc::{Direction, DungeonState, Levers, Notification, Notifier, TREASURE_LEN};
use crate::poll::{PollOutcome, Poller};
use crate::role::Role;
use crate::shutdown::ShutdownToken;

/// Plaintexts sealed into the magical barrier
const SPELLS: &[&str] = &[
    "Hello",
    "Open Sesame",
    "Speak friend and enter",
    "Abracadabra",
    "Alohomora",
    "Klaatu barada nikto",
];

/// Compare a published pick with the target angle
pub fn judge_pick(pick: f64, target: f64, tolerance: f64) -> Direction {
    if (pick - target).abs() <= tolerance {
        Direction::Solved
    } else if pick < target {
        Direction::TooLow
    } else {
        Direction::TooHigh
    }
}

/// Random uppercase treasure
pub fn random_treasure<R: Rng>(rng: &mut R) -> String {
    (0..TREASURE_LEN).map(|_| char::from(rng.random_range(b'A'..=b'Z'))).collect()
}

/// Drives the challenges against one party of workers
pub struct Trials<'a> {
    state: &'a DungeonState,
    levers: &'a Levers,
    notifier: &'a dyn Notifier,
    timing: &'a TimingConfig,
    challenges: &'a ChallengeConfig,
    shutdown: &'a ShutdownToken,
    rng: StdRng,
}

impl<'a> Trials<'a> {
    pub fn new(
        state: &'a DungeonState,
        levers: &'a Levers,
        notifier: &'a dyn Notifier,
        timing: &'a TimingConfig,
        challenges: &'a ChallengeConfig,
        shutdown: &'a ShutdownToken,
    ) -> Self {
        let rng = match challenges.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            state,
            levers,
            notifier,
            timing,
            challenges,
            shutdown,
            rng,
        }
    }

    fn stopped(&self) -> bool {
        self.shutdown.is_triggered() || !self.state.running()
    }

    fn poller(&self, timeout: Duration) -> Poller {
        Poller::new(self.timing.spin_interval(), timeout)
    }

    fn send(&self, role: Role, kind: Notification) -> bool {
        match self.notifier.notify(role, kind) {
            Ok(()) => true,
            Err(e) => {
                warn!(%role, ?kind, error = %e, "Notification not delivered");
                false
            }
        }
    }

    fn verdict(outcome: PollOutcome, failure: impl FnOnce() -> String) -> Verdict {
        match outcome {
            PollOutcome::Ready => Verdict::Passed,
            PollOutcome::TimedOut => Verdict::Failed(failure()),
            PollOutcome::Stopped => Verdict::Interrupted,
        }
    }

    /// Barbarian must mirror a random enemy health into its attack
    pub async fn attack(&mut self) -> Verdict {
        let health = self.rng.random_range(1..=self.challenges.max_enemy_health);
        debug!(health, "Trials::attack: called");
        self.state.set_barbarian_attack(0);
        self.state.set_enemy_health(health);

        if !self.send(Role::Barbarian, Notification::ChallengeReady) {
            return Verdict::Failed("barbarian unreachable".to_string());
        }
        let outcome = self
            .poller(self.timing.attack_timeout())
            .wait(|| self.stopped(), || self.state.barbarian_attack() == health)
            .await;

        let attack = self.state.barbarian_attack();
        info!(health, attack, ?outcome, "Attack challenge finished");
        Self::verdict(outcome, || format!("attack {attack} does not match health {health}"))
    }

    /// Wizard must decode a Caesar-sealed spell
    pub async fn barrier(&mut self) -> Verdict {
        let plain = SPELLS.choose(&mut self.rng).copied().unwrap_or("Hello");
        let key = self.rng.random_range(1..26u8);
        debug!(key, plain, "Trials::barrier: called");
        self.state.set_wizard_spell(b"");
        self.state.set_barrier_spell(&seal_spell(key, plain.as_bytes()));

        if !self.send(Role::Wizard, Notification::ChallengeReady) {
            return Verdict::Failed("wizard unreachable".to_string());
        }
        let outcome = self
            .poller(self.timing.barrier_timeout())
            .wait(|| self.stopped(), || self.state.wizard_spell() == plain.as_bytes())
            .await;

        let answer = String::from_utf8_lossy(&self.state.wizard_spell()).into_owned();
        info!(key, plain, %answer, ?outcome, "Barrier challenge finished");
        Self::verdict(outcome, || format!("spell {answer:?} does not match {plain:?}"))
    }

    /// Rogue must find a random angle by asking for feedback on its guesses
    ///
    /// The trap is always unlocked again before this returns.
    pub async fn trap(&mut self) -> Verdict {
        let max_angle = self.challenges.max_pick_angle;
        let tolerance = self.challenges.pick_tolerance;
        let target = self.rng.random_range(0.0..=max_angle);
        let episode = self.state.begin_trap_episode();
        debug!(episode, target, tolerance, "Trials::trap: called");
        if !self.send(Role::Rogue, Notification::ChallengeReady) {
            self.state.set_trap_locked(false);
            return Verdict::Failed("rogue unreachable".to_string());
        }

        let poller = self.poller(self.timing.pick_timeout());
        let mut guesses = 0u32;
        let verdict = loop {
            if self.stopped() {
                break Verdict::Interrupted;
            }
            if poller.expired() {
                break Verdict::Failed(format!("no solving pick after {guesses} guesses"));
            }

            if self.state.trap_direction() == Direction::GuessReady {
                let pick = self.state.rogue_pick();
                guesses += 1;
                let feedback = judge_pick(pick, target, tolerance);
                debug!(pick, ?feedback, guesses, "Trials::trap: judged");
                self.state.set_trap_direction(feedback);
                if feedback == Direction::Solved {
                    break Verdict::Passed;
                }
            }
            poller.tick().await;
        };

        self.state.set_trap_locked(false);
        info!(episode, target, pick = self.state.rogue_pick(), guesses, ?verdict, "Trap challenge finished");
        verdict
    }

    /// Two levers must be held while the rogue carries the treasure out
    ///
    /// The treasure is revealed one character at a time once both levers
    /// read as held. Passing needs the full treasure in the spoils and both
    /// levers available again afterwards.
    pub async fn treasure(&mut self) -> Verdict {
        let treasure = random_treasure(&mut self.rng);
        debug!(%treasure, "Trials::treasure: called");
        self.state.clear_treasure();

        for role in Role::ALL {
            if !self.send(role, Notification::RendezvousReady) {
                return Verdict::Failed(format!("{role} unreachable"));
            }
        }
        let deadline = Instant::now() + self.timing.treasure_timeout();

        // Reveal regardless after half the deadline so the drain still has time
        let reveal_by = Instant::now() + self.timing.treasure_timeout() / 2;
        match self.observe_levers(false, reveal_by).await {
            Some(PollOutcome::Ready) => debug!("Trials::treasure: both levers held"),
            Some(PollOutcome::Stopped) => return Verdict::Interrupted,
            Some(PollOutcome::TimedOut) => warn!("Levers not both held, revealing anyway"),
            None => info!("Lever values unobservable on this platform"),
        }

        for (index, byte) in treasure.bytes().enumerate() {
            tokio::time::sleep(self.timing.reveal_interval()).await;
            if self.stopped() {
                return Verdict::Interrupted;
            }
            self.state.set_treasure_at(index, byte);
        }

        let drained = Poller::until(self.timing.spin_interval(), deadline)
            .wait(|| self.stopped(), || self.state.spoils_complete())
            .await;
        let spoils = self.state.spoils();
        if drained == PollOutcome::Stopped {
            return Verdict::Interrupted;
        }

        // Holders notice completion on their next poll tick
        let release_by = deadline.max(Instant::now() + self.timing.poll_interval() * 4);
        let released = self.observe_levers(true, release_by).await;
        info!(%treasure, %spoils, ?drained, ?released, "Treasure challenge finished");

        if spoils != treasure {
            return Verdict::Failed(format!("spoils {spoils:?} do not match treasure {treasure:?}"));
        }
        match released {
            Some(PollOutcome::Ready) | None => Verdict::Passed,
            Some(PollOutcome::Stopped) => Verdict::Interrupted,
            Some(PollOutcome::TimedOut) => Verdict::Failed("levers were not released".to_string()),
        }
    }

    /// Wait until both levers read as `available`; `None` when unobservable
    async fn observe_levers(&self, available: bool, deadline: Instant) -> Option<PollOutcome> {
        self.levers.one.is_available()?;
        let outcome = Poller::until(self.timing.spin_interval(), deadline)
            .wait(
                || self.stopped(),
                || {
                    self.levers.one.is_available() == Some(available) && self.levers.two.is_available() == Some(available)
                },
            )
            .await;
        Some(outcome)
    }
}

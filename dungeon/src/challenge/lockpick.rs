//! Rogue: pick the trap lock by binary search over the pick angle
//!
//! Each probe is a write of `rogue_pick` followed by `GuessReady`; the
//! dungeon answers through `trap_direction` with `TooLow`, `TooHigh` or
//! `Solved`. The search bounds live in a [`PickState`] owned by the rogue
//! process and carried across notifications.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ipc::{Direction, DungeonState};
use crate::poll::Poller;
use crate::shutdown::ShutdownToken;

/// Interval width below which the search is considered stalled
pub const COLLAPSE_EPSILON: f64 = 1e-6;

/// Result of narrowing the bounds on one piece of feedback
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Narrowed {
    /// Next guess to publish
    Guess(f64),
    /// The interval is too small to produce a new guess
    Collapsed,
}

/// How one lock-pick episode ended for the rogue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickOutcome {
    /// The dungeon reported the trap disarmed
    Solved,
    /// The trap was unlocked without a `Solved` being observed
    Unlocked,
    /// The interval collapsed before the dungeon accepted a guess
    Collapsed,
    /// The episode deadline passed
    TimedOut,
    /// Shutdown was requested or the game stopped
    Stopped,
    /// The trap was not locked when the notification arrived
    NotLocked,
}

/// Search bounds carried across notifications
#[derive(Debug, Clone, PartialEq)]
pub struct PickState {
    low: f64,
    high: f64,
    max_angle: f64,
    episode: Option<u32>,
}

impl PickState {
    pub fn new(max_angle: f64) -> Self {
        Self {
            low: 0.0,
            high: max_angle,
            max_angle,
            episode: None,
        }
    }

    /// Back to `[0, max_angle]`
    pub fn reset(&mut self) {
        self.low = 0.0;
        self.high = self.max_angle;
    }

    /// Start searching for `episode` from the full range
    pub fn begin(&mut self, episode: u32) {
        self.reset();
        self.episode = Some(episode);
    }

    /// Episode these bounds belong to
    pub fn episode(&self) -> Option<u32> {
        self.episode
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    pub fn midpoint(&self) -> f64 {
        self.low + (self.high - self.low) / 2.0
    }

    /// Narrow the bounds using the guess `pick` that produced `direction`
    ///
    /// Directions other than `TooLow`/`TooHigh` leave the bounds alone.
    pub fn narrow(&mut self, direction: Direction, pick: f64) -> Narrowed {
        match direction {
            Direction::TooLow if pick > self.low => self.low = pick,
            Direction::TooHigh if pick < self.high => self.high = pick,
            _ => {}
        }

        if self.high > self.low && self.high - self.low > COLLAPSE_EPSILON {
            Narrowed::Guess(self.midpoint())
        } else {
            Narrowed::Collapsed
        }
    }
}

/// Reset the bounds for `episode` and publish its opening guess
fn open_episode(state: &DungeonState, search: &mut PickState, episode: u32) {
    search.begin(episode);
    state.publish_guess(search.midpoint());
    debug!(episode, pick = search.midpoint(), "pick_lock: new episode");
}

/// Run one lock-pick episode in response to `ChallengeReady`
///
/// The dungeon numbers every episode through `trap_episode`. Whenever the
/// number differs from the one the bounds belong to, on entry or while the
/// loop is running, the bounds are reset, the opening guess is published and
/// the deadline starts over. The loop then answers feedback until the trap
/// unlocks, the dungeon reports `Solved`, the interval collapses, the
/// deadline passes, or the game stops.
pub async fn pick_lock(
    state: &DungeonState,
    search: &mut PickState,
    spin: Duration,
    timeout: Duration,
    shutdown: &ShutdownToken,
) -> PickOutcome {
    let stopped = || shutdown.is_triggered() || !state.running();
    if stopped() {
        return PickOutcome::Stopped;
    }
    if !state.trap_locked() {
        search.reset();
        return PickOutcome::NotLocked;
    }

    let mut episode = state.trap_episode();
    if search.episode() != Some(episode) {
        open_episode(state, search, episode);
    }

    let mut poller = Poller::new(spin, timeout);
    let outcome = loop {
        if stopped() {
            break PickOutcome::Stopped;
        }
        if !state.trap_locked() {
            break PickOutcome::Unlocked;
        }

        // The dungeon re-armed the trap before this loop saw the last episode end
        let current = state.trap_episode();
        if current != episode {
            info!(previous = episode, episode = current, "Trap re-armed, starting over");
            episode = current;
            open_episode(state, search, episode);
            poller = Poller::new(spin, timeout);
        }
        if poller.expired() {
            break PickOutcome::TimedOut;
        }

        // Direction and pick are written separately; only trust the pick
        // when the direction did not change around it.
        let direction = state.trap_direction();
        let pick = state.rogue_pick();
        if state.trap_direction() == direction && state.trap_episode() == episode {
            match direction {
                Direction::Solved => break PickOutcome::Solved,
                Direction::TooLow | Direction::TooHigh => match search.narrow(direction, pick) {
                    Narrowed::Guess(next) => {
                        if stopped() {
                            break PickOutcome::Stopped;
                        }
                        state.publish_guess(next);
                    }
                    Narrowed::Collapsed => break PickOutcome::Collapsed,
                },
                Direction::GuessReady | Direction::None => {}
            }
        }

        poller.tick().await;
    };

    if !state.trap_locked() {
        search.reset();
    }

    match outcome {
        PickOutcome::Solved | PickOutcome::Unlocked => {
            info!(?outcome, episode, pick = state.rogue_pick(), "Trap episode ended")
        }
        PickOutcome::Collapsed | PickOutcome::TimedOut => {
            let (low, high) = search.bounds();
            warn!(?outcome, episode, low, high, "Trap episode abandoned");
        }
        PickOutcome::Stopped | PickOutcome::NotLocked => debug!(?outcome, "pick_lock: returning"),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Instant;

    const MAX: f64 = 100.0;

    /// Probes needed for the oracle to accept, asserting the target stays bracketed
    fn probes_to_solve(target: f64, tolerance: f64) -> u32 {
        let mut search = PickState::new(MAX);
        let mut guess = search.midpoint();
        let mut probes = 1;
        while (guess - target).abs() > tolerance {
            let direction = if guess < target { Direction::TooLow } else { Direction::TooHigh };
            match search.narrow(direction, guess) {
                Narrowed::Guess(next) => guess = next,
                Narrowed::Collapsed => panic!("collapsed before reaching {target}"),
            }
            let (low, high) = search.bounds();
            assert!(low <= target && target <= high, "{target} escaped [{low}, {high}]");
            probes += 1;
        }
        probes
    }

    #[test]
    fn test_narrow_too_low_raises_low() {
        let mut search = PickState::new(MAX);
        assert_eq!(search.narrow(Direction::TooLow, 50.0), Narrowed::Guess(75.0));
        assert_eq!(search.bounds(), (50.0, 100.0));
    }

    #[test]
    fn test_narrow_too_high_lowers_high() {
        let mut search = PickState::new(MAX);
        assert_eq!(search.narrow(Direction::TooHigh, 50.0), Narrowed::Guess(25.0));
        assert_eq!(search.bounds(), (0.0, 50.0));
    }

    #[test]
    fn test_stale_feedback_does_not_widen() {
        let mut search = PickState::new(MAX);
        search.narrow(Direction::TooLow, 60.0);
        // Feedback about an older, lower pick must not move `low` back down
        search.narrow(Direction::TooLow, 40.0);
        assert_eq!(search.bounds(), (60.0, 100.0));
    }

    #[test]
    fn test_collapse_is_reported() {
        let mut search = PickState::new(MAX);
        search.narrow(Direction::TooLow, 57.0);
        assert_eq!(search.narrow(Direction::TooHigh, 57.0 + COLLAPSE_EPSILON / 2.0), Narrowed::Collapsed);
    }

    #[test]
    fn test_reset_restores_full_range() {
        let mut search = PickState::new(MAX);
        search.narrow(Direction::TooHigh, 10.0);
        search.reset();
        assert_eq!(search.bounds(), (0.0, MAX));
    }

    #[test]
    fn test_converges_on_57() {
        let probes = probes_to_solve(57.0, 1e-6);
        assert!(probes <= 27, "took {probes} probes");
    }

    proptest! {
        #[test]
        fn prop_converges_within_log2_bound(target in 0.0..=MAX) {
            let tolerance = 1e-6;
            let bound = (MAX / tolerance).log2().ceil() as u32;
            prop_assert!(probes_to_solve(target, tolerance) <= bound);
        }
    }

    /// Plays the dungeon's side of the trap: judge every published guess
    async fn judge(state: Arc<DungeonState>, target: f64, tolerance: f64) -> u32 {
        let mut judged = 0;
        while state.trap_locked() {
            if state.trap_direction() == Direction::GuessReady {
                let pick = state.rogue_pick();
                judged += 1;
                if (pick - target).abs() <= tolerance {
                    state.set_trap_direction(Direction::Solved);
                    state.set_trap_locked(false);
                } else if pick < target {
                    state.set_trap_direction(Direction::TooLow);
                } else {
                    state.set_trap_direction(Direction::TooHigh);
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        judged
    }

    fn locked_state() -> Arc<DungeonState> {
        let state = Arc::new(DungeonState::new());
        state.initialize(1);
        state.begin_trap_episode();
        state
    }

    #[tokio::test]
    async fn test_episode_against_dungeon() {
        let state = locked_state();
        let dungeon = tokio::spawn(judge(Arc::clone(&state), 57.0, 1e-6));

        let mut search = PickState::new(MAX);
        let outcome = pick_lock(
            &state,
            &mut search,
            Duration::from_millis(1),
            Duration::from_secs(10),
            &ShutdownToken::new(),
        )
        .await;

        let judged = dungeon.await.unwrap();
        assert!(matches!(outcome, PickOutcome::Solved | PickOutcome::Unlocked));
        assert!(judged <= 27, "judged {judged} guesses");
        assert!((state.rogue_pick() - 57.0).abs() <= 1e-6);
        assert_eq!(search.bounds(), (0.0, MAX));
    }

    #[tokio::test]
    async fn test_episode_times_out_without_feedback() {
        let state = locked_state();
        let mut search = PickState::new(MAX);
        let outcome = pick_lock(
            &state,
            &mut search,
            Duration::from_millis(1),
            Duration::from_millis(30),
            &ShutdownToken::new(),
        )
        .await;

        assert_eq!(outcome, PickOutcome::TimedOut);
        assert_eq!(state.trap_direction(), Direction::GuessReady);
        assert_eq!(state.rogue_pick(), MAX / 2.0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_without_writes() {
        let state = locked_state();
        let token = ShutdownToken::new();
        token.trigger();

        let mut search = PickState::new(MAX);
        let outcome = pick_lock(&state, &mut search, Duration::from_millis(1), Duration::from_secs(1), &token).await;

        assert_eq!(outcome, PickOutcome::Stopped);
        assert_eq!(state.trap_direction(), Direction::None);
    }

    #[tokio::test]
    async fn test_unlocked_trap_resets_bounds() {
        let state = DungeonState::new();
        state.initialize(1);
        let mut search = PickState::new(MAX);
        search.narrow(Direction::TooLow, 80.0);

        let outcome = pick_lock(
            &state,
            &mut search,
            Duration::from_millis(1),
            Duration::from_secs(1),
            &ShutdownToken::new(),
        )
        .await;

        assert_eq!(outcome, PickOutcome::NotLocked);
        assert_eq!(search.bounds(), (0.0, MAX));
    }

    /// Wait up to `within` for the rogue to publish `pick`
    async fn guess_published(state: &DungeonState, pick: f64, within: Duration) -> bool {
        Poller::new(Duration::from_millis(1), within)
            .wait(
                || false,
                || state.trap_direction() == Direction::GuessReady && state.rogue_pick() == pick,
            )
            .await
            .is_ready()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_quick_rearm_starts_a_new_episode() {
        let state = locked_state();
        let token = ShutdownToken::new();
        let timeout = Duration::from_secs(5);

        // Slow rogue; the second ChallengeReady is only sent once the trap is re-armed
        let (rearmed_tx, rearmed_rx) = tokio::sync::oneshot::channel();
        let rogue = {
            let (state, token) = (Arc::clone(&state), token.clone());
            tokio::spawn(async move {
                let mut search = PickState::new(MAX);
                let spin = Duration::from_millis(20);
                let first = pick_lock(&state, &mut search, spin, timeout, &token).await;
                rearmed_rx.await.unwrap();
                let second = pick_lock(&state, &mut search, spin, timeout, &token).await;
                (first, second)
            })
        };

        let started = Instant::now();
        assert!(guess_published(&state, 50.0, Duration::from_secs(1)).await);
        state.set_trap_direction(Direction::TooHigh);
        assert!(guess_published(&state, 25.0, Duration::from_secs(1)).await);

        // Solve and re-arm faster than the rogue polls
        state.set_trap_direction(Direction::Solved);
        state.set_trap_locked(false);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(state.begin_trap_episode(), 2);
        rearmed_tx.send(()).unwrap();

        assert!(
            guess_published(&state, 50.0, Duration::from_secs(1)).await,
            "no opening guess for the second episode, last pick {}",
            state.rogue_pick()
        );
        state.set_trap_direction(Direction::Solved);
        state.set_trap_locked(false);

        let (first, second) = rogue.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3), "rogue stalled: {first:?} {second:?}");
        assert_ne!(first, PickOutcome::TimedOut);
        assert_ne!(second, PickOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_stale_bounds_are_dropped_on_entry() {
        let state = locked_state();
        let mut search = PickState::new(MAX);
        search.begin(state.trap_episode());
        search.narrow(Direction::TooLow, 80.0);
        state.set_trap_direction(Direction::Solved);
        state.set_trap_locked(false);
        let episode = state.begin_trap_episode();

        let outcome = pick_lock(
            &state,
            &mut search,
            Duration::from_millis(1),
            Duration::from_millis(30),
            &ShutdownToken::new(),
        )
        .await;

        assert_eq!(outcome, PickOutcome::TimedOut);
        assert_eq!(search.episode(), Some(episode));
        assert_eq!(state.rogue_pick(), MAX / 2.0);
        assert_eq!(search.bounds(), (0.0, MAX));
    }
}

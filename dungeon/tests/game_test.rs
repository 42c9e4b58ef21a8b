//! Integration tests for the dungeon game
//!
//! These tests play the protocol over real shared memory and real levers,
//! with the worker engines running as tasks in this process instead of as
//! separate processes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use dungeon::challenge::{self, HoldOutcome, PickState};
use dungeon::config::Config;
use dungeon::dungeon::{Dungeon, DungeonReport, Launch, Verdict};
use dungeon::ipc::{IpcError, IpcNames, Levers, Notification, Notifier, SharedRegion};
use dungeon::poll::Poller;
use dungeon::role::Role;
use dungeon::shutdown::ShutdownToken;
use serial_test::serial;
use tokio::sync::Mutex;

static NEXT: AtomicU32 = AtomicU32::new(0);

fn unique_namespace(tag: &str) -> String {
    format!("dungeon_it_{}_{}_{}", std::process::id(), tag, NEXT.fetch_add(1, Ordering::Relaxed))
}

fn test_config(tag: &str) -> Config {
    let mut config = Config::default();
    config.ipc.namespace = unique_namespace(tag);
    config.timing.poll_interval_ms = 10;
    config.timing.reveal_interval_ms = 5;
    config.challenges.seed = Some(1234);
    config
}

/// Worker side of the game, attached to the dungeon's objects like a worker process would be
struct InProcessParty {
    region: Arc<SharedRegion>,
    levers: Levers,
    config: Config,
    search: Arc<Mutex<PickState>>,
    shutdown: ShutdownToken,
    delivered: AtomicU32,
}

impl InProcessParty {
    fn attach(config: &Config) -> Self {
        let names = config.ipc.names();
        Self {
            region: Arc::new(SharedRegion::open(&names.shm).unwrap()),
            levers: Levers::open(&names.lever_one, &names.lever_two).unwrap(),
            config: config.clone(),
            search: Arc::new(Mutex::new(PickState::new(config.challenges.max_pick_angle))),
            shutdown: ShutdownToken::new(),
            delivered: AtomicU32::new(0),
        }
    }
}

impl Notifier for InProcessParty {
    fn notify(&self, role: Role, kind: Notification) -> Result<(), IpcError> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        let region = Arc::clone(&self.region);
        let levers = self.levers.clone();
        let timing = self.config.timing.clone();
        let search = Arc::clone(&self.search);
        let shutdown = self.shutdown.clone();

        match (role, kind) {
            (_, Notification::ShutdownRequested) => shutdown.trigger(),
            (Role::Barbarian, Notification::ChallengeReady) => {
                tokio::spawn(async move {
                    challenge::mirror_attack(region.state(), timing.mirror_yield()).await;
                });
            }
            (Role::Wizard, Notification::ChallengeReady) => {
                tokio::spawn(async move {
                    challenge::solve_barrier(region.state());
                });
            }
            (Role::Rogue, Notification::ChallengeReady) => {
                tokio::spawn(async move {
                    let mut search = search.lock().await;
                    challenge::pick_lock(
                        region.state(),
                        &mut search,
                        timing.spin_interval(),
                        timing.pick_timeout(),
                        &shutdown,
                    )
                    .await;
                });
            }
            (Role::Rogue, Notification::RendezvousReady) => {
                tokio::spawn(async move {
                    challenge::drain_treasure(region.state(), timing.spin_interval(), timing.treasure_timeout(), &shutdown)
                        .await;
                });
            }
            (Role::Barbarian, Notification::RendezvousReady) => {
                let deadline = Instant::now() + timing.treasure_timeout();
                tokio::spawn(async move {
                    challenge::barbarian_hold(region.state(), &levers, timing.poll_interval(), deadline, &shutdown)
                        .await
                        .unwrap();
                });
            }
            (Role::Wizard, Notification::RendezvousReady) => {
                let deadline = Instant::now() + timing.treasure_timeout();
                tokio::spawn(async move {
                    challenge::wizard_hold(region.state(), &levers, timing.poll_interval(), deadline, &shutdown)
                        .await
                        .unwrap();
                });
            }
        }
        Ok(())
    }
}

/// A notifier whose workers never answer
struct SilentParty;

impl Notifier for SilentParty {
    fn notify(&self, _role: Role, _kind: Notification) -> Result<(), IpcError> {
        Ok(())
    }
}

fn test_dungeon(config: &Config) -> Dungeon {
    Dungeon::new(config.clone(), Launch::new(Some("/nonexistent/dungeon".into())).unwrap())
}

// =============================================================================
// Treasure room
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_gold_rendezvous() {
    let names = IpcNames::for_namespace(&unique_namespace("gold"));
    let dungeon = SharedRegion::create(&names.shm).unwrap();
    let dungeon_levers = Levers::create(&names.lever_one, &names.lever_two).unwrap();

    let worker_region = Arc::new(SharedRegion::open(&names.shm).unwrap());
    let worker_levers = Levers::open(&names.lever_one, &names.lever_two).unwrap();
    let token = ShutdownToken::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    let poll = Duration::from_millis(10);

    let barbarian = {
        let (region, levers, token) = (Arc::clone(&worker_region), worker_levers.clone(), token.clone());
        tokio::spawn(async move { challenge::barbarian_hold(region.state(), &levers, poll, deadline, &token).await })
    };
    let wizard = {
        let (region, levers, token) = (Arc::clone(&worker_region), worker_levers.clone(), token.clone());
        tokio::spawn(async move { challenge::wizard_hold(region.state(), &levers, poll, deadline, &token).await })
    };
    let rogue = {
        let (region, token) = (Arc::clone(&worker_region), token.clone());
        tokio::spawn(async move {
            challenge::drain_treasure(region.state(), Duration::from_millis(1), Duration::from_secs(5), &token).await
        })
    };

    // Reveal only once both levers are held
    let held = Poller::new(Duration::from_millis(1), Duration::from_secs(3))
        .wait(
            || false,
            || dungeon_levers.one.is_available() == Some(false) && dungeon_levers.two.is_available() == Some(false),
        )
        .await;
    assert!(held.is_ready(), "both levers should be held before the reveal");

    for (index, byte) in "GOLD".bytes().enumerate() {
        tokio::time::sleep(Duration::from_millis(5)).await;
        dungeon.state().set_treasure_at(index, byte);
    }

    assert_eq!(
        rogue.await.unwrap(),
        challenge::DrainOutcome::Complete("GOLD".to_string())
    );
    let barbarian = barbarian.await.unwrap().unwrap();
    let wizard = wizard.await.unwrap().unwrap();

    assert_eq!(dungeon.state().spoils(), "GOLD");
    assert!(matches!(barbarian, HoldOutcome::Released { ref lever, .. } if lever == &names.lever_one));
    assert!(matches!(wizard, HoldOutcome::Released { ref lever, .. } if lever == &names.lever_two));
    assert_eq!(dungeon_levers.one.is_available(), Some(true));
    assert_eq!(dungeon_levers.two.is_available(), Some(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_holders_release_when_game_stops() {
    let names = IpcNames::for_namespace(&unique_namespace("stop"));
    let dungeon = SharedRegion::create(&names.shm).unwrap();
    let levers = Levers::create(&names.lever_one, &names.lever_two).unwrap();
    let token = ShutdownToken::new();
    let deadline = Instant::now() + Duration::from_secs(10);

    let holder = {
        let (levers, token) = (levers.clone(), token.clone());
        let region = Arc::new(SharedRegion::open(&names.shm).unwrap());
        tokio::spawn(async move {
            challenge::barbarian_hold(region.state(), &levers, Duration::from_millis(10), deadline, &token).await
        })
    };

    let held = Poller::new(Duration::from_millis(1), Duration::from_secs(3))
        .wait(|| false, || levers.one.is_available() == Some(false))
        .await;
    assert!(held.is_ready());

    let started = Instant::now();
    dungeon.state().set_running(false);
    let outcome = holder.await.unwrap().unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(outcome, HoldOutcome::Released { .. }));
    assert_eq!(levers.one.is_available(), Some(true));
}

// =============================================================================
// Full game
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_full_game_in_process() {
    let mut config = test_config("game");
    config.challenges.rounds = 2;
    let names = config.ipc.names();
    let region = SharedRegion::create(&names.shm).unwrap();
    let levers = Levers::create(&names.lever_one, &names.lever_two).unwrap();
    let party = InProcessParty::attach(&config);

    let mut report = DungeonReport::new();
    test_dungeon(&config)
        .play_challenges(region.state(), &levers, &party, &mut report)
        .await;

    let names: Vec<_> = report.records().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        ["attack #1", "barrier #1", "trap #1", "attack #2", "barrier #2", "trap #2", "treasure"]
    );
    assert!(report.all_passed(), "{}", report.summary());
    assert_eq!(levers.one.is_available(), Some(true));
    assert_eq!(levers.two.is_available(), Some(true));
    assert!(!region.state().trap_locked());
}

#[tokio::test]
#[serial]
async fn test_unanswered_challenges_fail_without_aborting() {
    let mut config = test_config("silent");
    config.timing.attack_timeout_ms = 30;
    config.timing.barrier_timeout_ms = 30;
    config.timing.pick_timeout_ms = 30;
    config.timing.treasure_timeout_ms = 60;
    let names = config.ipc.names();
    let region = SharedRegion::create(&names.shm).unwrap();
    let levers = Levers::create(&names.lever_one, &names.lever_two).unwrap();

    let mut report = DungeonReport::new();
    test_dungeon(&config)
        .play_challenges(region.state(), &levers, &SilentParty, &mut report)
        .await;

    assert_eq!(report.records().len(), 4);
    assert_eq!(report.failed(), 4);
    assert!(!report.interrupted());
    assert!(!region.state().trap_locked(), "a failed trap must be unlocked again");
}

#[tokio::test]
#[serial]
async fn test_shutdown_interrupts_the_game() {
    let config = test_config("interrupt");
    let names = config.ipc.names();
    let region = SharedRegion::create(&names.shm).unwrap();
    let levers = Levers::create(&names.lever_one, &names.lever_two).unwrap();

    let dungeon = test_dungeon(&config);
    dungeon.shutdown_token().trigger();

    let mut report = DungeonReport::new();
    dungeon
        .play_challenges(region.state(), &levers, &SilentParty, &mut report)
        .await;

    assert!(report.interrupted());
    assert_eq!(report.records().len(), 1);
    assert_eq!(report.records()[0].verdict, Verdict::Interrupted);
}

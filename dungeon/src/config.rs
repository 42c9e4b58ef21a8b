//! Dungeon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ipc::IpcNames;

/// Main dungeon configuration, shared by the dungeon and all workers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Directory for per-process log files
    #[serde(rename = "log-dir")]
    pub log_dir: Option<PathBuf>,

    /// Shared object naming
    pub ipc: IpcConfig,

    /// Worker process settings
    pub workers: WorkersConfig,

    /// Timeouts and polling intervals
    pub timing: TimingConfig,

    /// Challenge parameters
    pub challenges: ChallengeConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        self.ipc.validate()?;
        self.timing.validate()?;
        self.challenges.validate()?;
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .dungeon.yml
        let local_config = PathBuf::from(".dungeon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/dungeon/dungeon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("dungeon").join("dungeon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Directory for log files: configured, else `<data_local_dir>/dungeon/logs`
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("dungeon")
                .join("logs")
        })
    }
}

/// Shared object naming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Prefix of the shared memory and semaphore names
    pub namespace: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            namespace: "dungeon".to_string(),
        }
    }
}

impl IpcConfig {
    pub fn names(&self) -> IpcNames {
        IpcNames::for_namespace(&self.namespace)
    }

    fn validate(&self) -> Result<()> {
        let valid_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
        if self.namespace.is_empty() || !self.namespace.chars().all(valid_char) {
            return Err(eyre::eyre!(
                "ipc.namespace must be non-empty and use only letters, digits, '_' or '-' (got {:?})",
                self.namespace
            ));
        }
        Ok(())
    }
}

/// Worker process settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Binary to run for the workers (defaults to the current executable)
    pub executable: Option<PathBuf>,
}

/// Timeouts and polling intervals, shared by both sides of each challenge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Idle sleep while holding a lever, and the worker liveness tick
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Sleep between re-reads inside the lock-pick and treasure loops
    #[serde(rename = "spin-interval-ms")]
    pub spin_interval_ms: u64,

    /// How long every worker has to report ready
    #[serde(rename = "readiness-timeout-ms")]
    pub readiness_timeout_ms: u64,

    #[serde(rename = "attack-timeout-ms")]
    pub attack_timeout_ms: u64,

    #[serde(rename = "barrier-timeout-ms")]
    pub barrier_timeout_ms: u64,

    /// Deadline of one lock-pick episode
    #[serde(rename = "pick-timeout-ms")]
    pub pick_timeout_ms: u64,

    /// Deadline of the treasure room rendezvous
    #[serde(rename = "treasure-timeout-ms")]
    pub treasure_timeout_ms: u64,

    /// Delay before each treasure character is revealed
    #[serde(rename = "reveal-interval-ms")]
    pub reveal_interval_ms: u64,

    /// Yield after the barbarian writes its attack
    #[serde(rename = "mirror-yield-us")]
    pub mirror_yield_us: u64,

    /// How long to wait for workers to exit before killing them
    #[serde(rename = "shutdown-grace-ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            spin_interval_ms: 1,
            readiness_timeout_ms: 5_000,
            attack_timeout_ms: 1_000,
            barrier_timeout_ms: 1_000,
            pick_timeout_ms: 5_000,
            treasure_timeout_ms: 5_000,
            reveal_interval_ms: 50,
            mirror_yield_us: 100,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn spin_interval(&self) -> Duration {
        Duration::from_millis(self.spin_interval_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn attack_timeout(&self) -> Duration {
        Duration::from_millis(self.attack_timeout_ms)
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_millis(self.barrier_timeout_ms)
    }

    pub fn pick_timeout(&self) -> Duration {
        Duration::from_millis(self.pick_timeout_ms)
    }

    pub fn treasure_timeout(&self) -> Duration {
        Duration::from_millis(self.treasure_timeout_ms)
    }

    pub fn reveal_interval(&self) -> Duration {
        Duration::from_millis(self.reveal_interval_ms)
    }

    pub fn mirror_yield(&self) -> Duration {
        Duration::from_micros(self.mirror_yield_us)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("poll-interval-ms", self.poll_interval_ms),
            ("spin-interval-ms", self.spin_interval_ms),
            ("readiness-timeout-ms", self.readiness_timeout_ms),
            ("attack-timeout-ms", self.attack_timeout_ms),
            ("barrier-timeout-ms", self.barrier_timeout_ms),
            ("pick-timeout-ms", self.pick_timeout_ms),
            ("treasure-timeout-ms", self.treasure_timeout_ms),
        ];
        for (key, value) in required {
            if value == 0 {
                return Err(eyre::eyre!("timing.{} must be greater than zero", key));
            }
        }
        Ok(())
    }
}

/// Challenge parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Attack/barrier/trap repetitions before the treasure room
    pub rounds: u32,

    /// Upper bound of the lock-pick angle
    #[serde(rename = "max-pick-angle")]
    pub max_pick_angle: f64,

    /// How close a pick must be to the target angle
    #[serde(rename = "pick-tolerance")]
    pub pick_tolerance: f64,

    /// Upper bound of the enemy health
    #[serde(rename = "max-enemy-health")]
    pub max_enemy_health: i32,

    /// Seed for reproducible challenges
    pub seed: Option<u64>,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            rounds: 1,
            max_pick_angle: 100.0,
            pick_tolerance: 0.001,
            max_enemy_health: 100,
            seed: None,
        }
    }
}

impl ChallengeConfig {
    fn validate(&self) -> Result<()> {
        if self.rounds == 0 {
            return Err(eyre::eyre!("challenges.rounds must be at least 1"));
        }
        if !(self.max_pick_angle > 0.0 && self.max_pick_angle.is_finite()) {
            return Err(eyre::eyre!("challenges.max-pick-angle must be a positive number"));
        }
        if !(self.pick_tolerance > 0.0 && self.pick_tolerance.is_finite()) {
            return Err(eyre::eyre!("challenges.pick-tolerance must be a positive number"));
        }
        if self.max_enemy_health < 1 {
            return Err(eyre::eyre!("challenges.max-enemy-health must be at least 1"));
        }
        Ok(())
    }
}

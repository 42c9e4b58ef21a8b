//! Dungeon - a four-process game played over shared memory
//!
//! One coordinator (the dungeon) and three workers (barbarian, wizard,
//! rogue) share a single [`ipc::DungeonState`] block. The dungeon posts a
//! challenge into shared memory and signals the worker concerned; the worker
//! answers in shared memory and the dungeon polls for it. The final
//! challenge is a rendezvous on two named semaphores.
//!
//! # Modules
//!
//! - [`ipc`] - shared memory, levers and signal notifications
//! - [`challenge`] - worker-side challenge engines
//! - [`worker`] - worker process runtime
//! - [`dungeon`] - coordinator, party management and challenge drivers
//! - [`config`] - YAML configuration
//! - [`poll`] / [`shutdown`] - bounded polling and cancellation

pub mod challenge;
pub mod cli;
pub mod config;
pub mod dungeon;
pub mod ipc;
pub mod poll;
pub mod role;
pub mod shutdown;
pub mod worker;

pub use config::Config;
pub use dungeon::{Dungeon, DungeonReport};
pub use role::Role;

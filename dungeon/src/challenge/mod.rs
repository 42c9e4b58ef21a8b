//! Worker-side challenge engines, one per role plus the shared treasure room

pub mod cipher;
pub mod lockpick;
pub mod mirror;
pub mod treasure;

pub use cipher::{decode, decode_spell, encode, seal_spell, solve_barrier};
pub use lockpick::{PickOutcome, PickState, pick_lock};
pub use mirror::mirror_attack;
pub use treasure::{DrainOutcome, HoldOutcome, barbarian_hold, drain_treasure, wizard_hold};

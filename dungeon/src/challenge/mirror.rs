//! Barbarian: answer an attack by mirroring the enemy's health

use std::time::Duration;

use tracing::debug;

use crate::ipc::DungeonState;

/// Copy `enemy_health` into `barbarian_attack`, then yield so the dungeon can observe it
///
/// Returns the value written, or `None` when the game has stopped.
pub async fn mirror_attack(state: &DungeonState, yield_for: Duration) -> Option<i32> {
    if !state.running() {
        return None;
    }
    let health = state.enemy_health();
    state.set_barbarian_attack(health);
    debug!(health, "mirror_attack: attack written");

    tokio::time::sleep(yield_for).await;
    Some(health)
}

//! The block of memory shared by the dungeon and its workers
//!
//! Every field is an atomic so that a mapping in four address spaces stays
//! defined behaviour, but nothing here is a lock: multi-byte values (spells,
//! treasure) are written one byte at a time and a reader may observe a torn
//! mix of old and new bytes. Correctness comes from the protocol, where each
//! field has a single writer per phase:
//!
//! | field | writer |
//! |---|---|
//! | `running`, `coordinator_pid`, `enemy_health`, `barrier_spell`, `treasure`, `trap_locked`, `trap_episode` | dungeon |
//! | `trap_direction` | dungeon (feedback, reset per episode) / rogue (`GuessReady`) |
//! | `barbarian_attack` | barbarian (dungeon zeroes it before posting the enemy) |
//! | `wizard_spell` | wizard (dungeon clears it before posting the barrier) |
//! | `rogue_pick`, `spoils` | rogue (clears `spoils` when the drain starts) |
//! | `ready` | each worker sets its own bit |
//!
//! Reads are snapshots and may be stale by the time they are used.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Capacity of the spell buffers, including the terminating NUL
pub const SPELL_BUFFER_SIZE: usize = 100;

/// Length of the treasure secret
pub const TREASURE_LEN: usize = 4;

/// Written by the dungeon once the block is initialised
pub const STATE_MAGIC: u32 = 0x4455_4E31; // "DUN1"

/// Feedback/request marker of the lock-pick trap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// No guess outstanding
    #[default]
    None,
    /// Rogue published a new guess in `rogue_pick`
    GuessReady,
    /// Last guess was below the target
    TooLow,
    /// Last guess was above the target
    TooHigh,
    /// Trap disarmed
    Solved,
}

impl Direction {
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::None => 0,
            Direction::GuessReady => b't',
            Direction::TooLow => b'u',
            Direction::TooHigh => b'd',
            Direction::Solved => b'-',
        }
    }

    /// Unknown bytes read as `None`
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b't' => Direction::GuessReady,
            b'u' => Direction::TooLow,
            b'd' => Direction::TooHigh,
            b'-' => Direction::Solved,
            _ => Direction::None,
        }
    }
}

/// Layout of the shared segment
///
/// All-zero bytes are a valid value, so a freshly truncated segment can be
/// viewed as a `DungeonState` directly.
#[repr(C)]
pub struct DungeonState {
    magic: AtomicU32,
    running: AtomicBool,
    ready: AtomicU8,
    coordinator_pid: AtomicI32,
    enemy_health: AtomicI32,
    barbarian_attack: AtomicI32,
    barrier_spell: [AtomicU8; SPELL_BUFFER_SIZE],
    wizard_spell: [AtomicU8; SPELL_BUFFER_SIZE],
    trap_locked: AtomicBool,
    trap_direction: AtomicU8,
    trap_episode: AtomicU32,
    rogue_pick: AtomicU64,
    treasure: [AtomicU8; TREASURE_LEN],
    spoils: [AtomicU8; TREASURE_LEN],
}

impl Default for DungeonState {
    fn default() -> Self {
        Self::new()
    }
}

impl DungeonState {
    /// A zeroed block, as a freshly created segment would contain
    pub const fn new() -> Self {
        Self {
            magic: AtomicU32::new(0),
            running: AtomicBool::new(false),
            ready: AtomicU8::new(0),
            coordinator_pid: AtomicI32::new(0),
            enemy_health: AtomicI32::new(0),
            barbarian_attack: AtomicI32::new(0),
            barrier_spell: [const { AtomicU8::new(0) }; SPELL_BUFFER_SIZE],
            wizard_spell: [const { AtomicU8::new(0) }; SPELL_BUFFER_SIZE],
            trap_locked: AtomicBool::new(false),
            trap_direction: AtomicU8::new(0),
            trap_episode: AtomicU32::new(0),
            rogue_pick: AtomicU64::new(0),
            treasure: [const { AtomicU8::new(0) }; TREASURE_LEN],
            spoils: [const { AtomicU8::new(0) }; TREASURE_LEN],
        }
    }

    /// Stamp the block as initialised by the coordinator `pid` and mark the game running
    pub fn initialize(&self, pid: i32) {
        self.coordinator_pid.store(pid, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);
        self.magic.store(STATE_MAGIC, Ordering::Release);
    }

    pub fn magic(&self) -> u32 {
        self.magic.load(Ordering::Acquire)
    }

    // === liveness ===

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn coordinator_pid(&self) -> i32 {
        self.coordinator_pid.load(Ordering::Relaxed)
    }

    /// Set `bit` in the readiness mask
    pub fn mark_ready(&self, bit: u8) {
        self.ready.fetch_or(bit, Ordering::AcqRel);
    }

    pub fn ready_mask(&self) -> u8 {
        self.ready.load(Ordering::Acquire)
    }

    // === attack ===

    pub fn enemy_health(&self) -> i32 {
        self.enemy_health.load(Ordering::Relaxed)
    }

    pub fn set_enemy_health(&self, health: i32) {
        self.enemy_health.store(health, Ordering::Relaxed);
    }

    pub fn barbarian_attack(&self) -> i32 {
        self.barbarian_attack.load(Ordering::Relaxed)
    }

    pub fn set_barbarian_attack(&self, attack: i32) {
        self.barbarian_attack.store(attack, Ordering::Relaxed);
    }

    // === barrier ===

    /// Ciphertext bytes up to the first NUL; the first byte is the shift key
    pub fn barrier_spell(&self) -> Vec<u8> {
        read_text(&self.barrier_spell)
    }

    /// Truncates to the buffer capacity and always NUL-terminates
    pub fn set_barrier_spell(&self, spell: &[u8]) {
        write_text(&self.barrier_spell, spell);
    }

    pub fn wizard_spell(&self) -> Vec<u8> {
        read_text(&self.wizard_spell)
    }

    pub fn set_wizard_spell(&self, spell: &[u8]) {
        write_text(&self.wizard_spell, spell);
    }

    // === trap ===

    pub fn trap_locked(&self) -> bool {
        self.trap_locked.load(Ordering::Acquire)
    }

    pub fn set_trap_locked(&self, locked: bool) {
        self.trap_locked.store(locked, Ordering::Release);
    }

    pub fn trap_direction(&self) -> Direction {
        Direction::from_byte(self.trap_direction.load(Ordering::Acquire))
    }

    pub fn set_trap_direction(&self, direction: Direction) {
        self.trap_direction.store(direction.as_byte(), Ordering::Release);
    }

    /// Number of the current lock-pick episode
    pub fn trap_episode(&self) -> u32 {
        self.trap_episode.load(Ordering::Acquire)
    }

    /// Arm the trap for a new episode and return its number
    ///
    /// The direction is cleared and the trap locked before the counter moves,
    /// so a rogue that reads the new number also reads a fresh, locked trap.
    pub fn begin_trap_episode(&self) -> u32 {
        self.set_trap_direction(Direction::None);
        self.set_trap_locked(true);
        self.trap_episode.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    pub fn rogue_pick(&self) -> f64 {
        f64::from_bits(self.rogue_pick.load(Ordering::Relaxed))
    }

    pub fn set_rogue_pick(&self, pick: f64) {
        self.rogue_pick.store(pick.to_bits(), Ordering::Relaxed);
    }

    /// Publish a guess: the pick is written before the marker that announces it
    pub fn publish_guess(&self, pick: f64) {
        self.set_rogue_pick(pick);
        self.set_trap_direction(Direction::GuessReady);
    }

    // === treasure room ===

    /// Treasure byte at `index`, `None` while still empty
    pub fn treasure_at(&self, index: usize) -> Option<u8> {
        non_empty(self.treasure[index].load(Ordering::Acquire))
    }

    pub fn set_treasure_at(&self, index: usize, byte: u8) {
        self.treasure[index].store(byte, Ordering::Release);
    }

    pub fn clear_treasure(&self) {
        clear(&self.treasure);
    }

    pub fn spoils_at(&self, index: usize) -> Option<u8> {
        non_empty(self.spoils[index].load(Ordering::Acquire))
    }

    pub fn set_spoils_at(&self, index: usize, byte: u8) {
        self.spoils[index].store(byte, Ordering::Release);
    }

    pub fn clear_spoils(&self) {
        clear(&self.spoils);
    }

    /// Spoils collected so far, up to the first empty slot
    pub fn spoils(&self) -> String {
        String::from_utf8_lossy(&read_text(&self.spoils)).into_owned()
    }

    /// Completion flag of the rendezvous: the last spoils slot is filled
    pub fn spoils_complete(&self) -> bool {
        self.spoils_at(TREASURE_LEN - 1).is_some()
    }
}

fn non_empty(byte: u8) -> Option<u8> {
    (byte != 0).then_some(byte)
}

fn read_text(buf: &[AtomicU8]) -> Vec<u8> {
    buf.iter()
        .map(|b| b.load(Ordering::Relaxed))
        .take_while(|&b| b != 0)
        .collect()
}

fn write_text(buf: &[AtomicU8], text: &[u8]) {
    let len = text.len().min(buf.len() - 1);
    for (slot, &byte) in buf.iter().zip(&text[..len]) {
        slot.store(byte, Ordering::Relaxed);
    }
    for slot in &buf[len..] {
        slot.store(0, Ordering::Relaxed);
    }
}

fn clear(buf: &[AtomicU8]) {
    for slot in buf {
        slot.store(0, Ordering::Release);
    }
}

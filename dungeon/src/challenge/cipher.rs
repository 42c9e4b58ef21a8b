//! Wizard: break the Caesar cipher on the magical barrier
//!
//! A barrier spell is `[key, ciphertext...]`: the first byte is the shift,
//! reduced mod 26, and every ASCII letter of the rest is shifted back by it
//! within its own case. Everything else passes through untouched.

use tracing::debug;

use crate::ipc::{DungeonState, SPELL_BUFFER_SIZE};

/// Shift every letter of `text` back by `key`
pub fn decode(key: u8, text: &[u8]) -> Vec<u8> {
    let back = 26 - (key % 26);
    text.iter().map(|&c| shift(c, back)).collect()
}

/// Shift every letter of `text` forward by `key`
pub fn encode(key: u8, text: &[u8]) -> Vec<u8> {
    text.iter().map(|&c| shift(c, key % 26)).collect()
}

/// Decode a full barrier spell, truncated so the result fits the spell buffer
pub fn decode_spell(spell: &[u8]) -> Vec<u8> {
    let Some((&key, text)) = spell.split_first() else {
        return Vec::new();
    };
    let mut plain = decode(key, text);
    plain.truncate(SPELL_BUFFER_SIZE - 1);
    plain
}

/// Build a barrier spell from a plaintext and key
pub fn seal_spell(key: u8, plain: &[u8]) -> Vec<u8> {
    let mut spell = Vec::with_capacity(plain.len() + 1);
    spell.push(key);
    spell.extend(encode(key, plain));
    spell
}

/// Read the barrier, decode it, and write the plaintext to the wizard's slot
///
/// Returns the decoded spell, or `None` when the game has stopped.
pub fn solve_barrier(state: &DungeonState) -> Option<Vec<u8>> {
    if !state.running() {
        return None;
    }
    let spell = state.barrier_spell();
    let plain = decode_spell(&spell);
    state.set_wizard_spell(&plain);
    debug!(key = spell.first().copied(), len = plain.len(), "solve_barrier: spell written");
    Some(plain)
}

fn shift(c: u8, by: u8) -> u8 {
    let base = match c {
        b'a'..=b'z' => b'a',
        b'A'..=b'Z' => b'A',
        _ => return c,
    };
    base + (c - base + by) % 26
}

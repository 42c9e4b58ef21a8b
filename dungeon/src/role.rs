//! Worker roles

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// One of the three worker processes spawned by the dungeon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Barbarian,
    Wizard,
    Rogue,
}

impl Role {
    /// All roles, in spawn order
    pub const ALL: [Role; 3] = [Role::Barbarian, Role::Wizard, Role::Rogue];

    /// Lowercase name, used for subcommand arguments and log file names
    pub fn name(&self) -> &'static str {
        match self {
            Role::Barbarian => "barbarian",
            Role::Wizard => "wizard",
            Role::Rogue => "rogue",
        }
    }

    /// Bit this role sets in the shared readiness mask
    pub fn ready_bit(&self) -> u8 {
        match self {
            Role::Barbarian => 0b001,
            Role::Wizard => 0b010,
            Role::Rogue => 0b100,
        }
    }

    /// Readiness mask with every role's bit set
    pub fn all_ready_mask() -> u8 {
        Self::ALL.iter().fold(0, |mask, role| mask | role.ready_bit())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

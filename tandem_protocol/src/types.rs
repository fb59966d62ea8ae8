// Core ID types for the lockstep protocol.
//
// Lightweight newtypes shared by the packet definitions (`message.rs`), the
// command record (`command.rs`) and the hub's roster. All of them travel as
// little-endian 32-bit integers on the wire (see `codec.rs`).
//
// Two reserved sentinels live here: `FactionId::NONE` ("no faction") and
// `UnitId::GLOBAL` ("applies to the whole session, not one unit"). Both are
// negative so they can never collide with ids the hub hands out.

use serde::{Deserialize, Serialize};

/// Hub-assigned connection id. Unique for the lifetime of a hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub i32);

/// Faction a command is issued on behalf of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactionId(pub i32);

impl FactionId {
    /// The command is not attributed to any faction.
    pub const NONE: FactionId = FactionId(-1);
}

/// An independently scheduled simulation partition (e.g. a map).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub i32);

impl UnitId {
    /// The command applies to the whole session.
    pub const GLOBAL: UnitId = UnitId(-1);

    pub fn is_global(self) -> bool {
        self == Self::GLOBAL
    }
}

/// Whether a peer is a regular player or a headless observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerType {
    Normal,
    Steam,
    Arbiter,
}

impl PlayerType {
    pub fn to_byte(self) -> u8 {
        match self {
            PlayerType::Normal => 0,
            PlayerType::Steam => 1,
            PlayerType::Arbiter => 2,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PlayerType::Normal),
            1 => Some(PlayerType::Steam),
            2 => Some(PlayerType::Arbiter),
            _ => None,
        }
    }
}

/// Simulation status a peer reports (or the hub infers) for itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerStatus {
    /// Catching up: loading the world or replaying the command log.
    #[default]
    Simulating,
    Playing,
    Desynced,
}

impl PlayerStatus {
    pub fn to_byte(self) -> u8 {
        match self {
            PlayerStatus::Simulating => 0,
            PlayerStatus::Playing => 1,
            PlayerStatus::Desynced => 2,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PlayerStatus::Simulating),
            1 => Some(PlayerStatus::Playing),
            2 => Some(PlayerStatus::Desynced),
            _ => None,
        }
    }
}

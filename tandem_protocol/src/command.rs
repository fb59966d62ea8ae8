// Scheduled commands: the unit of lockstep state mutation.
//
// A `ScheduledCommand` is an immutable record stamped by the hub with its
// logical tick at issue time. Every peer executes it at
// `issued_at + command_delay`, so the bytes produced by `encode` are exactly
// what gets logged per unit, replayed to late joiners, and fanned out.
//
// Wire layout (little-endian, see `codec.rs`):
//   kind:i32, issued_at:i32, faction:i32, unit:i32, payload_len:i32, payload
//
// `CommandKind` names the kinds the lockstep core itself interprets. All
// other kinds are game-domain effects the core never looks inside; they are
// carried as `CommandKind::Game(n)` and encoded as `GAME_KIND_BASE + n`.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::DecodeError;
use crate::types::{FactionId, UnitId};

/// First wire code reserved for game-domain command kinds.
pub const GAME_KIND_BASE: i32 = 64;

/// What a scheduled command does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Snapshot the session; issued globally by the hub.
    Autosave,
    /// Payload is a JSON `LongAction` to push onto the barrier.
    LongActionSchedule,
    /// Payload is a JSON `LongAction` to remove from the barrier.
    LongActionEnd,
    Pause,
    Unpause,
    /// Payload is the faction id (i32) whose last player left.
    FactionOffline,
    /// Opaque game-domain kind, handled by the simulation host.
    Game(i32),
}

impl CommandKind {
    pub fn code(self) -> i32 {
        match self {
            CommandKind::Autosave => 0,
            CommandKind::LongActionSchedule => 1,
            CommandKind::LongActionEnd => 2,
            CommandKind::Pause => 3,
            CommandKind::Unpause => 4,
            CommandKind::FactionOffline => 5,
            CommandKind::Game(n) => GAME_KIND_BASE.saturating_add(n),
        }
    }

    pub fn from_code(code: i32) -> Result<Self, DecodeError> {
        match code {
            0 => Ok(CommandKind::Autosave),
            1 => Ok(CommandKind::LongActionSchedule),
            2 => Ok(CommandKind::LongActionEnd),
            3 => Ok(CommandKind::Pause),
            4 => Ok(CommandKind::Unpause),
            5 => Ok(CommandKind::FactionOffline),
            n if n >= GAME_KIND_BASE => Ok(CommandKind::Game(n - GAME_KIND_BASE)),
            n => Err(DecodeError::UnknownCommandKind(n)),
        }
    }

    /// Barrier-affecting kinds go through the client's long-action queue
    /// instead of the ordinary command queue.
    pub fn affects_barrier(self) -> bool {
        matches!(
            self,
            CommandKind::LongActionSchedule | CommandKind::LongActionEnd
        )
    }

    /// Kinds only the hub may issue. Peers asking for these are ignored.
    pub fn hub_only(self) -> bool {
        matches!(
            self,
            CommandKind::Autosave
                | CommandKind::LongActionSchedule
                | CommandKind::LongActionEnd
                | CommandKind::FactionOffline
        )
    }
}

/// An immutable, tick-stamped state mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduledCommand {
    pub kind: CommandKind,
    pub issued_at: u32,
    pub faction: FactionId,
    pub unit: UnitId,
    pub payload: Vec<u8>,
}

impl ScheduledCommand {
    pub fn new(
        kind: CommandKind,
        issued_at: u32,
        faction: FactionId,
        unit: UnitId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            issued_at,
            faction,
            unit,
            payload,
        }
    }

    /// The tick at which every peer applies this command.
    pub fn due_tick(&self, command_delay: u32) -> u32 {
        self.issued_at.saturating_add(command_delay)
    }

    pub fn encode_into(&self, w: &mut ByteWriter) {
        w.write_i32(self.kind.code())
            .write_u32(self.issued_at)
            .write_i32(self.faction.0)
            .write_i32(self.unit.0)
            .write_bytes(&self.payload);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.encode_into(&mut w);
        w.into_bytes()
    }

    pub fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let kind = CommandKind::from_code(r.read_i32()?)?;
        let issued_at = r.read_u32()?;
        let faction = FactionId(r.read_i32()?);
        let unit = UnitId(r.read_i32()?);
        let payload = r.read_bytes()?;
        Ok(Self::new(kind, issued_at, faction, unit, payload))
    }

    /// Decode a standalone serialized command (as stored in a unit log).
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(bytes);
        let cmd = Self::decode_from(&mut r)?;
        r.finish()?;
        Ok(cmd)
    }
}

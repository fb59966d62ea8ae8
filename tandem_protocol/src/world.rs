// World snapshot streamed to a joining player.
//
// The snapshot is the last saved world plus everything needed to bring the
// joiner to the same point as the running peers: the serialized commands
// logged per unit since that save (replayed through the normal scheduling
// queues), the long actions still pending on the hub, the joiner's id block
// and faction, and the hub tick the snapshot was taken at.
//
// The world/unit blobs are opaque to the protocol; only the simulation host
// knows how to load them.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::DecodeError;
use crate::id_block::IdBlock;
use crate::long_action::LongAction;
use crate::types::{FactionId, UnitId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorldSnapshot {
    pub tick: u32,
    pub command_delay: u32,
    pub faction: FactionId,
    pub id_block: IdBlock,
    pub world: Vec<u8>,
    /// The joining player's own saved maps, if they left some behind.
    pub player_maps: Vec<u8>,
    pub unit_data: Vec<(UnitId, Vec<u8>)>,
    /// Serialized `ScheduledCommand`s per unit, in issue order.
    pub unit_logs: Vec<(UnitId, Vec<Vec<u8>>)>,
    pub pending_long_actions: Vec<LongAction>,
}

impl WorldSnapshot {
    pub fn encode_into(&self, w: &mut ByteWriter) {
        w.write_u32(self.tick)
            .write_u32(self.command_delay)
            .write_i32(self.faction.0);
        self.id_block.encode_into(w);
        w.write_bytes(&self.world).write_bytes(&self.player_maps);

        w.write_len(self.unit_data.len());
        for (unit, data) in &self.unit_data {
            w.write_i32(unit.0).write_bytes(data);
        }

        w.write_len(self.unit_logs.len());
        for (unit, commands) in &self.unit_logs {
            w.write_i32(unit.0).write_len(commands.len());
            for cmd in commands {
                w.write_bytes(cmd);
            }
        }

        w.write_len(self.pending_long_actions.len());
        for action in &self.pending_long_actions {
            w.write_bytes(&action.to_payload());
        }
    }

    pub fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let tick = r.read_u32()?;
        let command_delay = r.read_u32()?;
        let faction = FactionId(r.read_i32()?);
        let id_block = IdBlock::decode_from(r)?;
        let world = r.read_bytes()?;
        let player_maps = r.read_bytes()?;

        let mut unit_data = Vec::new();
        for _ in 0..r.read_len()? {
            unit_data.push((UnitId(r.read_i32()?), r.read_bytes()?));
        }

        let mut unit_logs = Vec::new();
        for _ in 0..r.read_len()? {
            let unit = UnitId(r.read_i32()?);
            let mut commands = Vec::new();
            for _ in 0..r.read_len()? {
                commands.push(r.read_bytes()?);
            }
            unit_logs.push((unit, commands));
        }

        let mut pending_long_actions = Vec::new();
        for _ in 0..r.read_len()? {
            pending_long_actions.push(LongAction::from_payload(&r.read_bytes()?)?);
        }

        Ok(Self {
            tick,
            command_delay,
            faction,
            id_block,
            world,
            player_maps,
            unit_data,
            unit_logs,
            pending_long_actions,
        })
    }
}

// Player roster records carried by the `PlayerList` server packet.
//
// The hub sends the full list once when a peer starts playing, then
// incremental updates: add, remove, status change, and a periodic latency
// sweep. `PlayerListUpdate::apply` lets a client keep a local mirror.

use std::collections::BTreeMap;

use crate::codec::{ByteReader, ByteWriter};
use crate::error::DecodeError;
use crate::types::{PlayerId, PlayerStatus, PlayerType};

/// Public view of one connected player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub username: String,
    pub latency_ms: u32,
    pub kind: PlayerType,
    pub status: PlayerStatus,
}

impl PlayerInfo {
    pub fn encode_into(&self, w: &mut ByteWriter) {
        w.write_i32(self.id.0)
            .write_string(&self.username)
            .write_u32(self.latency_ms)
            .write_u8(self.kind.to_byte())
            .write_u8(self.status.to_byte());
    }

    pub fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let id = PlayerId(r.read_i32()?);
        let username = r.read_string()?;
        let latency_ms = r.read_u32()?;
        let kind_tag = r.read_u8()?;
        let kind = PlayerType::from_byte(kind_tag).ok_or(DecodeError::InvalidTag {
            field: "player type",
            value: kind_tag,
        })?;
        let status = read_status(r)?;
        Ok(Self {
            id,
            username,
            latency_ms,
            kind,
            status,
        })
    }
}

fn read_status(r: &mut ByteReader<'_>) -> Result<PlayerStatus, DecodeError> {
    let tag = r.read_u8()?;
    PlayerStatus::from_byte(tag).ok_or(DecodeError::InvalidTag {
        field: "player status",
        value: tag,
    })
}

/// One roster change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerListUpdate {
    List(Vec<PlayerInfo>),
    Add(PlayerInfo),
    Remove(PlayerId),
    Latencies(Vec<(PlayerId, u32)>),
    Status(PlayerId, PlayerStatus),
}

impl PlayerListUpdate {
    pub fn encode_into(&self, w: &mut ByteWriter) {
        match self {
            PlayerListUpdate::List(players) => {
                w.write_u8(0).write_len(players.len());
                for p in players {
                    p.encode_into(w);
                }
            }
            PlayerListUpdate::Add(player) => {
                w.write_u8(1);
                player.encode_into(w);
            }
            PlayerListUpdate::Remove(id) => {
                w.write_u8(2).write_i32(id.0);
            }
            PlayerListUpdate::Latencies(entries) => {
                w.write_u8(3).write_len(entries.len());
                for (id, latency) in entries {
                    w.write_i32(id.0).write_u32(*latency);
                }
            }
            PlayerListUpdate::Status(id, status) => {
                w.write_u8(4).write_i32(id.0).write_u8(status.to_byte());
            }
        }
    }

    pub fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        match r.read_u8()? {
            0 => {
                let count = r.read_len()?;
                let mut players = Vec::new();
                for _ in 0..count {
                    players.push(PlayerInfo::decode_from(r)?);
                }
                Ok(PlayerListUpdate::List(players))
            }
            1 => Ok(PlayerListUpdate::Add(PlayerInfo::decode_from(r)?)),
            2 => Ok(PlayerListUpdate::Remove(PlayerId(r.read_i32()?))),
            3 => {
                let count = r.read_len()?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    entries.push((PlayerId(r.read_i32()?), r.read_u32()?));
                }
                Ok(PlayerListUpdate::Latencies(entries))
            }
            4 => {
                let id = PlayerId(r.read_i32()?);
                Ok(PlayerListUpdate::Status(id, read_status(r)?))
            }
            value => Err(DecodeError::InvalidTag {
                field: "player list action",
                value,
            }),
        }
    }

    /// Fold this update into a client-side roster mirror.
    pub fn apply(self, roster: &mut BTreeMap<PlayerId, PlayerInfo>) {
        match self {
            PlayerListUpdate::List(players) => {
                roster.clear();
                roster.extend(players.into_iter().map(|p| (p.id, p)));
            }
            PlayerListUpdate::Add(player) => {
                roster.insert(player.id, player);
            }
            PlayerListUpdate::Remove(id) => {
                roster.remove(&id);
            }
            PlayerListUpdate::Latencies(entries) => {
                for (id, latency) in entries {
                    if let Some(p) = roster.get_mut(&id) {
                        p.latency_ms = latency;
                    }
                }
            }
            PlayerListUpdate::Status(id, status) => {
                if let Some(p) = roster.get_mut(&id) {
                    p.status = status;
                }
            }
        }
    }
}

// Protocol messages for client-hub communication.
//
// Two enums define the full vocabulary:
// - `ClientMessage`: sent by peers to the hub.
// - `ServerMessage`: sent by the hub to peers.
//
// On the wire each message is a one-byte packet id plus a payload built with
// `codec.rs` (see `framing.rs` for the frame around it). `encode` returns the
// `(id, payload)` pair; `decode` goes the other way and rejects unknown ids,
// malformed payloads and trailing bytes.
//
// The server's `Command` packet is special: its payload is a serialized
// `ScheduledCommand` followed by a single originator byte, so the hub can
// encode a command once and append a different flag per recipient
// (`command_payload`).

use crate::codec::{ByteReader, ByteWriter};
use crate::command::{CommandKind, ScheduledCommand};
use crate::error::DecodeError;
use crate::id_block::IdBlock;
use crate::roster::PlayerListUpdate;
use crate::types::UnitId;
use crate::world::WorldSnapshot;

/// Packet ids for messages sent by peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientPacket {
    Username = 0,
    RequestWorld = 1,
    WorldLoaded = 2,
    Command = 3,
    NewWorldObject = 4,
    QuitMaps = 5,
    EncounterRequest = 6,
    MapResponse = 7,
    MapLoaded = 8,
    GeneratingMap = 9,
    MapGenerated = 10,
    Autosaved = 11,
    RequestIdBlock = 12,
    Desynced = 13,
    KeepAlive = 14,
    Chat = 15,
}

impl TryFrom<u8> for ClientPacket {
    type Error = DecodeError;

    fn try_from(id: u8) -> Result<Self, DecodeError> {
        use ClientPacket::*;
        let packet = match id {
            0 => Username,
            1 => RequestWorld,
            2 => WorldLoaded,
            3 => Command,
            4 => NewWorldObject,
            5 => QuitMaps,
            6 => EncounterRequest,
            7 => MapResponse,
            8 => MapLoaded,
            9 => GeneratingMap,
            10 => MapGenerated,
            11 => Autosaved,
            12 => RequestIdBlock,
            13 => Desynced,
            14 => KeepAlive,
            15 => Chat,
            other => return Err(DecodeError::UnknownPacket(other)),
        };
        Ok(packet)
    }
}

/// Packet ids for messages sent by the hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerPacket {
    DisconnectReason = 0,
    PlayerList = 1,
    Command = 2,
    WorldData = 3,
    IdBlock = 4,
    TimeControl = 5,
    KeepAlive = 6,
    MapRequest = 7,
    MapResponse = 8,
    NewWorldObject = 9,
    Chat = 10,
    Notification = 11,
}

impl TryFrom<u8> for ServerPacket {
    type Error = DecodeError;

    fn try_from(id: u8) -> Result<Self, DecodeError> {
        use ServerPacket::*;
        let packet = match id {
            0 => DisconnectReason,
            1 => PlayerList,
            2 => Command,
            3 => WorldData,
            4 => IdBlock,
            5 => TimeControl,
            6 => KeepAlive,
            7 => MapRequest,
            8 => MapResponse,
            9 => NewWorldObject,
            10 => Chat,
            11 => Notification,
            other => return Err(DecodeError::UnknownPacket(other)),
        };
        Ok(packet)
    }
}

/// Messages sent by a peer to the hub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// First message after connecting.
    Username { username: String },
    /// Ask for the world snapshot (starts a `PlayerJoin` long action).
    RequestWorld,
    /// The snapshot has been loaded; the peer starts playing.
    WorldLoaded,
    /// Ask the hub to schedule a command for everyone.
    Command {
        kind: CommandKind,
        unit: UnitId,
        payload: Vec<u8>,
    },
    /// A world object created locally that other peers need.
    NewWorldObject { data: Vec<u8> },
    /// The peer's own maps, stored for its next join.
    QuitMaps { data: Vec<u8> },
    EncounterRequest { defender: String, tile: i32 },
    /// The defender's map, for the attacker of the current encounter.
    MapResponse { data: Vec<u8> },
    /// The attacker finished loading the encounter map.
    MapLoaded,
    GeneratingMap,
    MapGenerated,
    /// Result of executing an `Autosave` command (host peer only).
    Autosaved {
        world: Vec<u8>,
        units: Vec<(UnitId, Vec<u8>)>,
    },
    RequestIdBlock,
    Desynced,
    KeepAlive { id: i32 },
    Chat { text: String },
}

impl ClientMessage {
    pub fn packet(&self) -> ClientPacket {
        match self {
            ClientMessage::Username { .. } => ClientPacket::Username,
            ClientMessage::RequestWorld => ClientPacket::RequestWorld,
            ClientMessage::WorldLoaded => ClientPacket::WorldLoaded,
            ClientMessage::Command { .. } => ClientPacket::Command,
            ClientMessage::NewWorldObject { .. } => ClientPacket::NewWorldObject,
            ClientMessage::QuitMaps { .. } => ClientPacket::QuitMaps,
            ClientMessage::EncounterRequest { .. } => ClientPacket::EncounterRequest,
            ClientMessage::MapResponse { .. } => ClientPacket::MapResponse,
            ClientMessage::MapLoaded => ClientPacket::MapLoaded,
            ClientMessage::GeneratingMap => ClientPacket::GeneratingMap,
            ClientMessage::MapGenerated => ClientPacket::MapGenerated,
            ClientMessage::Autosaved { .. } => ClientPacket::Autosaved,
            ClientMessage::RequestIdBlock => ClientPacket::RequestIdBlock,
            ClientMessage::Desynced => ClientPacket::Desynced,
            ClientMessage::KeepAlive { .. } => ClientPacket::KeepAlive,
            ClientMessage::Chat { .. } => ClientPacket::Chat,
        }
    }

    pub fn encode(&self) -> (u8, Vec<u8>) {
        let mut w = ByteWriter::new();
        match self {
            ClientMessage::Username { username } => {
                w.write_string(username);
            }
            ClientMessage::Command {
                kind,
                unit,
                payload,
            } => {
                w.write_i32(kind.code()).write_i32(unit.0).write_bytes(payload);
            }
            ClientMessage::NewWorldObject { data }
            | ClientMessage::QuitMaps { data }
            | ClientMessage::MapResponse { data } => {
                w.write_bytes(data);
            }
            ClientMessage::EncounterRequest { defender, tile } => {
                w.write_string(defender).write_i32(*tile);
            }
            ClientMessage::Autosaved { world, units } => {
                w.write_bytes(world).write_len(units.len());
                for (unit, data) in units {
                    w.write_i32(unit.0).write_bytes(data);
                }
            }
            ClientMessage::KeepAlive { id } => {
                w.write_i32(*id);
            }
            ClientMessage::Chat { text } => {
                w.write_string(text);
            }
            ClientMessage::RequestWorld
            | ClientMessage::WorldLoaded
            | ClientMessage::MapLoaded
            | ClientMessage::GeneratingMap
            | ClientMessage::MapGenerated
            | ClientMessage::RequestIdBlock
            | ClientMessage::Desynced => {}
        }
        (self.packet() as u8, w.into_bytes())
    }

    pub fn decode(packet_id: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(payload);
        let msg = match ClientPacket::try_from(packet_id)? {
            ClientPacket::Username => ClientMessage::Username {
                username: r.read_string()?,
            },
            ClientPacket::RequestWorld => ClientMessage::RequestWorld,
            ClientPacket::WorldLoaded => ClientMessage::WorldLoaded,
            ClientPacket::Command => ClientMessage::Command {
                kind: CommandKind::from_code(r.read_i32()?)?,
                unit: UnitId(r.read_i32()?),
                payload: r.read_bytes()?,
            },
            ClientPacket::NewWorldObject => ClientMessage::NewWorldObject {
                data: r.read_bytes()?,
            },
            ClientPacket::QuitMaps => ClientMessage::QuitMaps {
                data: r.read_bytes()?,
            },
            ClientPacket::EncounterRequest => ClientMessage::EncounterRequest {
                defender: r.read_string()?,
                tile: r.read_i32()?,
            },
            ClientPacket::MapResponse => ClientMessage::MapResponse {
                data: r.read_bytes()?,
            },
            ClientPacket::MapLoaded => ClientMessage::MapLoaded,
            ClientPacket::GeneratingMap => ClientMessage::GeneratingMap,
            ClientPacket::MapGenerated => ClientMessage::MapGenerated,
            ClientPacket::Autosaved => {
                let world = r.read_bytes()?;
                let mut units = Vec::new();
                for _ in 0..r.read_len()? {
                    units.push((UnitId(r.read_i32()?), r.read_bytes()?));
                }
                ClientMessage::Autosaved { world, units }
            }
            ClientPacket::RequestIdBlock => ClientMessage::RequestIdBlock,
            ClientPacket::Desynced => ClientMessage::Desynced,
            ClientPacket::KeepAlive => ClientMessage::KeepAlive { id: r.read_i32()? },
            ClientPacket::Chat => ClientMessage::Chat {
                text: r.read_string()?,
            },
        };
        r.finish()?;
        Ok(msg)
    }
}

/// Messages sent by the hub to a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    /// Sent right before the hub closes the connection.
    DisconnectReason { reason: String },
    PlayerList(PlayerListUpdate),
    /// A command to schedule. `originator` is set for the peer that asked
    /// for it, so locally predicted actions are not applied twice.
    Command {
        command: ScheduledCommand,
        originator: bool,
    },
    WorldData(Box<WorldSnapshot>),
    /// A fresh id namespace for the receiving peer.
    IdBlock { block: IdBlock },
    /// The hub's logical tick; peers must not simulate past it.
    TimeControl { tick: u32 },
    KeepAlive { id: i32 },
    /// Ask the defender for the map at `tile`.
    MapRequest { tile: i32 },
    /// The defender's map, forwarded to the attacker.
    MapResponse { data: Vec<u8> },
    NewWorldObject { data: Vec<u8> },
    Chat { text: String },
    /// Localizable notice: a translation key plus arguments.
    Notification { key: String, args: Vec<String> },
}

/// Build the `Command` packet payload from an already serialized command.
pub fn command_payload(serialized: &[u8], originator: bool) -> Vec<u8> {
    let mut payload = Vec::with_capacity(serialized.len() + 1);
    payload.extend_from_slice(serialized);
    payload.push(u8::from(originator));
    payload
}

impl ServerMessage {
    pub fn packet(&self) -> ServerPacket {
        match self {
            ServerMessage::DisconnectReason { .. } => ServerPacket::DisconnectReason,
            ServerMessage::PlayerList(_) => ServerPacket::PlayerList,
            ServerMessage::Command { .. } => ServerPacket::Command,
            ServerMessage::WorldData(_) => ServerPacket::WorldData,
            ServerMessage::IdBlock { .. } => ServerPacket::IdBlock,
            ServerMessage::TimeControl { .. } => ServerPacket::TimeControl,
            ServerMessage::KeepAlive { .. } => ServerPacket::KeepAlive,
            ServerMessage::MapRequest { .. } => ServerPacket::MapRequest,
            ServerMessage::MapResponse { .. } => ServerPacket::MapResponse,
            ServerMessage::NewWorldObject { .. } => ServerPacket::NewWorldObject,
            ServerMessage::Chat { .. } => ServerPacket::Chat,
            ServerMessage::Notification { .. } => ServerPacket::Notification,
        }
    }

    pub fn encode(&self) -> (u8, Vec<u8>) {
        let mut w = ByteWriter::new();
        match self {
            ServerMessage::DisconnectReason { reason } => {
                w.write_string(reason);
            }
            ServerMessage::PlayerList(update) => update.encode_into(&mut w),
            ServerMessage::Command {
                command,
                originator,
            } => {
                command.encode_into(&mut w);
                w.write_bool(*originator);
            }
            ServerMessage::WorldData(snapshot) => snapshot.encode_into(&mut w),
            ServerMessage::IdBlock { block } => block.encode_into(&mut w),
            ServerMessage::TimeControl { tick } => {
                w.write_u32(*tick);
            }
            ServerMessage::KeepAlive { id } => {
                w.write_i32(*id);
            }
            ServerMessage::MapRequest { tile } => {
                w.write_i32(*tile);
            }
            ServerMessage::MapResponse { data } | ServerMessage::NewWorldObject { data } => {
                w.write_bytes(data);
            }
            ServerMessage::Chat { text } => {
                w.write_string(text);
            }
            ServerMessage::Notification { key, args } => {
                w.write_string(key).write_len(args.len());
                for arg in args {
                    w.write_string(arg);
                }
            }
        }
        (self.packet() as u8, w.into_bytes())
    }

    pub fn decode(packet_id: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(payload);
        let msg = match ServerPacket::try_from(packet_id)? {
            ServerPacket::DisconnectReason => ServerMessage::DisconnectReason {
                reason: r.read_string()?,
            },
            ServerPacket::PlayerList => {
                ServerMessage::PlayerList(PlayerListUpdate::decode_from(&mut r)?)
            }
            ServerPacket::Command => ServerMessage::Command {
                command: ScheduledCommand::decode_from(&mut r)?,
                originator: r.read_bool()?,
            },
            ServerPacket::WorldData => {
                ServerMessage::WorldData(Box::new(WorldSnapshot::decode_from(&mut r)?))
            }
            ServerPacket::IdBlock => ServerMessage::IdBlock {
                block: IdBlock::decode_from(&mut r)?,
            },
            ServerPacket::TimeControl => ServerMessage::TimeControl {
                tick: r.read_u32()?,
            },
            ServerPacket::KeepAlive => ServerMessage::KeepAlive { id: r.read_i32()? },
            ServerPacket::MapRequest => ServerMessage::MapRequest { tile: r.read_i32()? },
            ServerPacket::MapResponse => ServerMessage::MapResponse {
                data: r.read_bytes()?,
            },
            ServerPacket::NewWorldObject => ServerMessage::NewWorldObject {
                data: r.read_bytes()?,
            },
            ServerPacket::Chat => ServerMessage::Chat {
                text: r.read_string()?,
            },
            ServerPacket::Notification => {
                let key = r.read_string()?;
                let mut args = Vec::new();
                for _ in 0..r.read_len()? {
                    args.push(r.read_string()?);
                }
                ServerMessage::Notification { key, args }
            }
        };
        r.finish()?;
        Ok(msg)
    }
}

// tandem_protocol: wire protocol for the lockstep hub and its peers.
//
// This crate defines the packets, framing, and binary encoding shared by the
// hub (`tandem_hub`) and game clients. It knows nothing about the simulation:
// world data, unit data and game command payloads are opaque bytes.
//
// Module overview:
// - `types.rs`:       Id newtypes (`PlayerId`, `FactionId`, `UnitId`) and the
//                     `PlayerType` / `PlayerStatus` tags.
// - `codec.rs`:       Little-endian `ByteWriter` / `ByteReader` with
//                     length-prefixed strings and byte arrays.
// - `framing.rs`:     4-byte big-endian length prefix + packet id framing over
//                     any `Read`/`Write` stream.
// - `command.rs`:     `ScheduledCommand` and `CommandKind`, the unit of
//                     lockstep mutation.
// - `id_block.rs`:    `IdBlock`, a disjoint object-id range owned by one peer.
// - `long_action.rs`: `LongAction`, the barrier operations (join, encounter,
//                     map generation) carried as JSON command payloads.
// - `roster.rs`:      `PlayerInfo` and `PlayerListUpdate` for the roster.
// - `world.rs`:       `WorldSnapshot` streamed to joining players.
// - `message.rs`:     Packet id enums plus the typed `ClientMessage` and
//                     `ServerMessage` views.
// - `error.rs`:       `DecodeError`.
//
// Design decisions:
// - **Binary payloads.** Commands are logged and replayed byte-for-byte, so
//   their encoding must be stable and compact. Only `LongAction` uses JSON,
//   since it is small and rarely sent.
// - **No async runtime.** Framing uses `std::io::Read`/`Write`, compatible
//   with blocking TCP streams and in-memory buffers alike.

pub mod codec;
pub mod command;
pub mod error;
pub mod framing;
pub mod id_block;
pub mod long_action;
pub mod message;
pub mod roster;
pub mod types;
pub mod world;

pub use codec::{ByteReader, ByteWriter};
pub use command::{CommandKind, GAME_KIND_BASE, ScheduledCommand};
pub use error::DecodeError;
pub use framing::{MAX_FRAME_SIZE, read_packet, write_packet};
pub use id_block::IdBlock;
pub use long_action::LongAction;
pub use message::{ClientMessage, ClientPacket, ServerMessage, ServerPacket, command_payload};
pub use roster::{PlayerInfo, PlayerListUpdate};
pub use types::{FactionId, PlayerId, PlayerStatus, PlayerType, UnitId};
pub use world::WorldSnapshot;

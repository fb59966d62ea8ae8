// tandem_hub: lockstep session hub and the peer-side session that talks to it.
//
// The hub never runs the simulation. It stamps every state-changing command
// with its logical tick and fans it out so every peer applies it at the same
// tick (`issued_at + command_delay`), hands out disjoint object id blocks,
// and coordinates multi-party transitions (world handoff, encounters, map
// generation) through a long-action barrier.
//
// Module overview:
// - `hub.rs`:            The `Hub` context: roster, tick, command log,
//                        id allocator, barrier, autosave, periodic work.
// - `server.rs`:         TCP listener, reader threads, the main loop that
//                        owns the `Hub`, and in-process (local) peers.
// - `action_queue.rs`:   Multi-producer closure queue drained by one owner.
// - `connection.rs`:     Per-connection state (`ServerState`, lifecycle).
// - `transport.rs`:      Write half of a connection (TCP or channel).
// - `gate.rs`:           Admission hook (`ConnectionGate`).
// - `command_log.rs`:    Per-unit command log with autosave recording.
// - `command_queue.rs`:  Peer-side due-tick queues.
// - `id_alloc.rs`:       Monotonic id block allocator.
// - `barrier.rs`:        Long-action FIFO.
// - `countdown.rs`:      Countdown rendezvous over a set of ids.
// - `clock.rs`:          Fixed-step tick accumulator.
// - `client.rs`:         `PeerLink`: peer-side transport plus inbox.
// - `client_session.rs`: `ClientSession` and the `SimulationHost` trait.
// - `config.rs`:         `ServerSettings` (TOML).
// - `persistence.rs`:    `SnapshotStore` for saved games and player maps.
// - `error.rs`:          Error types.
//
// The hub can run as the standalone `tandem-hub` binary (`main.rs`) or be
// embedded in a game process via `start_server`.

pub mod action_queue;
pub mod barrier;
pub mod client;
pub mod client_session;
pub mod clock;
pub mod command_log;
pub mod command_queue;
pub mod config;
pub mod connection;
pub mod countdown;
pub mod error;
pub mod gate;
pub mod hub;
pub mod id_alloc;
pub mod persistence;
pub mod server;
pub mod transport;

pub use client::PeerLink;
pub use client_session::{ClientSession, ClientState, SimulationHost};
pub use config::ServerSettings;
pub use error::{ClientError, HubError, ProtocolError, StoreError};
pub use hub::Hub;
pub use persistence::{FileStore, MemoryStore, SnapshotStore};
pub use server::{ServerHandle, start_server, start_with_hub};

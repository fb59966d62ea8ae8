// Test-only game client for multiplayer integration tests.
//
// Pairs the real `ClientSession` (from `tandem_hub::client_session`) with
// `ToyWorld`, a tiny deterministic simulation that records every game
// command it executes together with the tick it ran on. Comparing two
// peers' ledgers is then enough to check lockstep: same commands, same
// order, same ticks.
//
// The only test-specific code here is the toy world and the synchronous
// pumping loop. Networking, scheduling and barrier handling use the same
// code paths as a real game.
//
// See also: `tests/full_pipeline.rs` for the integration test scenarios.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tandem_hub::{ClientError, ClientSession, PeerLink, ServerHandle, SimulationHost};
use tandem_protocol::{CommandKind, PlayerType, ScheduledCommand, UnitId, WorldSnapshot};

/// Default timeout for blocking pump operations.
const PUMP_TIMEOUT: Duration = Duration::from_secs(15);

/// Sleep duration between pump rounds.
const PUMP_INTERVAL: Duration = Duration::from_millis(5);

/// One executed command, as the world saw it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub tick: u32,
    pub kind: i32,
    pub payload: Vec<u8>,
}

/// Deterministic stand-in for a game simulation. Only `tick` and `ledger`
/// are part of the saved world; the rest is local observation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToyWorld {
    pub tick: u32,
    pub ledger: Vec<LedgerEntry>,
    #[serde(skip)]
    pub paused: bool,
    #[serde(skip)]
    pub maps_loaded: Vec<Vec<u8>>,
    #[serde(skip)]
    pub objects: Vec<Vec<u8>>,
    #[serde(skip)]
    pub autosaves: u32,
    #[serde(skip)]
    pub messages: Vec<String>,
}

impl SimulationHost for ToyWorld {
    fn tick(&self) -> u32 {
        self.tick
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn load_world(&mut self, snapshot: &WorldSnapshot) {
        let saved: ToyWorld = if snapshot.world.is_empty() {
            ToyWorld::default()
        } else {
            serde_json::from_slice(&snapshot.world).expect("saved toy world is valid JSON")
        };
        self.tick = saved.tick;
        self.ledger = saved.ledger;
    }

    fn execute(&mut self, command: &ScheduledCommand, _originated_locally: bool) {
        self.ledger.push(LedgerEntry {
            tick: self.tick,
            kind: command.kind.code(),
            payload: command.payload.clone(),
        });
    }

    fn autosave(&mut self) -> (Vec<u8>, Vec<(UnitId, Vec<u8>)>) {
        self.autosaves += 1;
        let world = serde_json::to_vec(self).expect("toy world serializes");
        (world, Vec::new())
    }

    fn save_map(&mut self, tile: i32) -> Vec<u8> {
        format!("map:{tile}").into_bytes()
    }

    fn load_map(&mut self, data: &[u8]) {
        self.maps_loaded.push(data.to_vec());
    }

    fn add_world_object(&mut self, data: &[u8]) {
        self.objects.push(data.to_vec());
    }

    fn message(&mut self, text: &str) {
        self.messages.push(text.into());
    }
}

/// A test game client: a real session driving a toy world.
pub struct TestGameClient {
    pub session: ClientSession,
    pub world: ToyWorld,
}

impl TestGameClient {
    /// Join over TCP.
    pub fn join_tcp(addr: SocketAddr, username: &str, is_host: bool) -> Self {
        let link = PeerLink::tcp(addr).expect("TestGameClient::join_tcp failed");
        Self::join(link, username, is_host)
    }

    /// Join through the hub's in-process transport.
    pub fn join_local(handle: &ServerHandle, username: &str, is_host: bool) -> Self {
        Self::join(handle.connect_local(PlayerType::Normal), username, is_host)
    }

    fn join(link: PeerLink, username: &str, is_host: bool) -> Self {
        let session = ClientSession::join(username, link, is_host).expect("join failed");
        Self {
            session,
            world: ToyWorld::default(),
        }
    }

    /// One frame: drain the network, then simulate as far as allowed.
    pub fn step(&mut self) -> Result<(), ClientError> {
        self.session.update(&mut self.world)?;
        while self.session.can_advance(&self.world) {
            self.world.tick += 1;
            self.session.on_tick(&mut self.world)?;
        }
        Ok(())
    }

    /// Playing, with no long action pending and the world running.
    pub fn is_settled(&self) -> bool {
        self.session.is_playing() && self.session.barrier().is_idle() && !self.world.paused
    }

    pub fn send_game(&mut self, kind: i32, payload: &[u8]) {
        self.session
            .request(CommandKind::Game(kind), UnitId(0), payload.to_vec())
            .expect("send_game failed");
    }

    /// Game commands executed so far, without hub-issued kinds.
    pub fn game_ledger(&self) -> Vec<LedgerEntry> {
        self.world
            .ledger
            .iter()
            .filter(|e| e.kind >= tandem_protocol::GAME_KIND_BASE)
            .cloned()
            .collect()
    }
}

/// Step every client until `done` holds, panicking after a timeout.
pub fn pump_until(
    clients: &mut [&mut TestGameClient],
    what: &str,
    mut done: impl FnMut(&[&mut TestGameClient]) -> bool,
) {
    let start = Instant::now();
    loop {
        for client in clients.iter_mut() {
            if let Err(e) = client.step() {
                panic!("{} failed while waiting for {what}: {e}", client.session.username());
            }
        }
        if done(clients) {
            return;
        }
        assert!(start.elapsed() < PUMP_TIMEOUT, "timed out waiting for {what}");
        thread::sleep(PUMP_INTERVAL);
    }
}

/// Opt-in log output for debugging a failing scenario.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Peer-side half of the session: connection state, command scheduling and
// the client's copy of the long-action barrier.
//
// `ClientSession` sits between a `PeerLink` and the game simulation, which it
// only sees through the `SimulationHost` trait. It never advances time
// itself; the owner calls `update()` once per frame and `on_tick()` after
// every simulation tick.
//
// States:
//
//   WorldTransfer { requested } --WorldData--> Playing
//   any --DisconnectReason / link closed--> Disconnected
//
// Received commands are filed into two queues keyed on `issued_at + delay`:
//
// - barrier commands (long action schedule/end) run at their due tick while
//   the simulation advances, and immediately whenever it is paused;
// - ordinary commands run at their due tick, or immediately while paused,
//   but never while a long action is pending.
//
// A `LongActionSchedule` pauses the simulation; when the barrier drains the
// session resumes it, unless something else had paused it first. Only the
// hub runs long-action side effects, so the local barrier is non-runnable.

use std::collections::BTreeMap;
use std::sync::mpsc::TryRecvError;

use tandem_protocol::{
    ClientMessage, CommandKind, FactionId, IdBlock, LongAction, PlayerId, PlayerInfo,
    ScheduledCommand, ServerMessage, UnitId, WorldSnapshot,
};

use crate::barrier::LongActionQueue;
use crate::client::PeerLink;
use crate::command_queue::{CommandQueues, DueCommand};
use crate::error::ClientError;
use crate::transport::Inbound;

/// The game simulation as the session sees it.
pub trait SimulationHost {
    /// Current simulation tick.
    fn tick(&self) -> u32;
    fn is_paused(&self) -> bool;
    fn set_paused(&mut self, paused: bool);
    /// Replace the local world with the one in the snapshot.
    fn load_world(&mut self, snapshot: &WorldSnapshot);
    /// Apply a game-domain command (also `FactionOffline`).
    /// `originated_locally` is set when this peer asked for it.
    fn execute(&mut self, command: &ScheduledCommand, originated_locally: bool);
    /// Produce the world and per-unit data for an autosave.
    fn autosave(&mut self) -> (Vec<u8>, Vec<(UnitId, Vec<u8>)>);
    /// Serialize the map at `tile` for an encounter.
    fn save_map(&mut self, tile: i32) -> Vec<u8>;
    fn load_map(&mut self, data: &[u8]);
    fn add_world_object(&mut self, data: &[u8]);
    /// Chat line or notification text.
    fn message(&mut self, _text: &str) {}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientState {
    WorldTransfer { requested: bool },
    Playing,
    Disconnected { reason: String },
}

pub struct ClientSession {
    username: String,
    link: PeerLink,
    state: ClientState,
    is_host: bool,

    queues: CommandQueues,
    barrier: LongActionQueue,
    command_delay: u32,
    tick_limit: u32,
    paused_for_barrier: bool,

    faction: FactionId,
    id_block: Option<IdBlock>,
    refill_requested: bool,
    roster: BTreeMap<PlayerId, PlayerInfo>,
}

impl ClientSession {
    /// Start joining: sends `Username` then `RequestWorld`.
    pub fn join(username: &str, link: PeerLink, is_host: bool) -> Result<Self, ClientError> {
        let mut session = Self {
            username: username.into(),
            link,
            state: ClientState::WorldTransfer { requested: false },
            is_host,
            queues: CommandQueues::new(),
            barrier: LongActionQueue::new(false),
            command_delay: 0,
            tick_limit: 0,
            paused_for_barrier: false,
            faction: FactionId::NONE,
            id_block: None,
            refill_requested: false,
            roster: BTreeMap::new(),
        };
        session.send(ClientMessage::Username {
            username: username.into(),
        })?;
        session.send(ClientMessage::RequestWorld)?;
        session.state = ClientState::WorldTransfer { requested: true };
        Ok(session)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == ClientState::Playing
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn faction(&self) -> FactionId {
        self.faction
    }

    /// The hub's last announced tick; the simulation must not pass it.
    pub fn tick_limit(&self) -> u32 {
        self.tick_limit
    }

    pub fn barrier(&self) -> &LongActionQueue {
        &self.barrier
    }

    pub fn roster(&self) -> &BTreeMap<PlayerId, PlayerInfo> {
        &self.roster
    }

    pub fn queued_commands(&self) -> usize {
        self.queues.len()
    }

    /// Whether the simulation may run its next tick now.
    pub fn can_advance(&self, host: &impl SimulationHost) -> bool {
        self.is_playing() && !host.is_paused() && host.tick() < self.tick_limit
    }

    // -- driving --

    /// Drain the network inbox and run whatever commands may run between
    /// ticks. Returns an error once the session is disconnected; a packet
    /// that cannot be decoded or applied disconnects it.
    pub fn update(&mut self, host: &mut impl SimulationHost) -> Result<(), ClientError> {
        let result = self.pump(host);
        self.fail_on(result)
    }

    fn pump(&mut self, host: &mut impl SimulationHost) -> Result<(), ClientError> {
        loop {
            match self.link.inbox.try_recv() {
                Ok(Inbound::Packet { id, payload }) => {
                    let msg = ServerMessage::decode(id, &payload)?;
                    self.handle(host, msg)?;
                }
                Ok(Inbound::Closed) | Err(TryRecvError::Disconnected) => {
                    self.mark_closed();
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        if let ClientState::Disconnected { reason } = &self.state {
            return Err(ClientError::Disconnected(reason.clone()));
        }
        if !self.is_playing() {
            return Ok(());
        }

        if host.is_paused() {
            while let Some(due) = self.queues.pop_barrier_due(u32::MAX) {
                self.run(host, due)?;
            }
        }
        self.resume_if_released(host);
        while host.is_paused() && self.barrier.is_idle() {
            let Some(due) = self.queues.pop_ordinary_due(u32::MAX) else {
                break;
            };
            self.run(host, due)?;
        }
        Ok(())
    }

    /// Run everything due at the host's current tick. Call after each
    /// simulation tick.
    pub fn on_tick(&mut self, host: &mut impl SimulationHost) -> Result<(), ClientError> {
        let result = self.run_due(host);
        self.fail_on(result)
    }

    fn run_due(&mut self, host: &mut impl SimulationHost) -> Result<(), ClientError> {
        let tick = host.tick();
        while self.barrier.is_idle() {
            let Some(due) = self.queues.pop_ordinary_due(tick) else {
                break;
            };
            self.run(host, due)?;
        }
        while let Some(due) = self.queues.pop_barrier_due(tick) {
            self.run(host, due)?;
        }
        self.resume_if_released(host);
        Ok(())
    }

    fn run(&mut self, host: &mut impl SimulationHost, due: DueCommand) -> Result<(), ClientError> {
        let tick = host.tick();
        if due.execute_at < tick {
            log::warn!(
                "Late command {:?}: due at {}, running at {tick}",
                due.command.kind,
                due.execute_at
            );
        }
        let command = &due.command;
        match command.kind {
            CommandKind::LongActionSchedule => {
                let action = LongAction::from_payload(&command.payload)?;
                self.barrier.enqueue(action);
                if !host.is_paused() {
                    host.set_paused(true);
                    self.paused_for_barrier = true;
                }
            }
            CommandKind::LongActionEnd => {
                let action = LongAction::from_payload(&command.payload)?;
                self.barrier.complete(&action);
            }
            CommandKind::Pause => host.set_paused(true),
            CommandKind::Unpause => host.set_paused(false),
            CommandKind::Autosave => {
                if self.is_host {
                    let (world, units) = host.autosave();
                    log::info!("Autosaved at tick {tick}");
                    self.send(ClientMessage::Autosaved { world, units })?;
                }
            }
            CommandKind::FactionOffline | CommandKind::Game(_) => {
                host.execute(command, due.originated_locally);
            }
        }
        Ok(())
    }

    fn resume_if_released(&mut self, host: &mut impl SimulationHost) {
        if self.paused_for_barrier && self.barrier.is_idle() {
            self.paused_for_barrier = false;
            host.set_paused(false);
        }
    }

    /// A fault ends the session: the link is closed so the hub sees it go.
    fn fail_on(&mut self, result: Result<(), ClientError>) -> Result<(), ClientError> {
        if let Err(e) = &result {
            let faulted = !matches!(e, ClientError::Disconnected(_))
                && !matches!(self.state, ClientState::Disconnected { .. });
            if faulted {
                log::warn!("{}: {e}; disconnecting", self.username);
                self.link.transport.close();
                self.state = ClientState::Disconnected {
                    reason: e.to_string(),
                };
            }
        }
        result
    }

    fn mark_closed(&mut self) {
        if !matches!(self.state, ClientState::Disconnected { .. }) {
            log::info!("{}: connection closed", self.username);
            self.state = ClientState::Disconnected {
                reason: "connection closed".into(),
            };
        }
    }

    // -- inbound --

    fn handle(
        &mut self,
        host: &mut impl SimulationHost,
        msg: ServerMessage,
    ) -> Result<(), ClientError> {
        match msg {
            ServerMessage::DisconnectReason { reason } => {
                log::info!("{}: disconnected by server: {reason}", self.username);
                self.state = ClientState::Disconnected { reason };
            }
            _ if matches!(self.state, ClientState::Disconnected { .. }) => {}
            ServerMessage::KeepAlive { id } => self.send(ClientMessage::KeepAlive { id })?,
            ServerMessage::Chat { text } => host.message(&text),
            ServerMessage::Notification { key, args } => {
                if args.is_empty() {
                    host.message(&key);
                } else {
                    host.message(&format!("{key}: {}", args.join(", ")));
                }
            }
            ServerMessage::WorldData(snapshot) if !self.is_playing() => {
                self.load_world(host, &snapshot)?;
            }
            msg if self.is_playing() => self.handle_playing(host, msg)?,
            msg => log::debug!("Ignoring {:?} in {:?}", msg.packet(), self.state),
        }
        Ok(())
    }

    fn load_world(
        &mut self,
        host: &mut impl SimulationHost,
        snapshot: &WorldSnapshot,
    ) -> Result<(), ClientError> {
        host.load_world(snapshot);
        self.command_delay = snapshot.command_delay;
        self.tick_limit = snapshot.tick;
        self.faction = snapshot.faction;
        self.id_block = Some(snapshot.id_block.clone());
        self.refill_requested = false;

        for action in &snapshot.pending_long_actions {
            self.barrier.enqueue(action.clone());
        }

        // Per-unit logs lose the interleaving across units; a stable sort by
        // issue tick restores due order.
        let mut replay = Vec::new();
        for (_, commands) in &snapshot.unit_logs {
            for bytes in commands {
                replay.push(ScheduledCommand::decode(bytes)?);
            }
        }
        replay.sort_by_key(|cmd| cmd.issued_at);
        log::info!(
            "{}: loaded world at tick {}, replaying {} commands",
            self.username,
            snapshot.tick,
            replay.len()
        );
        for command in replay {
            self.queues.push(command, false, self.command_delay);
        }

        if !self.barrier.is_idle() && !host.is_paused() {
            host.set_paused(true);
            self.paused_for_barrier = true;
        }

        self.send(ClientMessage::WorldLoaded)?;
        log::info!("{}: WorldTransfer -> Playing", self.username);
        self.state = ClientState::Playing;
        Ok(())
    }

    fn handle_playing(
        &mut self,
        host: &mut impl SimulationHost,
        msg: ServerMessage,
    ) -> Result<(), ClientError> {
        match msg {
            ServerMessage::Command {
                command,
                originator,
            } => self.queues.push(command, originator, self.command_delay),
            ServerMessage::TimeControl { tick } => {
                self.tick_limit = self.tick_limit.max(tick);
            }
            ServerMessage::IdBlock { block } => {
                log::debug!(
                    "{}: new id block {} of size {}",
                    self.username,
                    block.range_start,
                    block.range_size
                );
                self.id_block = Some(block);
                self.refill_requested = false;
            }
            ServerMessage::PlayerList(update) => update.apply(&mut self.roster),
            ServerMessage::MapRequest { tile } => {
                let data = host.save_map(tile);
                self.send(ClientMessage::MapResponse { data })?;
            }
            ServerMessage::MapResponse { data } => {
                host.load_map(&data);
                self.send(ClientMessage::MapLoaded)?;
            }
            ServerMessage::NewWorldObject { data } => host.add_world_object(&data),
            other => log::debug!("Ignoring {:?} while playing", other.packet()),
        }
        Ok(())
    }

    // -- outbound --

    fn send(&mut self, msg: ClientMessage) -> Result<(), ClientError> {
        let (id, payload) = msg.encode();
        self.link.transport.send(id, &payload)?;
        Ok(())
    }

    /// Ask the hub to schedule a command for every peer.
    pub fn request(
        &mut self,
        kind: CommandKind,
        unit: UnitId,
        payload: Vec<u8>,
    ) -> Result<(), ClientError> {
        self.send(ClientMessage::Command {
            kind,
            unit,
            payload,
        })
    }

    /// Take the next object id from this peer's block. Asks for a new block
    /// once the current one runs low.
    pub fn next_object_id(&mut self) -> Result<Option<i32>, ClientError> {
        let Some(block) = self.id_block.as_mut() else {
            return Ok(None);
        };
        let id = block.next_id();
        let low = block.remaining() < (block.range_size / 10).max(1);
        if low && !self.refill_requested {
            self.refill_requested = true;
            self.send(ClientMessage::RequestIdBlock)?;
        }
        Ok(id)
    }

    pub fn chat(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(ClientMessage::Chat { text: text.into() })
    }

    pub fn request_encounter(&mut self, defender: &str, tile: i32) -> Result<(), ClientError> {
        self.send(ClientMessage::EncounterRequest {
            defender: defender.into(),
            tile,
        })
    }

    pub fn generating_map(&mut self) -> Result<(), ClientError> {
        self.send(ClientMessage::GeneratingMap)
    }

    pub fn map_generated(&mut self) -> Result<(), ClientError> {
        self.send(ClientMessage::MapGenerated)
    }

    pub fn announce_object(&mut self, data: Vec<u8>) -> Result<(), ClientError> {
        self.send(ClientMessage::NewWorldObject { data })
    }

    pub fn report_desync(&mut self) -> Result<(), ClientError> {
        self.send(ClientMessage::Desynced)
    }

    /// Hand the player's maps to the hub and leave.
    pub fn quit(&mut self, maps: Vec<u8>) -> Result<(), ClientError> {
        self.send(ClientMessage::QuitMaps { data: maps })?;
        self.disconnect();
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.link.transport.close();
        self.state = ClientState::Disconnected {
            reason: "left".into(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, Transport};
    use std::sync::mpsc::{self, Receiver, Sender};
    use tandem_protocol::PlayerListUpdate;

    #[derive(Default)]
    struct Sim {
        tick: u32,
        paused: bool,
        executed: Vec<(u32, ScheduledCommand, bool)>,
        maps_loaded: Vec<Vec<u8>>,
        messages: Vec<String>,
    }

    impl SimulationHost for Sim {
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
            self.tick = snapshot
                .world
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .map(u32::from_le_bytes)
                .unwrap_or(0);
        }
        fn execute(&mut self, command: &ScheduledCommand, local: bool) {
            self.executed.push((self.tick, command.clone(), local));
        }
        fn autosave(&mut self) -> (Vec<u8>, Vec<(UnitId, Vec<u8>)>) {
            (self.tick.to_le_bytes().to_vec(), vec![])
        }
        fn save_map(&mut self, tile: i32) -> Vec<u8> {
            tile.to_le_bytes().to_vec()
        }
        fn load_map(&mut self, data: &[u8]) {
            self.maps_loaded.push(data.to_vec());
        }
        fn add_world_object(&mut self, _data: &[u8]) {}
        fn message(&mut self, text: &str) {
            self.messages.push(text.into());
        }
    }

    /// A session wired to channels: `to_client` plays the hub's writes,
    /// `from_client` sees what the session sends.
    struct Wire {
        to_client: Sender<Inbound>,
        from_client: Receiver<Inbound>,
    }

    impl Wire {
        fn deliver(&self, msg: ServerMessage) {
            let (id, payload) = msg.encode();
            self.to_client.send(Inbound::Packet { id, payload }).unwrap();
        }

        fn command(&self, kind: CommandKind, issued_at: u32, payload: Vec<u8>, originator: bool) {
            self.deliver(ServerMessage::Command {
                command: ScheduledCommand::new(kind, issued_at, FactionId(0), UnitId(0), payload),
                originator,
            });
        }

        fn sent(&self) -> Vec<ClientMessage> {
            self.from_client
                .try_iter()
                .filter_map(|inbound| match inbound {
                    Inbound::Packet { id, payload } => {
                        Some(ClientMessage::decode(id, &payload).unwrap())
                    }
                    Inbound::Closed => None,
                })
                .collect()
        }
    }

    fn session(is_host: bool) -> (ClientSession, Wire) {
        let (transport, from_client) = ChannelTransport::pair("client");
        let (to_client, inbox) = mpsc::channel();
        let link = PeerLink::new(Box::new(transport) as Box<dyn Transport>, inbox);
        let session = ClientSession::join("Alice", link, is_host).unwrap();
        (
            session,
            Wire {
                to_client,
                from_client,
            },
        )
    }

    fn snapshot(world_tick: u32, hub_tick: u32) -> WorldSnapshot {
        WorldSnapshot {
            tick: hub_tick,
            command_delay: 15,
            faction: FactionId(2),
            id_block: IdBlock::new(0, 20, UnitId(0)),
            world: world_tick.to_le_bytes().to_vec(),
            player_maps: vec![],
            unit_data: vec![],
            unit_logs: vec![],
            pending_long_actions: vec![],
        }
    }

    fn game_ticks(sim: &Sim) -> Vec<u32> {
        sim.executed.iter().map(|(tick, _, _)| *tick).collect()
    }

    fn advance(session: &mut ClientSession, sim: &mut Sim) {
        session.update(sim).unwrap();
        while session.can_advance(sim) {
            sim.tick += 1;
            session.on_tick(sim).unwrap();
        }
    }

    #[test]
    fn joining_sends_username_then_world_request() {
        let (session, wire) = session(false);
        assert_eq!(
            wire.sent(),
            vec![
                ClientMessage::Username {
                    username: "Alice".into()
                },
                ClientMessage::RequestWorld
            ]
        );
        assert_eq!(session.state(), &ClientState::WorldTransfer { requested: true });
    }

    #[test]
    fn world_data_loads_and_reports_loaded() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        wire.sent();
        wire.deliver(ServerMessage::WorldData(Box::new(snapshot(5, 40))));
        session.update(&mut sim).unwrap();

        assert!(session.is_playing());
        assert_eq!(sim.tick, 5);
        assert_eq!(session.tick_limit(), 40);
        assert_eq!(session.faction(), FactionId(2));
        assert_eq!(wire.sent(), vec![ClientMessage::WorldLoaded]);
    }

    #[test]
    fn commands_run_at_issue_tick_plus_delay() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        wire.deliver(ServerMessage::WorldData(Box::new(snapshot(0, 0))));
        session.update(&mut sim).unwrap();

        wire.command(CommandKind::Game(1), 3, vec![1], true);
        wire.command(CommandKind::Game(2), 3, vec![2], false);
        wire.deliver(ServerMessage::TimeControl { tick: 30 });
        advance(&mut session, &mut sim);

        assert_eq!(sim.tick, 30);
        assert_eq!(game_ticks(&sim), vec![18, 18]);
        assert!(sim.executed[0].2);
        assert!(!sim.executed[1].2);
        assert_eq!(sim.executed[1].1.kind, CommandKind::Game(2));
    }

    #[test]
    fn simulation_never_passes_the_time_control_tick() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        wire.deliver(ServerMessage::WorldData(Box::new(snapshot(0, 0))));
        wire.deliver(ServerMessage::TimeControl { tick: 9 });
        advance(&mut session, &mut sim);
        assert_eq!(sim.tick, 9);

        wire.deliver(ServerMessage::TimeControl { tick: 4 });
        advance(&mut session, &mut sim);
        assert_eq!(session.tick_limit(), 9);
    }

    #[test]
    fn long_action_pauses_ordinary_commands_until_it_ends() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        wire.deliver(ServerMessage::WorldData(Box::new(snapshot(0, 0))));
        session.update(&mut sim).unwrap();

        let action = LongAction::GeneratingMap {
            username: "Bob".into(),
        };
        wire.command(CommandKind::LongActionSchedule, 0, action.to_payload(), false);
        wire.command(CommandKind::Game(7), 5, vec![], false);
        wire.deliver(ServerMessage::TimeControl { tick: 60 });
        advance(&mut session, &mut sim);

        assert_eq!(sim.tick, 15);
        assert!(sim.paused);
        assert!(sim.executed.is_empty());

        wire.command(CommandKind::LongActionEnd, 40, action.to_payload(), false);
        advance(&mut session, &mut sim);

        assert!(!sim.paused);
        assert!(session.barrier().is_idle());
        assert_eq!(game_ticks(&sim), vec![20]);
        assert_eq!(sim.tick, 60);
    }

    #[test]
    fn barrier_does_not_resume_a_user_pause() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        wire.deliver(ServerMessage::WorldData(Box::new(snapshot(0, 0))));
        session.update(&mut sim).unwrap();
        sim.paused = true;

        let action = LongAction::GeneratingMap {
            username: "Bob".into(),
        };
        wire.command(CommandKind::LongActionSchedule, 0, action.to_payload(), false);
        wire.command(CommandKind::LongActionEnd, 1, action.to_payload(), false);
        session.update(&mut sim).unwrap();

        assert!(session.barrier().is_idle());
        assert!(sim.paused);
    }

    #[test]
    fn ordinary_commands_run_immediately_while_paused() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        wire.deliver(ServerMessage::WorldData(Box::new(snapshot(0, 0))));
        session.update(&mut sim).unwrap();
        sim.paused = true;

        wire.command(CommandKind::Game(1), 50, vec![], false);
        wire.command(CommandKind::Unpause, 50, vec![], false);
        session.update(&mut sim).unwrap();

        assert_eq!(game_ticks(&sim), vec![0]);
        assert!(!sim.paused);
    }

    #[test]
    fn joiner_replays_logged_commands_in_issue_order() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        let at = |kind: CommandKind, issued_at: u32, unit: i32| {
            ScheduledCommand::new(kind, issued_at, FactionId(0), UnitId(unit), vec![]).encode()
        };
        let mut snap = snapshot(0, 40);
        snap.unit_logs = vec![
            (UnitId::GLOBAL, vec![at(CommandKind::Game(3), 20, -1)]),
            (
                UnitId(0),
                vec![at(CommandKind::Game(1), 2, 0), at(CommandKind::Game(2), 21, 0)],
            ),
        ];
        wire.deliver(ServerMessage::WorldData(Box::new(snap)));
        advance(&mut session, &mut sim);

        let kinds: Vec<CommandKind> = sim.executed.iter().map(|(_, c, _)| c.kind).collect();
        assert_eq!(
            kinds,
            vec![CommandKind::Game(1), CommandKind::Game(3), CommandKind::Game(2)]
        );
        assert_eq!(game_ticks(&sim), vec![17, 35, 36]);
    }

    #[test]
    fn joiner_waits_on_pending_long_actions() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        let join = LongAction::PlayerJoin {
            username: "Alice".into(),
        };
        let mut snap = snapshot(0, 40);
        snap.pending_long_actions = vec![join.clone()];
        snap.unit_logs = vec![(
            UnitId::GLOBAL,
            vec![
                ScheduledCommand::new(
                    CommandKind::LongActionSchedule,
                    38,
                    FactionId::NONE,
                    UnitId::GLOBAL,
                    join.to_payload(),
                )
                .encode(),
            ],
        )];
        wire.deliver(ServerMessage::WorldData(Box::new(snap)));
        advance(&mut session, &mut sim);
        assert!(sim.paused);
        assert_eq!(sim.tick, 0);

        wire.command(CommandKind::LongActionEnd, 41, join.to_payload(), false);
        advance(&mut session, &mut sim);
        assert!(!sim.paused);
        assert!(session.barrier().is_idle());
        assert_eq!(sim.tick, 40);
    }

    #[test]
    fn host_answers_autosave_and_others_ignore_it() {
        for is_host in [true, false] {
            let (mut session, wire) = session(is_host);
            let mut sim = Sim::default();
            wire.deliver(ServerMessage::WorldData(Box::new(snapshot(0, 0))));
            session.update(&mut sim).unwrap();
            wire.sent();

            wire.command(CommandKind::Autosave, 0, vec![], false);
            wire.deliver(ServerMessage::TimeControl { tick: 20 });
            advance(&mut session, &mut sim);

            let saved: Vec<ClientMessage> = wire
                .sent()
                .into_iter()
                .filter(|m| matches!(m, ClientMessage::Autosaved { .. }))
                .collect();
            if is_host {
                assert_eq!(
                    saved,
                    vec![ClientMessage::Autosaved {
                        world: 15u32.to_le_bytes().to_vec(),
                        units: vec![]
                    }]
                );
            } else {
                assert!(saved.is_empty());
            }
        }
    }

    #[test]
    fn keep_alive_and_map_exchange_are_answered() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        wire.deliver(ServerMessage::WorldData(Box::new(snapshot(0, 0))));
        wire.deliver(ServerMessage::KeepAlive { id: 4 });
        wire.deliver(ServerMessage::MapRequest { tile: 7 });
        wire.deliver(ServerMessage::MapResponse { data: vec![1, 2] });
        session.update(&mut sim).unwrap();

        assert_eq!(
            wire.sent()[2..],
            [
                ClientMessage::WorldLoaded,
                ClientMessage::KeepAlive { id: 4 },
                ClientMessage::MapResponse {
                    data: 7i32.to_le_bytes().to_vec()
                },
                ClientMessage::MapLoaded,
            ]
        );
        assert_eq!(sim.maps_loaded, vec![vec![1, 2]]);
    }

    #[test]
    fn id_refill_is_requested_once_when_running_low() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        wire.deliver(ServerMessage::WorldData(Box::new(snapshot(0, 0))));
        session.update(&mut sim).unwrap();
        wire.sent();

        let ids: Vec<Option<i32>> = (0..21).map(|_| session.next_object_id().unwrap()).collect();
        assert_eq!(ids[0], Some(0));
        assert_eq!(ids[19], Some(19));
        assert_eq!(ids[20], None);
        assert_eq!(wire.sent(), vec![ClientMessage::RequestIdBlock]);

        wire.deliver(ServerMessage::IdBlock {
            block: IdBlock::new(100, 20, UnitId(0)),
        });
        session.update(&mut sim).unwrap();
        assert_eq!(session.next_object_id().unwrap(), Some(100));
    }

    #[test]
    fn roster_follows_player_list_updates() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        wire.deliver(ServerMessage::WorldData(Box::new(snapshot(0, 0))));
        wire.deliver(ServerMessage::PlayerList(PlayerListUpdate::Remove(PlayerId(3))));
        session.update(&mut sim).unwrap();
        assert!(session.roster().is_empty());
    }

    #[test]
    fn undecodable_packet_disconnects_the_session() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        wire.deliver(ServerMessage::WorldData(Box::new(snapshot(0, 0))));
        session.update(&mut sim).unwrap();
        assert!(session.is_playing());

        // TimeControl needs four bytes of tick.
        wire.to_client
            .send(Inbound::Packet {
                id: tandem_protocol::ServerPacket::TimeControl as u8,
                payload: vec![1],
            })
            .unwrap();
        assert!(matches!(
            session.update(&mut sim),
            Err(ClientError::Decode(_))
        ));
        assert!(matches!(
            session.state(),
            ClientState::Disconnected { .. }
        ));
        assert!(wire.from_client.try_iter().any(|i| i == Inbound::Closed));
        assert!(matches!(
            session.update(&mut sim),
            Err(ClientError::Disconnected(_))
        ));
    }

    #[test]
    fn disconnect_reason_ends_the_session() {
        let (mut session, wire) = session(false);
        let mut sim = Sim::default();
        wire.deliver(ServerMessage::DisconnectReason {
            reason: "Server is full".into(),
        });
        wire.to_client.send(Inbound::Closed).unwrap();

        match session.update(&mut sim) {
            Err(ClientError::Disconnected(reason)) => assert_eq!(reason, "Server is full"),
            other => panic!("expected disconnect, got {other:?}"),
        }
        assert!(!session.is_playing());
    }
}

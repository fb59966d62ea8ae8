// The hub: roster, command scheduling and the long-action barrier.
//
// `Hub` is the explicit context object every closure on the action queue
// runs against. It owns the player roster, the logical tick, the command log,
// the id allocator and the barrier, and is only ever touched from the
// server's main loop (see `server.rs`), so none of it is locked.
//
// Inbound packets enter through `handle_receive`, which decodes them and
// dispatches on the sender's `ServerState`. A packet the current state does
// not handle is ignored; a decode failure, semantic fault or panic while
// handling one disconnects that peer with a reason and nothing else.
//
// Outbound, every state change that all peers must agree on is a
// `ScheduledCommand` issued by `send_command`: stamped with the current tick,
// appended to the per-unit log, and fanned out to every peer that has the
// world. Long actions are bracketed by `LongActionSchedule` /
// `LongActionEnd` commands; their hub-side effects run from
// `poll_long_actions`.
//
// Periodic work hangs off `tick`: time control, latency + keep-alive, and
// autosave.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tandem_protocol::{
    ClientMessage, CommandKind, FactionId, IdBlock, LongAction, PlayerId, PlayerInfo,
    PlayerListUpdate, PlayerStatus, PlayerType, ScheduledCommand, ServerMessage, ServerPacket,
    UnitId, WorldSnapshot, command_payload,
};

use crate::action_queue::panic_message;
use crate::barrier::LongActionQueue;
use crate::command_log::CommandLog;
use crate::config::ServerSettings;
use crate::connection::{Connection, ServerPlayer, ServerState};
use crate::error::{HubError, ProtocolError};
use crate::gate::{CapacityGate, ConnectionGate};
use crate::id_alloc::IdAllocator;
use crate::persistence::{SavedGame, SnapshotStore};
use crate::transport::Transport;

/// Reason sent to every peer when the hub shuts down.
pub const SERVER_CLOSED: &str = "MpServerClosed";

const MAX_USERNAME_LEN: usize = 32;

pub struct Hub {
    settings: ServerSettings,
    store: Box<dyn SnapshotStore>,
    gate: Box<dyn ConnectionGate>,

    players: BTreeMap<PlayerId, ServerPlayer>,
    next_player_id: i32,

    timer: u32,
    /// Operator freeze of the hub clock. Peers pause through their own
    /// `Pause` commands; this flag is independent of those.
    paused: bool,
    commands: CommandLog,
    ids: IdAllocator,
    barrier: LongActionQueue,
    saved: SavedGame,
    /// Tick the in-flight autosave's world will be saved at.
    autosave_tick: u32,

    factions: BTreeMap<String, FactionId>,
    next_faction: i32,

    keep_alive_id: i32,
    keep_alive_sent: Option<Instant>,
    ticks_since_autosave: u32,
}

impl Hub {
    /// Create a hub, resuming from the store's saved game if it has one. The
    /// clock restarts at the saved tick and id blocks continue after the
    /// saved counter.
    pub fn new(settings: ServerSettings, store: Box<dyn SnapshotStore>) -> Result<Self, HubError> {
        let saved = store.load_game()?.unwrap_or_default();
        let gate = Box::new(CapacityGate {
            max_players: settings.max_players,
        });
        Ok(Self {
            settings,
            store,
            gate,
            players: BTreeMap::new(),
            next_player_id: 0,
            timer: saved.tick,
            paused: false,
            commands: CommandLog::new(),
            ids: IdAllocator::starting_at(saved.next_id),
            barrier: LongActionQueue::new(true),
            autosave_tick: saved.tick,
            saved,
            factions: BTreeMap::new(),
            next_faction: 0,
            keep_alive_id: 0,
            keep_alive_sent: None,
            ticks_since_autosave: 0,
        })
    }

    pub fn with_gate(mut self, gate: Box<dyn ConnectionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// The hub's logical tick.
    pub fn timer(&self) -> u32 {
        self.timer
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn players(&self) -> Vec<PlayerInfo> {
        self.players.values().map(ServerPlayer::info).collect()
    }

    pub fn state_of(&self, id: PlayerId) -> Option<ServerState> {
        self.players.get(&id).map(|p| p.conn.state)
    }

    pub fn barrier(&self) -> &LongActionQueue {
        &self.barrier
    }

    pub fn commands(&self) -> &CommandLog {
        &self.commands
    }

    pub fn saved_game(&self) -> &SavedGame {
        &self.saved
    }

    pub fn is_autosaving(&self) -> bool {
        self.commands.is_recording()
    }

    // -- connection lifecycle --

    /// Admit a new connection. On rejection the reason has already been
    /// sent and the transport closed.
    pub fn on_connected(
        &mut self,
        mut transport: Box<dyn Transport>,
        kind: PlayerType,
    ) -> Result<PlayerId, String> {
        let peer = transport.describe();
        let connected = self
            .players
            .values()
            .filter(|p| p.kind != PlayerType::Arbiter)
            .count();
        if let Err(reason) = self.gate.admit(kind, connected, &peer) {
            log::info!("Rejected connection from {peer}: {reason}");
            let (packet, payload) = ServerMessage::DisconnectReason {
                reason: reason.clone(),
            }
            .encode();
            let _ = transport.send(packet, &payload);
            transport.close();
            return Err(reason);
        }

        let id = PlayerId(self.next_player_id);
        self.next_player_id += 1;
        log::info!("New connection from {peer} as player {}", id.0);
        self.players
            .insert(id, ServerPlayer::new(Connection::new(id, transport), kind));
        Ok(id)
    }

    /// Send `reason`, close the transport and drop the player.
    pub fn disconnect(&mut self, id: PlayerId, reason: &str) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        log::info!("Disconnecting {}: {reason}", player.conn.label());
        player.conn.close(reason);
        self.on_disconnected(id);
    }

    /// The peer is gone. Safe to call more than once.
    pub fn on_disconnected(&mut self, id: PlayerId) {
        let Some(mut player) = self.players.remove(&id) else {
            return;
        };
        player.conn.abort();
        log::info!("{} disconnected", player.conn.label());

        let Some(username) = player.conn.username.clone() else {
            return;
        };

        if player.conn.state == ServerState::Playing {
            self.broadcast(
                &ServerMessage::PlayerList(PlayerListUpdate::Remove(id)),
                ServerPlayer::is_playing,
            );
            self.broadcast(
                &ServerMessage::Notification {
                    key: "MpPlayerDisconnected".into(),
                    args: vec![username.clone()],
                },
                ServerPlayer::is_playing,
            );
            self.check_faction_offline(&username);
        }

        for action in self.barrier.involving(&username) {
            log::info!("Abandoning long action for {username}: {action:?}");
            self.end_long_action(&action);
        }

        if self.is_host(&username) && self.commands.abort_recording() {
            log::warn!("Host left during an autosave; autosave aborted");
        }
    }

    pub fn kick(&mut self, username: &str, reason: &str) -> bool {
        match self.find_by_name(username) {
            Some(id) => {
                self.disconnect(id, reason);
                true
            }
            None => false,
        }
    }

    /// Disconnect everyone with `MpServerClosed`.
    pub fn shutdown(&mut self) {
        log::info!("Hub shutting down");
        let ids: Vec<PlayerId> = self.players.keys().copied().collect();
        for id in ids {
            self.disconnect(id, SERVER_CLOSED);
        }
    }

    // -- inbound packets --

    /// Decode and dispatch one packet from `id`. Faults disconnect the peer.
    pub fn handle_receive(&mut self, id: PlayerId, packet_id: u8, payload: &[u8]) {
        if !self.players.get(&id).is_some_and(|p| p.conn.is_connected()) {
            return;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.dispatch(id, packet_id, payload)
        }));
        let fault = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(&*payload),
        };
        let label = self
            .players
            .get(&id)
            .map(|p| p.conn.label())
            .unwrap_or_default();
        log::error!("Protocol fault from {label}: {fault}");
        self.disconnect(id, &format!("Connection error: {fault}"));
    }

    fn dispatch(&mut self, id: PlayerId, packet_id: u8, payload: &[u8]) -> Result<(), ProtocolError> {
        let msg = ClientMessage::decode(packet_id, payload)?;
        let Some(state) = self.state_of(id) else {
            return Ok(());
        };
        if let ClientMessage::KeepAlive { id: ping } = msg {
            self.on_keep_alive(id, ping);
            return Ok(());
        }
        match state {
            ServerState::Joining => self.on_joining(id, msg),
            ServerState::WorldTransfer { snapshot_sent } => {
                self.on_world_transfer(id, snapshot_sent, msg);
                Ok(())
            }
            ServerState::Playing => self.on_playing(id, msg),
        }
    }

    fn on_joining(&mut self, id: PlayerId, msg: ClientMessage) -> Result<(), ProtocolError> {
        match msg {
            ClientMessage::Username { username } => {
                validate_username(&username)?;
                let taken = self
                    .players
                    .values()
                    .any(|p| p.id() != id && p.username() == Some(username.as_str()));
                if taken {
                    return Err(ProtocolError::UsernameTaken(username));
                }
                log::info!("Player {} is {username}", id.0);
                if let Some(player) = self.players.get_mut(&id) {
                    player.conn.username = Some(username);
                }
            }
            ClientMessage::RequestWorld => {
                let username = self.username_of(id).ok_or(ProtocolError::MissingUsername)?;
                self.set_state(
                    id,
                    ServerState::WorldTransfer {
                        snapshot_sent: false,
                    },
                );
                self.start_long_action(LongAction::PlayerJoin { username });
            }
            other => self.ignore(id, &other),
        }
        Ok(())
    }

    fn on_world_transfer(&mut self, id: PlayerId, snapshot_sent: bool, msg: ClientMessage) {
        match msg {
            ClientMessage::WorldLoaded if snapshot_sent => {
                let Some(username) = self.username_of(id) else {
                    return;
                };
                self.set_state(id, ServerState::Playing);
                self.end_long_action(&LongAction::PlayerJoin { username });
            }
            other => self.ignore(id, &other),
        }
    }

    fn on_playing(&mut self, id: PlayerId, msg: ClientMessage) -> Result<(), ProtocolError> {
        let username = self.username_of(id).ok_or(ProtocolError::MissingUsername)?;
        match msg {
            ClientMessage::Command {
                kind,
                unit,
                payload,
            } => {
                if kind.hub_only() {
                    log::warn!("{username} asked for hub-only command {kind:?}; ignored");
                    return Ok(());
                }
                let faction = self
                    .factions
                    .get(&username)
                    .copied()
                    .unwrap_or(FactionId::NONE);
                self.send_command(kind, faction, unit, payload, Some(id));
            }
            ClientMessage::NewWorldObject { data } => {
                self.broadcast(&ServerMessage::NewWorldObject { data }, |p| {
                    p.is_playing() && p.id() != id
                });
            }
            ClientMessage::QuitMaps { data } => {
                if let Err(e) = self.store.save_player_maps(&username, &data) {
                    log::error!("Could not store maps for {username}: {e}");
                }
            }
            ClientMessage::EncounterRequest { defender, tile } => {
                if self.find_playing(&defender).is_none() {
                    self.send_to(
                        id,
                        &ServerMessage::Notification {
                            key: "MpPlayerOffline".into(),
                            args: vec![defender],
                        },
                    );
                } else {
                    self.start_long_action(LongAction::Encounter {
                        defender,
                        attacker: username,
                        tile,
                    });
                }
            }
            ClientMessage::MapResponse { data } => {
                let attacker = match self.barrier.current() {
                    Some(LongAction::Encounter {
                        defender, attacker, ..
                    }) if *defender == username => attacker.clone(),
                    _ => return Ok(()),
                };
                match self.find_playing(&attacker) {
                    Some(target) => self.send_to(target, &ServerMessage::MapResponse { data }),
                    None => log::warn!("Map for {attacker} dropped; attacker is gone"),
                }
            }
            ClientMessage::MapLoaded => {
                let loaded = match self.barrier.current() {
                    Some(action @ LongAction::Encounter { attacker, .. }) if *attacker == username => {
                        Some(action.clone())
                    }
                    _ => None,
                };
                if let Some(action) = loaded {
                    self.end_long_action(&action);
                }
            }
            ClientMessage::GeneratingMap => {
                self.start_long_action(LongAction::GeneratingMap { username });
            }
            ClientMessage::MapGenerated => {
                self.end_long_action(&LongAction::GeneratingMap { username });
            }
            ClientMessage::Autosaved { world, units } => {
                self.on_autosaved(
                    &username,
                    SavedGame {
                        world,
                        units,
                        ..SavedGame::default()
                    },
                );
            }
            ClientMessage::RequestIdBlock => {
                let block = self.next_block();
                self.send_to(id, &ServerMessage::IdBlock { block });
            }
            ClientMessage::Desynced => {
                log::warn!("{username} reports a desync");
                if let Some(player) = self.players.get_mut(&id) {
                    player.status = PlayerStatus::Desynced;
                }
                self.broadcast(
                    &ServerMessage::PlayerList(PlayerListUpdate::Status(
                        id,
                        PlayerStatus::Desynced,
                    )),
                    ServerPlayer::is_playing,
                );
            }
            ClientMessage::Chat { text } => {
                self.broadcast(
                    &ServerMessage::Chat {
                        text: format!("{username}: {text}"),
                    },
                    ServerPlayer::is_playing,
                );
            }
            other => self.ignore(id, &other),
        }
        Ok(())
    }

    fn on_keep_alive(&mut self, id: PlayerId, ping: i32) {
        if ping != self.keep_alive_id {
            return;
        }
        let Some(sent) = self.keep_alive_sent else {
            return;
        };
        if let Some(player) = self.players.get_mut(&id) {
            player.conn.latency_ms = u32::try_from(sent.elapsed().as_millis()).unwrap_or(u32::MAX);
        }
    }

    fn on_autosaved(&mut self, username: &str, mut game: SavedGame) {
        if !self.is_host(username) {
            log::warn!("Ignoring autosave data from non-host {username}");
            return;
        }
        if !self.commands.is_recording() {
            log::warn!("Ignoring autosave data with no autosave in progress");
            return;
        }
        game.tick = self.autosave_tick;
        game.next_id = self.ids.counter();
        if let Err(e) = self.store.save_game(&game) {
            log::error!("Could not persist autosave: {e}");
        }
        self.saved = game;
        self.commands.finish_recording();
        log::info!("Autosave finished at tick {}", self.timer);
    }

    fn ignore(&self, id: PlayerId, msg: &ClientMessage) {
        log::trace!(
            "Player {} sent {:?} in state {}; ignored",
            id.0,
            msg.packet(),
            self.state_of(id).map_or("gone", ServerState::name)
        );
    }

    fn set_state(&mut self, id: PlayerId, state: ServerState) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        log::info!(
            "{}: {} -> {}",
            player.conn.label(),
            player.conn.state.name(),
            state.name()
        );
        player.conn.state = state;
        if state == ServerState::Playing {
            self.enter_playing(id);
        }
    }

    /// Roster bookkeeping for a peer that just started playing.
    fn enter_playing(&mut self, id: PlayerId) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        player.status = PlayerStatus::Playing;
        let info = player.info();

        let list: Vec<PlayerInfo> = self
            .players
            .values()
            .filter(|p| p.is_playing())
            .map(ServerPlayer::info)
            .collect();
        self.send_to(id, &ServerMessage::PlayerList(PlayerListUpdate::List(list)));
        self.broadcast(
            &ServerMessage::PlayerList(PlayerListUpdate::Add(info)),
            |p| p.is_playing() && p.id() != id,
        );
    }

    // -- commands --

    /// Stamp, log and fan out a command. `source` gets the originator flag.
    pub fn send_command(
        &mut self,
        kind: CommandKind,
        faction: FactionId,
        unit: UnitId,
        payload: Vec<u8>,
        source: Option<PlayerId>,
    ) {
        let command = ScheduledCommand::new(kind, self.timer, faction, unit, payload);
        let bytes = self.commands.append(&command);
        log::debug!(
            "Command {kind:?} for unit {} issued at tick {}",
            unit.0,
            self.timer
        );

        for player in self.players.values_mut() {
            if player.conn.state.receives_commands() {
                let packet = command_payload(&bytes, Some(player.id()) == source);
                player.conn.send_raw(ServerPacket::Command as u8, &packet);
            }
        }

    }

    /// Start an autosave. Returns false if one is already in flight.
    pub fn do_autosave(&mut self) -> bool {
        if self.commands.is_recording() {
            log::info!("Autosave already in progress; not started");
            return false;
        }
        self.send_command(
            CommandKind::Autosave,
            FactionId::NONE,
            UnitId::GLOBAL,
            Vec::new(),
            None,
        );
        self.commands.begin_recording();
        // Peers run the save when the command comes due.
        self.autosave_tick = self.timer.saturating_add(self.settings.command_delay_ticks);
        log::info!("Autosave started at tick {}", self.timer);
        true
    }

    fn next_block(&mut self) -> IdBlock {
        self.ids
            .next_block(self.settings.id_block_size, UnitId::GLOBAL)
    }

    // -- long actions --

    /// Queue `action` and tell every peer. Returns false for duplicates.
    pub fn start_long_action(&mut self, action: LongAction) -> bool {
        let payload = action.to_payload();
        if !self.barrier.enqueue(action) {
            return false;
        }
        self.send_command(
            CommandKind::LongActionSchedule,
            FactionId::NONE,
            UnitId::GLOBAL,
            payload,
            None,
        );
        true
    }

    /// Complete `action` and tell every peer. No-op if it is not pending.
    pub fn end_long_action(&mut self, action: &LongAction) -> bool {
        if !self.barrier.complete(action) {
            return false;
        }
        self.send_command(
            CommandKind::LongActionEnd,
            FactionId::NONE,
            UnitId::GLOBAL,
            action.to_payload(),
            None,
        );
        true
    }

    /// Run the hub-side effect of the current long action, once.
    pub fn poll_long_actions(&mut self) {
        while let Some(action) = self.barrier.poll_run() {
            log::info!("Running long action: {}", action.text(true));
            match &action {
                LongAction::PlayerJoin { username } => self.run_player_join(&action, username),
                LongAction::Encounter { defender, tile, .. } => {
                    match self.find_playing(defender) {
                        Some(id) => self.send_to(id, &ServerMessage::MapRequest { tile: *tile }),
                        None => {
                            log::warn!("Encounter defender {defender} is gone");
                            self.end_long_action(&action);
                        }
                    }
                }
                LongAction::GeneratingMap { .. } => {}
            }
        }
    }

    fn run_player_join(&mut self, action: &LongAction, username: &str) {
        let joiner = self
            .players
            .values()
            .find(|p| {
                p.username() == Some(username)
                    && p.conn.state
                        == ServerState::WorldTransfer {
                            snapshot_sent: false,
                        }
            })
            .map(ServerPlayer::id);
        let Some(joiner) = joiner else {
            log::warn!("{username} left before the world was sent");
            self.end_long_action(action);
            return;
        };

        let joiner_block = self.next_block();
        let host_block = self.next_block();
        let faction = self.faction_for(username);
        let player_maps = match self.store.load_player_maps(username) {
            Ok(maps) => maps.unwrap_or_default(),
            Err(e) => {
                log::error!("Could not load maps for {username}: {e}");
                Vec::new()
            }
        };

        let snapshot = WorldSnapshot {
            tick: self.timer,
            command_delay: self.settings.command_delay_ticks,
            faction,
            id_block: joiner_block,
            world: self.saved.world.clone(),
            player_maps,
            unit_data: self.saved.units.clone(),
            unit_logs: self.commands.snapshot(),
            pending_long_actions: self.barrier.pending(),
        };
        self.send_to(joiner, &ServerMessage::WorldData(Box::new(snapshot)));
        self.set_state(
            joiner,
            ServerState::WorldTransfer {
                snapshot_sent: true,
            },
        );

        let host = self
            .settings
            .host_username
            .clone()
            .and_then(|name| self.find_playing(&name));
        match host {
            Some(host) if host != joiner => {
                self.send_to(host, &ServerMessage::IdBlock { block: host_block });
            }
            _ => log::debug!("No host peer for id block {}", host_block.range_start),
        }
    }

    // -- periodic work --

    /// Advance one logical tick.
    pub fn tick(&mut self) {
        let interval = self.settings.time_control_interval_ticks.max(1);
        if self.timer % interval == 0 {
            let tick = self.timer;
            self.broadcast(&ServerMessage::TimeControl { tick }, |p| {
                p.conn.state.receives_commands()
            });
        }

        self.timer += 1;

        let keep_alive = self.settings.keep_alive_interval_ticks;
        if keep_alive > 0 && self.timer % keep_alive == 0 {
            self.send_keep_alive();
        }

        if let Some(every) = self.settings.autosave_interval_ticks() {
            self.ticks_since_autosave += 1;
            if self.ticks_since_autosave >= every && self.host_online() {
                self.ticks_since_autosave = 0;
                self.do_autosave();
            }
        }
    }

    fn send_keep_alive(&mut self) {
        let latencies: Vec<(PlayerId, u32)> = self
            .players
            .values()
            .filter(|p| p.is_playing())
            .map(|p| (p.id(), p.conn.latency_ms))
            .collect();
        self.broadcast(
            &ServerMessage::PlayerList(PlayerListUpdate::Latencies(latencies)),
            ServerPlayer::is_playing,
        );

        self.keep_alive_id += 1;
        self.keep_alive_sent = Some(Instant::now());
        let id = self.keep_alive_id;
        self.broadcast(&ServerMessage::KeepAlive { id }, |p| p.conn.is_connected());
    }

    // -- helpers --

    fn send_to(&mut self, id: PlayerId, msg: &ServerMessage) {
        if let Some(player) = self.players.get_mut(&id) {
            player.conn.send(msg);
        }
    }

    fn broadcast(&mut self, msg: &ServerMessage, filter: impl Fn(&ServerPlayer) -> bool) {
        let (packet, payload) = msg.encode();
        for player in self.players.values_mut() {
            if filter(&*player) {
                player.conn.send_raw(packet, &payload);
            }
        }
    }

    fn username_of(&self, id: PlayerId) -> Option<String> {
        self.players.get(&id)?.conn.username.clone()
    }

    fn find_by_name(&self, username: &str) -> Option<PlayerId> {
        self.players
            .values()
            .find(|p| p.username() == Some(username))
            .map(ServerPlayer::id)
    }

    fn find_playing(&self, username: &str) -> Option<PlayerId> {
        self.players
            .values()
            .find(|p| p.is_playing() && p.username() == Some(username))
            .map(ServerPlayer::id)
    }

    fn is_host(&self, username: &str) -> bool {
        self.settings.host_username.as_deref() == Some(username)
    }

    fn host_online(&self) -> bool {
        self.settings
            .host_username
            .as_deref()
            .is_some_and(|name| self.find_playing(name).is_some())
    }

    fn faction_for(&mut self, username: &str) -> FactionId {
        if let Some(faction) = self.factions.get(username) {
            return *faction;
        }
        let faction = FactionId(self.next_faction);
        self.next_faction += 1;
        self.factions.insert(username.to_string(), faction);
        faction
    }

    fn check_faction_offline(&mut self, username: &str) {
        let Some(&faction) = self.factions.get(username) else {
            return;
        };
        let still_online = self.players.values().any(|p| {
            p.is_playing()
                && p.username()
                    .and_then(|name| self.factions.get(name))
                    .is_some_and(|f| *f == faction)
        });
        if !still_online {
            log::info!("Faction {} has gone offline", faction.0);
            self.send_command(
                CommandKind::FactionOffline,
                FactionId::NONE,
                UnitId::GLOBAL,
                faction.0.to_le_bytes().to_vec(),
                None,
            );
        }
    }
}

fn validate_username(name: &str) -> Result<(), ProtocolError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidUsername(name.to_string()))
    }
}

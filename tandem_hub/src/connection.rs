// Per-connection state held by the hub.
//
// A `Connection` is identity plus transport plus the current `ServerState`.
// `ServerPlayer` wraps it with the roster-visible type and status. Both are
// owned by the hub's roster and only touched from its execution context.
//
// State progression on the hub side:
//
//   Joining --RequestWorld--> WorldTransfer { snapshot_sent: false }
//           --(PlayerJoin runs)--> WorldTransfer { snapshot_sent: true }
//           --WorldLoaded--> Playing
//
// Command fan-out starts as soon as the snapshot has been sent, so nothing
// issued between snapshot and `WorldLoaded` is lost.

use tandem_protocol::{PlayerId, PlayerInfo, PlayerStatus, PlayerType, ServerMessage};

use crate::transport::Transport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    /// Connected, waiting for a username and a world request.
    Joining,
    /// Waiting for the world snapshot to be produced, sent and loaded.
    WorldTransfer { snapshot_sent: bool },
    Playing,
}

impl ServerState {
    /// Whether scheduled commands are fanned out to this peer.
    pub fn receives_commands(self) -> bool {
        matches!(
            self,
            ServerState::Playing
                | ServerState::WorldTransfer {
                    snapshot_sent: true
                }
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ServerState::Joining => "Joining",
            ServerState::WorldTransfer { .. } => "WorldTransfer",
            ServerState::Playing => "Playing",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Connected,
    Disconnecting,
    Disconnected,
}

pub struct Connection {
    pub id: PlayerId,
    pub username: Option<String>,
    pub state: ServerState,
    pub latency_ms: u32,
    pub lifecycle: Lifecycle,
    transport: Box<dyn Transport>,
}

impl Connection {
    pub fn new(id: PlayerId, transport: Box<dyn Transport>) -> Self {
        Self {
            id,
            username: None,
            state: ServerState::Joining,
            latency_ms: 0,
            lifecycle: Lifecycle::Connected,
            transport,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle == Lifecycle::Connected
    }

    /// Username if set, otherwise the transport description.
    pub fn label(&self) -> String {
        match &self.username {
            Some(name) => name.clone(),
            None => self.transport.describe(),
        }
    }

    pub fn send(&mut self, msg: &ServerMessage) {
        let (id, payload) = msg.encode();
        self.send_raw(id, &payload);
    }

    /// Write an already encoded packet. Write failures stop further sends
    /// on this connection; the read side reports the actual disconnect.
    pub fn send_raw(&mut self, packet_id: u8, payload: &[u8]) {
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self.transport.send(packet_id, payload) {
            log::debug!("Send to {} failed: {e}", self.label());
            self.lifecycle = Lifecycle::Disconnecting;
        }
    }

    /// Send the reason, then close the transport.
    pub fn close(&mut self, reason: &str) {
        if self.lifecycle == Lifecycle::Disconnected {
            return;
        }
        self.send(&ServerMessage::DisconnectReason {
            reason: reason.into(),
        });
        self.lifecycle = Lifecycle::Disconnecting;
        self.transport.close();
        self.lifecycle = Lifecycle::Disconnected;
    }

    /// Close without a reason, for peers that are already gone.
    pub fn abort(&mut self) {
        if self.lifecycle != Lifecycle::Disconnected {
            self.transport.close();
            self.lifecycle = Lifecycle::Disconnected;
        }
    }
}

pub struct ServerPlayer {
    pub conn: Connection,
    pub kind: PlayerType,
    pub status: PlayerStatus,
}

impl ServerPlayer {
    pub fn new(conn: Connection, kind: PlayerType) -> Self {
        Self {
            conn,
            kind,
            status: PlayerStatus::Simulating,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.conn.id
    }

    pub fn username(&self) -> Option<&str> {
        self.conn.username.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        self.conn.state == ServerState::Playing && self.conn.is_connected()
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.conn.id,
            username: self.conn.username.clone().unwrap_or_default(),
            latency_ms: self.conn.latency_ms,
            kind: self.kind,
            status: self.status,
        }
    }
}

// Connection admission hook.
//
// Consulted before a player object exists for a new connection. A rejection
// reason is sent to the peer as a `DisconnectReason` and the socket closed.

use tandem_protocol::PlayerType;

pub trait ConnectionGate: Send {
    /// `connected` counts current non-arbiter players.
    fn admit(&self, kind: PlayerType, connected: usize, peer: &str) -> Result<(), String>;
}

/// Rejects non-arbiter players beyond `max_players`. 0 means unlimited.
#[derive(Clone, Copy, Debug)]
pub struct CapacityGate {
    pub max_players: usize,
}

impl ConnectionGate for CapacityGate {
    fn admit(&self, kind: PlayerType, connected: usize, _peer: &str) -> Result<(), String> {
        if kind == PlayerType::Arbiter || self.max_players == 0 {
            return Ok(());
        }
        if connected >= self.max_players {
            return Err("Server is full".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_counts_only_real_players() {
        let gate = CapacityGate { max_players: 2 };
        assert!(gate.admit(PlayerType::Normal, 1, "a").is_ok());
        assert_eq!(
            gate.admit(PlayerType::Steam, 2, "b"),
            Err("Server is full".to_string())
        );
        assert!(gate.admit(PlayerType::Arbiter, 2, "c").is_ok());
    }

    #[test]
    fn zero_means_unlimited() {
        let gate = CapacityGate { max_players: 0 };
        assert!(gate.admit(PlayerType::Normal, 1000, "a").is_ok());
    }
}

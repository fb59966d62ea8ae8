// Long actions: barrier-style operations that span ticks and peers.
//
// A `LongAction` carries just enough data to describe itself for display, to
// run its side effect once on the hub, and to be recognized again when a
// duplicate schedule or an end notice arrives. It travels as the JSON payload
// of `LongActionSchedule` / `LongActionEnd` commands.
//
// Equality is by tag plus discriminating fields, not by every field:
// an encounter is identified by its defender and tile, so a second attacker
// piling onto the same encounter does not start a second one.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum LongAction {
    /// The world is being saved and streamed to a joining player.
    PlayerJoin { username: String },
    /// A map is being handed from `defender` to `attacker`.
    Encounter {
        defender: String,
        attacker: String,
        tile: i32,
    },
    /// A peer is generating a new map.
    GeneratingMap { username: String },
}

impl PartialEq for LongAction {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                LongAction::PlayerJoin { username: a },
                LongAction::PlayerJoin { username: b },
            ) => a == b,
            (
                LongAction::Encounter {
                    defender: d1,
                    tile: t1,
                    ..
                },
                LongAction::Encounter {
                    defender: d2,
                    tile: t2,
                    ..
                },
            ) => d1 == d2 && t1 == t2,
            (
                LongAction::GeneratingMap { username: a },
                LongAction::GeneratingMap { username: b },
            ) => a == b,
            _ => false,
        }
    }
}

impl Eq for LongAction {}

impl LongAction {
    /// Status line for a waiting screen. `running` is true on the peer that
    /// is executing the action's side effect.
    pub fn text(&self, running: bool) -> String {
        match self {
            LongAction::PlayerJoin { username } if running => {
                format!("Saving the world for {username}")
            }
            LongAction::PlayerJoin { username } => format!("Waiting for {username} to load"),
            LongAction::Encounter {
                defender, attacker, ..
            } => format!("Setting up an encounter between {defender} and {attacker}"),
            LongAction::GeneratingMap { username } => format!("{username} is generating a map"),
        }
    }

    /// True if `username` is a party the action cannot finish without.
    pub fn involves(&self, username: &str) -> bool {
        match self {
            LongAction::PlayerJoin { username: u } | LongAction::GeneratingMap { username: u } => {
                u == username
            }
            LongAction::Encounter {
                defender, attacker, ..
            } => defender == username || attacker == username,
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        // Serializing a plain enum of strings and integers cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encounter(attacker: &str) -> LongAction {
        LongAction::Encounter {
            defender: "Dana".into(),
            attacker: attacker.into(),
            tile: 42,
        }
    }

    #[test]
    fn encounter_equality_ignores_attacker() {
        assert_eq!(encounter("Alice"), encounter("Bob"));
        let other_tile = LongAction::Encounter {
            defender: "Dana".into(),
            attacker: "Alice".into(),
            tile: 43,
        };
        assert_ne!(encounter("Alice"), other_tile);
    }

    #[test]
    fn different_tags_never_equal() {
        let join = LongAction::PlayerJoin {
            username: "Alice".into(),
        };
        let generating = LongAction::GeneratingMap {
            username: "Alice".into(),
        };
        assert_ne!(join, generating);
    }

    #[test]
    fn payload_roundtrip_keeps_every_field() {
        let action = encounter("Alice");
        let back = LongAction::from_payload(&action.to_payload()).unwrap();
        match back {
            LongAction::Encounter {
                defender,
                attacker,
                tile,
            } => {
                assert_eq!(defender, "Dana");
                assert_eq!(attacker, "Alice");
                assert_eq!(tile, 42);
            }
            other => panic!("expected Encounter, got {other:?}"),
        }
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        assert!(matches!(
            LongAction::from_payload(b"not json"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn join_text_depends_on_role() {
        let join = LongAction::PlayerJoin {
            username: "Alice".into(),
        };
        assert_eq!(join.text(true), "Saving the world for Alice");
        assert_eq!(join.text(false), "Waiting for Alice to load");
        assert!(join.involves("Alice"));
        assert!(!join.involves("Bob"));
    }
}

//! Duplex wire protocol.
//!
//! Every frame shares the same JSON envelope; `sequence` and `prev_hash`
//! are advisory on inbound frames and carry transcript positions on
//! `STEP_RESULT` broadcasts.

use dork_api::types::{Action, Observation};
use serde::{Deserialize, Serialize};

use crate::types::{Amount, MatchStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(flatten)]
    pub payload: FramePayload,
    #[serde(default)]
    pub match_id: String,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub prev_hash: String,
    #[serde(default)]
    pub timestamp: u64,
}

impl Frame {
    pub fn new(match_id: &str, payload: FramePayload) -> Self {
        Self {
            payload,
            match_id: match_id.to_owned(),
            sequence: 0,
            prev_hash: String::new(),
            timestamp: crate::types::current_timestamp(),
        }
    }

    pub fn with_position(mut self, sequence: u32, prev_hash: &str) -> Self {
        self.sequence = sequence as u64;
        self.prev_hash = prev_hash.to_owned();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum FramePayload {
    // inbound
    #[serde(rename = "HELLO")]
    Hello(HelloPayload),
    #[serde(rename = "ACTION_COMMIT")]
    ActionCommit { action: Action },
    #[serde(rename = "FORFEIT")]
    Forfeit,
    #[serde(rename = "SYNC_REQUEST")]
    SyncRequest {
        #[serde(default, rename = "clientIsMyTurn")]
        client_is_my_turn: bool,
    },

    // both directions
    #[serde(rename = "CHAT")]
    Chat(ChatPayload),

    // outbound
    #[serde(rename = "GAME_STATE")]
    GameState(GameStatePayload),
    #[serde(rename = "STEP_RESULT")]
    StepResult(StepResultPayload),
    #[serde(rename = "GAME_OVER")]
    GameOver(GameOverPayload),
    #[serde(rename = "DEPOSIT_REQUIRED")]
    DepositRequired(DepositRequiredPayload),
    #[serde(rename = "DEPOSITS_CONFIRMED")]
    DepositsConfirmed {
        #[serde(rename = "stakeWei")]
        stake_wei: Amount,
    },
    #[serde(rename = "SYNC_RESPONSE")]
    SyncResponse(SyncResponsePayload),
    #[serde(rename = "ERROR")]
    Error { error: String },
}

/// Either a single-use token or a fresh signature over the auth message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub player_id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub display_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatePayload {
    pub observation: Observation,
    pub your_turn: bool,
    pub legal_actions: Vec<Action>,
    pub match_status: MatchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResultPayload {
    pub last_action: Action,
    pub last_player: String,
    pub observation: Observation,
    pub next_player: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverPayload {
    pub winner: Option<String>,
    pub draw: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequiredPayload {
    pub stake_wei: Amount,
    pub match_id_bytes32: String,
    pub escrow_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponsePayload {
    pub your_turn: bool,
    pub current_player: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legal_actions: Option<Vec<Action>>,
    pub match_status: MatchStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_round_trip() {
        let json = r#"{"type":"HELLO","payload":{"playerId":"0xabc","token":"t-1"},"matchId":"m-1","timestamp":5}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        match &frame.payload {
            FramePayload::Hello(h) => {
                assert_eq!(h.player_id, "0xabc");
                assert_eq!(h.token.as_deref(), Some("t-1"));
                assert!(h.signature.is_none());
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        assert_eq!(frame.match_id, "m-1");
    }

    #[test]
    fn test_action_commit_keeps_raw_payload() {
        let json = r#"{"type":"ACTION_COMMIT","payload":{"action":{"type":"place","data":"{\"pos\":4}"}},"matchId":"m-1"}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        match frame.payload {
            FramePayload::ActionCommit { action } => {
                assert_eq!(action.kind, "place");
                assert_eq!(action.data, "{\"pos\":4}");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_outbound_tag_names() {
        let frame = Frame::new(
            "m-1",
            FramePayload::GameOver(GameOverPayload {
                winner: None,
                draw: true,
                reason: "emergency_shutdown".into(),
            }),
        );
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"GAME_OVER\""));
        assert!(json.contains("\"matchId\":\"m-1\""));
    }
}

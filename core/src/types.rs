use std::time::UNIX_EPOCH;

use borsh::{BorshDeserialize, BorshSerialize};
use dork_api::types::Action;
use serde::{Deserialize, Serialize};

/// Token amounts travel as decimal strings; `"0"` means a free match.
pub type Amount = String;

pub const FREE_STAKE: &str = "0";

pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A player address: `0x` followed by 40 hex digits.
pub fn is_valid_address(addr: &str) -> bool {
    addr.len() == 42
        && addr.starts_with("0x")
        && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Decimal-string addition for token amounts.
pub fn add_amounts(a: &str, b: &str) -> Amount {
    let a: u128 = a.parse().unwrap_or(0);
    let b: u128 = b.parse().unwrap_or(0);
    a.saturating_add(b).to_string()
}

pub fn parse_amount(raw: &str) -> Option<u128> {
    raw.parse().ok()
}

/// Short form of an address for logs and chat display names.
pub fn addr_shorthand(addr: &str) -> String {
    if addr.len() > 10 {
        format!("{}..{}", &addr[..6], &addr[addr.len() - 4..])
    } else {
        addr.to_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Waiting,
    Active,
    Completed,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Waiting => "waiting",
            MatchStatus::Active => "active",
            MatchStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(MatchStatus::Waiting),
            "active" => Some(MatchStatus::Active),
            "completed" => Some(MatchStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutable aggregate for one match.  Mutated only by the lifecycle
/// service; the orchestrator internals live in the server's match handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub match_id: String,
    pub game_id: String,
    pub players: Vec<String>,
    pub status: MatchStatus,
    pub winner: Option<String>,
    pub reason: Option<String>,
    pub created_at: u64,
    pub completed_at: Option<u64>,
    pub last_activity_at: u64,
    pub stake_wei: Amount,
    pub settings: Option<String>,
    pub invite_code: Option<String>,
}

impl Match {
    pub fn is_staked(&self) -> bool {
        self.stake_wei != FREE_STAKE
    }

    /// `last_activity_at` is monotonically non-decreasing.
    pub fn touch(&mut self, now: u64) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }
}

/// Canonical persisted row for a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub game_id: String,
    pub status: MatchStatus,
    pub players: Vec<String>,
    pub winner: Option<String>,
    pub reason: Option<String>,
    pub transcript_hash: Option<String>,
    pub settlement_tx_hash: Option<String>,
    pub stake_wei: Amount,
    pub settings: Option<String>,
    pub created_at: u64,
    pub completed_at: Option<u64>,
}

impl MatchRecord {
    pub fn from_match(m: &Match) -> Self {
        Self {
            match_id: m.match_id.clone(),
            game_id: m.game_id.clone(),
            status: m.status,
            players: m.players.clone(),
            winner: m.winner.clone(),
            reason: m.reason.clone(),
            transcript_hash: None,
            settlement_tx_hash: None,
            stake_wei: m.stake_wei.clone(),
            settings: m.settings.clone(),
            created_at: m.created_at,
            completed_at: m.completed_at,
        }
    }

    pub fn to_match(&self) -> Match {
        Match {
            match_id: self.match_id.clone(),
            game_id: self.game_id.clone(),
            players: self.players.clone(),
            status: self.status,
            winner: self.winner.clone(),
            reason: self.reason.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            last_activity_at: self.created_at,
            stake_wei: self.stake_wei.clone(),
            settings: self.settings.clone(),
            invite_code: None,
        }
    }
}

/// Append-only move log row; key is `(match_id, sequence)`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct MoveRecord {
    pub match_id: String,
    pub sequence: u32,
    pub player: String,
    pub action: Action,
    pub state_hash: String,
    pub prev_hash: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub addr: String,
    pub rating: u32,
    pub games_played: u32,
    pub games_won: u32,
    pub games_drawn: u32,
    pub earnings_wei: Amount,
}

impl PlayerRecord {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_owned(),
            rating: crate::elo::INITIAL_RATING,
            games_played: 0,
            games_won: 0,
            games_drawn: 0,
            earnings_wei: FREE_STAKE.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerGameRecord {
    pub addr: String,
    pub game_id: String,
    pub rating: u32,
    pub games_played: u32,
    pub games_won: u32,
    pub games_drawn: u32,
}

impl PlayerGameRecord {
    pub fn new(addr: &str, game_id: &str) -> Self {
        Self {
            addr: addr.to_owned(),
            game_id: game_id.to_owned(),
            rating: crate::elo::INITIAL_RATING,
            games_played: 0,
            games_won: 0,
            games_drawn: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub match_id: String,
    pub sender: String,
    pub message: String,
    pub created_at: u64,
}

/// The acknowledgement returned for an applied move or forfeit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub sequence: u32,
    pub terminal: bool,
    pub winner: Option<String>,
    pub draw: bool,
    pub reason: Option<String>,
    pub next_player: Option<String>,
    pub state_hash: String,
    pub prev_hash: String,
}

/// A live matchmaking queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub player: String,
    pub ticket: String,
    pub ts: u64,
}

/// Left behind for the waiting side of a pairing, consumed on its next poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMatch {
    pub match_id: String,
    pub opponent: String,
    pub stake_wei: Amount,
}

/// What a single-use session token resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    pub match_id: String,
    pub player: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveMatchPointer {
    pub match_id: String,
    pub game_id: String,
    pub stake_wei: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_pattern() {
        assert!(is_valid_address(
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        ));
        assert!(is_valid_address(
            "0xAbCd567890123456789012345678901234567890"
        ));
        assert!(!is_valid_address("0xaaa"));
        assert!(!is_valid_address(
            "0xzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"
        ));
        assert!(!is_valid_address(
            "1xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        ));
    }

    #[test]
    fn test_add_amounts() {
        assert_eq!(add_amounts("0", "0"), "0");
        assert_eq!(
            add_amounts("10000000000000000", "10000000000000000"),
            "20000000000000000"
        );
        assert_eq!(add_amounts("not-a-number", "5"), "5");
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut m = Match {
            match_id: "m".into(),
            game_id: "tictactoe".into(),
            players: vec![],
            status: MatchStatus::Active,
            winner: None,
            reason: None,
            created_at: 100,
            completed_at: None,
            last_activity_at: 100,
            stake_wei: FREE_STAKE.into(),
            settings: None,
            invite_code: None,
        };
        m.touch(200);
        assert_eq!(m.last_activity_at, 200);
        m.touch(150);
        assert_eq!(m.last_activity_at, 200);
    }
}

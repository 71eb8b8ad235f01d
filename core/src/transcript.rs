//! The hash-chained action log that defines a match's outcome.
//!
//! Every applied action appends one entry.  `state_hash` commits to the
//! post-action game state, `prev_hash` to the previous entry's state hash,
//! so any replay divergence is detected at the first differing step.

use borsh::{BorshDeserialize, BorshSerialize};
use dork_api::types::{Action, GameState};
use serde::{Deserialize, Serialize};
use sha256::digest;

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub sequence: u32,
    pub player: String,
    pub action: Action,
    pub state_hash: String,
    pub prev_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Transcript {
    match_id: String,
    entries: Vec<TranscriptEntry>,
}

/// Commitment to a game state within a match.
pub fn state_hash(state: &GameState, match_id: &str) -> String {
    let bytes = borsh::to_vec(&(state, match_id)).expect("state serialization");
    digest(bytes.as_slice())
}

impl Transcript {
    pub fn new(match_id: &str) -> Self {
        Self {
            match_id: match_id.to_owned(),
            entries: Vec::new(),
        }
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// The state hash of the newest entry, `""` before the first move.
    pub fn last_hash(&self) -> &str {
        self.entries.last().map(|e| e.state_hash.as_str()).unwrap_or("")
    }

    /// Append the entry for an applied action.  `state` is the state
    /// produced by the action.
    pub fn append(&mut self, player: &str, action: Action, state: &GameState) -> &TranscriptEntry {
        let prev_hash = self.last_hash().to_owned();
        let entry = TranscriptEntry {
            sequence: self.entries.len() as u32,
            player: player.to_owned(),
            action,
            state_hash: state_hash(state, &self.match_id),
            prev_hash,
        };
        self.entries.push(entry);
        self.entries.last().unwrap()
    }

    /// Hash over the whole ordered log, submitted with settlements.
    pub fn hash(&self) -> String {
        let bytes = borsh::to_vec(&(&self.entries, &self.match_id)).expect("transcript serialization");
        digest(bytes.as_slice())
    }

    pub fn verify_chain(&self) -> bool {
        let mut prev = "";
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.sequence != i as u32 || entry.prev_hash != prev {
                return false;
            }
            prev = &entry.state_hash;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(turn: u32) -> GameState {
        GameState {
            game_id: "tictactoe".into(),
            players: vec!["0xa".into(), "0xb".into()],
            current_player: "0xa".into(),
            turn_number: turn,
            data: vec![turn as u8],
        }
    }

    #[test]
    fn test_chain_links() {
        let mut t = Transcript::new("match-1");
        assert_eq!(t.last_hash(), "");

        let h1 = {
            let e = t.append("0xa", Action::new("place", "{\"pos\":4}"), &state(1));
            assert_eq!(e.sequence, 0);
            assert_eq!(e.prev_hash, "");
            e.state_hash.clone()
        };
        let e = t.append("0xb", Action::new("place", "{\"pos\":0}"), &state(2));
        assert_eq!(e.sequence, 1);
        assert_eq!(e.prev_hash, h1);
        assert!(t.verify_chain());
    }

    #[test]
    fn test_hash_depends_on_match_id() {
        let s = state(1);
        assert_ne!(state_hash(&s, "match-1"), state_hash(&s, "match-2"));
    }

    #[test]
    fn test_transcript_hash_is_stable() {
        let mut a = Transcript::new("match-1");
        let mut b = Transcript::new("match-1");
        for t in [&mut a, &mut b] {
            t.append("0xa", Action::new("place", "{\"pos\":4}"), &state(1));
            t.append("0xb", Action::new("place", "{\"pos\":0}"), &state(2));
        }
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_broken_chain_detected() {
        let mut t = Transcript::new("match-1");
        t.append("0xa", Action::new("place", "{\"pos\":4}"), &state(1));
        t.append("0xb", Action::new("place", "{\"pos\":0}"), &state(2));
        let mut entries = t.entries().to_vec();
        entries[1].prev_hash = "bogus".into();
        let broken = Transcript {
            match_id: "match-1".into(),
            entries,
        };
        assert!(!broken.verify_chain());
    }
}

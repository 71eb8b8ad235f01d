//! In-memory driver for one match.
//!
//! Owns the game state and the transcript.  Not internally synchronized:
//! the server funnels every call through the match's executor task.

use std::sync::Arc;

use dork_api::engine::GameModule;
use dork_api::types::{Action, GameState, Observation, Outcome};
use sha256::digest;

use crate::error::{Error, Result};
use crate::transcript::{state_hash, Transcript};
use crate::types::{MoveRecord, StepResult};

/// Deterministic per-match seed, stable across replays.
pub fn seed_from_match_id(match_id: &str) -> u64 {
    let h = digest(match_id);
    u64::from_be_bytes(
        hex::decode(&h[..16])
            .expect("hex digest")
            .try_into()
            .expect("8 bytes"),
    )
}

pub struct MatchOrchestrator {
    module: Arc<dyn GameModule>,
    match_id: String,
    state: GameState,
    transcript: Transcript,
    forfeit_outcome: Option<Outcome>,
}

impl Clone for MatchOrchestrator {
    fn clone(&self) -> Self {
        Self {
            module: self.module.clone(),
            match_id: self.match_id.clone(),
            state: self.state.clone(),
            transcript: self.transcript.clone(),
            forfeit_outcome: self.forfeit_outcome.clone(),
        }
    }
}

impl MatchOrchestrator {
    pub fn new(
        module: Arc<dyn GameModule>,
        match_id: &str,
        players: &[String],
        settings: &str,
    ) -> Result<Self> {
        let state = module.init(settings, players, seed_from_match_id(match_id))?;
        Ok(Self {
            module,
            match_id: match_id.to_owned(),
            state,
            transcript: Transcript::new(match_id),
            forfeit_outcome: None,
        })
    }

    /// Rebuild an orchestrator by re-executing the persisted move log.
    /// Every replayed step must reproduce the persisted state hash;
    /// a mismatch refuses reactivation.
    pub fn from_replay(
        module: Arc<dyn GameModule>,
        match_id: &str,
        players: &[String],
        settings: &str,
        moves: &[MoveRecord],
    ) -> Result<Self> {
        let mut mo = Self::new(module, match_id, players, settings)?;
        for record in moves {
            let result = mo.submit_action(&record.player, record.action.clone())?;
            if result.state_hash != record.state_hash {
                return Err(Error::ReplayHashMismatch(
                    match_id.to_owned(),
                    record.sequence,
                ));
            }
        }
        Ok(mo)
    }

    pub fn submit_action(&mut self, player: &str, action: Action) -> Result<StepResult> {
        if self.is_terminal() {
            return Err(Error::MatchTerminal);
        }
        if self.state.current_player != player {
            return Err(Error::NotYourTurn);
        }
        if !self.module.validate_action(&self.state, player, &action) {
            return Err(Error::InvalidAction);
        }

        let next = self.module.apply_action(&self.state, player, &action)?;
        let (sequence, state_hash, prev_hash) = {
            let entry = self.transcript.append(player, action, &next);
            (entry.sequence, entry.state_hash.clone(), entry.prev_hash.clone())
        };
        self.state = next;

        let terminal = self.module.is_terminal(&self.state);
        let outcome = if terminal {
            Some(self.module.outcome(&self.state)?)
        } else {
            None
        };

        Ok(StepResult {
            sequence,
            terminal,
            winner: outcome.as_ref().and_then(|o| o.winner.clone()),
            draw: outcome.as_ref().map(|o| o.draw).unwrap_or(false),
            reason: outcome.map(|o| o.reason),
            next_player: if terminal {
                None
            } else {
                Some(self.state.current_player.clone())
            },
            state_hash,
            prev_hash,
        })
    }

    /// End the match outside the game rules.  The forfeiting player loses;
    /// a single-player match ends without a winner.  Adds no transcript
    /// entry.
    pub fn forfeit(&mut self, player: &str, reason: &str) -> Result<StepResult> {
        if self.is_terminal() {
            return Err(Error::MatchTerminal);
        }
        if !self.state.has_player(player) {
            return Err(Error::PlayerNotInMatch(player.to_owned()));
        }

        let outcome = if self.state.players.len() == 1 {
            Outcome::solo(player, reason)
        } else {
            let winner = self
                .state
                .players
                .iter()
                .find(|p| p.as_str() != player)
                .cloned()
                .ok_or_else(|| Error::InternalError("no opponent".into()))?;
            Outcome::win(&winner, &self.state.players, reason)
        };

        let result = StepResult {
            sequence: self.transcript.len() as u32,
            terminal: true,
            winner: if self.state.players.len() == 1 {
                None
            } else {
                outcome.winner.clone()
            },
            draw: false,
            reason: Some(reason.to_owned()),
            next_player: None,
            state_hash: self.transcript.last_hash().to_owned(),
            prev_hash: self.transcript.last_hash().to_owned(),
        };
        self.forfeit_outcome = Some(outcome);
        Ok(result)
    }

    /// End the match as a draw, outside the game rules.  Used by the
    /// emergency and stale-match paths.
    pub fn abort(&mut self, reason: &str) -> Result<StepResult> {
        if self.is_terminal() {
            return Err(Error::MatchTerminal);
        }
        let outcome = Outcome::draw(&self.state.players, reason);
        let result = StepResult {
            sequence: self.transcript.len() as u32,
            terminal: true,
            winner: None,
            draw: true,
            reason: Some(reason.to_owned()),
            next_player: None,
            state_hash: self.transcript.last_hash().to_owned(),
            prev_hash: self.transcript.last_hash().to_owned(),
        };
        self.forfeit_outcome = Some(outcome);
        Ok(result)
    }

    pub fn observation(&self, player: &str) -> Result<Observation> {
        Ok(self.module.observation(&self.state, player)?)
    }

    pub fn legal_actions(&self, player: &str) -> Vec<Action> {
        if self.forfeit_outcome.is_some() {
            return Vec::new();
        }
        self.module.legal_actions(&self.state, player)
    }

    pub fn current_player(&self) -> &str {
        &self.state.current_player
    }

    pub fn players(&self) -> &[String] {
        &self.state.players
    }

    pub fn is_terminal(&self) -> bool {
        self.forfeit_outcome.is_some() || self.module.is_terminal(&self.state)
    }

    pub fn outcome(&self) -> Result<Outcome> {
        if let Some(ref o) = self.forfeit_outcome {
            return Ok(o.clone());
        }
        if !self.module.is_terminal(&self.state) {
            return Err(Error::MatchNotActive(self.match_id.clone()));
        }
        Ok(self.module.outcome(&self.state)?)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state_hash(&self) -> String {
        state_hash(&self.state, &self.match_id)
    }

    pub fn move_timeout_ms(&self) -> Option<u64> {
        self.module.meta().move_timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dork_api::engine::GameMeta;
    use dork_api::error::GameResult;
    use dork_api::prelude::*;

    /// Two players alternate saying "hi"; the game ends after four turns
    /// with the second mover winning.
    struct Greeting;

    impl GameModule for Greeting {
        fn meta(&self) -> GameMeta {
            GameMeta {
                game_id: "greeting".into(),
                name: "Greeting".into(),
                min_players: 2,
                max_players: 2,
                move_timeout_ms: None,
            }
        }

        fn init(&self, _settings: &str, players: &[String], _seed: u64) -> GameResult<GameState> {
            if players.len() != 2 {
                return Err(GameError::PlayerCountOutOfRange(players.len()));
            }
            Ok(GameState {
                game_id: "greeting".into(),
                players: players.to_vec(),
                current_player: players[0].clone(),
                turn_number: 0,
                data: vec![],
            })
        }

        fn validate_action(&self, state: &GameState, player: &str, action: &Action) -> bool {
            state.current_player == player && !self.is_terminal(state) && action.kind == "hi"
        }

        fn apply_action(
            &self,
            state: &GameState,
            _player: &str,
            _action: &Action,
        ) -> GameResult<GameState> {
            let next = state
                .players
                .iter()
                .find(|p| **p != state.current_player)
                .unwrap()
                .clone();
            state.advance(&(), &next)
        }

        fn is_terminal(&self, state: &GameState) -> bool {
            state.turn_number >= 4
        }

        fn outcome(&self, state: &GameState) -> GameResult<Outcome> {
            Ok(Outcome::win(&state.players[1], &state.players, "done"))
        }

        fn observation(&self, state: &GameState, player: &str) -> GameResult<Observation> {
            Ok(Observation {
                player: player.to_owned(),
                current_player: state.current_player.clone(),
                turn_number: state.turn_number,
                your_turn: state.current_player == player,
                data: "{}".into(),
            })
        }

        fn legal_actions(&self, state: &GameState, player: &str) -> Vec<Action> {
            if state.current_player == player && !self.is_terminal(state) {
                vec![Action::new("hi", "{}")]
            } else {
                vec![]
            }
        }
    }

    fn players() -> Vec<String> {
        vec!["0xa".to_string(), "0xb".to_string()]
    }

    #[test]
    fn test_turn_exclusivity() {
        let mut mo =
            MatchOrchestrator::new(Arc::new(Greeting), "m1", &players(), "{}").unwrap();
        assert_eq!(mo.current_player(), "0xa");
        assert_eq!(
            mo.submit_action("0xb", Action::new("hi", "{}")),
            Err(Error::NotYourTurn)
        );
        mo.submit_action("0xa", Action::new("hi", "{}")).unwrap();
        assert_eq!(mo.current_player(), "0xb");
    }

    #[test]
    fn test_invalid_action_rejected() {
        let mut mo =
            MatchOrchestrator::new(Arc::new(Greeting), "m1", &players(), "{}").unwrap();
        assert_eq!(
            mo.submit_action("0xa", Action::new("bye", "{}")),
            Err(Error::InvalidAction)
        );
        assert_eq!(mo.transcript().len(), 0);
    }

    #[test]
    fn test_terminal_refuses_moves() {
        let mut mo =
            MatchOrchestrator::new(Arc::new(Greeting), "m1", &players(), "{}").unwrap();
        for _ in 0..4 {
            let player = mo.current_player().to_owned();
            mo.submit_action(&player, Action::new("hi", "{}")).unwrap();
        }
        assert!(mo.is_terminal());
        assert_eq!(
            mo.submit_action("0xa", Action::new("hi", "{}")),
            Err(Error::MatchTerminal)
        );
        assert_eq!(mo.outcome().unwrap().winner, Some("0xb".into()));
    }

    #[test]
    fn test_replay_reproduces_transcript() {
        let mut live =
            MatchOrchestrator::new(Arc::new(Greeting), "m1", &players(), "{}").unwrap();
        let mut moves = Vec::new();
        for _ in 0..4 {
            let player = mo_player(&live);
            let result = live.submit_action(&player, Action::new("hi", "{}")).unwrap();
            moves.push(MoveRecord {
                match_id: "m1".into(),
                sequence: result.sequence,
                player,
                action: Action::new("hi", "{}"),
                state_hash: result.state_hash,
                prev_hash: result.prev_hash,
                created_at: 0,
            });
        }

        let replayed =
            MatchOrchestrator::from_replay(Arc::new(Greeting), "m1", &players(), "{}", &moves)
                .unwrap();
        assert!(replayed.is_terminal());
        assert_eq!(replayed.transcript(), live.transcript());
        assert_eq!(replayed.transcript().hash(), live.transcript().hash());
    }

    fn mo_player(mo: &MatchOrchestrator) -> String {
        mo.current_player().to_owned()
    }

    #[test]
    fn test_replay_detects_tampered_hash() {
        let mut live =
            MatchOrchestrator::new(Arc::new(Greeting), "m1", &players(), "{}").unwrap();
        let result = live.submit_action("0xa", Action::new("hi", "{}")).unwrap();
        let moves = vec![MoveRecord {
            match_id: "m1".into(),
            sequence: 0,
            player: "0xa".into(),
            action: Action::new("hi", "{}"),
            state_hash: format!("{}x", result.state_hash),
            prev_hash: result.prev_hash,
            created_at: 0,
        }];
        assert_eq!(
            MatchOrchestrator::from_replay(Arc::new(Greeting), "m1", &players(), "{}", &moves)
                .err(),
            Some(Error::ReplayHashMismatch("m1".into(), 0))
        );
    }

    #[test]
    fn test_abort_draws() {
        let mut mo =
            MatchOrchestrator::new(Arc::new(Greeting), "m1", &players(), "{}").unwrap();
        let result = mo.abort("emergency_shutdown").unwrap();
        assert!(result.terminal);
        assert!(result.draw);
        assert_eq!(result.winner, None);
        let outcome = mo.outcome().unwrap();
        assert!(outcome.draw);
        assert_eq!(outcome.reason, "emergency_shutdown");
    }

    #[test]
    fn test_forfeit_awards_opponent() {
        let mut mo =
            MatchOrchestrator::new(Arc::new(Greeting), "m1", &players(), "{}").unwrap();
        let result = mo.forfeit("0xa", "forfeit").unwrap();
        assert!(result.terminal);
        assert_eq!(result.winner, Some("0xb".into()));
        assert!(mo.is_terminal());
        assert!(mo.legal_actions("0xb").is_empty());
        assert_eq!(mo.forfeit("0xb", "forfeit"), Err(Error::MatchTerminal));
    }
}

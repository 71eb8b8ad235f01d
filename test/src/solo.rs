//! A single-player module used to exercise the queue-bypass path.
//!
//! The player taps three times and the game ends.

use dork_api::prelude::*;

pub struct SoloClicker;

impl GameModule for SoloClicker {
    fn meta(&self) -> GameMeta {
        GameMeta {
            game_id: "clicker".into(),
            name: "Clicker".into(),
            min_players: 1,
            max_players: 1,
            move_timeout_ms: Some(0),
        }
    }

    fn init(&self, _settings: &str, players: &[String], _seed: u64) -> GameResult<GameState> {
        if players.len() != 1 {
            return Err(GameError::PlayerCountOutOfRange(players.len()));
        }
        Ok(GameState {
            game_id: "clicker".into(),
            players: players.to_vec(),
            current_player: players[0].clone(),
            turn_number: 0,
            data: borsh::to_vec(&0u8).expect("serialize"),
        })
    }

    fn validate_action(&self, state: &GameState, player: &str, action: &Action) -> bool {
        state.current_player == player && !self.is_terminal(state) && action.kind == "tap"
    }

    fn apply_action(
        &self,
        state: &GameState,
        player: &str,
        _action: &Action,
    ) -> GameResult<GameState> {
        let taps: u8 = state.data()?;
        state.advance(&(taps + 1), player)
    }

    fn is_terminal(&self, state: &GameState) -> bool {
        state.data::<u8>().map(|taps| taps >= 3).unwrap_or(true)
    }

    fn outcome(&self, state: &GameState) -> GameResult<Outcome> {
        if !self.is_terminal(state) {
            return Err(GameError::GameNotOver);
        }
        Ok(Outcome::solo(&state.players[0], "three taps"))
    }

    fn observation(&self, state: &GameState, player: &str) -> GameResult<Observation> {
        let taps: u8 = state.data()?;
        Ok(Observation {
            player: player.to_owned(),
            current_player: state.current_player.clone(),
            turn_number: state.turn_number,
            your_turn: state.current_player == player && !self.is_terminal(state),
            data: format!("{{\"taps\":{}}}", taps),
        })
    }

    fn legal_actions(&self, state: &GameState, player: &str) -> Vec<Action> {
        if state.current_player == player && !self.is_terminal(state) {
            vec![Action::new("tap", "{}")]
        } else {
            Vec::new()
        }
    }
}

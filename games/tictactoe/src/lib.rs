//! Tic-tac-toe.
//!
//! `players[0]` is X and moves first.  The only action is
//! `place {"pos": 0..8}`; cells are numbered row-major.

use dork_api::prelude::*;
use serde::{Deserialize, Serialize};

const WIN_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

const EMPTY: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
struct Board {
    /// 0 empty, 1 = X (players[0]), 2 = O (players[1]).
    cells: [u8; 9],
}

impl Board {
    fn new() -> Self {
        Self { cells: [EMPTY; 9] }
    }

    fn winner_mark(&self) -> Option<u8> {
        for line in WIN_LINES {
            let m = self.cells[line[0]];
            if m != EMPTY && self.cells[line[1]] == m && self.cells[line[2]] == m {
                return Some(m);
            }
        }
        None
    }

    fn is_full(&self) -> bool {
        self.cells.iter().all(|c| *c != EMPTY)
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct PlacePayload {
    pos: usize,
}

fn mark_of(state: &GameState, player: &str) -> Option<u8> {
    state
        .players
        .iter()
        .position(|p| p == player)
        .map(|i| i as u8 + 1)
}

pub struct Tictactoe;

impl GameModule for Tictactoe {
    fn meta(&self) -> GameMeta {
        GameMeta {
            game_id: "tictactoe".into(),
            name: "Tic-Tac-Toe".into(),
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
            game_id: "tictactoe".into(),
            players: players.to_vec(),
            current_player: players[0].clone(),
            turn_number: 0,
            data: borsh::to_vec(&Board::new()).or(Err(GameError::SerializationError))?,
        })
    }

    fn validate_action(&self, state: &GameState, player: &str, action: &Action) -> bool {
        if state.current_player != player || self.is_terminal(state) || action.kind != "place" {
            return false;
        }
        let Ok(payload) = action.data::<PlacePayload>() else {
            return false;
        };
        let Ok(board) = state.data::<Board>() else {
            return false;
        };
        payload.pos < 9 && board.cells[payload.pos] == EMPTY
    }

    fn apply_action(
        &self,
        state: &GameState,
        player: &str,
        action: &Action,
    ) -> GameResult<GameState> {
        let payload: PlacePayload = action.data()?;
        let mut board: Board = state.data()?;
        let mark = mark_of(state, player).ok_or(GameError::PlayerNotInGame(player.to_owned()))?;
        if payload.pos >= 9 || board.cells[payload.pos] != EMPTY {
            return Err(GameError::IllegalAction);
        }
        board.cells[payload.pos] = mark;

        let next = state
            .players
            .iter()
            .find(|p| p.as_str() != player)
            .ok_or(GameError::PlayerNotInGame(player.to_owned()))?;
        state.advance(&board, next)
    }

    fn is_terminal(&self, state: &GameState) -> bool {
        state
            .data::<Board>()
            .map(|b| b.winner_mark().is_some() || b.is_full())
            .unwrap_or(true)
    }

    fn outcome(&self, state: &GameState) -> GameResult<Outcome> {
        let board: Board = state.data()?;
        match board.winner_mark() {
            Some(mark) => {
                let winner = &state.players[(mark - 1) as usize];
                Ok(Outcome::win(winner, &state.players, "three in a row"))
            }
            None if board.is_full() => Ok(Outcome::draw(&state.players, "board full")),
            None => Err(GameError::GameNotOver),
        }
    }

    fn observation(&self, state: &GameState, player: &str) -> GameResult<Observation> {
        let board: Board = state.data()?;
        let data = serde_json::json!({
            "board": board.cells,
            "marks": { "x": state.players[0], "o": state.players[1] },
        });
        Ok(Observation {
            player: player.to_owned(),
            current_player: state.current_player.clone(),
            turn_number: state.turn_number,
            your_turn: state.current_player == player && !self.is_terminal(state),
            data: data.to_string(),
        })
    }

    fn legal_actions(&self, state: &GameState, player: &str) -> Vec<Action> {
        if state.current_player != player || self.is_terminal(state) {
            return Vec::new();
        }
        let Ok(board) = state.data::<Board>() else {
            return Vec::new();
        };
        board
            .cells
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == EMPTY)
            .map(|(i, _)| Action::new("place", &format!("{{\"pos\":{}}}", i)))
            .collect()
    }
}

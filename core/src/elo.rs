//! Elo rating updates for two-player matches.
//!
//! Overall rating and per-game rating are computed independently with the
//! same function; each side's K-factor tapers with its own experience.

pub const INITIAL_RATING: u32 = 1200;
const RATING_FLOOR: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EloOutcome {
    WinA,
    WinB,
    Draw,
}

fn k_factor(games_played: u32) -> f64 {
    if games_played < 10 {
        40.0
    } else if games_played < 30 {
        20.0
    } else {
        10.0
    }
}

fn expected(rating: u32, opponent: u32) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent as f64 - rating as f64) / 400.0))
}

pub fn calculate_elo(
    rating_a: u32,
    rating_b: u32,
    games_played_a: u32,
    games_played_b: u32,
    outcome: EloOutcome,
) -> (u32, u32) {
    let (score_a, score_b) = match outcome {
        EloOutcome::WinA => (1.0, 0.0),
        EloOutcome::WinB => (0.0, 1.0),
        EloOutcome::Draw => (0.5, 0.5),
    };

    let new_a = rating_a as f64 + k_factor(games_played_a) * (score_a - expected(rating_a, rating_b));
    let new_b = rating_b as f64 + k_factor(games_played_b) * (score_b - expected(rating_b, rating_a));

    (
        (new_a.round() as i64).max(RATING_FLOOR as i64) as u32,
        (new_b.round() as i64).max(RATING_FLOOR as i64) as u32,
    )
}

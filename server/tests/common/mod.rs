#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dork_api::types::Action;
use dork_core::settlement::SettlementT;
use dork_core::storage::StorageT;
use dork_core::types::{MatchStatus, StepResult};
use dork_env::{Config, TimingConfig};
use dork_local_db::LocalDbStorage;
use dork_server::context::AppContext;
use dork_server::games::GameRegistry;
use dork_settlement::DummySettlement;
use dork_test::prelude::*;
use dork_tictactoe::Tictactoe;

pub const STAKE: &str = "10000000000000000";

pub struct TestEnv {
    pub ctx: Arc<AppContext>,
    pub storage: Arc<LocalDbStorage>,
    pub settlement: Option<Arc<DummySettlement>>,
    pub verifier: Arc<EcdsaVerifier>,
}

pub fn short_timing() -> TimingConfig {
    TimingConfig {
        deposit_poll_interval_ms: 20,
        deposit_timeout_ms: 400,
        dispute_window_ms: 40,
        ..TimingConfig::default()
    }
}

pub async fn test_env(staked: bool) -> TestEnv {
    test_env_with_storage(staked, mem_storage()).await
}

pub async fn test_env_with_storage(staked: bool, storage: Arc<LocalDbStorage>) -> TestEnv {
    let config = Config {
        server: None,
        timing: short_timing(),
        settlement: None,
    };
    build_env(staked, storage, config).await
}

pub async fn build_env(staked: bool, storage: Arc<LocalDbStorage>, config: Config) -> TestEnv {
    let settlement = if staked {
        Some(dummy_settlement("1000"))
    } else {
        None
    };

    let mut games = GameRegistry::new();
    games.register(Arc::new(Tictactoe));
    games.register(Arc::new(SoloClicker));

    let verifier = Arc::new(EcdsaVerifier::new());
    let (ctx, _signal_join) = AppContext::assemble(
        config,
        Arc::new(games),
        storage.clone(),
        storage.clone(),
        mem_cache(),
        settlement.clone().map(|s| s as Arc<dyn SettlementT>),
        verifier.clone(),
    );

    TestEnv {
        ctx,
        storage,
        settlement,
        verifier,
    }
}

pub fn place(pos: usize) -> Action {
    Action::new("place", &format!("{{\"pos\":{}}}", pos))
}

/// Pair two players over the queue and return the match id.
pub async fn pair_players(env: &TestEnv, game_id: &str, stake: Option<&str>, a: &str, b: &str) -> String {
    use dork_server::lifecycle::JoinQueueResult;

    let first = env
        .ctx
        .lifecycle
        .join_queue(a, game_id, stake, None, None)
        .await
        .unwrap();
    assert!(matches!(first, JoinQueueResult::Queued { .. }));

    let second = env
        .ctx
        .lifecycle
        .join_queue(b, game_id, stake, None, None)
        .await
        .unwrap();
    match second {
        JoinQueueResult::Matched { match_id, opponent, .. } => {
            assert_eq!(opponent.as_deref(), Some(a));
            match_id
        }
        other => panic!("expected a pairing, got {:?}", other),
    }
}

/// Play out S1: alice 4, bob 0, alice 1, bob 3, alice 7; alice wins the
/// middle column.
pub async fn play_alice_wins(env: &TestEnv, match_id: &str, alice: &str, bob: &str) -> StepResult {
    let moves = [(alice, 4), (bob, 0), (alice, 1), (bob, 3)];
    for (player, pos) in moves {
        let step = env
            .ctx
            .lifecycle
            .submit_move(match_id, player, place(pos))
            .await
            .unwrap();
        assert!(!step.terminal);
    }
    let last = env
        .ctx
        .lifecycle
        .submit_move(match_id, alice, place(7))
        .await
        .unwrap();
    assert!(last.terminal);
    assert_eq!(last.winner.as_deref(), Some(alice));
    last
}

/// Completion is persisted through the signal loop; poll until it lands.
pub async fn wait_for_completion(storage: &Arc<LocalDbStorage>, match_id: &str) {
    for _ in 0..200 {
        if let Some(record) = storage.get_match(match_id).await.unwrap() {
            if record.status == MatchStatus::Completed {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("match {} never completed", match_id);
}

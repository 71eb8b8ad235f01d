//! Server runtime context.

use std::sync::Arc;

use dork_core::cache::{CacheT, MemoryCache};
use dork_core::error::Result;
use dork_core::settlement::SettlementT;
use dork_core::storage::{ChatStoreT, StorageT};
use dork_core::verifier::VerifierT;
use dork_crypto::EcdsaVerifier;
use dork_env::Config;
use dork_local_db::LocalDbStorage;
use dork_settlement::DummySettlement;
use dork_tictactoe::Tictactoe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::frame::SignalFrame;
use crate::games::GameRegistry;
use crate::lifecycle::MatchLifecycle;
use crate::registry::MatchRegistry;

#[derive(Clone)]
pub struct AppContext {
    pub config: Config,
    pub games: Arc<GameRegistry>,
    pub registry: Arc<MatchRegistry>,
    pub storage: Arc<dyn StorageT>,
    pub chat: Arc<dyn ChatStoreT>,
    pub cache: Arc<dyn CacheT>,
    pub settlement: Option<Arc<dyn SettlementT>>,
    pub verifier: Arc<dyn VerifierT>,
    pub lifecycle: Arc<MatchLifecycle>,
}

impl AppContext {
    pub async fn try_new_and_start_signal_loop(
        config: Config,
    ) -> Result<(Arc<Self>, JoinHandle<()>)> {
        info!("Initialize application context");

        let storage = Arc::new(LocalDbStorage::try_new(&config.server().db_path)?);

        let mut games = GameRegistry::new();
        games.register(Arc::new(Tictactoe));

        // The in-process escrow adapter; a chain-backed implementation of
        // SettlementT slots in here.
        let settlement = config.settlement.as_ref().map(|s| {
            Arc::new(DummySettlement::new(
                &s.escrow_address,
                &s.min_stake_wei,
                s.game_ids.clone(),
            )) as Arc<dyn SettlementT>
        });

        Ok(Self::assemble(
            config,
            Arc::new(games),
            storage.clone(),
            storage,
            Arc::new(MemoryCache::new()),
            settlement,
            Arc::new(EcdsaVerifier::new()),
        ))
    }

    /// Wire a context from explicit collaborators.  Tests inject their
    /// own game registry, settlement and storage through this.
    pub fn assemble(
        config: Config,
        games: Arc<GameRegistry>,
        storage: Arc<dyn StorageT>,
        chat: Arc<dyn ChatStoreT>,
        cache: Arc<dyn CacheT>,
        settlement: Option<Arc<dyn SettlementT>>,
        verifier: Arc<dyn VerifierT>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let registry = Arc::new(MatchRegistry::new());
        let (signal_tx, signal_rx) = mpsc::channel(32);
        let lifecycle = Arc::new(MatchLifecycle::new(
            games.clone(),
            registry.clone(),
            storage.clone(),
            cache.clone(),
            settlement.clone(),
            config.timing.clone(),
            signal_tx,
        ));

        let ctx = Arc::new(Self {
            config,
            games,
            registry,
            storage,
            chat,
            cache,
            settlement,
            verifier,
            lifecycle,
        });
        let join_handle = ctx.clone().start_signal_loop(signal_rx);
        (ctx, join_handle)
    }

    fn start_signal_loop(
        self: Arc<Self>,
        mut signal_rx: mpsc::Receiver<SignalFrame>,
    ) -> JoinHandle<()> {
        info!("Starting signal loop");
        tokio::spawn(async move {
            while let Some(signal) = signal_rx.recv().await {
                match signal {
                    SignalFrame::MatchCompleted {
                        match_id,
                        winner,
                        draw,
                        reason,
                        transcript_hash,
                    } => {
                        if let Err(e) = self
                            .lifecycle
                            .persist_match_completion(
                                &match_id,
                                winner,
                                draw,
                                &reason,
                                &transcript_hash,
                            )
                            .await
                        {
                            error!("Completion persistence failed for {}: {}", match_id, e);
                        }
                    }
                    SignalFrame::Shutdown => break,
                }
            }
            info!("Signal loop stopped");
        })
    }
}

use std::sync::Arc;
use std::time::Duration;

use dork_env::Config;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::context::AppContext;
use crate::recovery;
use crate::rpc;
use crate::session;

fn spawn_janitor(ctx: Arc<AppContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let timing = ctx.lifecycle.timing().clone();
        let mut interval =
            tokio::time::interval(Duration::from_millis(timing.cleanup_interval_ms));
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = ctx
                .lifecycle
                .cleanup_stale_matches(timing.stale_match_max_age_ms)
                .await
            {
                error!("Stale-match cleanup failed: {}", e);
            }
            let removed = ctx
                .lifecycle
                .cleanup_completed_matches(timing.completed_match_max_age_ms)
                .await;
            if removed > 0 {
                info!("Evicted {} completed matches", removed);
            }
        }
    })
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let (ctx, signal_join) = AppContext::try_new_and_start_signal_loop(config).await?;

    recovery::run_recovery(&ctx.lifecycle).await?;

    let janitor = spawn_janitor(ctx.clone());
    let session_server = tokio::spawn(session::run_session_server(ctx.clone()));
    let rpc_handle = rpc::run_rpc_server(ctx.clone()).await?;

    rpc_handle.stopped().await;

    janitor.abort();
    session_server.abort();
    signal_join.abort();
    Ok(())
}

use anyhow::Result;
use tracing::info;
use flm_core::{init_tracing, load_config, Marketplace};

mod replay_runner;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = load_config("market-node")?;
    init_tracing(&cfg.service_name, &cfg.log_level)?;
    info!(?cfg, "config_loaded");

    let market = Marketplace::new(cfg.settlement);
    match &cfg.replay_file {
        Some(path) => {
            let summary = replay_runner::replay_file(&market, path).await?;
            info!(applied = summary.applied, rejected = summary.rejected, "replay_finished");
            for model_id in market.model_ids() {
                let snapshot = serde_json::to_string(&market.snapshot(&model_id)?)?;
                info!(model_id = %model_id, %snapshot, "model_snapshot");
            }
        }
        None => info!("no replay file configured (set FLM_REPLAY_FILE)"),
    }
    Ok(())
}

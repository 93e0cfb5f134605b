//! Applies a YAML call script to a marketplace, in order.
//!
//! A rejected call is logged and counted; it never stops the replay, matching
//! how a submitted transaction that reverts leaves later ones unaffected.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use flm_core::{parse_script, Marketplace};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub rejected: usize,
}

pub async fn replay_file(market: &Marketplace, path: &Path) -> Result<ReplaySummary> {
    let text = tokio::fs::read_to_string(path).await.with_context(|| format!("read replay file {}", path.display()))?;
    replay_text(market, &text)
}

pub fn replay_text(market: &Marketplace, text: &str) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    for (idx, call) in parse_script(text)?.into_iter().enumerate() {
        let name = call.name();
        match market.apply(call) {
            Ok(outcome) => {
                summary.applied += 1;
                let outcome = serde_json::to_string(&outcome)?;
                info!(idx, call = name, %outcome, "call_applied");
            }
            Err(e) => {
                summary.rejected += 1;
                warn!(idx, call = name, error = %e, "call_rejected");
            }
        }
    }
    Ok(summary)
}

use std::sync::Arc;

use rankscout_core::discovery::CancelToken;
use rankscout_core::{
    CategoryId, DiscoveryEngine, DiscoveryRequest, PriceRange, RankRange, Strategy,
};
use rankscout_warehouse::{unix_now, DiscoveryRun, WarehouseDiscoveryStore};
use serde_json::json;
use tracing::{info, warn};

use crate::cli::DiscoverArgs;
use crate::error::CliError;
use crate::output::CommandOutput;

use super::Context;

pub fn request_from_args(args: &DiscoverArgs) -> Result<DiscoveryRequest, CliError> {
    Ok(DiscoveryRequest::new(
        CategoryId::new(args.category)?,
        RankRange::new(args.rank_min, args.rank_max)?,
        PriceRange::new(args.price_min, args.price_max)?,
        args.max_results,
    )?
    .with_max_competing_sellers(args.max_sellers)
    .with_exclude_provider_as_seller(!args.allow_provider_seller)
    .with_strategy(Strategy::from(args.strategy)))
}

pub async fn run(args: &DiscoverArgs, context: &Context) -> Result<CommandOutput, CliError> {
    let request = request_from_args(args)?;
    let mut warnings = Vec::new();
    let warehouse = context.warehouse(&mut warnings);

    let mut engine = DiscoveryEngine::new(
        context.provider.clone(),
        context.scorer.clone(),
        context.config.discovery(),
    );
    if let Some(warehouse) = &warehouse {
        engine = engine.with_store(Arc::new(WarehouseDiscoveryStore::new(warehouse.clone())));
    }

    let cancel = CancelToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; finishing in-flight calls");
                cancel.cancel();
            }
        })
    };
    let outcome = engine.discover_with_cancel(&request, &cancel).await;
    interrupt.abort();
    let outcome = outcome?;

    if let Some(warehouse) = &warehouse {
        if let Err(error) = warehouse.record_run(&DiscoveryRun::from_outcome(&outcome, unix_now())) {
            warn!(error = %error, "failed to record discovery run");
            warnings.push(format!("run log write failed: {error}"));
        }
    }
    if outcome.cancelled {
        warnings.push("discovery was cancelled; results are partial".to_owned());
    }

    let gateway = context.provider.gateway().stats().await;
    let data = json!({
        "request": request,
        "outcome": outcome,
        "gateway": gateway,
    });
    Ok(CommandOutput::new("discover", data).with_warnings(warnings))
}

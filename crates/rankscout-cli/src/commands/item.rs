use rankscout_core::scoring::recommend;
use rankscout_core::{
    extract_product, ExtractedProduct, ItemId, Recommendation, Scores, Strategy, UtcDateTime,
};
use serde::Serialize;
use serde_json::json;

use crate::cli::ItemArgs;
use crate::error::CliError;
use crate::output::CommandOutput;

use super::Context;

#[derive(Debug, Serialize)]
struct ScoredItem {
    product: ExtractedProduct,
    scores: Scores,
    weighted_score: f64,
    recommendation: Recommendation,
}

pub async fn run(args: &ItemArgs, context: &Context) -> Result<CommandOutput, CliError> {
    let ids = args
        .ids
        .iter()
        .map(|raw| ItemId::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let strategy = Strategy::from(args.strategy);
    let profile = context.scorer.config().profile(strategy);

    let raw = context.provider.products(&ids, args.offers).await?;
    let now = UtcDateTime::now();
    let mut warnings = Vec::new();
    let mut items = Vec::with_capacity(raw.len());
    for product in &raw {
        match extract_product(product) {
            Ok(product) => {
                let scores = context.scorer.score(&product, strategy, now);
                items.push(ScoredItem {
                    weighted_score: scores.weighted(),
                    recommendation: recommend(&scores, profile),
                    product,
                    scores,
                });
            }
            Err(error) => warnings.push(format!("skipped '{}': {error}", product.item_id)),
        }
    }

    let missing = ids
        .iter()
        .filter(|id| !items.iter().any(|item| &item.product.item_id == *id))
        .map(ItemId::to_string)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        warnings.push(format!("provider returned no record for {}", missing.join(", ")));
    }

    let data = json!({
        "strategy": strategy,
        "items": items,
    });
    Ok(CommandOutput::new("item", data).with_warnings(warnings))
}

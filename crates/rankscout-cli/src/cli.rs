//! CLI argument definitions for Rankscout.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `discover` | Run a segmented discovery for a category |
//! | `item` | Extract and score individual items |
//! | `budget` | Show provider token status and gateway state |
//! | `runs` | List recent discovery runs from the local warehouse |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | TOML configuration file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--mock` | `false` | Use the offline scripted provider |
//! | `--no-store` | `false` | Skip the local discovery store |
//!
//! # Examples
//!
//! ```bash
//! rankscout discover --category 283155 --rank-min 10000 --rank-max 250000 --max-results 30
//! rankscout item B000000001 B000000002 --strategy velocity --pretty
//! rankscout budget --mock
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rankscout_core::Strategy;

/// Budget-aware product discovery against a metered product-data provider.
#[derive(Debug, Parser)]
#[command(
    name = "rankscout",
    author,
    version,
    about = "Budget-aware product discovery CLI",
    long_about = "Rankscout finds resale candidates in a category by querying a metered \
product-data provider within its token budget.\n\
\n\
  • Rank-segmented discovery with balanced selection\n\
  • Local token budget, circuit breaker and tiered cache\n\
  • Velocity, stability, confidence and ROI scoring\n\
\n\
Use 'rankscout <command> --help' for command-specific help."
)]
pub struct Cli {
    /// TOML configuration file. Environment overrides still apply.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Serve provider calls from a deterministic offline script.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Do not read or write the local discovery store.
    #[arg(long, global = true, default_value_t = false)]
    pub no_store: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover scored candidates within rank and price bounds.
    ///
    /// Wide rank ranges are queried in three segments so every part of the
    /// range is represented in the result.
    ///
    /// # Examples
    ///
    ///   rankscout discover --category 283155 --rank-min 10000 --rank-max 250000
    ///   rankscout discover --category 283155 --price-min 15 --price-max 60 --max-sellers 8
    Discover(DiscoverArgs),

    /// Fetch, extract and score specific items.
    ///
    /// # Examples
    ///
    ///   rankscout item B000000001
    ///   rankscout item B000000001 B000000002 --offers
    Item(ItemArgs),

    /// Show the provider's token status alongside local gateway state.
    Budget,

    /// List recent discovery runs recorded in the local warehouse.
    Runs(RunsArgs),
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// Provider category node id.
    #[arg(long)]
    pub category: u64,

    #[arg(long)]
    pub rank_min: Option<u64>,

    #[arg(long)]
    pub rank_max: Option<u64>,

    /// Minimum price in currency units.
    #[arg(long)]
    pub price_min: Option<f64>,

    /// Maximum price in currency units.
    #[arg(long)]
    pub price_max: Option<f64>,

    #[arg(long, default_value_t = 30)]
    pub max_results: usize,

    /// Drop items with more competing third-party sellers than this.
    #[arg(long)]
    pub max_sellers: Option<u32>,

    /// Keep items the provider itself sells.
    #[arg(long, default_value_t = false)]
    pub allow_provider_seller: bool,

    #[arg(long, value_enum, default_value_t = StrategyArg::Balanced)]
    pub strategy: StrategyArg,
}

#[derive(Debug, Args)]
pub struct ItemArgs {
    /// One or more provider item ids.
    #[arg(required = true, num_args = 1..)]
    pub ids: Vec<String>,

    /// Include per-seller offers (costs extra tokens per item).
    #[arg(long, default_value_t = false)]
    pub offers: bool,

    #[arg(long, value_enum, default_value_t = StrategyArg::Balanced)]
    pub strategy: StrategyArg,
}

#[derive(Debug, Args)]
pub struct RunsArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Fast movers; tight rank tiers.
    Velocity,
    Balanced,
    /// Long tail; higher ROI bar.
    Patient,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Velocity => Self::Velocity,
            StrategyArg::Balanced => Self::Balanced,
            StrategyArg::Patient => Self::Patient,
        }
    }
}

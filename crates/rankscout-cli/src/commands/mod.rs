mod budget;
mod discover;
mod item;
mod runs;

use std::sync::Arc;

use rankscout_core::{
    CacheStore, CircuitBreaker, ConfigError, HttpClient, ProviderClient, ProviderGateway,
    RankscoutConfig, ReqwestHttpClient, Scorer, TokenBudget, TokenStatusProbe,
};
use rankscout_warehouse::{Warehouse, WarehouseConfig};
use tracing::warn;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::mock::MockProvider;
use crate::output::CommandOutput;

/// Everything a command needs, wired from configuration.
pub struct Context {
    pub config: RankscoutConfig,
    pub provider: ProviderClient,
    pub scorer: Scorer,
    pub use_store: bool,
}

impl Context {
    pub fn build(cli: &Cli, config: RankscoutConfig) -> Result<Self, CliError> {
        let http_client: Arc<dyn HttpClient> = if cli.mock {
            Arc::new(MockProvider::default())
        } else {
            if config.provider.api_key.is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "provider.api_key",
                    reason: "set RANKSCOUT_API_KEY or use --mock".to_owned(),
                }
                .into());
            }
            Arc::new(ReqwestHttpClient::new(config.gateway().request_timeout))
        };

        let gateway_config = config.gateway();
        let gateway = ProviderGateway::new(gateway_config.clone(), Arc::clone(&http_client))
            .with_budget(Arc::new(TokenBudget::new(config.budget())))
            .with_circuit_breaker(Arc::new(CircuitBreaker::new(config.circuit())))
            .with_cache(CacheStore::new(config.ttls()))
            .with_retry(config.retry())
            .with_balance_probe(Arc::new(TokenStatusProbe::new(gateway_config, http_client)));

        Ok(Self {
            scorer: Scorer::new(config.business.clone()),
            provider: ProviderClient::new(Arc::new(gateway)),
            use_store: !cli.no_store,
            config,
        })
    }

    /// The local warehouse, or `None` with a warning when disabled or unavailable.
    pub fn warehouse(&self, warnings: &mut Vec<String>) -> Option<Warehouse> {
        if !self.use_store {
            return None;
        }
        let ttl = self.config.discovery_store_ttl()?;
        match Warehouse::open(WarehouseConfig::default().with_discovery_ttl(ttl)) {
            Ok(warehouse) => Some(warehouse),
            Err(error) => {
                warn!(error = %error, "local warehouse unavailable");
                warnings.push(format!("local warehouse unavailable: {error}"));
                None
            }
        }
    }
}

pub async fn run(cli: &Cli, config: RankscoutConfig) -> Result<CommandOutput, CliError> {
    if let Command::Runs(args) = &cli.command {
        return runs::run(args);
    }
    let context = Context::build(cli, config)?;

    match &cli.command {
        Command::Discover(args) => discover::run(args, &context).await,
        Command::Item(args) => item::run(args, &context).await,
        Command::Budget => budget::run(&context).await,
        Command::Runs(args) => runs::run(args),
    }
}

use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] rankscout_core::ValidationError),

    #[error(transparent)]
    Config(#[from] rankscout_core::ConfigError),

    #[error(transparent)]
    Gateway(#[from] rankscout_core::GatewayError),

    #[error(transparent)]
    Discovery(#[from] rankscout_core::DiscoveryError),

    #[error(transparent)]
    Warehouse(#[from] rankscout_warehouse::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Config(_) => 2,
            Self::Gateway(_) | Self::Discovery(_) => 3,
            Self::Serialization(_) => 4,
            Self::Warehouse(_) => 6,
            Self::Io(_) => 10,
        }
    }

    /// Stable machine-readable code for the error payload.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_input",
            Self::Config(_) => "invalid_config",
            Self::Gateway(error) => error.code(),
            Self::Discovery(error) => error.code(),
            Self::Warehouse(_) => "warehouse_error",
            Self::Serialization(_) => "serialization_error",
            Self::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rankscout_core::GatewayError;

    #[test]
    fn budget_exhaustion_maps_to_provider_exit_code() {
        let error = CliError::from(GatewayError::InsufficientBudget {
            endpoint: "query",
            balance: 8.0,
            required: 10.0,
        });
        assert_eq!(error.exit_code(), 3);
        assert_eq!(error.code(), "insufficient_budget");
    }
}

use serde_json::json;
use tracing::warn;

use crate::error::CliError;
use crate::output::CommandOutput;

use super::Context;

/// Provider balance plus the local view of it; a failed status call still reports local state.
pub async fn run(context: &Context) -> Result<CommandOutput, CliError> {
    let mut warnings = Vec::new();
    let token_status = match context.provider.token_status().await {
        Ok(status) => Some(status),
        Err(error) => {
            warn!(code = error.code(), error = %error, "token status unavailable");
            warnings.push(format!("token status unavailable: {error}"));
            None
        }
    };

    let gateway = context.provider.gateway().stats().await;
    let data = json!({
        "token_status": token_status,
        "gateway": gateway,
        "capacity": context.provider.gateway().budget().config().capacity,
    });
    Ok(CommandOutput::new("budget", data).with_warnings(warnings))
}

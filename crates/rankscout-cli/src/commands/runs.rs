use rankscout_warehouse::Warehouse;
use serde_json::json;

use crate::cli::RunsArgs;
use crate::error::CliError;
use crate::output::CommandOutput;

pub fn run(args: &RunsArgs) -> Result<CommandOutput, CliError> {
    let warehouse = Warehouse::open_default()?;
    let runs = warehouse.recent_runs(args.limit)?;
    let data = json!({
        "db_path": warehouse.db_path(),
        "runs": runs,
    });
    Ok(CommandOutput::new("runs", data))
}

//! Subcommand implementations

use crate::commands::{ConfigArgs, DiffArgs, ServeArgs};
use crate::error::{CliError, CliResult};
use crate::server::{ServerConfig, SnapshotServer};
use comparar::{DiffOptions, ImageDiffer, PixelDiffer, SessionConfig};
use std::path::Path;

/// Load and validate the session configuration
pub fn load_session_config(path: Option<&Path>) -> CliResult<SessionConfig> {
    let config = SessionConfig::load(path).map_err(|e| CliError::config(e.to_string()))?;
    config
        .validate()
        .map_err(|e| CliError::config(e.to_string()))?;
    Ok(config)
}

/// Effective configuration as pretty JSON
pub fn execute_config(args: &ConfigArgs) -> CliResult<String> {
    let config = load_session_config(args.config.as_deref())?;
    serde_json::to_string_pretty(&config).map_err(|e| CliError::config(e.to_string()))
}

/// Diff two images, writing the diff image if asked; returns the report
pub fn execute_diff(args: &DiffArgs) -> CliResult<serde_json::Value> {
    let baseline = std::fs::read(&args.baseline).map_err(|e| {
        CliError::invalid_argument(format!("cannot read {}: {e}", args.baseline.display()))
    })?;
    let compared = std::fs::read(&args.compared).map_err(|e| {
        CliError::invalid_argument(format!("cannot read {}: {e}", args.compared.display()))
    })?;

    let options = DiffOptions::default().with_color_threshold(args.color_threshold);
    let outcome = PixelDiffer::new().diff(&baseline, &compared, &options)?;

    if let Some(output) = &args.output {
        std::fs::write(output, &outcome.diff_image)?;
        tracing::info!(path = %output.display(), "wrote diff image");
    }
    Ok(outcome.raw)
}

/// Run a session with its HTTP intake until Ctrl+C
pub fn execute_serve(args: &ServeArgs) -> CliResult<()> {
    let session = load_session_config(args.config.as_deref())?;
    let server = SnapshotServer::new(
        ServerConfig::default()
            .with_host(args.host.clone())
            .with_port(args.port),
        session,
    );

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::server(format!("Failed to create runtime: {e}")))?;
    rt.block_on(server.run())
}

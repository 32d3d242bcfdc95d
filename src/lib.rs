pub mod commands;
pub mod config;
pub mod error;
pub mod escalation;
pub mod logging;
pub mod state;
pub mod storage;

#[cfg(test)]
mod tests;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::{config::Config, state::AppState};

/// Read failure payloads from stdin, one JSON object per line, and print each response
#[tokio::main]
pub async fn run() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let config = Config::from_env()?;
    logging::init_tracing(&config)?;

    tracing::info!("Opening error store at: {}", config.database_url);
    let state = AppState::from_config(config).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        match commands::dispatch_line(&state, &line).await {
            Ok(Some(output)) => {
                let mut rendered = serde_json::to_string(&output)?;
                rendered.push('\n');
                stdout.write_all(rendered.as_bytes()).await?;
                stdout.flush().await?;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Skipping malformed input line"),
        }
    }

    state.shutdown().await?;
    Ok(())
}

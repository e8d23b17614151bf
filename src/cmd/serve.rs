//! Board server commands: `taskboard serve` and `taskboard init`.

use anyhow::Result;

use taskboard::board::server::{self, ServerConfig};
use taskboard::config::TaskboardConfig;

pub async fn cmd_serve(config: &TaskboardConfig) -> Result<()> {
    server::start_server(ServerConfig::from(config)).await
}

pub fn cmd_init(config: &TaskboardConfig) -> Result<()> {
    let path = &config.database.path;
    server::open_database(path)?;
    tracing::info!(db = %path.display(), "Database initialized");
    println!("Taskboard database initialized at {}", path.display());
    Ok(())
}

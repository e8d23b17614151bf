//! Configuration view and creation commands: `taskboard config`.

use std::path::Path;

use anyhow::{Context, Result, bail};

use taskboard::config::{CONFIG_FILE_NAME, TaskboardConfig};

use crate::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    config: &TaskboardConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
        }
        Some(ConfigCommands::Init { force }) => {
            let path = project_dir.join(CONFIG_FILE_NAME);
            if path.exists() && !force {
                bail!(
                    "{} already exists. Use --force to overwrite.",
                    path.display()
                );
            }
            TaskboardConfig::default().save(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

//! List command - every configured binding

use anyhow::Result;
use clap::Args;

use super::{config_json, format_optional_time, Session};
use crate::output::{get_formatter, plural, OutputFormat};

#[derive(Debug, Args)]
pub struct ListCommand {}

impl ListCommand {
    pub async fn execute(&self, session: &Session, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let configs = session.configs.list().await?;

        if format.is_json() {
            let json: Vec<_> = configs.iter().map(config_json).collect();
            formatter.print_json(&serde_json::Value::Array(json));
            return Ok(());
        }

        if configs.is_empty() {
            formatter.info("No sync configurations. Add one with 'tandem add <local> <remote-folder-id>'.");
            return Ok(());
        }

        formatter.success(&plural(configs.len(), "configuration"));
        for config in &configs {
            println!();
            formatter.info(&format!("{}", config.local_path().display()));
            formatter.info(&format!("  Remote folder: {}", config.remote_folder_id()));
            if let Some(container) = config.remote_container_id() {
                formatter.info(&format!("  Container:     {container}"));
            }
            formatter.info(&format!(
                "  Last sync:     {}",
                format_optional_time(config.last_sync_at())
            ));
        }
        Ok(())
    }
}

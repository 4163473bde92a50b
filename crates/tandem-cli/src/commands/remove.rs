//! Remove command - drop a binding together with its items and log

use anyhow::Result;
use clap::Args;

use super::{lookup_path, Session};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct RemoveCommand {
    /// Local directory of the configuration
    pub local: String,
}

impl RemoveCommand {
    pub async fn execute(&self, session: &Session, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let path = lookup_path(&self.local)?;

        session.configs.unregister(&path).await?;

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "removed": path.display().to_string(),
            }));
        } else {
            formatter.success(&format!("Stopped syncing {}", path.display()));
            formatter.info("Local files were left in place");
        }
        Ok(())
    }
}

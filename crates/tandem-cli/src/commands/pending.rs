//! Pending command - files waiting to be uploaded

use anyhow::Result;
use clap::Args;

use super::{format_optional_time, lookup_path, Session};
use crate::output::{get_formatter, plural, OutputFormat};

#[derive(Debug, Args)]
pub struct PendingCommand {
    /// Local directory of the configuration
    pub local: String,
}

impl PendingCommand {
    pub async fn execute(&self, session: &Session, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let path = lookup_path(&self.local)?;
        let items = session.configs.pending_uploads(&path).await?;

        if format.is_json() {
            let json: Vec<_> = items
                .iter()
                .map(|item| {
                    serde_json::json!({
                        "path": item.local_path().as_str(),
                        "remote_id": item.remote_id().map(|id| id.as_str()),
                        "local_md5": item.local_md5().map(|h| h.as_str()),
                        "local_mtime": item.local_mtime().map(|t| t.to_rfc3339()),
                    })
                })
                .collect();
            formatter.print_json(&serde_json::Value::Array(json));
            return Ok(());
        }

        if items.is_empty() {
            formatter.success("Nothing waiting to be uploaded");
            return Ok(());
        }

        formatter.success(&format!("{} waiting to be uploaded", plural(items.len(), "file")));
        for item in &items {
            let status = if item.remote_id().is_some() { "changed" } else { "new" };
            formatter.info(&format!(
                "{:<8} {}  (modified {})",
                status,
                item.local_path(),
                format_optional_time(item.local_mtime())
            ));
        }
        Ok(())
    }
}

//! Add command - bind a local directory to a remote folder

use anyhow::Result;
use clap::Args;

use super::{config_json, Session};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct AddCommand {
    /// Local directory (created when missing)
    pub local: String,

    /// Id of the remote folder to mirror
    pub remote_folder_id: String,

    /// Shared container holding the remote folder
    #[arg(long)]
    pub container: Option<String>,
}

impl AddCommand {
    pub async fn execute(&self, session: &Session, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let config = session
            .configs
            .register(&self.local, &self.remote_folder_id, self.container.clone())
            .await?;

        if format.is_json() {
            formatter.print_json(&config_json(&config));
        } else {
            formatter.success(&format!(
                "Syncing {} with remote folder {}",
                config.local_path().display(),
                config.remote_folder_id()
            ));
            if let Some(container) = config.remote_container_id() {
                formatter.info(&format!("Container: {container}"));
            }
        }
        Ok(())
    }
}

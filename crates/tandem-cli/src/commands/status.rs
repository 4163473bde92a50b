//! Status command - item counts per configuration
//!
//! Counts are derived from the stored items on every call:
//! 1. Total tracked items
//! 2. Synced, pending (upload + download), conflict and error items
//! 3. Time of the last cursor advance

use anyhow::Result;
use clap::Args;

use tandem_core::domain::SyncStatus;

use super::{format_optional_time, lookup_path, Session};
use crate::output::{get_formatter, OutputFormat, OutputFormatter};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Only show this configuration
    pub local: Option<String>,
}

impl StatusCommand {
    pub async fn execute(&self, session: &Session, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let path = self.local.as_deref().map(lookup_path).transpose()?;
        let statuses = session.configs.statuses(path.as_deref()).await?;

        if format.is_json() {
            formatter.print_json(&serde_json::to_value(&statuses)?);
            return Ok(());
        }

        if statuses.is_empty() {
            formatter.info("No sync configurations.");
            return Ok(());
        }
        for status in &statuses {
            show_status(status, &*formatter);
        }
        Ok(())
    }
}

fn show_status(status: &SyncStatus, formatter: &dyn OutputFormatter) {
    let path = status.config.local_path().display();
    if status.is_clean() {
        formatter.success(&format!("{path}: up to date"));
    } else {
        formatter.warn(&format!("{path}: {}", summary(status)));
    }
    formatter.info(&format!("Items:     {}", status.total_items));
    formatter.info(&format!("Synced:    {}", status.synced_items));
    formatter.info(&format!("Pending:   {}", status.pending_items));
    formatter.info(&format!("Conflicts: {}", status.conflict_items));
    formatter.info(&format!("Errors:    {}", status.error_items));
    formatter.info(&format!(
        "Last sync: {}",
        format_optional_time(status.config.last_sync_at())
    ));
}

/// One-line description of what is not synced yet
fn summary(status: &SyncStatus) -> String {
    let mut parts = Vec::new();
    if status.pending_items > 0 {
        parts.push(format!("{} pending", status.pending_items));
    }
    if status.conflict_items > 0 {
        parts.push(format!("{} in conflict", status.conflict_items));
    }
    if status.error_items > 0 {
        parts.push(format!("{} failed", status.error_items));
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    use chrono::Utc;
    use tandem_core::domain::newtypes::{ConfigId, RemoteId};
    use tandem_core::domain::{NewSyncConfig, SyncConfig, SyncState};

    fn status(counts: &[(SyncState, u64)]) -> SyncStatus {
        let new =
            NewSyncConfig::new(PathBuf::from("/tmp/docs"), RemoteId::new("root").unwrap(), None)
                .unwrap();
        let config = SyncConfig::restore(ConfigId::new(1), new, Utc::now(), None, None);
        let counts: HashMap<SyncState, u64> = counts.iter().copied().collect();
        SyncStatus::from_counts(config, &counts)
    }

    #[test]
    fn test_summary_lists_unsynced_kinds() {
        let s = status(&[
            (SyncState::Synced, 4),
            (SyncState::PendingUpload, 2),
            (SyncState::PendingDownload, 1),
            (SyncState::Error, 1),
        ]);
        assert_eq!(summary(&s), "3 pending, 1 failed");
    }

    #[test]
    fn test_summary_empty_when_clean() {
        let s = status(&[(SyncState::Synced, 4)]);
        assert!(s.is_clean());
        assert_eq!(summary(&s), "");
    }
}

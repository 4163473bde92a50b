//! Logs command - recent sync log entries of one configuration

use anyhow::Result;
use clap::Args;

use tandem_core::domain::{SyncAction, SyncLogEntry};

use super::{format_time, lookup_path, Session};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct LogsCommand {
    /// Local directory of the configuration
    pub local: String,

    /// Maximum number of entries to show
    #[arg(long, default_value = "20")]
    pub limit: u32,
}

impl LogsCommand {
    pub async fn execute(&self, session: &Session, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let path = lookup_path(&self.local)?;
        let logs = session.configs.recent_logs(&path, self.limit).await?;

        if format.is_json() {
            let entries: Vec<_> = logs
                .entries
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "timestamp": entry.timestamp.to_rfc3339(),
                        "action": entry.action.to_string(),
                        "path": entry.path,
                        "details": entry.details,
                    })
                })
                .collect();
            formatter.print_json(&serde_json::Value::Array(entries));
            return Ok(());
        }

        if logs.entries.is_empty() {
            formatter.info(&format!("No log entries for {}", path.display()));
            return Ok(());
        }

        println!("{:<19}  {:<15}  {:<40}  DETAILS", "TIME", "ACTION", "PATH");
        for entry in &logs.entries {
            println!(
                "{:<19}  {:<15}  {:<40}  {}",
                format_time(entry.timestamp),
                entry.action.to_string(),
                display_path(entry),
                describe(entry)
            );
        }
        Ok(())
    }
}

fn display_path(entry: &SyncLogEntry) -> &str {
    if entry.path.is_empty() {
        "-"
    } else {
        entry.path.as_str()
    }
}

/// The most useful detail of an entry, for the table's last column
fn describe(entry: &SyncLogEntry) -> String {
    match entry.action {
        SyncAction::Error => {
            let action = entry
                .detail_str("action")
                .or_else(|| entry.detail_str("source"))
                .unwrap_or("unknown");
            let error = entry.detail_str("error").unwrap_or("");
            format!("{action}: {error}")
        }
        SyncAction::Conflict => {
            let strategy = entry.detail_str("strategy").unwrap_or("unknown");
            match entry.detail_str("renamed_to") {
                Some(renamed) => format!("{strategy}, local copy at {renamed}"),
                None => strategy.to_string(),
            }
        }
        _ => entry
            .detail_str("remote_id")
            .map(|id| format!("remote {id}"))
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tandem_core::domain::newtypes::{ConfigId, LogEntryId};

    fn entry(action: SyncAction, path: &str, details: serde_json::Value) -> SyncLogEntry {
        SyncLogEntry {
            id: LogEntryId::new(1),
            config_id: ConfigId::new(1),
            action,
            path: path.to_string(),
            timestamp: Utc::now(),
            details,
        }
    }

    #[test]
    fn test_describe_error() {
        let e = entry(
            SyncAction::Error,
            "a.txt",
            serde_json::json!({"action": "upload", "error": "timed out"}),
        );
        assert_eq!(describe(&e), "upload: timed out");
    }

    #[test]
    fn test_describe_conflict_with_copy() {
        let e = entry(
            SyncAction::Conflict,
            "a.txt",
            serde_json::json!({"strategy": "rename", "renamed_to": "a.conflict-2026-02-07-142501.txt"}),
        );
        assert_eq!(
            describe(&e),
            "rename, local copy at a.conflict-2026-02-07-142501.txt"
        );
    }

    #[test]
    fn test_source_errors_have_no_path() {
        let e = entry(
            SyncAction::Error,
            "",
            serde_json::json!({"source": "poller", "error": "offline"}),
        );
        assert_eq!(display_path(&e), "-");
        assert_eq!(describe(&e), "poller: offline");
    }
}

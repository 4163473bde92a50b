//! Human and JSON renderings of command results

use std::io::Write;

/// Selected by the global `--json` flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        self == OutputFormat::Json
    }
}

/// Sink the commands write their results to
///
/// Human output is line oriented. JSON output only carries the documents
/// passed to [`OutputFormatter::print_json`] plus one object per headline.
pub trait OutputFormatter {
    /// Headline for a completed action
    fn success(&self, message: &str);
    /// Headline for something that needs the user's attention
    fn warn(&self, message: &str);
    /// Indented detail line under a headline
    fn info(&self, message: &str);
    fn print_json(&self, value: &serde_json::Value);
}

pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("\u{2713} {message}");
    }

    fn warn(&self, message: &str) {
        println!("! {message}");
    }

    fn info(&self, message: &str) {
        println!("  {message}");
    }

    fn print_json(&self, _value: &serde_json::Value) {}
}

pub struct JsonFormatter;

impl JsonFormatter {
    fn emit(value: &serde_json::Value) {
        let mut stdout = std::io::stdout().lock();
        // A closed pipe is not worth failing the command for
        let _ = serde_json::to_writer_pretty(&mut stdout, value);
        let _ = writeln!(stdout);
    }
}

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        Self::emit(&serde_json::json!({ "ok": true, "message": message }));
    }

    fn warn(&self, message: &str) {
        Self::emit(&serde_json::json!({ "ok": false, "message": message }));
    }

    fn info(&self, _message: &str) {}

    fn print_json(&self, value: &serde_json::Value) {
        Self::emit(value);
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Human => Box::new(HumanFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// "1 file" / "3 files"
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural() {
        assert_eq!(plural(0, "file"), "0 files");
        assert_eq!(plural(1, "file"), "1 file");
        assert_eq!(plural(7, "item"), "7 items");
    }

    #[test]
    fn test_format_selection() {
        assert!(OutputFormat::Json.is_json());
        assert!(!OutputFormat::Human.is_json());
    }
}

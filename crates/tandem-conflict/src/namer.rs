//! Conflict naming for the rename strategy
//!
//! Generates sortable names for conflict copies, following the pattern:
//! `<stem>.conflict-YYYY-MM-DD-HHMMSS<.ext>` (UTC)

use chrono::{DateTime, Utc};

/// Upper bound for the `-N` collision counter
const MAX_COUNTER: u32 = 999;

/// Generates conflict copy names
pub struct ConflictNamer;

impl ConflictNamer {
    /// Generates a conflict copy file name
    ///
    /// Given "report.docx", produces something like:
    /// "report.conflict-2026-02-07-142501.docx". Files without an extension
    /// and dotfiles get the suffix appended to the whole name.
    pub fn generate(original_name: &str, now: DateTime<Utc>) -> String {
        Self::build(original_name, &now.format("%Y-%m-%d-%H%M%S").to_string())
    }

    /// Like [`generate`](Self::generate) but avoids names for which `exists` is true
    ///
    /// On collision a `-N` counter (starting at 2) is appended to the
    /// timestamp. Returns `None` when every candidate is taken.
    pub fn generate_unique<F>(original_name: &str, now: DateTime<Utc>, mut exists: F) -> Option<String>
    where
        F: FnMut(&str) -> bool,
    {
        let stamp = now.format("%Y-%m-%d-%H%M%S").to_string();
        let candidate = Self::build(original_name, &stamp);
        if !exists(&candidate) {
            return Some(candidate);
        }

        (2..=MAX_COUNTER)
            .map(|i| Self::build(original_name, &format!("{stamp}-{i}")))
            .find(|numbered| !exists(numbered))
    }

    fn build(original_name: &str, stamp: &str) -> String {
        match split_extension(original_name) {
            Some((stem, ext)) => format!("{stem}.conflict-{stamp}{ext}"),
            None => format!("{original_name}.conflict-{stamp}"),
        }
    }
}

/// Splits "name.ext" into ("name", ".ext")
///
/// A leading dot does not start an extension, so ".bashrc" has none.
fn split_extension(name: &str) -> Option<(&str, &str)> {
    let dot = name.rfind('.')?;
    if dot == 0 {
        return None;
    }
    Some((&name[..dot], &name[dot..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 7, 14, 25, 1).unwrap()
    }

    #[test]
    fn test_generate_with_extension() {
        assert_eq!(
            ConflictNamer::generate("report.docx", at()),
            "report.conflict-2026-02-07-142501.docx"
        );
    }

    #[test]
    fn test_generate_without_extension() {
        assert_eq!(
            ConflictNamer::generate("Makefile", at()),
            "Makefile.conflict-2026-02-07-142501"
        );
    }

    #[test]
    fn test_generate_dotfile() {
        assert_eq!(
            ConflictNamer::generate(".bashrc", at()),
            ".bashrc.conflict-2026-02-07-142501"
        );
    }

    #[test]
    fn test_generate_with_multiple_dots() {
        assert_eq!(
            ConflictNamer::generate("archive.tar.gz", at()),
            "archive.tar.conflict-2026-02-07-142501.gz"
        );
    }

    #[test]
    fn test_names_sort_by_time() {
        let earlier = ConflictNamer::generate("a.txt", at());
        let later = ConflictNamer::generate("a.txt", at() + chrono::Duration::seconds(1));
        assert!(earlier < later);
    }

    #[test]
    fn test_generate_unique_no_collision() {
        let name = ConflictNamer::generate_unique("test.txt", at(), |_| false).unwrap();
        assert_eq!(name, "test.conflict-2026-02-07-142501.txt");
    }

    #[test]
    fn test_generate_unique_with_collision() {
        let taken = [
            "test.conflict-2026-02-07-142501.txt",
            "test.conflict-2026-02-07-142501-2.txt",
        ];
        let name = ConflictNamer::generate_unique("test.txt", at(), |c| taken.contains(&c)).unwrap();
        assert_eq!(name, "test.conflict-2026-02-07-142501-3.txt");
    }

    #[test]
    fn test_generate_unique_exhausted() {
        assert!(ConflictNamer::generate_unique("test.txt", at(), |_| true).is_none());
    }
}

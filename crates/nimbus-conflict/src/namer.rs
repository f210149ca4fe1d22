//! Conflicted-copy naming
//!
//! When a `keep_both` resolution preserves local edits, the copy is named
//! so the user can see at a glance what it is and when it diverged:
//!
//! ```text
//! report.pdf  →  report (Conflicted Copy 2026-08-24 141502).pdf
//! Makefile    →  Makefile (Conflicted Copy 2026-08-24 141502)
//! ```
//!
//! If that name is already taken (repeated conflicts on the same file in
//! one second), a numeric suffix is probed until a free name is found.

use chrono::{DateTime, Utc};

/// Generates names for conflicted-copy siblings
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictNamer;

impl ConflictNamer {
    pub fn new() -> Self {
        Self
    }

    /// Builds the conflicted-copy name for `original` at `timestamp`
    ///
    /// The extension (final dot segment) is preserved; the marker goes
    /// before it.
    pub fn conflicted_copy_name(&self, original: &str, timestamp: DateTime<Utc>) -> String {
        let stamp = timestamp.format("%Y-%m-%d %H%M%S");
        match original.rsplit_once('.') {
            // A leading dot (".bashrc") is a hidden file, not an extension
            Some((stem, ext)) if !stem.is_empty() => {
                format!("{stem} (Conflicted Copy {stamp}).{ext}")
            }
            _ => format!("{original} (Conflicted Copy {stamp})"),
        }
    }

    /// Builds a conflicted-copy name guaranteed free per `is_taken`
    ///
    /// Probes `name`, then `name 2`, `name 3`, ... against the callback
    /// until an unused candidate is found.
    pub fn generate_unique<F>(
        &self,
        original: &str,
        timestamp: DateTime<Utc>,
        is_taken: F,
    ) -> String
    where
        F: Fn(&str) -> bool,
    {
        let base = self.conflicted_copy_name(original, timestamp);
        if !is_taken(&base) {
            return base;
        }
        let mut counter = 2u32;
        loop {
            let candidate = match base.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() => format!("{stem} {counter}.{ext}"),
                _ => format!("{base} {counter}"),
            };
            if !is_taken(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 24, 14, 15, 2).unwrap()
    }

    #[test]
    fn test_name_with_extension() {
        let namer = ConflictNamer::new();
        assert_eq!(
            namer.conflicted_copy_name("report.pdf", stamp()),
            "report (Conflicted Copy 2026-08-24 141502).pdf"
        );
    }

    #[test]
    fn test_name_without_extension() {
        let namer = ConflictNamer::new();
        assert_eq!(
            namer.conflicted_copy_name("Makefile", stamp()),
            "Makefile (Conflicted Copy 2026-08-24 141502)"
        );
    }

    #[test]
    fn test_hidden_file_keeps_leading_dot() {
        let namer = ConflictNamer::new();
        assert_eq!(
            namer.conflicted_copy_name(".bashrc", stamp()),
            ".bashrc (Conflicted Copy 2026-08-24 141502)"
        );
    }

    #[test]
    fn test_only_last_extension_is_split() {
        let namer = ConflictNamer::new();
        assert_eq!(
            namer.conflicted_copy_name("archive.tar.gz", stamp()),
            "archive.tar (Conflicted Copy 2026-08-24 141502).gz"
        );
    }

    #[test]
    fn test_generate_unique_no_collision() {
        let namer = ConflictNamer::new();
        let name = namer.generate_unique("a.txt", stamp(), |_| false);
        assert_eq!(name, "a (Conflicted Copy 2026-08-24 141502).txt");
    }

    #[test]
    fn test_generate_unique_probes_counter() {
        let namer = ConflictNamer::new();
        let taken = [
            "a (Conflicted Copy 2026-08-24 141502).txt".to_string(),
            "a (Conflicted Copy 2026-08-24 141502) 2.txt".to_string(),
        ];
        let name = namer.generate_unique("a.txt", stamp(), |c| taken.contains(&c.to_string()));
        assert_eq!(name, "a (Conflicted Copy 2026-08-24 141502) 3.txt");
    }
}

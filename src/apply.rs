//! Applying a change set to disk
//!
//! Each file is handled on its own: read the old content (missing counts as
//! empty), write the new content, diff the two. A failure on one file is
//! recorded and the rest of the set is still applied. There is no rollback.

use crate::parse::CodeChangeSet;
use crate::util::resolve_project_path;
use similar::{ChangeTag, TextDiff};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// A single changed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Removed(String),
    Added(String),
}

/// Changed lines for one file; unchanged lines are not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub file: String,
    pub lines: Vec<DiffLine>,
}

impl FileDiff {
    /// (added, removed)
    pub fn stats(&self) -> (usize, usize) {
        self.lines.iter().fold((0, 0), |(a, r), line| match line {
            DiffLine::Added(_) => (a + 1, r),
            DiffLine::Removed(_) => (a, r + 1),
        })
    }
}

impl fmt::Display for FileDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File: {}", self.file)?;
        for line in &self.lines {
            match line {
                DiffLine::Removed(text) => writeln!(f, "  - {}", text)?,
                DiffLine::Added(text) => writeln!(f, "  + {}", text)?,
            }
        }
        Ok(())
    }
}

/// Per-file diffs in the order the change set listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub diffs: Vec<FileDiff>,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.diffs.iter().map(|d| d.file.as_str())
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diff in &self.diffs {
            write!(f, "\n{}", diff)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("refusing to write {file}: {reason}")]
    UnsafePath { file: String, reason: String },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of applying one change set.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub summary: ChangeSummary,
    /// Files that were written (including no-op rewrites)
    pub written: Vec<String>,
    pub failures: Vec<(String, ApplyError)>,
}

/// Line diff keeping only removed and added lines, each trimmed.
pub fn diff_lines(old: &str, new: &str) -> Vec<DiffLine> {
    TextDiff::from_lines(old, new)
        .iter_all_changes()
        .filter_map(|change| {
            let text = change.value().trim().to_string();
            match change.tag() {
                ChangeTag::Delete => Some(DiffLine::Removed(text)),
                ChangeTag::Insert => Some(DiffLine::Added(text)),
                ChangeTag::Equal => None,
            }
        })
        .collect()
}

/// Writes proposed replacements under one project root.
#[derive(Debug, Clone)]
pub struct ChangeApplier {
    root: PathBuf,
}

impl ChangeApplier {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn apply(&self, changes: &CodeChangeSet) -> ApplyReport {
        let mut report = ApplyReport::default();

        for (file, new_content) in changes.iter() {
            match self.apply_file(file, new_content) {
                Ok(diff) => {
                    report.written.push(file.to_string());
                    if let Some(diff) = diff {
                        report.summary.diffs.push(diff);
                    }
                }
                Err(err) => {
                    warn!("Could not apply change to {}: {}", file, err);
                    report.failures.push((file.to_string(), err));
                }
            }
        }

        report
    }

    /// Returns `None` when old and new only differ in surrounding whitespace.
    fn apply_file(&self, file: &str, new_content: &str) -> Result<Option<FileDiff>, ApplyError> {
        let path = resolve_project_path(&self.root, Path::new(file)).map_err(|reason| {
            ApplyError::UnsafePath {
                file: file.to_string(),
                reason,
            }
        })?;

        let old_content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(source) => return Err(ApplyError::Read { path, source }),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ApplyError::Write {
                path: path.clone(),
                source,
            })?;
        }
        fs::write(&path, new_content).map_err(|source| ApplyError::Write {
            path: path.clone(),
            source,
        })?;

        if old_content.trim() == new_content.trim() {
            return Ok(None);
        }

        Ok(Some(FileDiff {
            file: file.to_string(),
            lines: diff_lines(&old_content, new_content),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changes(entries: &[(&str, &str)]) -> CodeChangeSet {
        let mut set = CodeChangeSet::new();
        for (file, content) in entries {
            set.insert(*file, *content);
        }
        set
    }

    #[test]
    fn test_diff_lines_only_changed() {
        let old = "a = 1\nb = 2\nc = 3\n";
        let new = "a = 1\nb = 20\nc = 3\nd = 4\n";
        assert_eq!(
            diff_lines(old, new),
            vec![
                DiffLine::Removed("b = 2".to_string()),
                DiffLine::Added("b = 20".to_string()),
                DiffLine::Added("d = 4".to_string()),
            ]
        );
    }

    #[test]
    fn test_apply_writes_and_records_diff() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "print(1/0)\n").unwrap();

        let applier = ChangeApplier::new(dir.path());
        let report = applier.apply(&changes(&[("a.py", "print(1)")]));

        assert_eq!(fs::read_to_string(dir.path().join("a.py")).unwrap(), "print(1)");
        assert_eq!(report.written, vec!["a.py".to_string()]);
        assert!(report.failures.is_empty());
        assert_eq!(report.summary.diffs.len(), 1);
        assert_eq!(report.summary.diffs[0].stats(), (1, 1));

        let rendered = report.summary.to_string();
        assert!(rendered.contains("File: a.py"));
        assert!(rendered.contains("  - print(1/0)"));
        assert!(rendered.contains("  + print(1)"));
    }

    #[test]
    fn test_whitespace_only_change_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "\nprint('ok')\n\n").unwrap();

        let report = ChangeApplier::new(dir.path()).apply(&changes(&[("a.py", "print('ok')")]));
        assert!(report.summary.is_empty());
        assert_eq!(report.written, vec!["a.py".to_string()]);
    }

    #[test]
    fn test_new_file_diffs_against_empty() {
        let dir = tempfile::tempdir().unwrap();
        let report =
            ChangeApplier::new(dir.path()).apply(&changes(&[("pkg/b.py", "x = 1\ny = 2")]));

        assert_eq!(
            fs::read_to_string(dir.path().join("pkg/b.py")).unwrap(),
            "x = 1\ny = 2"
        );
        assert_eq!(report.summary.diffs[0].stats(), (2, 0));
    }

    #[test]
    fn test_failure_on_one_file_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.py"), "old").unwrap();

        let report = ChangeApplier::new(dir.path())
            .apply(&changes(&[("../escape.py", "x"), ("ok.py", "new")]));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "../escape.py");
        assert!(matches!(report.failures[0].1, ApplyError::UnsafePath { .. }));
        assert_eq!(fs::read_to_string(dir.path().join("ok.py")).unwrap(), "new");
        assert_eq!(report.summary.files().collect::<Vec<_>>(), vec!["ok.py"]);
    }

    #[test]
    fn test_directory_in_place_of_file_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a.py")).unwrap();

        let report = ChangeApplier::new(dir.path()).apply(&changes(&[("a.py", "x = 1")]));
        assert_eq!(report.failures.len(), 1);
        assert!(report.written.is_empty());
    }
}

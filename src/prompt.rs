//! Prompt assembly
//!
//! Builds the single text blob the model sees each attempt: optional research,
//! the project tree, every target's full source, then every target's current
//! failure. Nothing is truncated or summarized here; keeping the target set
//! small enough for the model's context is the caller's job.

use crate::error::RepairError;
use crate::signature::FileReport;
use std::borrow::Cow;
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

const SECTION_RULE: &str = "_________________";
const RESEARCH_RULE: &str = "_______________________________________________________";

/// Directory names never shown in the project tree.
const TREE_SKIP_DIRS: &[&str] = &[".git", "__pycache__", ".venv", "venv", "node_modules"];

/// Full current text of one target file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub file: String,
    pub content: String,
}

/// Read every target's source, in target order.
///
/// Invalid UTF-8 sequences become U+FFFD.
pub fn read_sources(code_dir: &Path, targets: &[String]) -> Result<Vec<SourceFile>, RepairError> {
    targets
        .iter()
        .map(|file| {
            let path = code_dir.join(file);
            let bytes = fs::read(&path).map_err(|source| RepairError::ReadSource {
                path: path.clone(),
                source,
            })?;
            let content = String::from_utf8_lossy(&bytes);
            if let Cow::Owned(_) = content {
                debug!(file = %file, "source is not valid UTF-8, replacing invalid bytes");
            }
            Ok(SourceFile {
                file: file.clone(),
                content: content.into_owned(),
            })
        })
        .collect()
}

/// Render `root` as an indented tree using box-drawing connectors.
///
/// Entries are sorted by name. Directories named in `extra_skip` are left out
/// along with the usual tool and cache directories.
pub fn render_directory_tree(root: &Path, extra_skip: &[String]) -> String {
    let skip = |entry: &DirEntry| {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry.file_name().to_str().is_some_and(|name| {
                TREE_SKIP_DIRS.contains(&name) || extra_skip.iter().any(|s| s == name)
            })
    };

    let entries: Vec<(usize, String)> = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skip(e))
        .filter_map(|entry| match entry {
            Ok(entry) => Some((
                entry.depth(),
                entry.file_name().to_string_lossy().into_owned(),
            )),
            Err(err) => {
                debug!("skipping unreadable tree entry: {}", err);
                None
            }
        })
        .collect();

    let mut tree = String::new();
    // For each open ancestor level: was that ancestor the last of its siblings?
    let mut open_levels: Vec<bool> = Vec::new();

    for (i, (depth, name)) in entries.iter().enumerate() {
        let is_last = entries[i + 1..]
            .iter()
            .find(|(d, _)| d <= depth)
            .map(|(d, _)| d < depth)
            .unwrap_or(true);

        open_levels.truncate(depth - 1);
        for ancestor_last in &open_levels {
            tree.push_str(if *ancestor_last { "    " } else { "│   " });
        }
        tree.push_str(if is_last { "└── " } else { "├── " });
        tree.push_str(name);
        tree.push('\n');
        open_levels.push(is_last);
    }

    tree
}

/// Everything one prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub directory_tree: &'a str,
    pub sources: &'a [SourceFile],
    pub reports: &'a [FileReport],
    pub research: Option<&'a str>,
}

/// Expand the prompt template. Pure: same inputs, same text.
pub fn assemble_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = String::new();

    if let Some(research) = ctx.research.filter(|r| !r.trim().is_empty()) {
        prompt.push_str("### INTERNET INFO\n");
        prompt.push_str(research);
        if !research.ends_with('\n') {
            prompt.push('\n');
        }
        prompt.push('\n');
        prompt.push_str(RESEARCH_RULE);
        prompt.push_str("\n\n");
    }

    prompt.push_str("The file structure of the project is as follows:\n");
    prompt.push_str(ctx.directory_tree);
    prompt.push('\n');

    for source in ctx.sources {
        prompt.push_str(&format!("# {}\n{}\n{}\n\n", source.file, source.content, SECTION_RULE));
    }

    prompt.push_str("error:\n");
    for report in ctx.reports {
        match &report.failure {
            Some(failure) => {
                prompt.push_str(&format!("# {}\n{}\n{}\n\n", report.file, failure, SECTION_RULE))
            }
            None => prompt.push_str(&format!("# {} has no error.\n{}\n\n", report.file, SECTION_RULE)),
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sources() -> Vec<SourceFile> {
        vec![
            SourceFile {
                file: "a.py".to_string(),
                content: "print(1/0)".to_string(),
            },
            SourceFile {
                file: "b.py".to_string(),
                content: "print('ok')".to_string(),
            },
        ]
    }

    fn sample_reports() -> Vec<FileReport> {
        vec![
            FileReport::failing("a.py", "Traceback: ZeroDivisionError"),
            FileReport::clean("b.py"),
        ]
    }

    #[test]
    fn test_render_directory_tree_nested() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkg/sub")).unwrap();
        fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join("main.py"), "").unwrap();
        fs::write(dir.path().join("pkg/mod.py"), "").unwrap();
        fs::write(dir.path().join("pkg/sub/deep.py"), "").unwrap();
        fs::write(dir.path().join("zeta.txt"), "").unwrap();

        let tree = render_directory_tree(dir.path(), &[]);
        let expected = "\
├── main.py
├── pkg
│   ├── mod.py
│   └── sub
│       └── deep.py
└── zeta.txt
";
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_render_directory_tree_skips_extra_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("debug_proj")).unwrap();
        fs::write(dir.path().join("debug_proj/run.log"), "").unwrap();
        fs::write(dir.path().join("a.py"), "").unwrap();

        let tree = render_directory_tree(dir.path(), &["debug_proj".to_string()]);
        assert_eq!(tree, "└── a.py\n");
    }

    #[test]
    fn test_assemble_prompt_section_order() {
        let sources = sample_sources();
        let reports = sample_reports();
        let prompt = assemble_prompt(&PromptContext {
            directory_tree: "├── a.py\n└── b.py\n",
            sources: &sources,
            reports: &reports,
            research: Some("### CONTENT FROM: https://example.com\nuse a guard\n"),
        });

        let research = prompt.find("### INTERNET INFO").unwrap();
        let tree = prompt.find("The file structure").unwrap();
        let code = prompt.find("print(1/0)").unwrap();
        let errors = prompt.find("error:\n").unwrap();
        let trace = prompt.find("Traceback: ZeroDivisionError").unwrap();
        assert!(research < tree && tree < code && code < errors && errors < trace);
        assert!(prompt.contains("# b.py has no error."));
    }

    #[test]
    fn test_assemble_prompt_without_research() {
        let sources = sample_sources();
        let reports = sample_reports();
        let ctx = PromptContext {
            directory_tree: "└── a.py\n",
            sources: &sources,
            reports: &reports,
            research: None,
        };
        let prompt = assemble_prompt(&ctx);
        assert!(prompt.starts_with("The file structure"));
        assert!(!prompt.contains("INTERNET INFO"));
        assert_eq!(prompt, assemble_prompt(&ctx));
    }

    #[test]
    fn test_assemble_prompt_keeps_failure_verbatim() {
        let sources = sample_sources();
        let trace = "Traceback (most recent call last):\n  File \"a.py\", line 1\n    print(1/0)\nZeroDivisionError: division by zero";
        let reports = vec![FileReport::failing("a.py", trace)];
        let prompt = assemble_prompt(&PromptContext {
            directory_tree: "",
            sources: &sources,
            reports: &reports,
            research: Some("   "),
        });
        assert!(prompt.contains(trace));
        assert!(!prompt.contains("INTERNET INFO"));
    }

    #[test]
    fn test_read_sources_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let ok = read_sources(dir.path(), &["a.py".to_string()]).unwrap();
        assert_eq!(ok[0].content, "x = 1\n");

        let err = read_sources(dir.path(), &["missing.py".to_string()]).unwrap_err();
        assert!(matches!(err, RepairError::ReadSource { .. }));
    }

    #[test]
    fn test_read_sources_replaces_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("latin1.py"), b"name = 'caf\xe9'\n").unwrap();

        let sources = read_sources(dir.path(), &["latin1.py".to_string()]).unwrap();
        assert_eq!(sources[0].content, "name = 'caf\u{FFFD}'\n");
    }
}

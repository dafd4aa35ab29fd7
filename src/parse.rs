//! Model reply parsing
//!
//! The reply contract is a sequence of blocks, each a `# <filename>` line
//! followed by a fenced code block holding the full replacement source:
//!
//! ````text
//! # app.py
//! ```python
//! print("fixed")
//! ```
//! ````
//!
//! Anything that does not match is skipped without error.

use regex::Regex;
use std::sync::OnceLock;

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?ms)#[ \t]+(\S+)[ \t]*\r?\n```[\w+.-]*[ \t]*\r?\n(?:(.*?)\r?\n)?[ \t]*```[ \t]*\r?$",
        )
        .expect("block pattern is valid")
    })
}

/// Proposed replacements keyed by file name, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeChangeSet {
    entries: Vec<(String, String)>,
}

impl CodeChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; a later block for the same file replaces the
    /// earlier content but keeps its position.
    pub fn insert(&mut self, file: impl Into<String>, content: impl Into<String>) {
        let file = file.into();
        let content = content.into();
        match self.entries.iter_mut().find(|(f, _)| *f == file) {
            Some(entry) => entry.1 = content,
            None => self.entries.push((file, content)),
        }
    }

    pub fn get(&self, file: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(f, _)| f == file)
            .map(|(_, c)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(f, c)| (f.as_str(), c.as_str()))
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(f, _)| f.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strip decoration models like to put around file names (`**a.py**`, `` `a.py` ``).
fn clean_file_name(raw: &str) -> &str {
    raw.trim_matches(|c: char| c == '`' || c == '*' || c == '"' || c == '\'' || c == ':')
}

/// Extract every well-formed file block from a raw model reply.
pub fn parse_code_changes(reply: &str) -> CodeChangeSet {
    let mut changes = CodeChangeSet::new();
    for caps in block_pattern().captures_iter(reply) {
        let file = clean_file_name(&caps[1]);
        if file.is_empty() {
            continue;
        }
        let content = caps.get(2).map_or("", |body| body.as_str());
        changes.insert(file, content.trim());
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_block() {
        let reply = "# a.py\n```python\nprint('fixed')\n```\n";
        let changes = parse_code_changes(reply);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get("a.py"), Some("print('fixed')"));
    }

    #[test]
    fn test_parse_multiple_blocks_in_order() {
        let reply = r#"Here you go.

# utils.py
```python
def add(a, b):
    return a + b
```

# main.py
```python
from utils import add

print(add(1, 2))
```
"#;
        let changes = parse_code_changes(reply);
        let files: Vec<&str> = changes.files().collect();
        assert_eq!(files, vec!["utils.py", "main.py"]);
        assert_eq!(
            changes.get("main.py"),
            Some("from utils import add\n\nprint(add(1, 2))")
        );
    }

    #[test]
    fn test_parse_no_blocks_is_empty() {
        assert!(parse_code_changes("").is_empty());
        assert!(parse_code_changes("I could not find any problem.").is_empty());
        // Fence without a file line
        assert!(parse_code_changes("```python\nprint(1)\n```").is_empty());
        // File line without a fence
        assert!(parse_code_changes("# a.py\nprint(1)\n").is_empty());
    }

    #[test]
    fn test_parse_duplicate_file_last_wins() {
        let reply = "# a.py\n```python\nfirst\n```\n# b.py\n```python\nb\n```\n# a.py\n```python\nsecond\n```\n";
        let changes = parse_code_changes(reply);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes.get("a.py"), Some("second"));
        assert_eq!(changes.files().next(), Some("a.py"));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let reply = "# a.py\n```python\nx = 1\n```\n# b.py\n```\ny = 2\n```\n";
        assert_eq!(parse_code_changes(reply), parse_code_changes(reply));
    }

    #[test]
    fn test_parse_tolerates_heading_levels_and_decoration() {
        let reply = "### `pkg/tool.py`\n```py\nx = 1\n```\n## **other.py**\n```\ny = 2\n```";
        let changes = parse_code_changes(reply);
        assert_eq!(changes.get("pkg/tool.py"), Some("x = 1"));
        assert_eq!(changes.get("other.py"), Some("y = 2"));
    }

    #[test]
    fn test_parse_crlf_reply() {
        let reply = "# a.py\r\n```python\r\nprint(1)\r\n```\r\n";
        assert_eq!(parse_code_changes(reply).get("a.py"), Some("print(1)"));
    }

    #[test]
    fn test_parse_empty_block_does_not_swallow_next() {
        let reply = "# a.py\n```python\n```\n\n# b.py\n```python\nx = 1\n```\n";
        let changes = parse_code_changes(reply);
        assert_eq!(changes.files().collect::<Vec<_>>(), vec!["a.py", "b.py"]);
        assert_eq!(changes.get("a.py"), Some(""));
        assert_eq!(changes.get("b.py"), Some("x = 1"));
    }

    #[test]
    fn test_parse_closing_fence_must_own_its_line() {
        let reply = "# a.py\n```python\nDOC = \"\"\"\n```py fenced example\n\"\"\"\n```";
        assert_eq!(
            parse_code_changes(reply).get("a.py"),
            Some("DOC = \"\"\"\n```py fenced example\n\"\"\"")
        );
    }

    #[test]
    fn test_parse_keeps_file_outside_targets() {
        let reply = "# b.py\n```python\nprint('new')\n```";
        assert_eq!(parse_code_changes(reply).get("b.py"), Some("print('new')"));
    }
}

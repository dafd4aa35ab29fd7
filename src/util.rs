use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Truncate a string to at most `max` characters, marking the cut with `...`.
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

#[derive(Debug)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandRunResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }
}

/// Spawn `command`, drain both pipes on helper threads and kill the child once
/// `timeout` elapses. Spawn and wait failures are returned as `Err`.
pub fn run_command_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> std::io::Result<CommandRunResult> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_handle = thread::spawn(move || read_pipe(stdout));
    let stderr_handle = thread::spawn(move || read_pipe(stderr));

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break Some(status),
            None => {
                if start.elapsed() >= timeout {
                    timed_out = true;
                    let _ = child.kill();
                    match child.wait() {
                        Ok(status) => break Some(status),
                        Err(_) => break None,
                    }
                }
                thread::sleep(Duration::from_millis(20));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandRunResult {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
    })
}

fn read_pipe<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        let _ = BufReader::new(pipe).read_to_end(&mut buf);
    }
    buf
}

/// Resolve a file name proposed by the model against the project root.
///
/// The file does not need to exist yet, but the path must stay inside the
/// root: absolute paths and `..` components are rejected, and the nearest
/// existing ancestor must canonicalize to somewhere under the root (this
/// catches symlinked escapes).
pub fn resolve_project_path(root: &Path, candidate: &Path) -> Result<PathBuf, String> {
    if candidate.as_os_str().is_empty() {
        return Err("Path is empty".to_string());
    }
    if candidate.is_absolute() {
        return Err(format!(
            "Absolute paths are not allowed: {}",
            candidate.display()
        ));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(format!(
            "Parent traversal is not allowed: {}",
            candidate.display()
        ));
    }

    let root = root
        .canonicalize()
        .map_err(|e| format!("Failed to resolve project root: {}", e))?;
    let joined = root.join(candidate);
    let parent = joined
        .parent()
        .ok_or_else(|| format!("Invalid path: {}", candidate.display()))?;
    let parent_canon = canonicalize_existing_parent(parent)?;

    if !parent_canon.starts_with(&root) {
        return Err(format!("Path escapes project: {}", candidate.display()));
    }

    Ok(joined)
}

fn canonicalize_existing_parent(path: &Path) -> Result<PathBuf, String> {
    let mut current = path.to_path_buf();
    while !current.exists() {
        if !current.pop() {
            return Err("Path has no existing parent".to_string());
        }
    }
    current
        .canonicalize()
        .map_err(|e| format!("Failed to resolve path {}: {}", current.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_unicode_safe() {
        assert_eq!(truncate("ééééé", 4), "é...");
        assert_eq!(truncate("こんにちは", 3), "こんに");
        assert_eq!(truncate("ok", 0), "");
        assert_eq!(truncate("ok", 10), "ok");
    }

    #[test]
    fn test_resolve_project_path_accepts_missing_file() {
        let root = tempfile::tempdir().unwrap();
        let candidate = PathBuf::from("pkg/new_module.py");
        let resolved = resolve_project_path(root.path(), &candidate).unwrap();
        assert!(resolved.ends_with("pkg/new_module.py"));
        assert!(resolved.starts_with(root.path().canonicalize().unwrap()));
    }

    #[test]
    fn test_resolve_project_path_rejects_escapes() {
        let root = tempfile::tempdir().unwrap();
        assert!(resolve_project_path(root.path(), Path::new("../evil.py")).is_err());
        assert!(resolve_project_path(root.path(), Path::new("/etc/passwd")).is_err());
        assert!(resolve_project_path(root.path(), Path::new("")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_with_timeout_captures_streams() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let result = run_command_with_timeout(&mut cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert!(!result.success());
        assert_eq!(result.status.and_then(|s| s.code()), Some(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_with_timeout_kills_hung_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exec sleep 5"]);
        let result = run_command_with_timeout(&mut cmd, Duration::from_millis(100)).unwrap();
        assert!(result.timed_out);
        assert!(!result.success());
    }
}

//! Configuration management for fixloop
//!
//! Optional defaults live in ~/.config/fixloop/config.json. Command-line flags
//! override the file, and the file overrides the built-in defaults below.

use crate::error::RepairError;
use crate::llm::ProviderKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use walkdir::WalkDir;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_ENABLE_INTERNET_SEARCH: bool = true;
pub const DEFAULT_NUM_SEARCH_URLS: usize = 5;
pub const DEFAULT_INTERNET_SEARCH_THRESHOLD: u32 = 5;
pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::Openai;
pub const DEFAULT_OPENAI_MODEL: &str = "meta-llama/Meta-Llama-3.1-405B-Instruct";
pub const DEFAULT_HUGGINGFACE_MODEL: &str = "meta-llama/Llama-3.2-3B-Instruct";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_PYTHON: &str = "python";
pub const DEFAULT_PAUSE_SECS: u64 = 2;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Persisted defaults. Every field is optional so a partial file is valid and
/// the same shape can carry command-line overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_internet_search: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_search_urls: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internet_search_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_type: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub huggingface_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("fixloop"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from the default location, or return default
    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load config from `path`. A missing file yields defaults; a corrupt one
    /// is moved aside to `config.json.corrupt` and also yields defaults.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                warn!(
                    "Config file {} was corrupted ({}). A backup was saved and defaults were loaded.",
                    path.display(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        write_config_atomic(path, &content).map_err(|e| format!("Failed to write config: {}", e))
    }

    /// `self` wins wherever it has a value; `base` fills the gaps.
    pub fn layered_over(self, base: Config) -> Config {
        Config {
            max_attempts: self.max_attempts.or(base.max_attempts),
            enable_internet_search: self.enable_internet_search.or(base.enable_internet_search),
            num_search_urls: self.num_search_urls.or(base.num_search_urls),
            internet_search_threshold: self
                .internet_search_threshold
                .or(base.internet_search_threshold),
            llm_type: self.llm_type.or(base.llm_type),
            openai_model: self.openai_model.or(base.openai_model),
            openai_base_url: self.openai_base_url.or(base.openai_base_url),
            huggingface_model: self.huggingface_model.or(base.huggingface_model),
            gemini_model: self.gemini_model.or(base.gemini_model),
            python: self.python.or(base.python),
            pause_secs: self.pause_secs.or(base.pause_secs),
            execution_timeout_secs: self.execution_timeout_secs.or(base.execution_timeout_secs),
            request_timeout_secs: self.request_timeout_secs.or(base.request_timeout_secs),
        }
    }
}

/// Fully resolved settings for one repair session.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub code_dir: PathBuf,
    /// Explicit targets; empty means "every .py file in `code_dir`"
    pub files: Vec<String>,
    pub max_attempts: u32,
    pub enable_internet_search: bool,
    pub num_search_urls: usize,
    pub internet_search_threshold: u32,
    pub provider: ProviderKind,
    /// Model id for the selected provider
    pub model: String,
    pub openai_base_url: Option<String>,
    pub python: String,
    pub pause: Duration,
    pub execution_timeout: Duration,
    pub request_timeout: Duration,
}

impl Settings {
    /// Apply built-in defaults to `config` and validate the result.
    pub fn resolve(
        code_dir: &Path,
        files: Vec<String>,
        config: Config,
    ) -> Result<Self, RepairError> {
        if !code_dir.is_dir() {
            return Err(RepairError::Config(format!(
                "code directory {} does not exist or is not a directory",
                code_dir.display()
            )));
        }

        let max_attempts = config.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(RepairError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let provider = config.llm_type.unwrap_or(DEFAULT_PROVIDER);
        let model = match provider {
            ProviderKind::Openai => config.openai_model,
            ProviderKind::Huggingface => config.huggingface_model,
            ProviderKind::Gemini => config.gemini_model,
        }
        .unwrap_or_else(|| default_model(provider).to_string());

        if model.trim().is_empty() {
            return Err(RepairError::Config(format!(
                "model name for {} is empty",
                provider.as_str()
            )));
        }

        Ok(Self {
            code_dir: code_dir.to_path_buf(),
            files,
            max_attempts,
            enable_internet_search: config
                .enable_internet_search
                .unwrap_or(DEFAULT_ENABLE_INTERNET_SEARCH),
            num_search_urls: config.num_search_urls.unwrap_or(DEFAULT_NUM_SEARCH_URLS),
            internet_search_threshold: config
                .internet_search_threshold
                .unwrap_or(DEFAULT_INTERNET_SEARCH_THRESHOLD),
            provider,
            model,
            openai_base_url: config.openai_base_url.filter(|u| !u.trim().is_empty()),
            python: config.python.unwrap_or_else(|| DEFAULT_PYTHON.to_string()),
            pause: Duration::from_secs(config.pause_secs.unwrap_or(DEFAULT_PAUSE_SECS)),
            execution_timeout: Duration::from_secs(
                config
                    .execution_timeout_secs
                    .unwrap_or(DEFAULT_EXECUTION_TIMEOUT_SECS),
            ),
            request_timeout: Duration::from_secs(
                config
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
        })
    }

    /// The fixed target set for this session.
    ///
    /// Explicit files must exist under `code_dir`. Without explicit files,
    /// every `.py` file directly inside `code_dir` is used, sorted by name.
    pub fn target_set(&self) -> Result<Vec<String>, RepairError> {
        if !self.files.is_empty() {
            if let Some(missing) = self
                .files
                .iter()
                .find(|f| !self.code_dir.join(f.as_str()).is_file())
            {
                return Err(RepairError::Config(format!(
                    "file to debug not found: {}",
                    self.code_dir.join(missing).display()
                )));
            }
            return Ok(self.files.clone());
        }

        let targets: Vec<String> = WalkDir::new(&self.code_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| name.ends_with(".py"))
            .collect();

        if targets.is_empty() {
            return Err(RepairError::Config(format!(
                "no .py files found in {}",
                self.code_dir.display()
            )));
        }
        Ok(targets)
    }
}

pub fn default_model(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Openai => DEFAULT_OPENAI_MODEL,
        ProviderKind::Huggingface => DEFAULT_HUGGINGFACE_MODEL,
        ProviderKind::Gemini => DEFAULT_GEMINI_MODEL,
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            warn!("Failed to set temp config file permissions: {}", e);
        }
    }

    file.write_all(content.as_bytes())?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::resolve(dir.path(), Vec::new(), Config::default()).unwrap();
        assert_eq!(settings.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(settings.enable_internet_search);
        assert_eq!(settings.num_search_urls, 5);
        assert_eq!(settings.internet_search_threshold, 5);
        assert_eq!(settings.provider, ProviderKind::Openai);
        assert_eq!(settings.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(settings.pause, Duration::from_secs(2));
    }

    #[test]
    fn test_cli_overrides_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = Config {
            max_attempts: Some(4),
            llm_type: Some(ProviderKind::Gemini),
            gemini_model: Some("gemini-from-file".to_string()),
            num_search_urls: Some(2),
            ..Config::default()
        };
        let cli = Config {
            max_attempts: Some(7),
            ..Config::default()
        };

        let settings = Settings::resolve(dir.path(), Vec::new(), cli.layered_over(file)).unwrap();
        assert_eq!(settings.max_attempts, 7);
        assert_eq!(settings.provider, ProviderKind::Gemini);
        assert_eq!(settings.model, "gemini-from-file");
        assert_eq!(settings.num_search_urls, 2);
    }

    #[test]
    fn test_resolve_rejects_zero_attempts_and_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let zero = Config {
            max_attempts: Some(0),
            ..Config::default()
        };
        assert!(matches!(
            Settings::resolve(dir.path(), Vec::new(), zero),
            Err(RepairError::Config(_))
        ));
        assert!(matches!(
            Settings::resolve(&dir.path().join("nope"), Vec::new(), Config::default()),
            Err(RepairError::Config(_))
        ));
    }

    #[test]
    fn test_target_set_scans_py_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.py"), "").unwrap();
        fs::write(dir.path().join("a.py"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/c.py"), "").unwrap();

        let settings = Settings::resolve(dir.path(), Vec::new(), Config::default()).unwrap();
        assert_eq!(settings.target_set().unwrap(), vec!["a.py", "b.py"]);
    }

    #[test]
    fn test_target_set_explicit_files_keep_order_and_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "").unwrap();
        fs::write(dir.path().join("z.py"), "").unwrap();

        let explicit = vec!["z.py".to_string(), "a.py".to_string()];
        let settings = Settings::resolve(dir.path(), explicit.clone(), Config::default()).unwrap();
        assert_eq!(settings.target_set().unwrap(), explicit);

        let missing =
            Settings::resolve(dir.path(), vec!["gone.py".to_string()], Config::default()).unwrap();
        assert!(matches!(missing.target_set(), Err(RepairError::Config(_))));
    }

    #[test]
    fn test_target_set_empty_dir_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::resolve(dir.path(), Vec::new(), Config::default()).unwrap();
        assert!(matches!(settings.target_set(), Err(RepairError::Config(_))));
    }

    #[test]
    fn test_config_save_load_and_corrupt_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            max_attempts: Some(3),
            llm_type: Some(ProviderKind::Huggingface),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
        assert!(dir.path().join("config.json.corrupt").exists());
    }
}

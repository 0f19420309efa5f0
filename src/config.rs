//! Configuration management for ctxmcp.
//!
//! Reads `~/.ctxmcp/settings.toml`, creates it with defaults on first run.
//! Precedence: CLI overrides > `CTXMCP_*` environment variables > file.
//! Out-of-range values fail the load; the rest of the crate only ever sees a
//! validated snapshot.

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
};
use toml;

const ROOT_DIR_NAME: &str = ".ctxmcp";

/// Placeholder token shipped in the default settings file. Refused at run
/// time so a half-configured install fails loudly instead of getting 401s.
pub const TOKEN_SENTINEL: &str = "your-token-here";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(alias = "BATCH_SIZE", default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(alias = "MAX_LINES_PER_BLOB", default = "default_max_lines_per_blob")]
    pub max_lines_per_blob: usize,
    #[serde(
        alias = "MAX_CONCURRENT_UPLOADS",
        default = "default_max_concurrent_uploads"
    )]
    pub max_concurrent_uploads: usize,
    #[serde(alias = "MAX_RETRIES", default = "default_max_retries")]
    pub max_retries: usize,
    /// Base backoff delay in seconds; attempt n sleeps `delay * 2^(n-1)`.
    #[serde(alias = "RETRY_BASE_DELAY", default = "default_retry_base_delay")]
    pub retry_base_delay: f64,
    #[serde(alias = "BASE_URL", default = "default_base_url")]
    pub base_url: String,
    #[serde(alias = "TOKEN", default = "default_token")]
    pub token: String,
    #[serde(alias = "TEXT_EXTENSIONS", default = "default_text_extensions")]
    pub text_extensions: Vec<String>,
    #[serde(alias = "EXCLUDE_PATTERNS", default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

fn default_batch_size() -> usize {
    10
}
fn default_max_lines_per_blob() -> usize {
    800
}
fn default_max_concurrent_uploads() -> usize {
    4
}
fn default_max_retries() -> usize {
    3
}
fn default_retry_base_delay() -> f64 {
    1.0
}
fn default_base_url() -> String {
    "https://api.example.com".to_string()
}
fn default_token() -> String {
    TOKEN_SENTINEL.to_string()
}

fn default_text_extensions() -> Vec<String> {
    vec![
        ".py", ".js", ".ts", ".jsx", ".tsx", ".java", ".go", ".rs", ".cpp", ".c", ".h", ".hpp",
        ".cs", ".rb", ".php", ".md", ".txt", ".json", ".yaml", ".yml", ".toml", ".xml", ".html",
        ".css", ".scss", ".sql", ".sh", ".bash",
    ]
    .into_iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".venv",
        "venv",
        ".env",
        "env",
        "node_modules",
        ".git",
        ".svn",
        ".hg",
        "__pycache__",
        ".pytest_cache",
        ".mypy_cache",
        ".tox",
        ".eggs",
        "*.egg-info",
        "dist",
        "build",
        ".idea",
        ".vscode",
        ".DS_Store",
        "*.pyc",
        "*.pyo",
        "*.pyd",
        ".Python",
        "pip-log.txt",
        "pip-delete-this-directory.txt",
        ".coverage",
        "htmlcov",
        ".gradle",
        "target",
        "bin",
        "obj",
    ]
    .into_iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_lines_per_blob: default_max_lines_per_blob(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            max_retries: default_max_retries(),
            retry_base_delay: default_retry_base_delay(),
            base_url: default_base_url(),
            token: default_token(),
            text_extensions: default_text_extensions(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl Settings {
    /// Enforce the documented ranges. Called after every override layer has
    /// been applied, so a bad env var fails the same way a bad file does.
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.batch_size) {
            bail!("batch_size must be in 1..=100, got {}", self.batch_size);
        }
        if !(100..=10_000).contains(&self.max_lines_per_blob) {
            bail!(
                "max_lines_per_blob must be in 100..=10000, got {}",
                self.max_lines_per_blob
            );
        }
        if !(1..=100).contains(&self.max_concurrent_uploads) {
            bail!(
                "max_concurrent_uploads must be in 1..=100, got {}",
                self.max_concurrent_uploads
            );
        }
        if !(1..=10).contains(&self.max_retries) {
            bail!("max_retries must be in 1..=10, got {}", self.max_retries);
        }
        if !(0.1..=60.0).contains(&self.retry_base_delay) {
            bail!(
                "retry_base_delay must be in 0.1..=60.0 seconds, got {}",
                self.retry_base_delay
            );
        }
        if self.base_url.trim().is_empty() {
            bail!("base_url must not be empty");
        }
        Ok(())
    }

    pub fn token_configured(&self) -> bool {
        !self.token.trim().is_empty() && self.token != TOKEN_SENTINEL
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub root_dir: PathBuf,
    pub data_dir: PathBuf,
    pub settings_path: PathBuf,
}

impl Config {
    pub fn load_with_overrides(base_url: Option<String>, token: Option<String>) -> Result<Self> {
        let root_dir = home::home_dir()
            .ok_or_else(|| anyhow!("failed to resolve home dir"))?
            .join(ROOT_DIR_NAME);
        Self::load_from_root(root_dir, base_url, token)
    }

    /// Same as `load_with_overrides` but with an explicit root, so tests can
    /// point at a scratch directory without touching the real home.
    pub fn load_from_root(
        root_dir: PathBuf,
        base_url: Option<String>,
        token: Option<String>,
    ) -> Result<Self> {
        let data_dir = root_dir.join("data");
        fs::create_dir_all(&root_dir)?;
        fs::create_dir_all(&data_dir)?;
        let settings_path = root_dir.join("settings.toml");

        let mut settings = if settings_path.exists() {
            let text = fs::read_to_string(&settings_path)?;
            toml::from_str::<Settings>(&text)
                .with_context(|| format!("parse settings: {}", settings_path.display()))?
        } else {
            let s = Settings::default();
            let text = toml::to_string_pretty(&s)?;
            fs::write(&settings_path, text)?;
            s
        };

        apply_env_overrides(&mut settings);

        if let Some(u) = base_url {
            settings.base_url = u;
        }
        if let Some(t) = token {
            settings.token = t;
        }

        settings.validate()?;

        Ok(Self {
            settings,
            root_dir,
            data_dir,
            settings_path,
        })
    }

    pub fn text_extensions_set(&self) -> HashSet<String> {
        self.settings.text_extensions.iter().cloned().collect()
    }

    pub fn projects_file(&self) -> PathBuf {
        self.data_dir.join("projects.json")
    }

    pub fn save(&self) -> Result<()> {
        let text = toml::to_string_pretty(&self.settings)?;
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.settings_path, text)?;
        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root_dir.join("log")
    }
}

fn apply_env_overrides(settings: &mut Settings) {
    fn var(name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.is_empty())
    }
    fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
        var(name).and_then(|v| v.parse().ok())
    }
    fn list(name: &str) -> Option<Vec<String>> {
        var(name).map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }

    if let Some(v) = var("CTXMCP_BASE_URL") {
        settings.base_url = v;
    }
    if let Some(v) = var("CTXMCP_TOKEN") {
        settings.token = v;
    }
    if let Some(v) = parsed::<usize>("CTXMCP_BATCH_SIZE") {
        settings.batch_size = v;
    }
    if let Some(v) = parsed::<usize>("CTXMCP_MAX_LINES_PER_BLOB") {
        settings.max_lines_per_blob = v;
    }
    if let Some(v) = parsed::<usize>("CTXMCP_MAX_CONCURRENT_UPLOADS") {
        settings.max_concurrent_uploads = v;
    }
    if let Some(v) = parsed::<usize>("CTXMCP_MAX_RETRIES") {
        settings.max_retries = v;
    }
    if let Some(v) = parsed::<f64>("CTXMCP_RETRY_BASE_DELAY") {
        settings.retry_base_delay = v;
    }
    if let Some(v) = list("CTXMCP_TEXT_EXTENSIONS") {
        settings.text_extensions = v;
    }
    if let Some(v) = list("CTXMCP_EXCLUDE_PATTERNS") {
        settings.exclude_patterns = v;
    }
}

/// Normalize a path to an absolute forward-slash representation.
pub fn normalize_path<P: AsRef<Path>>(p: P) -> Result<String> {
    let abs = dunce::canonicalize(p)?;
    let s = abs.to_string_lossy().replace('\\', "/");
    Ok(s)
}

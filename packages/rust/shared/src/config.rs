//! Application configuration for Roadmend.
//!
//! User config lives at `~/.roadmend/roadmend.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoadmendError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "roadmend.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".roadmend";

// ---------------------------------------------------------------------------
// Config structs (matching roadmend.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Document store location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Liveness probe settings.
    #[serde(default)]
    pub checker: CheckerConfig,

    /// Replacement attempts.
    #[serde(default)]
    pub replacement: ReplacementSection,

    /// OpenRouter (or any OpenAI-compatible) text generation settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Run lock settings.
    #[serde(default)]
    pub lock: LockConfig,

    /// Log sinks.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Local libSQL database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Remote libSQL URL. Takes precedence over `path` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Name of the env var holding the remote auth token.
    #[serde(default = "default_db_token_env")]
    pub auth_token_env: String,

    /// How long a connection waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            url: None,
            auth_token_env: default_db_token_env(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_db_path() -> String {
    "~/.roadmend/roadmend.db".into()
}
fn default_db_token_env() -> String {
    "ROADMEND_DB_TOKEN".into()
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// `[checker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Per-probe timeout.
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,

    /// Pause between two probes.
    #[serde(default = "default_check_delay")]
    pub delay_ms: u64,

    /// Redirect hops followed before giving up.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// User-Agent sent with every probe.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Probe loopback/private addresses instead of classifying them blocked.
    #[serde(default)]
    pub allow_private_hosts: bool,

    /// Retry a 405/501 HEAD answer once with GET.
    #[serde(default)]
    pub fallback_get_on_405: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_check_timeout(),
            delay_ms: default_check_delay(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            allow_private_hosts: false,
            fallback_get_on_405: false,
        }
    }
}

fn default_check_timeout() -> u64 {
    10
}
fn default_check_delay() -> u64 {
    500
}
fn default_max_redirects() -> usize {
    10
}
fn default_user_agent() -> String {
    concat!("Roadmend Link Checker/", env!("CARGO_PKG_VERSION")).into()
}

/// `[replacement]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementSection {
    /// Whether dead links get a replacement attempt at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pause before each generation call (rate limiting).
    #[serde(default = "default_replacement_delay")]
    pub delay_ms: u64,

    /// Per-request timeout for the generation call.
    #[serde(default = "default_replacement_timeout")]
    pub timeout_secs: u64,
}

impl Default for ReplacementSection {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: default_replacement_delay(),
            timeout_secs: default_replacement_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_replacement_delay() -> u64 {
    2_000
}
fn default_replacement_timeout() -> u64 {
    60
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for replacement suggestions.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Base URL of the chat-completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.5-pro".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

/// Which mechanism backs the run lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    /// OS advisory lock on a well-known file.
    #[default]
    File,
    /// Expiring row in the shared database.
    Database,
}

/// `[lock]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub backend: LockBackend,

    /// Lock file for the `file` backend.
    #[serde(default = "default_lock_path")]
    pub path: String,

    /// Lease name for the `database` backend.
    #[serde(default = "default_lock_name")]
    pub name: String,

    /// Age after which a database lease is considered abandoned.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::File,
            path: default_lock_path(),
            name: default_lock_name(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_lock_path() -> String {
    "~/.roadmend/link_validator.lock".into()
}
fn default_lock_name() -> String {
    "roadmap-link-repair".into()
}
fn default_stale_after() -> u64 {
    6 * 60 * 60
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Append every log line to this file as well as stdout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime liveness-check configuration.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub timeout: Duration,
    /// Pause applied between two consecutive probes.
    pub delay: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
    pub allow_private_hosts: bool,
    pub fallback_get_on_405: bool,
}

impl From<&AppConfig> for CheckConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.checker.timeout_secs),
            delay: Duration::from_millis(config.checker.delay_ms),
            max_redirects: config.checker.max_redirects,
            user_agent: config.checker.user_agent.clone(),
            allow_private_hosts: config.checker.allow_private_hosts,
            fallback_get_on_405: config.checker.fallback_get_on_405,
        }
    }
}

/// Runtime replacement configuration.
#[derive(Debug, Clone)]
pub struct ReplacementConfig {
    pub enabled: bool,
    /// Pause before each generation call.
    pub delay: Duration,
    pub timeout: Duration,
    pub model: String,
}

impl From<&AppConfig> for ReplacementConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            enabled: config.replacement.enabled,
            delay: Duration::from_millis(config.replacement.delay_ms),
            timeout: Duration::from_secs(config.replacement.timeout_secs),
            model: config.openrouter.default_model.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.roadmend/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| RoadmendError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.roadmend/roadmend.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RoadmendError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RoadmendError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RoadmendError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RoadmendError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RoadmendError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| RoadmendError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Read the OpenRouter API key, if the configured env var is set and non-empty.
pub fn api_key(config: &AppConfig) -> Option<String> {
    std::env::var(&config.openrouter.api_key_env)
        .ok()
        .filter(|v| !v.is_empty())
}

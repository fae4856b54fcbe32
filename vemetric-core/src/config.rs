//! Configuration loading and management
//!
//! Two layers live here:
//! - [`Options`]: the options object an embedding page hands to `init`,
//!   merged over defaults into an immutable [`TrackerConfig`]
//! - [`Config`]: the file configuration used by command-line hosts, loaded
//!   from `~/.config/vemetric/config.toml`
//!
//! File locations follow the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/vemetric/` (~/.config/vemetric/)
//! - State/Logs/Session: `$XDG_STATE_HOME/vemetric/` (~/.local/state/vemetric/)

use crate::error::{Error, Result};
use crate::masking::MaskPattern;
use serde::Deserialize;
use std::path::PathBuf;

/// Canonical collection endpoint
pub const DEFAULT_HOST: &str = "https://hub.vemetric.com";

/// Tokens shorter than this are rejected by `init`
pub const MIN_TOKEN_LENGTH: usize = 3;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Options handed to `init`.
///
/// Every field except the token is optional; unset fields fall back to the
/// defaults in [`Options::resolve`]. Deserializes from the camelCase options
/// object (`trackPageViews`) as well as snake_case TOML (`track_page_views`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Project token sent with every request
    #[serde(default)]
    pub token: String,

    /// Base URL of the collection endpoint, absolute or a relative proxy path
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default, alias = "track_page_views")]
    pub track_page_views: Option<bool>,

    #[serde(default, alias = "track_outbound_links")]
    pub track_outbound_links: Option<bool>,

    #[serde(default, alias = "track_data_attributes")]
    pub track_data_attributes: Option<bool>,

    #[serde(default, alias = "allow_cookies")]
    pub allow_cookies: Option<bool>,

    /// Glob patterns used to redact path segments (`/product/*`)
    #[serde(default, alias = "mask_paths")]
    pub mask_paths: Option<Vec<String>>,

    /// Name of the calling integration
    #[serde(default)]
    pub sdk: Option<String>,

    /// Version of the calling integration
    #[serde(default, alias = "sdk_version")]
    pub sdk_version: Option<String>,
}

impl Options {
    /// Options with just a token set
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    /// Validate and merge over defaults.
    ///
    /// Fails if the token is shorter than [`MIN_TOKEN_LENGTH`]. Mask patterns
    /// that fail to compile are skipped with a warning; the rest are sorted
    /// so longer patterns are tried first.
    pub fn resolve(self) -> Result<TrackerConfig> {
        if self.token.chars().count() < MIN_TOKEN_LENGTH {
            return Err(Error::Config(format!(
                "token must be at least {} characters",
                MIN_TOKEN_LENGTH
            )));
        }

        let host = self
            .host
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
            .trim_end_matches('/')
            .to_string();

        let mut mask_paths = Vec::new();
        for raw in self.mask_paths.unwrap_or_default() {
            match MaskPattern::new(&raw) {
                Ok(pattern) => mask_paths.push(pattern),
                Err(e) => tracing::warn!(pattern = %raw, error = %e, "Ignoring mask path"),
            }
        }
        MaskPattern::sort_by_specificity(&mut mask_paths);

        Ok(TrackerConfig {
            token: self.token,
            host,
            track_page_views: self.track_page_views.unwrap_or(true),
            track_outbound_links: self.track_outbound_links.unwrap_or(true),
            track_data_attributes: self.track_data_attributes.unwrap_or(true),
            allow_cookies: self.allow_cookies.unwrap_or(false),
            mask_paths,
            sdk: self.sdk,
            sdk_version: self.sdk_version,
        })
    }
}

/// Resolved, immutable tracker configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub token: String,
    /// Host without trailing slash
    pub host: String,
    pub track_page_views: bool,
    pub track_outbound_links: bool,
    pub track_data_attributes: bool,
    pub allow_cookies: bool,
    /// Sorted by descending pattern length
    pub mask_paths: Vec<MaskPattern>,
    pub sdk: Option<String>,
    pub sdk_version: Option<String>,
}

/// Environment suppression policy
///
/// Requests from local development hosts and automated browsers are
/// dropped silently. The list of automation globals is configurable since
/// driver markers change over time.
#[derive(Debug, Clone, Deserialize)]
pub struct SuppressionConfig {
    /// Globals whose presence marks a headless or automated browser
    #[serde(default = "default_automation_globals")]
    pub automation_globals: Vec<String>,

    /// Treat `navigator.webdriver` as automation
    #[serde(default = "default_true")]
    pub honor_webdriver: bool,

    /// Suppress localhost, 127.0.0.1 and `file:` pages
    #[serde(default = "default_true")]
    pub suppress_local: bool,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            automation_globals: default_automation_globals(),
            honor_webdriver: true,
            suppress_local: true,
        }
    }
}

fn default_automation_globals() -> Vec<String> {
    [
        "_phantom",
        "callPhantom",
        "__nightmare",
        "__selenium_unwrapped",
        "__webdriver_evaluate",
        "domAutomation",
        "Cypress",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

/// HTTP transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

/// How often the log file rolls over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files; defaults to the state directory
    #[serde(default)]
    pub directory: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            rotation: LogRotation::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// File configuration for command-line hosts
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Options passed to `init`
    #[serde(default)]
    pub tracking: Options,

    #[serde(default)]
    pub suppression: SuppressionConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/vemetric/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("vemetric").join("config.toml")
    }

    /// `$XDG_STATE_HOME/vemetric/`
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("vemetric")
    }

    /// Session-scoped storage file (context id and user identity)
    pub fn session_path() -> PathBuf {
        Self::state_dir().join("session.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let config = Options::with_token("abc").resolve().unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
        assert!(config.track_page_views);
        assert!(config.track_outbound_links);
        assert!(config.track_data_attributes);
        assert!(!config.allow_cookies);
        assert!(config.mask_paths.is_empty());
    }

    #[test]
    fn test_resolve_rejects_short_token() {
        assert!(matches!(
            Options::with_token("ab").resolve(),
            Err(Error::Config(_))
        ));
        assert!(Options::default().resolve().is_err());
    }

    #[test]
    fn test_resolve_sorts_mask_paths() {
        let options = Options {
            mask_paths: Some(vec![
                "/a/*".to_string(),
                "/product/*/detail/*".to_string(),
                "/user/*".to_string(),
            ]),
            ..Options::with_token("token")
        };
        let config = options.resolve().unwrap();
        let raw: Vec<&str> = config.mask_paths.iter().map(|p| p.as_str()).collect();
        assert_eq!(raw, vec!["/product/*/detail/*", "/user/*", "/a/*"]);
    }

    #[test]
    fn test_resolve_keeps_bracketed_mask_paths() {
        let options = Options {
            mask_paths: Some(vec!["/a/[b/*".to_string(), "/docs/[slug]/*".to_string()]),
            ..Options::with_token("token")
        };
        assert_eq!(options.resolve().unwrap().mask_paths.len(), 2);
    }

    #[test]
    fn test_resolve_trims_host() {
        let options = Options {
            host: Some("https://collect.example.com/".to_string()),
            ..Options::with_token("token")
        };
        assert_eq!(
            options.resolve().unwrap().host,
            "https://collect.example.com"
        );
    }

    #[test]
    fn test_options_from_camel_case_json() {
        let options: Options = serde_json::from_str(
            r#"{"token":"tok","trackPageViews":false,"maskPaths":["/a/*"],"sdkVersion":"1.2"}"#,
        )
        .unwrap();
        assert_eq!(options.track_page_views, Some(false));
        assert_eq!(options.mask_paths, Some(vec!["/a/*".to_string()]));
        assert_eq!(options.sdk_version.as_deref(), Some("1.2"));
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[tracking]
token = "tok_123"
host = "https://collect.example.com"
allow_cookies = true
mask_paths = ["/user/*"]

[suppression]
automation_globals = ["Cypress"]
suppress_local = false

[logging]
level = "debug"
directory = "/var/log/vemetric"
rotation = "hourly"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.tracking.token, "tok_123");
        assert_eq!(config.tracking.allow_cookies, Some(true));
        assert_eq!(config.suppression.automation_globals, vec!["Cypress"]);
        assert!(config.suppression.honor_webdriver);
        assert!(!config.suppression.suppress_local);
        assert_eq!(config.transport.timeout_secs, 10);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/var/log/vemetric"))
        );
        assert_eq!(config.logging.rotation, LogRotation::Hourly);
    }

    #[test]
    fn test_default_suppression() {
        let config = SuppressionConfig::default();
        assert!(config.automation_globals.iter().any(|g| g == "Cypress"));
        assert!(config.honor_webdriver);
        assert!(config.suppress_local);
    }
}

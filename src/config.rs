//! Configuration types for Retrace

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Result, RetraceError};

/// Recording proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Port to listen on (0 = OS-assigned)
    pub port: u16,
    /// Upstream base URL, e.g. `http://localhost:3000`
    pub target: String,
    /// Capture log output path
    pub log_path: PathBuf,
}

impl RecorderConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        validate_http_url(&self.target, "target")?;
        Ok(())
    }
}

/// Differential replay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Capture log to replay
    pub log_path: PathBuf,
    /// Primary environment base URL
    pub primary_url: String,
    /// Secondary environment base URL
    pub secondary_url: String,
    /// HTML report output path
    pub report_path: PathBuf,
    /// Field names stripped from response bodies before diffing
    #[serde(default)]
    pub ignore_fields: Vec<String>,
    /// Endpoints skipped entirely (exact or mutual-suffix match)
    #[serde(default)]
    pub exclude_endpoints: Vec<String>,
    /// Headers added to every replayed request; these win over the
    /// built-in defaults
    #[serde(default)]
    pub inject_headers: Vec<(String, String)>,
    /// Maximum entries in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_concurrency() -> usize {
    1
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::new(),
            primary_url: String::new(),
            secondary_url: String::new(),
            report_path: PathBuf::from("report.html"),
            ignore_fields: Vec::new(),
            exclude_endpoints: Vec::new(),
            inject_headers: Vec::new(),
            concurrency: default_concurrency(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ReplayConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        validate_http_url(&self.primary_url, "primary_url")?;
        validate_http_url(&self.secondary_url, "secondary_url")?;

        if self.concurrency == 0 {
            return Err(RetraceError::ConfigError(
                "concurrency must be at least 1".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(RetraceError::ConfigError(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        // An empty pattern would suffix-match every URL
        if self.exclude_endpoints.iter().any(String::is_empty) {
            return Err(RetraceError::ConfigError(
                "exclude_endpoints entries cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Traffic generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// Recording proxy base URL to fire traffic at
    pub target: String,
    /// Swagger/OpenAPI JSON document path
    pub file: PathBuf,
    /// Optional upstream URL probed before firing
    #[serde(default)]
    pub source: Option<String>,
    /// Paths skipped (same matching as replay exclusion)
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_generate_timeout_ms")]
    pub timeout_ms: u64,
    /// Delay between consecutive requests in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Headers added to every generated request
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// HTTP methods to fire (case-insensitive)
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    /// Prefix prepended to every swagger path
    #[serde(default)]
    pub base_path: String,
}

fn default_generate_timeout_ms() -> u64 {
    5000
}

fn default_delay_ms() -> u64 {
    50
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            file: PathBuf::new(),
            source: None,
            exclude: Vec::new(),
            timeout_ms: default_generate_timeout_ms(),
            delay_ms: default_delay_ms(),
            headers: Vec::new(),
            methods: default_methods(),
            base_path: String::new(),
        }
    }
}

impl GenerateConfig {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RetraceError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| RetraceError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        validate_http_url(&self.target, "target")?;

        if let Some(source) = &self.source {
            validate_http_url(source, "source")?;
        }

        if self.methods.is_empty() {
            return Err(RetraceError::ConfigError(
                "methods cannot be empty".to_string(),
            ));
        }

        if self.timeout_ms == 0 {
            return Err(RetraceError::ConfigError(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.exclude.iter().any(String::is_empty) {
            return Err(RetraceError::ConfigError(
                "exclude entries cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Whether a URL matches the exclusion list.
///
/// A pattern matches on exact equality or when either side is a suffix of
/// the other, so `/api/users/1` is excluded by the pattern `users/1` and
/// the pattern `/v2/api/users/1` excludes the shorter logged URL.
#[must_use]
pub fn is_excluded(url: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|p| url == p || url.ends_with(p.as_str()) || p.ends_with(url))
}

/// Validate that a collaborator URL is well-formed plain HTTP.
///
/// `https` is rejected: transport security is out of scope and the
/// forwarding client speaks plain HTTP only.
fn validate_http_url(url: &str, field: &str) -> Result<()> {
    if url.is_empty() {
        return Err(RetraceError::ConfigError(format!(
            "{field} cannot be empty"
        )));
    }

    let uri: hyper::Uri = url
        .parse()
        .map_err(|e| RetraceError::ConfigError(format!("{field} is not a valid URL: {e}")))?;

    match uri.scheme_str() {
        Some("http") => {}
        Some("https") => {
            return Err(RetraceError::ConfigError(format!(
                "{field}: https targets are not supported, use a plain http URL"
            )));
        }
        _ => {
            return Err(RetraceError::ConfigError(format!(
                "{field} must start with http://"
            )));
        }
    }

    if uri.authority().is_none() {
        return Err(RetraceError::ConfigError(format!(
            "{field} is missing a host"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_recorder_config_validate() {
        let config = RecorderConfig {
            port: 0,
            target: "http://localhost:3000".to_string(),
            log_path: PathBuf::from("capture.log"),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_recorder_config_rejects_https() {
        let config = RecorderConfig {
            port: 8080,
            target: "https://api.example.com".to_string(),
            log_path: PathBuf::from("capture.log"),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_replay_config_defaults() {
        let config = ReplayConfig::default();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.request_timeout_ms, 30_000);
    }

    #[test]
    fn test_replay_config_validate() {
        let config = ReplayConfig {
            primary_url: "http://localhost:3001".to_string(),
            secondary_url: "http://localhost:3002".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_replay_config_zero_concurrency() {
        let config = ReplayConfig {
            primary_url: "http://localhost:3001".to_string(),
            secondary_url: "http://localhost:3002".to_string(),
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_replay_config_bad_url() {
        let config = ReplayConfig {
            primary_url: "not a url".to_string(),
            secondary_url: "http://localhost:3002".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ReplayConfig {
            primary_url: "localhost:3001".to_string(),
            secondary_url: "http://localhost:3002".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_replay_config_empty_exclude_entry() {
        let config = ReplayConfig {
            primary_url: "http://localhost:3001".to_string(),
            secondary_url: "http://localhost:3002".to_string(),
            exclude_endpoints: vec![String::new()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generate_config_parse() {
        let config_toml = r#"
            target = "http://localhost:8080"
            file = "swagger.json"
            methods = ["get", "post"]
            exclude = ["/health"]
            headers = [["authorization", "Bearer abc"]]
        "#;

        let config: GenerateConfig = toml::from_str(config_toml).unwrap();
        assert_eq!(config.target, "http://localhost:8080");
        assert_eq!(config.methods, vec!["get", "post"]);
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.delay_ms, 50);
        assert_eq!(config.headers.len(), 1);
    }

    #[test]
    fn test_generate_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        let config_toml = r#"
            target = "http://localhost:8080"
            file = "swagger.json"
            source = "http://localhost:3000"
        "#;
        file.write_all(config_toml.as_bytes()).unwrap();

        let config = GenerateConfig::from_file(file.path()).unwrap();
        assert_eq!(config.source.as_deref(), Some("http://localhost:3000"));
        assert_eq!(config.methods, vec!["GET"]);
    }

    #[test]
    fn test_generate_config_invalid() {
        let config = GenerateConfig {
            target: "http://localhost:8080".to_string(),
            file: PathBuf::from("swagger.json"),
            methods: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = GenerateConfig {
            target: "ftp://localhost".to_string(),
            file: PathBuf::from("swagger.json"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_excluded_matching() {
        let patterns = vec!["/api/users/1".to_string(), "health".to_string()];

        // Exact
        assert!(is_excluded("/api/users/1", &patterns));
        // Pattern is a suffix of the URL
        assert!(is_excluded("/v2/health", &patterns));
        // URL is a suffix of the pattern
        assert!(is_excluded("users/1", &patterns));

        assert!(!is_excluded("/api/users/2", &patterns));
        assert!(!is_excluded("/api/users", &patterns));
        assert!(!is_excluded("/healthz", &patterns));
    }

    #[test]
    fn test_is_excluded_empty_patterns() {
        assert!(!is_excluded("/anything", &[]));
    }
}

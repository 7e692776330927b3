use crate::circuit_breaker::{CircuitBreakerConfig, RetryConfig};
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Demo server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Upstream targets and their policies
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default)]
    pub filter: Option<String>,
}

/// One logical upstream target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Name used to address the upstream
    pub name: String,
    /// Base URL; also the key under which breaker state is shared
    pub base_url: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl UpstreamConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            timeout_ms: default_timeout_ms(),
            headers: HashMap::new(),
            retry: None,
            circuit_breaker: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_timeout_ms() -> u64 {
    crate::client::DEFAULT_TIMEOUT_MS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ResilienceConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ClientError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();

        for upstream in &self.upstreams {
            if upstream.name.is_empty() {
                return Err(ClientError::Config(
                    "Upstream name cannot be empty".to_string(),
                ));
            }

            if !names.insert(upstream.name.as_str()) {
                return Err(ClientError::Config(format!(
                    "Duplicate upstream name: {}",
                    upstream.name
                )));
            }

            if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://")
            {
                return Err(ClientError::Config(format!(
                    "Base URL must start with http:// or https:// for upstream: {}",
                    upstream.name
                )));
            }

            Url::parse(&upstream.base_url).map_err(|e| {
                ClientError::Config(format!(
                    "Invalid base URL for upstream {}: {}",
                    upstream.name, e
                ))
            })?;

            if let Some(breaker) = &upstream.circuit_breaker {
                breaker.validate().map_err(|e| {
                    ClientError::Config(format!("Upstream {}: {}", upstream.name, e))
                })?;
            }
        }

        Ok(())
    }

    /// Look up an upstream by name
    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080

logging:
  format: json

upstreams:
  - name: viacep
    base_url: "https://viacep.com.br/ws"
    retry:
      retries: 3
      delay_ms: 1000
    circuit_breaker:
      failure_threshold: 3
      success_threshold: 2
      timeout_ms: 6000
  - name: status
    base_url: "http://httpstat.us"
    timeout_ms: 2500
    headers:
      x-api-key: secret
"#;

        let config = ResilienceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.upstreams.len(), 2);

        let viacep = config.upstream("viacep").unwrap();
        assert_eq!(viacep.retry, Some(RetryConfig::new(3, 1000)));
        assert_eq!(
            viacep.circuit_breaker,
            Some(CircuitBreakerConfig::new(3, 2, 6000))
        );
        assert_eq!(viacep.timeout_ms, 1000);

        let status = config.upstream("status").unwrap();
        assert_eq!(status.timeout(), Duration::from_millis(2500));
        assert_eq!(status.headers.get("x-api-key").unwrap(), "secret");
        assert!(status.retry.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = ResilienceConfig::from_yaml("upstreams: []").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.logging.filter.is_none());
    }

    #[test]
    fn test_validate_invalid_base_url() {
        let config = ResilienceConfig {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            upstreams: vec![UpstreamConfig::new("bad", "invalid-url")],
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_names() {
        let config = ResilienceConfig {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            upstreams: vec![
                UpstreamConfig::new("api", "http://localhost:3000"),
                UpstreamConfig::new("api", "http://localhost:3001"),
            ],
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_threshold() {
        let mut upstream = UpstreamConfig::new("api", "http://localhost:3000");
        upstream.circuit_breaker = Some(CircuitBreakerConfig::new(0, 2, 1000));
        let config = ResilienceConfig {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            upstreams: vec![upstream],
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "upstreams:\n  - name: api\n    base_url: http://localhost:3000"
        )
        .unwrap();

        let config = ResilienceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.upstreams[0].name, "api");
        assert!(ResilienceConfig::from_file("/nonexistent/resilience.yaml").is_err());
    }

    #[test]
    fn test_bundled_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/resilience.yaml");
        let config = ResilienceConfig::from_file(path).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.upstream("viacep").is_some());
    }
}

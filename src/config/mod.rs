//! Configuration module for the relay gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voice_relay_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::core::audio::{
    DEFAULT_INPUT_SAMPLE_RATE, DEFAULT_MIN_FLUSH_BYTES, DEFAULT_OUTPUT_SAMPLE_RATE,
};
use crate::core::session::SessionSettings;
use crate::core::upstream::ToolDeclaration;
use crate::core::upstream::live::{DEFAULT_LIVE_MODEL, DEFAULT_LIVE_URL, DEFAULT_LIVE_VOICE};

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Instructions used when no collaborator service supplies them.
pub const DEFAULT_INSTRUCTIONS: &str =
    "You are a friendly voice assistant. Keep answers short and conversational.";

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Upstream realtime service settings
#[derive(Clone)]
pub struct UpstreamSettings {
    /// WebSocket endpoint (ws:// or wss://)
    pub url: String,
    /// API key, appended as the `key` query parameter. Zeroized on drop.
    pub api_key: Option<Zeroizing<String>>,
    pub model: String,
    /// Prebuilt voice name; `None` lets the service pick
    pub voice: Option<String>,
    /// Client→upstream PCM16 sample rate (Hz)
    pub input_sample_rate: u32,
    /// Upstream→client PCM16 sample rate (Hz)
    pub output_sample_rate: u32,
    /// How long to wait for the setup acknowledgement; 0 means do not wait
    pub handshake_timeout_seconds: u64,
    /// Instructions used by the standalone instruction builder
    pub default_instructions: String,
}

impl UpstreamSettings {
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.handshake_timeout_seconds))
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_LIVE_URL.to_string(),
            api_key: None,
            model: DEFAULT_LIVE_MODEL.to_string(),
            voice: Some(DEFAULT_LIVE_VOICE.to_string()),
            input_sample_rate: DEFAULT_INPUT_SAMPLE_RATE,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            handshake_timeout_seconds: 0,
            default_instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

impl std::fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("input_sample_rate", &self.input_sample_rate)
            .field("output_sample_rate", &self.output_sample_rate)
            .field("handshake_timeout_seconds", &self.handshake_timeout_seconds)
            .finish()
    }
}

/// Session buffering and timing settings
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Outbound audio flush threshold in bytes (even, > 0)
    pub min_flush_bytes: usize,
    pub session_idle_timeout_seconds: u64,
    pub reaper_interval_seconds: u64,
    /// Client transport read deadline
    pub client_read_timeout_seconds: u64,
    pub tool_timeout_seconds: u64,
    /// Largest accepted WebSocket frame
    pub max_frame_bytes: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            min_flush_bytes: DEFAULT_MIN_FLUSH_BYTES,
            session_idle_timeout_seconds: 30 * 60,
            reaper_interval_seconds: 5 * 60,
            client_read_timeout_seconds: 90,
            tool_timeout_seconds: 30,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

/// External collaborator service settings
#[derive(Debug, Clone)]
pub struct CollaboratorSettings {
    /// Base URL of the collaborator service; `None` uses the static collaborators
    pub service_url: Option<String>,
    pub timeout_seconds: u64,
    /// Tools the collaborator service implements, advertised to the upstream
    pub tools: Vec<ToolDeclaration>,
}

impl Default for CollaboratorSettings {
    fn default() -> Self {
        Self {
            service_url: None,
            timeout_seconds: 5,
            tools: Vec::new(),
        }
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the relay gateway, including:
/// - Server settings (host, port, TLS)
/// - Upstream realtime service settings
/// - Relay buffering and timeouts
/// - Collaborator service settings
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    pub upstream: UpstreamSettings,
    pub relay: RelaySettings,
    pub collaborators: CollaboratorSettings,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            upstream: UpstreamSettings::default(),
            relay: RelaySettings::default(),
            collaborators: CollaboratorSettings::default(),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// Unset variables fall back to defaults. The result is validated.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // Note: .env file is loaded in main.rs at application startup
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    ///
    /// Returns true if TLS configuration is present
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn client_read_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.client_read_timeout_seconds)
    }

    /// Session manager settings derived from the relay section.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            min_flush_bytes: self.relay.min_flush_bytes,
            idle_timeout: Duration::from_secs(self.relay.session_idle_timeout_seconds),
            reaper_interval: Duration::from_secs(self.relay.reaper_interval_seconds),
            tool_timeout: Duration::from_secs(self.relay.tool_timeout_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    pub(super) fn cleanup_env_vars() {
        unsafe {
            for name in [
                "HOST",
                "PORT",
                "TLS_CERT_PATH",
                "TLS_KEY_PATH",
                "UPSTREAM_URL",
                "UPSTREAM_API_KEY",
                "UPSTREAM_MODEL",
                "UPSTREAM_VOICE",
                "INPUT_SAMPLE_RATE",
                "OUTPUT_SAMPLE_RATE",
                "UPSTREAM_HANDSHAKE_TIMEOUT_SECONDS",
                "DEFAULT_INSTRUCTIONS",
                "MIN_FLUSH_BYTES",
                "SESSION_IDLE_TIMEOUT_SECONDS",
                "REAPER_INTERVAL_SECONDS",
                "CLIENT_READ_TIMEOUT_SECONDS",
                "TOOL_TIMEOUT_SECONDS",
                "MAX_FRAME_BYTES",
                "COLLABORATOR_SERVICE_URL",
                "COLLABORATOR_TIMEOUT_SECONDS",
                "COLLABORATOR_TOOLS_JSON",
                "CORS_ALLOWED_ORIGINS",
                "RATE_LIMIT_REQUESTS_PER_SECOND",
                "RATE_LIMIT_BURST_SIZE",
                "MAX_WEBSOCKET_CONNECTIONS",
                "MAX_CONNECTIONS_PER_IP",
            ] {
                env::remove_var(name);
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.address(), "0.0.0.0:3001");
        assert!(!config.is_tls_enabled());
        assert_eq!(config.relay.min_flush_bytes, 9600);
        assert_eq!(config.upstream.handshake_timeout(), None);

        let settings = config.session_settings();
        assert_eq!(settings.idle_timeout, Duration::from_secs(1800));
        assert_eq!(settings.reaper_interval, Duration::from_secs(300));
        assert_eq!(config.client_read_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let mut config = ServerConfig::default();
        config.upstream.api_key = Some(Zeroizing::new("super-secret".to_string()));
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.upstream.url, DEFAULT_LIVE_URL);
        assert!(config.collaborators.service_url.is_none());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 8080

upstream:
  url: "ws://localhost:9999/live"
  api_key: "yaml-key"
  handshake_timeout_seconds: 5

relay:
  min_flush_bytes: 4800
  session_idle_timeout_seconds: 600

collaborators:
  service_url: "http://localhost:7000"
  tools:
    - name: "lookup_weather"
      description: "Current weather for a city"
      parameters:
        type: "object"
        properties:
          city:
            type: "string"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = ServerConfig::from_file(&config_path).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.upstream.url, "ws://localhost:9999/live");
        assert_eq!(
            config.upstream.api_key.as_deref().map(String::as_str),
            Some("yaml-key")
        );
        assert_eq!(
            config.upstream.handshake_timeout(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(config.relay.min_flush_bytes, 4800);
        assert_eq!(config.relay.session_idle_timeout_seconds, 600);
        assert_eq!(
            config.collaborators.service_url.as_deref(),
            Some("http://localhost:7000")
        );
        assert_eq!(config.collaborators.tools.len(), 1);
        assert_eq!(
            config.collaborators.tools[0].parameters.as_ref().unwrap()["properties"]["city"]
                ["type"],
            "string"
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "127.0.0.1"

upstream:
  model: "models/yaml-model"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("HOST", "10.0.0.1");
            env::set_var("PORT", "4000");
            env::set_var("UPSTREAM_MODEL", "models/env-model");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.upstream.model, "models/yaml-model");
        // ENV value where YAML is silent
        assert_eq!(config.port, 4000);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/config.yaml");
        let result = ServerConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_yaml() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: [content").unwrap();

        let result = ServerConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_invalid_values() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "relay:\n  min_flush_bytes: 9601\n").unwrap();

        let err = ServerConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("min_flush_bytes"));

        cleanup_env_vars();
    }
}

use serde::Deserialize;
use std::path::PathBuf;

use crate::core::upstream::ToolDeclaration;

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from a YAML file.
/// All fields are optional to allow partial configuration. Values set here override
/// environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   tls:
///     cert_path: "/etc/relay/cert.pem"
///     key_path: "/etc/relay/key.pem"
///
/// upstream:
///   url: "wss://generativelanguage.googleapis.com/ws/..."
///   api_key: "your-api-key"
///   model: "models/gemini-2.0-flash-live-001"
///   voice: "Kore"
///   input_sample_rate: 16000
///   output_sample_rate: 24000
///   handshake_timeout_seconds: 10
///   default_instructions: "You are a friendly voice assistant."
///
/// relay:
///   min_flush_bytes: 9600
///   session_idle_timeout_seconds: 1800
///   reaper_interval_seconds: 300
///   client_read_timeout_seconds: 90
///   tool_timeout_seconds: 30
///   max_frame_bytes: 1048576
///
/// collaborators:
///   service_url: "http://collaborators.internal:8080"
///   timeout_seconds: 5
///   tools:
///     - name: "lookup_weather"
///       description: "Current weather for a city"
///       parameters:
///         type: "object"
///         properties:
///           city: { type: "string" }
///
/// security:
///   cors_allowed_origins: "*"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub upstream: Option<UpstreamYaml>,
    pub relay: Option<RelayYaml>,
    pub collaborators: Option<CollaboratorsYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Upstream realtime service configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpstreamYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub input_sample_rate: Option<u32>,
    pub output_sample_rate: Option<u32>,
    pub handshake_timeout_seconds: Option<u64>,
    pub default_instructions: Option<String>,
}

/// Relay buffering and timing configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub min_flush_bytes: Option<usize>,
    pub session_idle_timeout_seconds: Option<u64>,
    pub reaper_interval_seconds: Option<u64>,
    pub client_read_timeout_seconds: Option<u64>,
    pub tool_timeout_seconds: Option<u64>,
    pub max_frame_bytes: Option<usize>,
}

/// Collaborator service configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CollaboratorsYaml {
    pub service_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub tools: Option<Vec<ToolDeclaration>>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

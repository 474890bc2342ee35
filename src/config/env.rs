//! Environment variable loading.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use zeroize::Zeroizing;

use super::{ServerConfig, TlsConfig};
use crate::core::upstream::ToolDeclaration;

type ConfigResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Non-empty value of `name`, if set.
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `name` when set; an unparseable value is an error, not a silent default.
fn parse_var<T>(name: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: {raw:?} ({e})").into()),
        None => Ok(None),
    }
}

pub(crate) fn parse_tools_json(raw: &str) -> ConfigResult<Vec<ToolDeclaration>> {
    serde_json::from_str(raw)
        .map_err(|e| format!("Invalid COLLABORATOR_TOOLS_JSON: {e}").into())
}

/// Build a configuration from defaults overlaid with environment variables.
pub(crate) fn load_from_env() -> ConfigResult<ServerConfig> {
    let mut config = ServerConfig::default();

    // Server
    if let Some(host) = var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse_var("PORT")? {
        config.port = port;
    }
    match (var("TLS_CERT_PATH"), var("TLS_KEY_PATH")) {
        (Some(cert), Some(key)) => {
            config.tls = Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            });
        }
        (None, None) => {}
        _ => {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".into());
        }
    }

    // Upstream
    let upstream = &mut config.upstream;
    if let Some(url) = var("UPSTREAM_URL") {
        upstream.url = url;
    }
    if let Some(key) = var("UPSTREAM_API_KEY") {
        upstream.api_key = Some(Zeroizing::new(key));
    }
    if let Some(model) = var("UPSTREAM_MODEL") {
        upstream.model = model;
    }
    if let Some(voice) = var("UPSTREAM_VOICE") {
        upstream.voice = Some(voice);
    }
    if let Some(rate) = parse_var("INPUT_SAMPLE_RATE")? {
        upstream.input_sample_rate = rate;
    }
    if let Some(rate) = parse_var("OUTPUT_SAMPLE_RATE")? {
        upstream.output_sample_rate = rate;
    }
    if let Some(secs) = parse_var("UPSTREAM_HANDSHAKE_TIMEOUT_SECONDS")? {
        upstream.handshake_timeout_seconds = secs;
    }
    if let Some(instructions) = var("DEFAULT_INSTRUCTIONS") {
        upstream.default_instructions = instructions;
    }

    // Relay
    let relay = &mut config.relay;
    if let Some(bytes) = parse_var("MIN_FLUSH_BYTES")? {
        relay.min_flush_bytes = bytes;
    }
    if let Some(secs) = parse_var("SESSION_IDLE_TIMEOUT_SECONDS")? {
        relay.session_idle_timeout_seconds = secs;
    }
    if let Some(secs) = parse_var("REAPER_INTERVAL_SECONDS")? {
        relay.reaper_interval_seconds = secs;
    }
    if let Some(secs) = parse_var("CLIENT_READ_TIMEOUT_SECONDS")? {
        relay.client_read_timeout_seconds = secs;
    }
    if let Some(secs) = parse_var("TOOL_TIMEOUT_SECONDS")? {
        relay.tool_timeout_seconds = secs;
    }
    if let Some(bytes) = parse_var("MAX_FRAME_BYTES")? {
        relay.max_frame_bytes = bytes;
    }

    // Collaborators
    let collaborators = &mut config.collaborators;
    if let Some(url) = var("COLLABORATOR_SERVICE_URL") {
        collaborators.service_url = Some(url);
    }
    if let Some(secs) = parse_var("COLLABORATOR_TIMEOUT_SECONDS")? {
        collaborators.timeout_seconds = secs;
    }
    if let Some(raw) = var("COLLABORATOR_TOOLS_JSON") {
        collaborators.tools = parse_tools_json(&raw)?;
    }

    // Security
    if let Some(origins) = var("CORS_ALLOWED_ORIGINS") {
        config.cors_allowed_origins = Some(origins);
    }
    if let Some(rps) = parse_var("RATE_LIMIT_REQUESTS_PER_SECOND")? {
        config.rate_limit_requests_per_second = rps;
    }
    if let Some(burst) = parse_var("RATE_LIMIT_BURST_SIZE")? {
        config.rate_limit_burst_size = burst;
    }
    if let Some(max) = parse_var("MAX_WEBSOCKET_CONNECTIONS")? {
        config.max_websocket_connections = Some(max);
    }
    if let Some(max) = parse_var("MAX_CONNECTIONS_PER_IP")? {
        config.max_connections_per_ip = max;
    }

    Ok(config)
}

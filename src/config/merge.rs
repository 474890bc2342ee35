//! Merging YAML configuration over the environment-derived base.

use std::path::PathBuf;

use zeroize::Zeroizing;

use super::env::load_from_env;
use super::yaml::YamlConfig;
use super::{ServerConfig, TlsConfig};

/// Environment (with defaults) as the base, YAML values on top.
pub(crate) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(tls) = server.tls {
            if tls.enabled == Some(false) {
                config.tls = None;
            } else {
                match (tls.cert_path, tls.key_path) {
                    (Some(cert), Some(key)) => {
                        config.tls = Some(TlsConfig {
                            cert_path: PathBuf::from(cert),
                            key_path: PathBuf::from(key),
                        });
                    }
                    (None, None) if tls.enabled.is_none() => {}
                    _ => {
                        return Err(
                            "server.tls requires both cert_path and key_path".into()
                        );
                    }
                }
            }
        }
    }

    if let Some(upstream) = yaml.upstream {
        let target = &mut config.upstream;
        if let Some(url) = upstream.url {
            target.url = url;
        }
        if let Some(key) = upstream.api_key {
            target.api_key = Some(Zeroizing::new(key));
        }
        if let Some(model) = upstream.model {
            target.model = model;
        }
        if let Some(voice) = upstream.voice {
            target.voice = Some(voice);
        }
        if let Some(rate) = upstream.input_sample_rate {
            target.input_sample_rate = rate;
        }
        if let Some(rate) = upstream.output_sample_rate {
            target.output_sample_rate = rate;
        }
        if let Some(secs) = upstream.handshake_timeout_seconds {
            target.handshake_timeout_seconds = secs;
        }
        if let Some(instructions) = upstream.default_instructions {
            target.default_instructions = instructions;
        }
    }

    if let Some(relay) = yaml.relay {
        let target = &mut config.relay;
        if let Some(bytes) = relay.min_flush_bytes {
            target.min_flush_bytes = bytes;
        }
        if let Some(secs) = relay.session_idle_timeout_seconds {
            target.session_idle_timeout_seconds = secs;
        }
        if let Some(secs) = relay.reaper_interval_seconds {
            target.reaper_interval_seconds = secs;
        }
        if let Some(secs) = relay.client_read_timeout_seconds {
            target.client_read_timeout_seconds = secs;
        }
        if let Some(secs) = relay.tool_timeout_seconds {
            target.tool_timeout_seconds = secs;
        }
        if let Some(bytes) = relay.max_frame_bytes {
            target.max_frame_bytes = bytes;
        }
    }

    if let Some(collaborators) = yaml.collaborators {
        let target = &mut config.collaborators;
        if let Some(url) = collaborators.service_url {
            target.service_url = Some(url);
        }
        if let Some(secs) = collaborators.timeout_seconds {
            target.timeout_seconds = secs;
        }
        if let Some(tools) = collaborators.tools {
            target.tools = tools;
        }
    }

    if let Some(security) = yaml.security {
        if let Some(origins) = security.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
        if let Some(rps) = security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
        if let Some(max) = security.max_websocket_connections {
            config.max_websocket_connections = Some(max);
        }
        if let Some(max) = security.max_connections_per_ip {
            config.max_connections_per_ip = max;
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::super::tests::cleanup_env_vars;
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_merge_without_yaml_is_env() {
        cleanup_env_vars();
        let config = merge_config(None).unwrap();
        assert_eq!(config.port, 3001);
        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_tls_disabled_in_yaml_clears_env_tls() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("TLS_CERT_PATH", "/tmp/cert.pem");
            std::env::set_var("TLS_KEY_PATH", "/tmp/key.pem");
        }

        let yaml: YamlConfig = serde_yaml::from_str("server:\n  tls:\n    enabled: false\n").unwrap();
        let config = merge_config(Some(yaml)).unwrap();
        assert!(config.tls.is_none());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_incomplete_yaml_tls_is_error() {
        cleanup_env_vars();
        let yaml: YamlConfig =
            serde_yaml::from_str("server:\n  tls:\n    cert_path: \"/tmp/cert.pem\"\n").unwrap();
        assert!(merge_config(Some(yaml)).is_err());
        cleanup_env_vars();
    }
}

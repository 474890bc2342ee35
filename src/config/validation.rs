//! Configuration validation logic.

use url::Url;

use super::ServerConfig;

type ValidationResult = Result<(), Box<dyn std::error::Error>>;

/// Validate the merged configuration.
pub(crate) fn validate(config: &ServerConfig) -> ValidationResult {
    validate_relay(config)?;
    validate_upstream(config)?;
    validate_collaborators(config)?;
    validate_tls(config)?;
    Ok(())
}

fn validate_relay(config: &ServerConfig) -> ValidationResult {
    let relay = &config.relay;
    if relay.min_flush_bytes == 0 || relay.min_flush_bytes % 2 != 0 {
        return Err(format!(
            "relay.min_flush_bytes must be a positive even number of bytes, got {}",
            relay.min_flush_bytes
        )
        .into());
    }
    if relay.session_idle_timeout_seconds == 0 {
        return Err("relay.session_idle_timeout_seconds must be greater than 0".into());
    }
    if relay.reaper_interval_seconds == 0 {
        return Err("relay.reaper_interval_seconds must be greater than 0".into());
    }
    if relay.client_read_timeout_seconds == 0 {
        return Err("relay.client_read_timeout_seconds must be greater than 0".into());
    }
    if relay.max_frame_bytes == 0 {
        return Err("relay.max_frame_bytes must be greater than 0".into());
    }
    Ok(())
}

fn validate_upstream(config: &ServerConfig) -> ValidationResult {
    let upstream = &config.upstream;
    if upstream.input_sample_rate == 0 || upstream.output_sample_rate == 0 {
        return Err("upstream sample rates must be greater than 0".into());
    }

    let url = Url::parse(&upstream.url)
        .map_err(|e| format!("Invalid upstream.url {:?}: {e}", upstream.url))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(format!(
            "upstream.url must use ws:// or wss://, got {}://",
            url.scheme()
        )
        .into());
    }
    Ok(())
}

fn validate_collaborators(config: &ServerConfig) -> ValidationResult {
    let collaborators = &config.collaborators;
    if let Some(service_url) = &collaborators.service_url {
        let url = Url::parse(service_url)
            .map_err(|e| format!("Invalid collaborators.service_url {service_url:?}: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "collaborators.service_url must use http:// or https://, got {}://",
                url.scheme()
            )
            .into());
        }
    } else if !collaborators.tools.is_empty() {
        tracing::warn!(
            tools = collaborators.tools.len(),
            "Tools declared without collaborators.service_url; they will not be registered"
        );
    }

    let mut names = std::collections::HashSet::new();
    for tool in &collaborators.tools {
        if tool.name.trim().is_empty() {
            return Err("collaborators.tools entries require a name".into());
        }
        if !names.insert(tool.name.as_str()) {
            return Err(format!("Duplicate tool name: {}", tool.name).into());
        }
    }
    Ok(())
}

fn validate_tls(config: &ServerConfig) -> ValidationResult {
    if let Some(tls) = &config.tls
        && (tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty())
    {
        return Err("TLS requires both cert_path and key_path".into());
    }
    Ok(())
}

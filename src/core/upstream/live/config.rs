use std::time::Duration;

use url::Url;
use zeroize::Zeroizing;

use crate::config::ServerConfig;
use crate::core::audio::{DEFAULT_INPUT_SAMPLE_RATE, DEFAULT_OUTPUT_SAMPLE_RATE};
use crate::core::upstream::base::{UpstreamError, UpstreamResult, UpstreamSetup};

use super::messages::{
    Content, GenerationConfig, Part, PrebuiltVoiceConfig, SetupPayload, SpeechConfig, ToolSet,
    VoiceConfig,
};

/// Default upstream endpoint.
pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model.
pub const DEFAULT_LIVE_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// Default prebuilt voice.
pub const DEFAULT_LIVE_VOICE: &str = "Kore";

/// Connection settings for the live upstream.
#[derive(Clone)]
pub struct LiveConfig {
    pub url: String,
    pub api_key: Option<Zeroizing<String>>,
    pub model: String,
    pub voice: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    /// When set, `connect` waits this long for `setupComplete`.
    pub handshake_timeout: Option<Duration>,
}

impl std::fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("input_sample_rate", &self.input_sample_rate)
            .field("output_sample_rate", &self.output_sample_rate)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_LIVE_URL.to_string(),
            api_key: None,
            model: DEFAULT_LIVE_MODEL.to_string(),
            voice: Some(DEFAULT_LIVE_VOICE.to_string()),
            input_sample_rate: DEFAULT_INPUT_SAMPLE_RATE,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            handshake_timeout: None,
        }
    }
}

impl LiveConfig {
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            url: config.upstream.url.clone(),
            api_key: config.upstream.api_key.clone(),
            model: config.upstream.model.clone(),
            voice: config.upstream.voice.clone(),
            input_sample_rate: config.upstream.input_sample_rate,
            output_sample_rate: config.upstream.output_sample_rate,
            handshake_timeout: config.upstream.handshake_timeout(),
        }
    }

    /// Endpoint URL with the API key attached as the `key` query parameter.
    pub fn build_ws_url(&self) -> UpstreamResult<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| UpstreamError::InvalidConfiguration(format!("upstream url: {e}")))?;
        if let Some(key) = self.api_key.as_deref()
            && !key.is_empty()
        {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    pub fn setup_payload(&self, setup: &UpstreamSetup) -> SetupPayload {
        let system_instruction = if setup.instructions.trim().is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: vec![Part {
                    text: Some(setup.instructions.clone()),
                    inline_data: None,
                }],
            })
        };

        let tools = if setup.tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolSet {
                function_declarations: setup.tools.clone(),
            }]
        };

        SetupPayload {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: self.voice.as_ref().map(|voice| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.clone(),
                        },
                    },
                }),
            },
            system_instruction,
            tools,
            input_audio_transcription: Default::default(),
            output_audio_transcription: Default::default(),
        }
    }
}

//! ElevenLabs speech adapter (text-to-speech and Scribe transcription).

use crate::config::ElevenLabsConfig;
use crate::error::{EngineError, Result};
use crate::messages::AudioFormat;
use crate::provider::{
    decode_error, request_error, status_error, ProviderKind, SpeechProvider, SynthesizeOptions,
    Transcript, TranscribeOptions,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";

/// Voice used when the agent profile does not name an ElevenLabs voice id.
const FALLBACK_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

/// Adapter for the ElevenLabs REST API.
pub struct ElevenLabsProvider {
    config: ElevenLabsConfig,
    base_url: String,
    client: reqwest::Client,
}

/// Response of `POST /v1/speech-to-text` (Scribe).
#[derive(Debug, Deserialize)]
struct ScribeResponse {
    text: String,
    #[serde(default)]
    language_code: Option<String>,
    #[serde(default)]
    language_probability: Option<f32>,
}

impl ElevenLabsProvider {
    /// Create the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigurationInvalid`] if the API key is blank.
    pub fn new(config: &ElevenLabsConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EngineError::ConfigurationInvalid(
                "elevenlabs.api_key is empty".to_owned(),
            ));
        }
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        Ok(Self {
            config: config.clone(),
            base_url,
            client: reqwest::Client::new(),
        })
    }

    /// ElevenLabs voice ids are 20-char identifiers; generic voice names
    /// from other vendors fall back to a default voice.
    fn resolve_voice<'a>(&self, requested: &'a str) -> &'a str {
        if requested.len() >= 16 {
            requested
        } else {
            FALLBACK_VOICE_ID
        }
    }
}

#[async_trait]
impl SpeechProvider for ElevenLabsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ElevenLabs
    }

    fn supports_stt(&self) -> bool {
        true
    }

    fn supports_tts(&self) -> bool {
        true
    }

    async fn transcribe(&self, audio: &[u8], opts: &TranscribeOptions) -> Result<Transcript> {
        let model = opts
            .model
            .clone()
            .unwrap_or_else(|| self.config.stt_model.clone());
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| decode_error(self.kind(), &e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model_id", model);

        let response = self
            .client
            .post(format!("{}/v1/speech-to-text", self.base_url))
            .header("xi-api-key", &self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error(self.kind(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.kind(), status, &body));
        }

        let parsed: ScribeResponse = response
            .json()
            .await
            .map_err(|e| decode_error(self.kind(), &e.to_string()))?;

        debug!(chars = parsed.text.len(), "elevenlabs transcription complete");
        Ok(Transcript {
            text: parsed.text,
            confidence: parsed.language_probability,
            duration_ms: None,
            language: parsed.language_code,
        })
    }

    async fn synthesize(
        &self,
        text: &str,
        opts: &SynthesizeOptions,
    ) -> Result<crate::provider::SynthesizedSpeech> {
        let model = opts
            .model
            .clone()
            .or_else(|| opts.voice.model.clone())
            .unwrap_or_else(|| self.config.tts_model.clone());
        let voice_id = self.resolve_voice(&opts.voice.voice_id).to_owned();
        let speed = opts.speed.unwrap_or(opts.voice.speed);

        let body = serde_json::json!({
            "text": text,
            "model_id": model,
            "voice_settings": { "speed": speed },
        });

        let response = self
            .client
            .post(format!("{}/v1/text-to-speech/{voice_id}", self.base_url))
            .header("xi-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(self.kind(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.kind(), status, &body));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| request_error(self.kind(), &e))?;

        debug!(bytes = audio.len(), "elevenlabs synthesis complete");
        Ok(crate::provider::SynthesizedSpeech {
            audio,
            format: AudioFormat::Mp3,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn provider() -> ElevenLabsProvider {
        ElevenLabsProvider::new(&ElevenLabsConfig {
            api_key: "el-test".to_owned(),
            ..ElevenLabsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn blank_key_is_rejected() {
        assert!(ElevenLabsProvider::new(&ElevenLabsConfig::default()).is_err());
    }

    #[test]
    fn short_voice_names_fall_back() {
        let p = provider();
        assert_eq!(p.resolve_voice("alloy"), FALLBACK_VOICE_ID);
        assert_eq!(
            p.resolve_voice("21m00Tcm4TlvDq8ikWAM"),
            "21m00Tcm4TlvDq8ikWAM"
        );
    }

    #[test]
    fn scribe_response_parses() {
        let raw = r#"{
            "text": "good morning",
            "language_code": "en",
            "language_probability": 0.98
        }"#;
        let parsed: ScribeResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text, "good morning");
        assert!((parsed.language_probability.unwrap() - 0.98).abs() < 1e-6);
    }
}

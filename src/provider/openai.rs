//! OpenAI speech adapter (Whisper transcription, `tts-1` synthesis).

use crate::config::OpenAiConfig;
use crate::error::{EngineError, Result};
use crate::messages::AudioFormat;
use crate::provider::{
    decode_error, request_error, status_error, ProviderKind, SpeechProvider, SynthesizeOptions,
    Transcript, TranscribeOptions,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for the OpenAI audio endpoints.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    base_url: String,
    client: reqwest::Client,
}

/// Response of `POST /audio/transcriptions` with `verbose_json`.
#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

impl OpenAiProvider {
    /// Create the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigurationInvalid`] if the API key is blank.
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EngineError::ConfigurationInvalid(
                "openai.api_key is empty".to_owned(),
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
}

#[async_trait]
impl SpeechProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
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
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", model)
            .text("response_format", "verbose_json");
        if let Some(lang) = opts.language.clone().or_else(|| self.config.language.clone()) {
            form = form.text("language", lang);
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error(self.kind(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.kind(), status, &body));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| decode_error(self.kind(), &e.to_string()))?;

        debug!(chars = parsed.text.len(), "openai transcription complete");
        Ok(Transcript {
            text: parsed.text,
            confidence: None,
            duration_ms: parsed.duration.map(|d| (d * 1000.0) as u64),
            language: parsed.language,
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
        let speed = opts.speed.unwrap_or(opts.voice.speed);

        let body = serde_json::json!({
            "model": model,
            "input": text,
            "voice": opts.voice.voice_id,
            "speed": speed,
            "response_format": "mp3",
        });

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.config.api_key)
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

        debug!(bytes = audio.len(), "openai synthesis complete");
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
    use crate::config::OpenAiConfig;

    #[test]
    fn blank_key_is_rejected() {
        let result = OpenAiProvider::new(&OpenAiConfig::default());
        assert!(matches!(
            result,
            Err(EngineError::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn base_url_trailing_slash_stripped() {
        let provider = OpenAiProvider::new(&OpenAiConfig {
            api_key: "sk-test".to_owned(),
            base_url: Some("http://localhost:9999/v1/".to_owned()),
            ..OpenAiConfig::default()
        })
        .unwrap();
        assert_eq!(provider.base_url, "http://localhost:9999/v1");
    }

    #[test]
    fn capabilities() {
        let provider = OpenAiProvider::new(&OpenAiConfig {
            api_key: "sk-test".to_owned(),
            ..OpenAiConfig::default()
        })
        .unwrap();
        assert!(provider.supports_stt());
        assert!(provider.supports_tts());
        assert_eq!(provider.kind(), ProviderKind::OpenAi);
    }
}

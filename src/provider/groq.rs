//! Groq speech adapter (OpenAI-compatible wire format).
//!
//! Groq serves Whisper transcription and PlayAI synthesis behind the same
//! request shapes as OpenAI, at a different base URL and with named voices
//! instead of OpenAI's fixed voice set.

use crate::config::GroqConfig;
use crate::error::{EngineError, Result};
use crate::messages::AudioFormat;
use crate::provider::{
    decode_error, request_error, status_error, ProviderKind, SpeechProvider, SynthesizeOptions,
    Transcript, TranscribeOptions,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Adapter for Groq's audio endpoints.
pub struct GroqProvider {
    config: GroqConfig,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

impl GroqProvider {
    /// Create the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigurationInvalid`] if the API key is blank.
    pub fn new(config: &GroqConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EngineError::ConfigurationInvalid(
                "groq.api_key is empty".to_owned(),
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

    /// Resolve the synthesis voice: a request override wins, otherwise the
    /// configured PlayAI default (OpenAI-style voice ids do not exist here).
    fn resolve_voice(&self, requested: &str) -> String {
        if requested.is_empty() || requested == "alloy" {
            self.config.tts_voice.clone()
        } else {
            requested.to_owned()
        }
    }
}

#[async_trait]
impl SpeechProvider for GroqProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Groq
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
        if let Some(lang) = opts.language.clone() {
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

        debug!(chars = parsed.text.len(), "groq transcription complete");
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

        let body = serde_json::json!({
            "model": model,
            "input": text,
            "voice": self.resolve_voice(&opts.voice.voice_id),
            "response_format": "wav",
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

        debug!(bytes = audio.len(), "groq synthesis complete");
        Ok(crate::provider::SynthesizedSpeech {
            audio,
            format: AudioFormat::Wav,
        })
    }
}

//! Deepgram speech adapter (`listen` transcription, `speak` synthesis).
//!
//! Deepgram takes raw audio bytes rather than multipart uploads, and is the
//! only configured vendor that reports a per-utterance confidence score.

use crate::config::DeepgramConfig;
use crate::error::{EngineError, Result};
use crate::messages::AudioFormat;
use crate::provider::{
    decode_error, request_error, status_error, ProviderKind, SpeechProvider, SynthesizeOptions,
    Transcript, TranscribeOptions,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.deepgram.com";

/// Adapter for the Deepgram REST API.
pub struct DeepgramProvider {
    config: DeepgramConfig,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    #[serde(default)]
    metadata: Option<ListenMetadata>,
    results: ListenResults,
}

#[derive(Debug, Deserialize)]
struct ListenMetadata {
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    channels: Vec<ListenChannel>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    alternatives: Vec<ListenAlternative>,
    #[serde(default)]
    detected_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    transcript: String,
    #[serde(default)]
    confidence: Option<f32>,
}

impl DeepgramProvider {
    /// Create the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigurationInvalid`] if the API key is blank.
    pub fn new(config: &DeepgramConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EngineError::ConfigurationInvalid(
                "deepgram.api_key is empty".to_owned(),
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
impl SpeechProvider for DeepgramProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Deepgram
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
        let mut request = self
            .client
            .post(format!("{}/v1/listen", self.base_url))
            .query(&[("model", model.as_str()), ("smart_format", "true")])
            .header("Authorization", format!("Token {}", self.config.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec());
        if let Some(lang) = opts.language.clone().or_else(|| self.config.language.clone()) {
            request = request.query(&[("language", lang.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error(self.kind(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.kind(), status, &body));
        }

        let parsed: ListenResponse = response
            .json()
            .await
            .map_err(|e| decode_error(self.kind(), &e.to_string()))?;

        let channel = parsed
            .results
            .channels
            .into_iter()
            .next()
            .ok_or_else(|| decode_error(self.kind(), "no channels in response"))?;
        let language = channel.detected_language.clone();
        let alternative = channel
            .alternatives
            .into_iter()
            .next()
            .ok_or_else(|| decode_error(self.kind(), "no alternatives in response"))?;

        debug!(
            chars = alternative.transcript.len(),
            confidence = ?alternative.confidence,
            "deepgram transcription complete"
        );
        Ok(Transcript {
            text: alternative.transcript,
            confidence: alternative.confidence,
            duration_ms: parsed
                .metadata
                .and_then(|m| m.duration)
                .map(|d| (d * 1000.0) as u64),
            language,
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

        let response = self
            .client
            .post(format!("{}/v1/speak", self.base_url))
            .query(&[("model", model.as_str())])
            .header("Authorization", format!("Token {}", self.config.api_key))
            .json(&serde_json::json!({ "text": text }))
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

        debug!(bytes = audio.len(), "deepgram synthesis complete");
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

    #[test]
    fn blank_key_is_rejected() {
        assert!(DeepgramProvider::new(&DeepgramConfig::default()).is_err());
    }

    #[test]
    fn listen_response_parses_confidence() {
        let raw = r#"{
            "metadata": { "duration": 2.5 },
            "results": {
                "channels": [{
                    "alternatives": [{ "transcript": "hello there", "confidence": 0.93 }]
                }]
            }
        }"#;
        let parsed: ListenResponse = serde_json::from_str(raw).unwrap();
        let alt = &parsed.results.channels[0].alternatives[0];
        assert_eq!(alt.transcript, "hello there");
        assert!((alt.confidence.unwrap() - 0.93).abs() < 1e-6);
        assert!((parsed.metadata.unwrap().duration.unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn capabilities() {
        let provider = DeepgramProvider::new(&DeepgramConfig {
            api_key: "dg-test".to_owned(),
            ..DeepgramConfig::default()
        })
        .unwrap();
        assert!(provider.supports_stt());
        assert!(provider.supports_tts());
    }
}

//! Azure Cognitive Services speech adapter.
//!
//! STT and TTS live on different regional hosts. Synthesis takes SSML
//! rather than JSON, with the output format selected by header.

use crate::config::AzureConfig;
use crate::error::{EngineError, Result};
use crate::messages::AudioFormat;
use crate::provider::{
    decode_error, request_error, status_error, ProviderKind, SpeechProvider, SynthesizeOptions,
    Transcript, TranscribeOptions,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Response of the conversation recognition endpoint with `format=detailed`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecognitionResponse {
    recognition_status: String,
    #[serde(default)]
    n_best: Vec<RecognitionAlternative>,
    /// Duration in 100 ns ticks.
    #[serde(default)]
    duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecognitionAlternative {
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    display: String,
}

/// Adapter for the Azure Speech REST endpoints.
pub struct AzureProvider {
    config: AzureConfig,
    stt_host: String,
    tts_host: String,
    client: reqwest::Client,
}

impl AzureProvider {
    /// Create the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigurationInvalid`] if the API key is blank
    /// or neither region nor base URL is set.
    pub fn new(config: &AzureConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EngineError::ConfigurationInvalid(
                "azure.api_key is empty".to_owned(),
            ));
        }
        let (stt_host, tts_host) = match config.base_url {
            Some(ref base) => {
                let base = base.trim_end_matches('/').to_owned();
                (base.clone(), base)
            }
            None => {
                if config.region.trim().is_empty() {
                    return Err(EngineError::ConfigurationInvalid(
                        "azure.region is empty and no base_url set".to_owned(),
                    ));
                }
                (
                    format!("https://{}.stt.speech.microsoft.com", config.region),
                    format!("https://{}.tts.speech.microsoft.com", config.region),
                )
            }
        };
        Ok(Self {
            config: config.clone(),
            stt_host,
            tts_host,
            client: reqwest::Client::new(),
        })
    }

    fn resolve_voice(&self, requested: &str) -> String {
        // Azure voices look like `en-US-JennyNeural`; anything else uses
        // the configured default.
        if requested.matches('-').count() >= 2 {
            requested.to_owned()
        } else {
            self.config.voice.clone()
        }
    }
}

/// Escape text for inclusion in SSML character data.
fn escape_ssml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl SpeechProvider for AzureProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    fn supports_stt(&self) -> bool {
        true
    }

    fn supports_tts(&self) -> bool {
        true
    }

    async fn transcribe(&self, audio: &[u8], opts: &TranscribeOptions) -> Result<Transcript> {
        let language = opts
            .language
            .clone()
            .unwrap_or_else(|| self.config.language.clone());

        let response = self
            .client
            .post(format!(
                "{}/speech/recognition/conversation/cognitiveservices/v1",
                self.stt_host
            ))
            .query(&[("language", language.as_str()), ("format", "detailed")])
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| request_error(self.kind(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.kind(), status, &body));
        }

        let parsed: RecognitionResponse = response
            .json()
            .await
            .map_err(|e| decode_error(self.kind(), &e.to_string()))?;

        // "NoMatch" means the service heard only silence or noise.
        let (text, confidence) = if parsed.recognition_status == "Success" {
            match parsed.n_best.into_iter().next() {
                Some(alt) => (alt.display, alt.confidence),
                None => (String::new(), None),
            }
        } else {
            (String::new(), None)
        };

        debug!(chars = text.len(), "azure transcription complete");
        Ok(Transcript {
            text,
            confidence,
            duration_ms: parsed.duration.map(|ticks| ticks / 10_000),
            language: Some(language),
        })
    }

    async fn synthesize(
        &self,
        text: &str,
        opts: &SynthesizeOptions,
    ) -> Result<crate::provider::SynthesizedSpeech> {
        let voice = self.resolve_voice(&opts.voice.voice_id);
        let speed = opts.speed.unwrap_or(opts.voice.speed);
        // Azure expresses rate as a signed percentage offset.
        let rate_pct = ((speed - 1.0) * 100.0).round() as i32;

        let ssml = format!(
            "<speak version='1.0' xml:lang='{lang}'>\
             <voice name='{voice}'><prosody rate='{rate_pct:+}%'>{text}</prosody></voice>\
             </speak>",
            lang = self.config.language,
            text = escape_ssml(text),
        );

        let response = self
            .client
            .post(format!("{}/cognitiveservices/v1", self.tts_host))
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .header("Content-Type", "application/ssml+xml")
            .header(
                "X-Microsoft-OutputFormat",
                "audio-16khz-32kbitrate-mono-mp3",
            )
            .body(ssml)
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

        debug!(bytes = audio.len(), "azure synthesis complete");
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
        assert!(AzureProvider::new(&AzureConfig::default()).is_err());
    }

    #[test]
    fn blank_region_without_base_url_is_rejected() {
        let result = AzureProvider::new(&AzureConfig {
            api_key: "az-test".to_owned(),
            region: "  ".to_owned(),
            ..AzureConfig::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn region_builds_both_hosts() {
        let p = AzureProvider::new(&AzureConfig {
            api_key: "az-test".to_owned(),
            region: "westeurope".to_owned(),
            ..AzureConfig::default()
        })
        .unwrap();
        assert_eq!(p.stt_host, "https://westeurope.stt.speech.microsoft.com");
        assert_eq!(p.tts_host, "https://westeurope.tts.speech.microsoft.com");
    }

    #[test]
    fn nomatch_parses_as_empty_text() {
        let raw = r#"{ "RecognitionStatus": "NoMatch", "NBest": [] }"#;
        let parsed: RecognitionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.recognition_status, "NoMatch");
        assert!(parsed.n_best.is_empty());
    }

    #[test]
    fn detailed_response_parses() {
        let raw = r#"{
            "RecognitionStatus": "Success",
            "Duration": 21500000,
            "NBest": [{ "Confidence": 0.91, "Display": "Hello, world." }]
        }"#;
        let parsed: RecognitionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.n_best[0].display, "Hello, world.");
        // 21 500 000 ticks = 2150 ms.
        assert_eq!(parsed.duration.unwrap() / 10_000, 2150);
    }

    #[test]
    fn ssml_escapes_markup() {
        assert_eq!(escape_ssml("a < b & c > d"), "a &lt; b &amp; c &gt; d");
    }

    #[test]
    fn non_azure_voice_falls_back() {
        let p = AzureProvider::new(&AzureConfig {
            api_key: "az-test".to_owned(),
            ..AzureConfig::default()
        })
        .unwrap();
        assert_eq!(p.resolve_voice("alloy"), "en-US-JennyNeural");
        assert_eq!(p.resolve_voice("en-GB-SoniaNeural"), "en-GB-SoniaNeural");
    }
}

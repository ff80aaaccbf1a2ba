//! Google Cloud speech adapter (Speech-to-Text and Text-to-Speech).
//!
//! Both APIs carry audio as base64 inside JSON rather than raw bytes or
//! multipart, and authenticate with an API key query parameter.

use crate::config::GoogleConfig;
use crate::error::{EngineError, Result};
use crate::messages::AudioFormat;
use crate::provider::{
    decode_error, request_error, status_error, ProviderKind, SpeechProvider, SynthesizeOptions,
    Transcript, TranscribeOptions,
};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_STT_HOST: &str = "https://speech.googleapis.com";
const DEFAULT_TTS_HOST: &str = "https://texttospeech.googleapis.com";

/// Sample rate declared for inbound LINEAR16 audio.
const STT_SAMPLE_RATE_HZ: u32 = 16_000;

/// Adapter for the Google Cloud speech APIs.
pub struct GoogleProvider {
    config: GoogleConfig,
    stt_host: String,
    tts_host: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognizeResult>,
}

#[derive(Debug, Deserialize)]
struct RecognizeResult {
    alternatives: Vec<RecognizeAlternative>,
}

#[derive(Debug, Deserialize)]
struct RecognizeAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

impl GoogleProvider {
    /// Create the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigurationInvalid`] if the API key is blank.
    pub fn new(config: &GoogleConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EngineError::ConfigurationInvalid(
                "google.api_key is empty".to_owned(),
            ));
        }
        let (stt_host, tts_host) = match config.base_url {
            Some(ref base) => {
                let base = base.trim_end_matches('/').to_owned();
                (base.clone(), base)
            }
            None => (DEFAULT_STT_HOST.to_owned(), DEFAULT_TTS_HOST.to_owned()),
        };
        Ok(Self {
            config: config.clone(),
            stt_host,
            tts_host,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl SpeechProvider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
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
        let content = base64::engine::general_purpose::STANDARD.encode(audio);

        let body = serde_json::json!({
            "config": {
                "encoding": "LINEAR16",
                "sampleRateHertz": STT_SAMPLE_RATE_HZ,
                "languageCode": language,
            },
            "audio": { "content": content },
        });

        let response = self
            .client
            .post(format!("{}/v1/speech:recognize", self.stt_host))
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(self.kind(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.kind(), status, &body));
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| decode_error(self.kind(), &e.to_string()))?;

        // Silence yields an empty results array, not an error.
        let alternative = parsed
            .results
            .into_iter()
            .next()
            .and_then(|r| r.alternatives.into_iter().next());

        let (text, confidence) = match alternative {
            Some(alt) => (alt.transcript, alt.confidence),
            None => (String::new(), None),
        };

        debug!(chars = text.len(), "google transcription complete");
        Ok(Transcript {
            text,
            confidence,
            duration_ms: None,
            language: Some(language),
        })
    }

    async fn synthesize(
        &self,
        text: &str,
        opts: &SynthesizeOptions,
    ) -> Result<crate::provider::SynthesizedSpeech> {
        let voice = if opts.voice.voice_id.starts_with("en-")
            || opts.voice.voice_id.contains('-')
        {
            opts.voice.voice_id.clone()
        } else {
            self.config.voice.clone()
        };
        let speed = opts.speed.unwrap_or(opts.voice.speed);

        let body = serde_json::json!({
            "input": { "text": text },
            "voice": {
                "languageCode": self.config.language,
                "name": voice,
            },
            "audioConfig": {
                "audioEncoding": "MP3",
                "speakingRate": speed,
            },
        });

        let response = self
            .client
            .post(format!("{}/v1/text:synthesize", self.tts_host))
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(self.kind(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(self.kind(), status, &body));
        }

        let parsed: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| decode_error(self.kind(), &e.to_string()))?;

        let audio = base64::engine::general_purpose::STANDARD
            .decode(parsed.audio_content.as_bytes())
            .map_err(|e| decode_error(self.kind(), &format!("bad base64 audio: {e}")))?;

        debug!(bytes = audio.len(), "google synthesis complete");
        Ok(crate::provider::SynthesizedSpeech {
            audio: audio.into(),
            format: AudioFormat::Mp3,
        })
    }
}

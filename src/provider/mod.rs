//! Uniform transcription/synthesis gateway over third-party speech vendors.
//!
//! Each vendor has its own adapter implementing [`SpeechProvider`]; the
//! [`ProviderGateway`] selects one by explicit request override or the
//! deployment default and dispatches to it. Fallback across providers is
//! caller-driven through [`fallback::ProviderChain`] — the gateway fails a
//! single attempt with [`EngineError::ProviderUnavailable`] and leaves the
//! retry decision to the caller.

pub mod azure;
pub mod deepgram;
pub mod elevenlabs;
pub mod fallback;
pub mod google;
pub mod groq;
pub mod openai;
pub mod rate_limit;

use crate::config::{ProvidersConfig, VoiceConfig};
use crate::error::{EngineError, Result};
use crate::messages::AudioFormat;
use self::rate_limit::ProviderRateLimiters;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// The closed set of supported speech vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI (Whisper STT, `tts-1` TTS).
    OpenAi,
    /// Google Cloud Speech / Text-to-Speech.
    Google,
    /// Azure Cognitive Services Speech.
    Azure,
    /// Deepgram.
    Deepgram,
    /// ElevenLabs.
    ElevenLabs,
    /// Groq (OpenAI-compatible).
    Groq,
}

impl ProviderKind {
    /// All known providers, in documentation order.
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::OpenAi,
        ProviderKind::Google,
        ProviderKind::Azure,
        ProviderKind::Deepgram,
        ProviderKind::ElevenLabs,
        ProviderKind::Groq,
    ];

    /// Stable lowercase name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Google => "google",
            ProviderKind::Azure => "azure",
            ProviderKind::Deepgram => "deepgram",
            ProviderKind::ElevenLabs => "elevenlabs",
            ProviderKind::Groq => "groq",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::OpenAi
    }
}

/// Per-request transcription options.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// Provider override. None = deployment default.
    pub provider: Option<ProviderKind>,
    /// Language hint (BCP-47). None = provider default.
    pub language: Option<String>,
    /// Model override. None = provider default.
    pub model: Option<String>,
}

/// A completed transcription.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Transcribed text (may be empty for pure silence).
    pub text: String,
    /// Provider confidence in [0, 1], when reported.
    pub confidence: Option<f32>,
    /// Audio duration in ms, when reported.
    pub duration_ms: Option<u64>,
    /// Detected language, when reported.
    pub language: Option<String>,
}

/// Per-request synthesis options.
#[derive(Debug, Clone, Default)]
pub struct SynthesizeOptions {
    /// Provider override. None = deployment default.
    pub provider: Option<ProviderKind>,
    /// Voice selection.
    pub voice: VoiceConfig,
    /// Model override. None = provider default.
    pub model: Option<String>,
    /// Speaking-rate override. None = voice config value.
    pub speed: Option<f32>,
}

/// Synthesized speech audio.
#[derive(Debug, Clone)]
pub struct SynthesizedSpeech {
    /// Encoded audio payload.
    pub audio: Bytes,
    /// Container format of `audio`.
    pub format: AudioFormat,
}

/// Capability contract implemented by every vendor adapter.
///
/// Adapters own their request/response mapping and normalize failures into
/// [`EngineError::ProviderUnavailable`]. They hold no mutable state; one
/// instance serves all sessions concurrently.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Which vendor this adapter talks to.
    fn kind(&self) -> ProviderKind;

    /// Whether the adapter can transcribe.
    fn supports_stt(&self) -> bool;

    /// Whether the adapter can synthesize.
    fn supports_tts(&self) -> bool;

    /// Transcribe an audio buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ProviderUnavailable`] for network, auth, or
    /// quota failures.
    async fn transcribe(&self, audio: &[u8], opts: &TranscribeOptions) -> Result<Transcript>;

    /// Synthesize text to audio.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ProviderUnavailable`] for network, auth, or
    /// quota failures.
    async fn synthesize(&self, text: &str, opts: &SynthesizeOptions) -> Result<SynthesizedSpeech>;
}

/// Map a non-2xx HTTP response to a normalized provider error.
///
/// 408/429/5xx are transient (worth retrying on the same provider);
/// everything else, auth failures included, is permanent.
pub(crate) fn status_error(
    provider: ProviderKind,
    status: reqwest::StatusCode,
    body: &str,
) -> EngineError {
    let transient = status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error();
    let snippet: String = body.chars().take(200).collect();
    EngineError::ProviderUnavailable {
        provider: provider.as_str().to_owned(),
        message: format!("HTTP {status}: {snippet}"),
        transient,
    }
}

/// Map a reqwest transport error (connect, timeout, TLS) to a normalized
/// provider error. Transport failures are always transient.
pub(crate) fn request_error(provider: ProviderKind, err: &reqwest::Error) -> EngineError {
    EngineError::ProviderUnavailable {
        provider: provider.as_str().to_owned(),
        message: format!("request failed: {err}"),
        transient: true,
    }
}

/// Map a malformed provider response to a permanent provider error.
pub(crate) fn decode_error(provider: ProviderKind, detail: &str) -> EngineError {
    EngineError::ProviderUnavailable {
        provider: provider.as_str().to_owned(),
        message: format!("unexpected response: {detail}"),
        transient: false,
    }
}

fn not_configured(provider: ProviderKind, capability: &str) -> EngineError {
    EngineError::ProviderUnavailable {
        provider: provider.as_str().to_owned(),
        message: format!("not configured for {capability}"),
        transient: false,
    }
}

/// Uniform `transcribe`/`synthesize` entry point over the configured
/// vendor adapters.
pub struct ProviderGateway {
    providers: HashMap<ProviderKind, Arc<dyn SpeechProvider>>,
    default_stt: ProviderKind,
    default_tts: ProviderKind,
    stt_priority: Vec<ProviderKind>,
    tts_priority: Vec<ProviderKind>,
    limits: Mutex<ProviderRateLimiters>,
}

impl ProviderGateway {
    /// Build the gateway from deployment configuration.
    ///
    /// Vendors with missing or blank credentials are omitted from the
    /// available set with a warning; that is not fatal. Construction only
    /// fails if configuration is structurally invalid (e.g. Azure with
    /// neither region nor base URL).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigurationInvalid`] for structurally
    /// invalid provider tables.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let mut providers: HashMap<ProviderKind, Arc<dyn SpeechProvider>> = HashMap::new();
        let mut limits = ProviderRateLimiters::new();

        // Explicit dispatch per vendor: a provider enters the set only
        // through its own constructor.
        if let Some(ref cfg) = config.openai {
            match openai::OpenAiProvider::new(cfg) {
                Ok(p) => {
                    limits.register(ProviderKind::OpenAi, cfg.max_requests_per_minute);
                    providers.insert(ProviderKind::OpenAi, Arc::new(p));
                }
                Err(e) => warn!(provider = "openai", error = %e, "provider omitted"),
            }
        }
        if let Some(ref cfg) = config.google {
            match google::GoogleProvider::new(cfg) {
                Ok(p) => {
                    limits.register(ProviderKind::Google, cfg.max_requests_per_minute);
                    providers.insert(ProviderKind::Google, Arc::new(p));
                }
                Err(e) => warn!(provider = "google", error = %e, "provider omitted"),
            }
        }
        if let Some(ref cfg) = config.azure {
            match azure::AzureProvider::new(cfg) {
                Ok(p) => {
                    limits.register(ProviderKind::Azure, cfg.max_requests_per_minute);
                    providers.insert(ProviderKind::Azure, Arc::new(p));
                }
                Err(e) => warn!(provider = "azure", error = %e, "provider omitted"),
            }
        }
        if let Some(ref cfg) = config.deepgram {
            match deepgram::DeepgramProvider::new(cfg) {
                Ok(p) => {
                    limits.register(ProviderKind::Deepgram, cfg.max_requests_per_minute);
                    providers.insert(ProviderKind::Deepgram, Arc::new(p));
                }
                Err(e) => warn!(provider = "deepgram", error = %e, "provider omitted"),
            }
        }
        if let Some(ref cfg) = config.elevenlabs {
            match elevenlabs::ElevenLabsProvider::new(cfg) {
                Ok(p) => {
                    limits.register(ProviderKind::ElevenLabs, cfg.max_requests_per_minute);
                    providers.insert(ProviderKind::ElevenLabs, Arc::new(p));
                }
                Err(e) => warn!(provider = "elevenlabs", error = %e, "provider omitted"),
            }
        }
        if let Some(ref cfg) = config.groq {
            match groq::GroqProvider::new(cfg) {
                Ok(p) => {
                    limits.register(ProviderKind::Groq, cfg.max_requests_per_minute);
                    providers.insert(ProviderKind::Groq, Arc::new(p));
                }
                Err(e) => warn!(provider = "groq", error = %e, "provider omitted"),
            }
        }

        info!(
            configured = providers.len(),
            default_stt = %config.default_stt,
            default_tts = %config.default_tts,
            "provider gateway ready"
        );

        Ok(Self {
            providers,
            default_stt: config.default_stt,
            default_tts: config.default_tts,
            stt_priority: config.stt_priority.clone(),
            tts_priority: config.tts_priority.clone(),
            limits: Mutex::new(limits),
        })
    }

    /// Providers that were successfully configured.
    pub fn available(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = ProviderKind::ALL
            .into_iter()
            .filter(|k| self.providers.contains_key(k))
            .collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Whether the given provider is configured.
    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// Transcription fallback order: the configured priority list, else the
    /// default provider followed by every other configured STT-capable one.
    pub fn stt_chain(&self, override_provider: Option<ProviderKind>) -> Vec<ProviderKind> {
        self.chain_for(
            override_provider,
            self.default_stt,
            &self.stt_priority,
            |p| p.supports_stt(),
        )
    }

    /// Synthesis fallback order, analogous to [`Self::stt_chain`].
    pub fn tts_chain(&self, override_provider: Option<ProviderKind>) -> Vec<ProviderKind> {
        self.chain_for(
            override_provider,
            self.default_tts,
            &self.tts_priority,
            |p| p.supports_tts(),
        )
    }

    fn chain_for(
        &self,
        override_provider: Option<ProviderKind>,
        default: ProviderKind,
        priority: &[ProviderKind],
        capable: impl Fn(&dyn SpeechProvider) -> bool,
    ) -> Vec<ProviderKind> {
        let mut chain: Vec<ProviderKind> = Vec::new();
        let push = |kind: ProviderKind, chain: &mut Vec<ProviderKind>| {
            if chain.contains(&kind) {
                return;
            }
            if let Some(p) = self.providers.get(&kind) {
                if capable(p.as_ref()) {
                    chain.push(kind);
                }
            }
        };

        if let Some(kind) = override_provider {
            push(kind, &mut chain);
        }
        if priority.is_empty() {
            push(default, &mut chain);
            for kind in ProviderKind::ALL {
                push(kind, &mut chain);
            }
        } else {
            for &kind in priority {
                push(kind, &mut chain);
            }
        }
        chain
    }

    /// Transcribe one audio buffer with the selected provider.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ProviderUnavailable`] when the provider is
    /// not configured, rate-limited, or the request fails.
    pub async fn transcribe(&self, audio: &[u8], opts: &TranscribeOptions) -> Result<Transcript> {
        let kind = opts.provider.unwrap_or(self.default_stt);
        let provider = self
            .providers
            .get(&kind)
            .filter(|p| p.supports_stt())
            .cloned()
            .ok_or_else(|| not_configured(kind, "transcription"))?;

        self.acquire_slot(kind)?;
        provider.transcribe(audio, opts).await
    }

    /// Synthesize text with the selected provider.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ProviderUnavailable`] when the provider is
    /// not configured, rate-limited, or the request fails.
    pub async fn synthesize(
        &self,
        text: &str,
        opts: &SynthesizeOptions,
    ) -> Result<SynthesizedSpeech> {
        let kind = opts.provider.unwrap_or(self.default_tts);
        let provider = self
            .providers
            .get(&kind)
            .filter(|p| p.supports_tts())
            .cloned()
            .ok_or_else(|| not_configured(kind, "synthesis"))?;

        self.acquire_slot(kind)?;
        provider.synthesize(text, opts).await
    }

    /// Admit one request against the provider's rate budget. The lock is
    /// released before any network I/O starts.
    fn acquire_slot(&self, kind: ProviderKind) -> Result<()> {
        let mut limits = self
            .limits
            .lock()
            .map_err(|_| EngineError::Channel("rate limiter lock poisoned".to_owned()))?;
        limits.try_acquire(kind).map_err(|e| EngineError::ProviderUnavailable {
            provider: kind.as_str().to_owned(),
            message: e.to_string(),
            transient: true,
        })
    }
}

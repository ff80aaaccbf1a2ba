//! Configuration types for the conversation engine.

use crate::error::{EngineError, Result};
use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Speech provider credentials and selection.
    pub providers: ProvidersConfig,
    /// Audio ingestion and voice-activity detection settings.
    pub ingest: IngestConfig,
    /// Barge-in (interruption) behavior while the agent is speaking.
    pub interruption: InterruptionConfig,
    /// Response synthesis and delivery settings.
    pub synthesis: SynthesisConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// LLM response cache settings.
    pub cache: CacheConfig,
    /// Call/session lifecycle settings.
    pub session: SessionConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| EngineError::ConfigurationInvalid(format!("parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| EngineError::ConfigurationInvalid(format!("encode error: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Validate value ranges.
    ///
    /// Missing provider credentials are not an error here: unconfigured
    /// providers are simply omitted from the gateway's available set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigurationInvalid`] for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.ingest.vad_threshold) {
            return Err(EngineError::ConfigurationInvalid(format!(
                "ingest.vad_threshold must be in [0, 1], got {}",
                self.ingest.vad_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.interruption.interruption_threshold) {
            return Err(EngineError::ConfigurationInvalid(format!(
                "interruption.interruption_threshold must be in [0, 1], got {}",
                self.interruption.interruption_threshold
            )));
        }
        if self.ingest.silence_timeout_ms == 0 {
            return Err(EngineError::ConfigurationInvalid(
                "ingest.silence_timeout_ms must be positive".to_owned(),
            ));
        }
        if self.ingest.partial_bytes == 0 {
            return Err(EngineError::ConfigurationInvalid(
                "ingest.partial_bytes must be positive".to_owned(),
            ));
        }
        if self.session.max_call_duration_ms == 0 {
            return Err(EngineError::ConfigurationInvalid(
                "session.max_call_duration_ms must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Provider selection and per-vendor credentials.
///
/// Only vendors with a credentials table are constructed at startup; the
/// rest are omitted from the available set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Default provider for transcription when a request has no override.
    pub default_stt: ProviderKind,
    /// Default provider for synthesis when a request has no override.
    pub default_tts: ProviderKind,
    /// Fallback order for transcription. Empty = default provider first,
    /// then every other configured STT-capable provider.
    pub stt_priority: Vec<ProviderKind>,
    /// Fallback order for synthesis. Empty = default provider first,
    /// then every other configured TTS-capable provider.
    pub tts_priority: Vec<ProviderKind>,
    /// OpenAI credentials (Whisper STT, `tts-1` TTS).
    pub openai: Option<OpenAiConfig>,
    /// Google Cloud Speech / Text-to-Speech credentials.
    pub google: Option<GoogleConfig>,
    /// Azure Cognitive Services Speech credentials.
    pub azure: Option<AzureConfig>,
    /// Deepgram credentials (`listen` STT, `speak` TTS).
    pub deepgram: Option<DeepgramConfig>,
    /// ElevenLabs credentials (TTS and Scribe STT).
    pub elevenlabs: Option<ElevenLabsConfig>,
    /// Groq credentials (OpenAI-compatible endpoint).
    pub groq: Option<GroqConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_stt: ProviderKind::OpenAi,
            default_tts: ProviderKind::OpenAi,
            stt_priority: Vec::new(),
            tts_priority: Vec::new(),
            openai: None,
            google: None,
            azure: None,
            deepgram: None,
            elevenlabs: None,
            groq: None,
        }
    }
}

/// OpenAI provider credentials and model defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API key (`sk-...`).
    pub api_key: String,
    /// Base URL override including `/v1`. None = `https://api.openai.com/v1`.
    pub base_url: Option<String>,
    /// Transcription model.
    pub stt_model: String,
    /// Synthesis model.
    pub tts_model: String,
    /// Default language hint (BCP-47) for transcription.
    pub language: Option<String>,
    /// Maximum requests per minute. 0 = unlimited.
    pub max_requests_per_minute: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            stt_model: "whisper-1".to_owned(),
            tts_model: "tts-1".to_owned(),
            language: None,
            max_requests_per_minute: 60,
        }
    }
}

/// Google Cloud provider credentials and model defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    /// API key passed as the `key` query parameter.
    pub api_key: String,
    /// Host override for both Speech and Text-to-Speech APIs (tests).
    pub base_url: Option<String>,
    /// Recognition language code (e.g. `en-US`).
    pub language: String,
    /// Synthesis voice name (e.g. `en-US-Neural2-C`).
    pub voice: String,
    /// Maximum requests per minute. 0 = unlimited.
    pub max_requests_per_minute: u32,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            language: "en-US".to_owned(),
            voice: "en-US-Neural2-C".to_owned(),
            max_requests_per_minute: 60,
        }
    }
}

/// Azure Cognitive Services Speech credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// Subscription key.
    pub api_key: String,
    /// Service region (e.g. `eastus`). Ignored when `base_url` is set.
    pub region: String,
    /// Host override for both STT and TTS endpoints (tests).
    pub base_url: Option<String>,
    /// Recognition language (e.g. `en-US`).
    pub language: String,
    /// Synthesis voice name (e.g. `en-US-JennyNeural`).
    pub voice: String,
    /// Maximum requests per minute. 0 = unlimited.
    pub max_requests_per_minute: u32,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            region: "eastus".to_owned(),
            base_url: None,
            language: "en-US".to_owned(),
            voice: "en-US-JennyNeural".to_owned(),
            max_requests_per_minute: 60,
        }
    }
}

/// Deepgram provider credentials and model defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepgramConfig {
    /// API key sent as `Authorization: Token ...`.
    pub api_key: String,
    /// Base URL override. None = `https://api.deepgram.com`.
    pub base_url: Option<String>,
    /// Recognition model.
    pub stt_model: String,
    /// Synthesis model (Aura voice).
    pub tts_model: String,
    /// Recognition language code.
    pub language: Option<String>,
    /// Maximum requests per minute. 0 = unlimited.
    pub max_requests_per_minute: u32,
}

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            stt_model: "nova-2".to_owned(),
            tts_model: "aura-asteria-en".to_owned(),
            language: None,
            max_requests_per_minute: 60,
        }
    }
}

/// ElevenLabs provider credentials and model defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevenLabsConfig {
    /// API key sent as the `xi-api-key` header.
    pub api_key: String,
    /// Base URL override. None = `https://api.elevenlabs.io`.
    pub base_url: Option<String>,
    /// Synthesis model.
    pub tts_model: String,
    /// Transcription (Scribe) model.
    pub stt_model: String,
    /// Maximum requests per minute. 0 = unlimited.
    pub max_requests_per_minute: u32,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            tts_model: "eleven_turbo_v2_5".to_owned(),
            stt_model: "scribe_v1".to_owned(),
            max_requests_per_minute: 60,
        }
    }
}

/// Groq provider credentials (OpenAI-compatible wire format).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroqConfig {
    /// API key.
    pub api_key: String,
    /// Base URL override including `/openai/v1`. None = `https://api.groq.com/openai/v1`.
    pub base_url: Option<String>,
    /// Transcription model.
    pub stt_model: String,
    /// Synthesis model.
    pub tts_model: String,
    /// Default synthesis voice.
    pub tts_voice: String,
    /// Maximum requests per minute. 0 = unlimited.
    pub max_requests_per_minute: u32,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            stt_model: "whisper-large-v3".to_owned(),
            tts_model: "playai-tts".to_owned(),
            tts_voice: "Fritz-PlayAI".to_owned(),
            max_requests_per_minute: 60,
        }
    }
}

/// Audio ingestion and voice-activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Whether energy-based VAD segmentation is enabled.
    ///
    /// When disabled, frames accumulate until an explicit finalize or the
    /// idle silence timer fires.
    pub vad_enabled: bool,
    /// Normalized RMS threshold for classifying a frame as speech.
    ///
    /// Scale is 0–1, derived from 16-bit PCM amplitude. Frames at or above
    /// the threshold count as speech; a malformed frame is classified as
    /// speech rather than dropped.
    pub vad_threshold: f32,
    /// Sustained silence in ms that ends an utterance.
    pub silence_timeout_ms: u64,
    /// Buffered audio size in bytes that triggers a non-final partial
    /// transcription while speech continues.
    pub partial_bytes: usize,
    /// Trailing audio retained after a partial transcription, in ms.
    ///
    /// Heuristic context window; may duplicate a little audio at the
    /// boundary. Tunable, not a correctness contract.
    pub trailing_context_ms: u64,
    /// Inbound PCM sample rate in Hz (16-bit mono assumed).
    pub sample_rate: u32,
    /// Hard cap on buffered audio bytes. Reaching it finalizes the
    /// utterance early instead of growing without bound.
    pub max_buffer_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            vad_enabled: true,
            vad_threshold: 0.5,
            silence_timeout_ms: 1500,
            partial_bytes: 32_000,
            trailing_context_ms: 500,
            sample_rate: 16_000,
            max_buffer_bytes: 640_000,
        }
    }
}

impl IngestConfig {
    /// Bytes of 16-bit mono PCM per millisecond at the configured rate.
    pub fn bytes_per_ms(&self) -> usize {
        (self.sample_rate as usize * 2) / 1000
    }
}

/// Barge-in (interruption) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptionConfig {
    /// Whether the user may interrupt the agent mid-response.
    pub enable_barge_in: bool,
    /// Minimum transcription confidence required to treat user speech as an
    /// interruption while the agent is speaking.
    pub interruption_threshold: f32,
    /// Suppression window after an interruption, in ms.
    pub cooldown_ms: u64,
}

impl Default for InterruptionConfig {
    fn default() -> Self {
        Self {
            enable_barge_in: true,
            interruption_threshold: 0.7,
            cooldown_ms: 1000,
        }
    }
}

/// Response synthesis and delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Synthesize sentence-by-sentence so playback can start before the
    /// whole response is rendered. When false, the full text is synthesized
    /// in one request before delivery begins.
    pub streaming: bool,
    /// Size of each audio chunk delivered to the transport, in bytes.
    ///
    /// The job's cancellation token is checked between chunks, so this
    /// bounds interruption latency.
    pub chunk_bytes: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            streaming: true,
            chunk_bytes: 3200,
        }
    }
}

/// Language model configuration (OpenAI-compatible chat completions API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL for the API server, including `/v1`.
    pub api_url: String,
    /// Model name to request.
    pub api_model: String,
    /// API key. Empty for local servers.
    pub api_key: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Top-p (nucleus) sampling threshold.
    pub top_p: f64,
    /// Maximum tokens to generate per response.
    pub max_tokens: usize,
    /// Maximum user/assistant turns to retain (system turns always kept).
    ///
    /// Set to 0 to disable trimming.
    pub max_history_turns: usize,
    /// Request timeout in ms.
    pub request_timeout_ms: u64,
    /// Stream responses token-by-token. Streamed requests bypass the
    /// response cache.
    pub streaming: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_owned(),
            api_model: "gpt-4o-mini".to_owned(),
            api_key: String::new(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 512,
            max_history_turns: 20,
            request_timeout_ms: 30_000,
            streaming: true,
        }
    }
}

/// LLM response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether non-streaming responses are cached.
    pub enabled: bool,
    /// Entry time-to-live in ms.
    pub ttl_ms: u64,
    /// Maximum entries; the oldest entry is evicted when full.
    pub max_entries: usize,
    /// Interval between expiry sweeps in ms.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 3_600_000,
            max_entries: 256,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Call/session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum call duration in ms. Reaching it ends the session.
    pub max_call_duration_ms: u64,
    /// Whether call transfer out of `Active` is allowed.
    pub transfer_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_call_duration_ms: 1_800_000,
            transfer_enabled: true,
        }
    }
}

/// Synthesis voice selection, bound per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Provider-specific voice identifier.
    pub voice_id: String,
    /// Speaking rate multiplier (1.0 = normal).
    pub speed: f32,
    /// Synthesis model override. None = provider default.
    pub model: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: "alloy".to_owned(),
            speed: 1.0,
            model: None,
        }
    }
}

/// Per-agent configuration bound to a session at start.
///
/// Fields set here override the deployment defaults in [`EngineConfig`]
/// for that session only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    /// System prompt establishing the agent's personality.
    pub system_prompt: String,
    /// Synthesis voice.
    pub voice: VoiceConfig,
    /// Transcription provider override.
    pub stt_provider: Option<ProviderKind>,
    /// Synthesis provider override.
    pub tts_provider: Option<ProviderKind>,
    /// Interruption sensitivity override.
    pub interruption: Option<InterruptionConfig>,
    /// Silence timeout override in ms.
    pub silence_timeout_ms: Option<u64>,
}

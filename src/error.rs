//! Error types for the conversation engine.

/// Top-level error type for the voice conversation engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A speech provider could not serve the request (network, auth, quota).
    ///
    /// Never fatal to a session: the caller may retry against the next
    /// provider in its fallback chain. `transient` distinguishes failures
    /// worth retrying on the same provider (timeout, 5xx) from those that
    /// are not (auth, bad request).
    #[error("provider {provider} unavailable: {message}")]
    ProviderUnavailable {
        /// Name of the provider that failed.
        provider: String,
        /// Normalized failure description.
        message: String,
        /// Whether the failure is worth retrying on the same provider.
        transient: bool,
    },

    /// Transcription produced no usable text. Treated as silence, not a failure.
    #[error("transcription produced no text")]
    TranscriptionEmpty,

    /// A synthesis job was cancelled. Expected outcome of an interruption.
    #[error("synthesis cancelled")]
    SynthesisCancelled,

    /// The transport could not establish the call.
    #[error("session setup failed: {0}")]
    SessionSetupFailed(String),

    /// Invalid session state transition or unknown session.
    #[error("session error: {0}")]
    Session(String),

    /// Missing or invalid configuration.
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// Channel transport send/receive error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Language model request or streaming error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Internal channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// `true` if this error may succeed when retried, either against a
    /// fallback provider or (for transient failures) the same one.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable { .. })
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;

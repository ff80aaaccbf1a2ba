//! Message types passed between engine stages.

use bytes::Bytes;
use std::time::Instant;

/// A chunk of raw inbound audio from the transport.
///
/// Sequence numbers are assigned per session and strictly increasing;
/// out-of-order frames are discarded at ingest.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Monotonically increasing sequence number within the session.
    pub seq: u64,
    /// Raw audio payload (16-bit little-endian mono PCM).
    pub bytes: Bytes,
    /// Transport capture timestamp in ms.
    pub timestamp_ms: u64,
}

/// Audio container format of synthesized speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// Raw 16-bit PCM.
    Pcm,
    /// WAV container.
    Wav,
    /// MP3.
    Mp3,
    /// Ogg Opus.
    Opus,
}

/// A transcription result for part or all of an utterance.
#[derive(Debug, Clone)]
pub struct TranscriptionChunk {
    /// The transcribed text.
    pub text: String,
    /// Whether this closes the utterance. Exactly one final chunk is
    /// emitted per utterance; non-final chunks are advisory.
    pub is_final: bool,
    /// Provider confidence in [0, 1]. Providers that report none are
    /// treated as fully confident.
    pub confidence: f32,
    /// When the transcription completed.
    pub at: Instant,
}

/// Events emitted by the ingest pipeline.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    /// A partial or final transcription of buffered audio.
    Transcription(TranscriptionChunk),
    /// The ingest stream ended (explicit finalize or transport close).
    End,
}

/// A sentence of agent text ready for synthesis.
#[derive(Debug, Clone)]
pub struct SentenceChunk {
    /// Complete sentence or clause text.
    pub text: String,
    /// Whether this is the last sentence of the response.
    pub is_final: bool,
}

/// Lifecycle events of a synthesis job, consumed by the interruption
/// controller. Each job emits `Started` then exactly one of `Finished`
/// or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakingEvent {
    /// Audio delivery for the job began.
    Started {
        /// Job identifier.
        job_id: u64,
    },
    /// The job delivered all audio.
    Finished {
        /// Job identifier.
        job_id: u64,
    },
    /// The job was cancelled before completing delivery.
    Cancelled {
        /// Job identifier.
        job_id: u64,
    },
}

/// Classification of a detected user-speech event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionKind {
    /// User speech observed; no action required (telemetry).
    UserSpeaking,
    /// User speech interrupted the agent; the active synthesis job was
    /// cancelled and the text starts a new turn.
    UserInterrupted,
    /// The agent's response was abandoned mid-turn (superseded).
    AgentInterrupted,
}

/// An interruption-related event. Ephemeral: retained only in the
/// session's short rolling interruption buffer.
#[derive(Debug, Clone)]
pub struct InterruptionEvent {
    /// What happened.
    pub kind: InterruptionKind,
    /// When it happened.
    pub at: Instant,
    /// Confidence of the triggering transcription, if any.
    pub confidence: Option<f32>,
    /// Text of the triggering transcription.
    pub text: String,
}

//! Barge-in detection: deciding when user speech interrupts the agent.
//!
//! The controller tracks whether the agent is currently speaking (from
//! synthesis lifecycle events) and applies a confidence threshold plus a
//! cooldown window to transcription chunks. Decisions are synchronous; the
//! session control loop acts on them (cancelling the active synthesis job
//! and starting a superseding turn).

use crate::config::InterruptionConfig;
use crate::messages::{InterruptionEvent, InterruptionKind, SpeakingEvent, TranscriptionChunk};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Capacity of the rolling buffer of recent interruptions.
const INTERRUPTION_HISTORY: usize = 16;

/// Per-session barge-in state machine.
#[derive(Debug)]
pub struct InterruptionController {
    config: InterruptionConfig,
    /// Whether the agent is currently delivering audio.
    agent_speaking: bool,
    /// When the last interruption fired (cooldown anchor).
    last_interruption: Option<Instant>,
    /// Recently interrupting utterances, newest last.
    recent: VecDeque<String>,
}

impl InterruptionController {
    /// Create a controller with the given sensitivity settings.
    #[must_use]
    pub fn new(config: InterruptionConfig) -> Self {
        Self {
            config,
            agent_speaking: false,
            last_interruption: None,
            recent: VecDeque::with_capacity(INTERRUPTION_HISTORY),
        }
    }

    /// Whether the agent is currently speaking.
    pub fn is_agent_speaking(&self) -> bool {
        self.agent_speaking
    }

    /// Update speaking state from a synthesis lifecycle event.
    pub fn on_speaking_event(&mut self, event: SpeakingEvent) {
        match event {
            SpeakingEvent::Started { job_id } => {
                debug!(job_id, "agent speaking started");
                self.agent_speaking = true;
            }
            SpeakingEvent::Finished { job_id } | SpeakingEvent::Cancelled { job_id } => {
                debug!(job_id, "agent speaking ended");
                self.agent_speaking = false;
            }
        }
    }

    /// Judge a transcription chunk.
    ///
    /// Returns `UserInterrupted` when the agent is speaking, barge-in is
    /// enabled, the cooldown has elapsed, and confidence clears the
    /// threshold; otherwise `UserSpeaking` (telemetry only). An
    /// interruption decision records the timestamp and appends the text to
    /// the rolling buffer; cancelling the synthesis job is the caller's
    /// responsibility.
    pub fn on_transcription(&mut self, chunk: &TranscriptionChunk) -> InterruptionEvent {
        let now = Instant::now();
        let cooldown_elapsed = match self.last_interruption {
            Some(at) => now.duration_since(at) >= Duration::from_millis(self.config.cooldown_ms),
            None => true,
        };

        let interrupts = self.agent_speaking
            && self.config.enable_barge_in
            && cooldown_elapsed
            && chunk.confidence >= self.config.interruption_threshold;

        if interrupts {
            self.last_interruption = Some(now);
            if self.recent.len() >= INTERRUPTION_HISTORY {
                self.recent.pop_front();
            }
            self.recent.push_back(chunk.text.clone());
            info!(
                confidence = chunk.confidence,
                text = %chunk.text,
                "user interrupted agent"
            );
            InterruptionEvent {
                kind: InterruptionKind::UserInterrupted,
                at: now,
                confidence: Some(chunk.confidence),
                text: chunk.text.clone(),
            }
        } else {
            InterruptionEvent {
                kind: InterruptionKind::UserSpeaking,
                at: now,
                confidence: Some(chunk.confidence),
                text: chunk.text.clone(),
            }
        }
    }

    /// Recently interrupting utterances, oldest first.
    pub fn recent_interruptions(&self) -> impl Iterator<Item = &str> {
        self.recent.iter().map(String::as_str)
    }

    /// Clear interruption history and cooldown (session reset).
    pub fn reset(&mut self) {
        self.recent.clear();
        self.last_interruption = None;
        self.agent_speaking = false;
    }
}

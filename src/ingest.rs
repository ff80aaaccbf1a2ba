//! Per-session audio ingestion: buffering, energy-based voice-activity
//! detection, and utterance segmentation.
//!
//! [`UtteranceSegmenter`] is a synchronous state machine over inbound PCM
//! frames; [`spawn_ingest`] wraps it in a task that owns the wall-clock
//! silence timer, keeps at most one transcription call in flight, and
//! walks the caller's provider fallback chain on failure. Frames arriving
//! while a transcription is in flight queue in the inbound channel rather
//! than being dropped.

use crate::config::IngestConfig;
use crate::error::EngineError;
use crate::messages::{AudioFrame, IngestEvent, TranscriptionChunk};
use crate::provider::fallback::ProviderChain;
use crate::provider::{ProviderGateway, ProviderKind, TranscribeOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Inbound frame queue depth per session.
const FRAME_QUEUE_DEPTH: usize = 256;

/// A segmentation decision produced by one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    /// Enough audio buffered mid-speech for a low-latency partial
    /// transcription. Carries a snapshot of the buffer.
    Partial(Vec<u8>),
    /// An utterance ended (sustained silence or buffer cap).
    Final(Vec<u8>),
}

/// Synchronous utterance segmentation over 16-bit little-endian mono PCM.
#[derive(Debug)]
pub struct UtteranceSegmenter {
    config: IngestConfig,
    /// Buffered audio for the current utterance.
    buffer: Vec<u8>,
    /// Whether speech has been observed in the current utterance.
    in_speech: bool,
    /// Accumulated trailing silence in ms.
    silent_ms: u64,
    /// When speech was last classified.
    last_speech_at: Option<Instant>,
}

impl UtteranceSegmenter {
    /// Create a segmenter.
    #[must_use]
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            in_speech: false,
            silent_ms: 0,
            last_speech_at: None,
        }
    }

    /// `true` while audio is buffered awaiting finalization.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Process one frame, returning a segmentation decision if the frame
    /// completes one.
    pub fn push_frame(&mut self, frame: &AudioFrame) -> Option<SegmentEvent> {
        let frame_ms = (frame.bytes.len() / self.config.bytes_per_ms().max(1)) as u64;
        let is_speech = self.classify(&frame.bytes);

        if is_speech {
            self.in_speech = true;
            self.silent_ms = 0;
            self.last_speech_at = Some(Instant::now());
            self.buffer.extend_from_slice(&frame.bytes);
        } else if self.in_speech {
            // Trailing silence inside an utterance is kept for context.
            self.silent_ms = self.silent_ms.saturating_add(frame_ms);
            self.buffer.extend_from_slice(&frame.bytes);

            if self.silent_ms >= self.config.silence_timeout_ms {
                return self.take_final();
            }
        }
        // Silence before any speech is not buffered.

        if self.in_speech && self.buffer.len() >= self.config.max_buffer_bytes {
            // Bounded buffer growth: finalize early instead of growing.
            return self.take_final();
        }

        if self.in_speech && self.silent_ms == 0 && self.buffer.len() >= self.config.partial_bytes {
            return Some(self.take_partial());
        }

        None
    }

    /// Finalize after wall-clock silence with no frames arriving at all.
    pub fn on_idle_timeout(&mut self) -> Option<SegmentEvent> {
        if !self.has_pending() {
            return None;
        }
        if let Some(at) = self.last_speech_at {
            debug!(
                idle_ms = at.elapsed().as_millis() as u64,
                "idle timeout, finalizing buffered utterance"
            );
        }
        self.take_final()
    }

    /// Flush remaining audio at end of stream.
    pub fn flush(&mut self) -> Option<SegmentEvent> {
        if self.has_pending() {
            self.take_final()
        } else {
            None
        }
    }

    fn take_final(&mut self) -> Option<SegmentEvent> {
        self.in_speech = false;
        self.silent_ms = 0;
        let utterance = std::mem::take(&mut self.buffer);
        if utterance.is_empty() {
            None
        } else {
            Some(SegmentEvent::Final(utterance))
        }
    }

    fn take_partial(&mut self) -> SegmentEvent {
        let snapshot = self.buffer.clone();
        // Retain a short trailing window so the next transcription has
        // context. Aligned down to a whole sample; may duplicate a little
        // audio at the boundary.
        let mut keep = self.config.trailing_context_ms as usize * self.config.bytes_per_ms();
        keep = keep.min(self.buffer.len());
        keep &= !1;
        let start = self.buffer.len() - keep;
        self.buffer.drain(..start);
        SegmentEvent::Partial(snapshot)
    }

    /// Classify a frame as speech or silence by normalized RMS energy.
    ///
    /// Malformed (odd-length) frames are assumed to contain speech rather
    /// than being dropped.
    fn classify(&self, bytes: &[u8]) -> bool {
        if !self.config.vad_enabled {
            return true;
        }
        if bytes.len() < 2 || bytes.len() % 2 != 0 {
            return true;
        }
        rms_energy(bytes) >= self.config.vad_threshold
    }
}

/// Normalized RMS energy of 16-bit little-endian PCM, on a 0–1 scale.
pub fn rms_energy(bytes: &[u8]) -> f32 {
    let samples = bytes.len() / 2;
    if samples == 0 {
        return 0.0;
    }
    let mut sum_sq = 0.0f64;
    for pair in bytes.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]) as f64 / 32768.0;
        sum_sq += sample * sample;
    }
    ((sum_sq / samples as f64) as f32).sqrt()
}

/// Spawn the ingest task for one session.
///
/// Returns the frame sender; dropping it is the explicit finalize signal
/// (remaining audio is flushed as a final chunk and [`IngestEvent::End`]
/// is emitted).
pub fn spawn_ingest(
    config: IngestConfig,
    gateway: Arc<ProviderGateway>,
    stt_override: Option<ProviderKind>,
    language: Option<String>,
    events_tx: mpsc::Sender<IngestEvent>,
    cancel: CancellationToken,
) -> mpsc::Sender<AudioFrame> {
    let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(FRAME_QUEUE_DEPTH);
    tokio::spawn(run_ingest(
        config,
        gateway,
        stt_override,
        language,
        frame_rx,
        events_tx,
        cancel,
    ));
    frame_tx
}

async fn run_ingest(
    config: IngestConfig,
    gateway: Arc<ProviderGateway>,
    stt_override: Option<ProviderKind>,
    language: Option<String>,
    mut frame_rx: mpsc::Receiver<AudioFrame>,
    events_tx: mpsc::Sender<IngestEvent>,
    cancel: CancellationToken,
) {
    let silence_timeout = Duration::from_millis(config.silence_timeout_ms);
    let mut segmenter = UtteranceSegmenter::new(config);
    let mut chain = ProviderChain::new(gateway.stt_chain(stt_override));
    let mut last_seq: Option<u64> = None;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            maybe_frame = frame_rx.recv() => {
                let Some(frame) = maybe_frame else {
                    // Explicit finalize: flush and signal end.
                    if let Some(SegmentEvent::Final(bytes)) = segmenter.flush() {
                        transcribe_and_emit(
                            &gateway, &mut chain, stt_override, &language,
                            bytes, true, &events_tx,
                        ).await;
                    }
                    let _ = events_tx.send(IngestEvent::End).await;
                    break;
                };

                // Frame sequence numbers are strictly increasing; anything
                // else is a transport bug and the frame is discarded.
                if let Some(prev) = last_seq {
                    if frame.seq <= prev {
                        warn!(seq = frame.seq, prev, "out-of-order audio frame dropped");
                        continue;
                    }
                }
                last_seq = Some(frame.seq);

                match segmenter.push_frame(&frame) {
                    Some(SegmentEvent::Final(bytes)) => {
                        transcribe_and_emit(
                            &gateway, &mut chain, stt_override, &language,
                            bytes, true, &events_tx,
                        ).await;
                    }
                    Some(SegmentEvent::Partial(bytes)) => {
                        transcribe_and_emit(
                            &gateway, &mut chain, stt_override, &language,
                            bytes, false, &events_tx,
                        ).await;
                    }
                    None => {}
                }
            }
            () = tokio::time::sleep(silence_timeout), if segmenter.has_pending() => {
                // No frames at all for a full silence window.
                if let Some(SegmentEvent::Final(bytes)) = segmenter.on_idle_timeout() {
                    transcribe_and_emit(
                        &gateway, &mut chain, stt_override, &language,
                        bytes, true, &events_tx,
                    ).await;
                }
            }
        }
    }
    debug!("ingest task stopped");
}

/// Transcribe one buffer, walking the fallback chain, and emit the chunk.
///
/// Only one call runs at a time per session: the caller awaits this before
/// consuming the next frame. Empty transcriptions are treated as silence.
async fn transcribe_and_emit(
    gateway: &Arc<ProviderGateway>,
    chain: &mut ProviderChain,
    stt_override: Option<ProviderKind>,
    language: &Option<String>,
    audio: Vec<u8>,
    is_final: bool,
    events_tx: &mpsc::Sender<IngestEvent>,
) {
    loop {
        let Some(kind) = chain.next_provider() else {
            warn!("all transcription providers exhausted, utterance dropped");
            // Start fresh for the next utterance; a recovered provider
            // should get another chance.
            *chain = ProviderChain::new(gateway.stt_chain(stt_override));
            return;
        };

        let opts = TranscribeOptions {
            provider: Some(kind),
            language: language.clone(),
            model: None,
        };
        match gateway.transcribe(&audio, &opts).await {
            Ok(transcript) => {
                chain.report_success(kind);
                if transcript.text.trim().is_empty() {
                    // No usable text: silence, not an error.
                    debug!(provider = %kind, "empty transcription treated as silence");
                    return;
                }
                info!(
                    provider = %kind,
                    is_final,
                    chars = transcript.text.len(),
                    "transcription"
                );
                let chunk = TranscriptionChunk {
                    text: transcript.text,
                    is_final,
                    confidence: transcript.confidence.unwrap_or(1.0),
                    at: Instant::now(),
                };
                let _ = events_tx.send(IngestEvent::Transcription(chunk)).await;
                return;
            }
            Err(EngineError::ProviderUnavailable {
                transient, message, ..
            }) => {
                chain.report_failure(kind, transient, &message);
            }
            Err(e) => {
                warn!(provider = %kind, error = %e, "transcription failed");
                return;
            }
        }
    }
}

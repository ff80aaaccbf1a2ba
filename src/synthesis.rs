//! Response synthesis: turning agent text into delivered audio.
//!
//! One job is active per session at a time; starting a new job cancels the
//! previous one (last-writer-wins). Audio is delivered to the transport in
//! fixed-size chunks with the job's cancellation token checked between
//! chunks, so an interruption stops delivery within one chunk. Delivered
//! audio is never recalled.

use crate::config::{SynthesisConfig, VoiceConfig};
use crate::error::EngineError;
use crate::llm::find_clause_boundary;
use crate::messages::{SentenceChunk, SpeakingEvent};
use crate::provider::fallback::ProviderChain;
use crate::provider::{ProviderGateway, ProviderKind, SynthesizeOptions, SynthesizedSpeech};
use crate::session::transport::ChannelTransport;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A synthesis job: one agent response being rendered and delivered.
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    /// Job id, unique within the session.
    pub id: u64,
    /// Voice used for rendering.
    pub voice: VoiceConfig,
    /// Cooperative cancellation token. Cancelling is idempotent.
    pub cancel: CancellationToken,
}

/// Per-session synthesis pipeline.
pub struct ResponseSynthesisPipeline {
    config: SynthesisConfig,
    gateway: Arc<ProviderGateway>,
    transport: Arc<dyn ChannelTransport>,
    tts_override: Option<ProviderKind>,
    voice: VoiceConfig,
    events_tx: mpsc::Sender<SpeakingEvent>,
    active: Mutex<Option<SynthesisJob>>,
    next_job_id: AtomicU64,
}

impl ResponseSynthesisPipeline {
    /// Create the pipeline for one session.
    pub fn new(
        config: SynthesisConfig,
        gateway: Arc<ProviderGateway>,
        transport: Arc<dyn ChannelTransport>,
        tts_override: Option<ProviderKind>,
        voice: VoiceConfig,
        events_tx: mpsc::Sender<SpeakingEvent>,
    ) -> Self {
        Self {
            config,
            gateway,
            transport,
            tts_override,
            voice,
            events_tx,
            active: Mutex::new(None),
            next_job_id: AtomicU64::new(1),
        }
    }

    /// Speak a complete response text.
    ///
    /// In streaming mode the text is split at sentence boundaries and
    /// rendered incrementally; otherwise it is synthesized in one request.
    /// Any active job is cancelled first. Returns the new job id.
    pub fn speak_text(self: &Arc<Self>, text: String) -> u64 {
        let job = self.begin_job();
        let id = job.id;
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let sentences = if pipeline.config.streaming {
                split_sentences(&text)
            } else {
                vec![text]
            };
            pipeline.run_job(job, sentences_stream(sentences)).await;
        });
        id
    }

    /// Speak sentences as they arrive from a streaming LLM response.
    ///
    /// The channel closes (or sends `is_final`) when the response is
    /// complete. Any active job is cancelled first. Returns the new job id.
    pub fn speak_stream(self: &Arc<Self>, sentences: mpsc::Receiver<SentenceChunk>) -> u64 {
        let job = self.begin_job();
        let id = job.id;
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run_job(job, sentences).await;
        });
        id
    }

    /// Cancel the active job, if any.
    ///
    /// Idempotent: cancelling twice, or cancelling a job that already
    /// completed, is a no-op and emits no duplicate event.
    pub fn cancel_active(&self) {
        let guard = self.active.lock();
        if let Ok(slot) = guard {
            if let Some(ref job) = *slot {
                debug!(job_id = job.id, "cancelling active synthesis job");
                job.cancel.cancel();
            }
        }
    }

    /// Whether a job is currently active.
    pub fn has_active(&self) -> bool {
        self.active.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Register a new job, cancelling the previous one (last-writer-wins).
    fn begin_job(&self) -> SynthesisJob {
        let job = SynthesisJob {
            id: self.next_job_id.fetch_add(1, Ordering::Relaxed),
            voice: self.voice.clone(),
            cancel: CancellationToken::new(),
        };
        if let Ok(mut slot) = self.active.lock() {
            if let Some(prev) = slot.take() {
                debug!(job_id = prev.id, "superseding active synthesis job");
                prev.cancel.cancel();
            }
            *slot = Some(job.clone());
        }
        job
    }

    /// Render and deliver sentences until done or cancelled, emitting
    /// `Started` and then exactly one of `Finished`/`Cancelled`.
    async fn run_job(&self, job: SynthesisJob, mut sentences: mpsc::Receiver<SentenceChunk>) {
        let _ = self
            .events_tx
            .send(SpeakingEvent::Started { job_id: job.id })
            .await;

        let mut chain = ProviderChain::new(self.gateway.tts_chain(self.tts_override));
        let mut cancelled = false;

        loop {
            if job.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let chunk = tokio::select! {
                () = job.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                maybe = sentences.recv() => match maybe {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            let is_final = chunk.is_final;
            if !chunk.text.is_empty() {
                match self.render_sentence(&job, &mut chain, &chunk.text).await {
                    Ok(Some(speech)) => {
                        if self.deliver(&job, speech.audio).await {
                            cancelled = true;
                            break;
                        }
                    }
                    Ok(None) => {
                        // Rendering failed permanently; end the job quietly.
                        warn!(job_id = job.id, "synthesis providers exhausted, job abandoned");
                        break;
                    }
                    Err(EngineError::SynthesisCancelled) => {
                        cancelled = true;
                        break;
                    }
                    Err(e) => {
                        warn!(job_id = job.id, error = %e, "synthesis failed");
                        break;
                    }
                }
            }
            if is_final {
                break;
            }
        }

        // Clear the active slot if this job still owns it.
        if let Ok(mut slot) = self.active.lock() {
            if slot.as_ref().map(|j| j.id) == Some(job.id) {
                *slot = None;
            }
        }

        let event = if cancelled {
            SpeakingEvent::Cancelled { job_id: job.id }
        } else {
            SpeakingEvent::Finished { job_id: job.id }
        };
        info!(job_id = job.id, cancelled, "synthesis job ended");
        let _ = self.events_tx.send(event).await;
    }

    /// Synthesize one sentence, walking the fallback chain.
    ///
    /// Returns `Ok(None)` when every provider is exhausted.
    async fn render_sentence(
        &self,
        job: &SynthesisJob,
        chain: &mut ProviderChain,
        text: &str,
    ) -> crate::error::Result<Option<SynthesizedSpeech>> {
        loop {
            if job.cancel.is_cancelled() {
                return Err(EngineError::SynthesisCancelled);
            }
            let Some(kind) = chain.next_provider() else {
                return Ok(None);
            };
            let opts = SynthesizeOptions {
                provider: Some(kind),
                voice: job.voice.clone(),
                model: None,
                speed: None,
            };
            match self.gateway.synthesize(text, &opts).await {
                Ok(speech) => {
                    chain.report_success(kind);
                    return Ok(Some(speech));
                }
                Err(EngineError::ProviderUnavailable {
                    transient, message, ..
                }) => {
                    chain.report_failure(kind, transient, &message);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Deliver audio in bounded chunks, checking the cancellation token
    /// before each send. Returns `true` if the job was cancelled mid-way.
    /// Already-sent chunks stay delivered.
    async fn deliver(&self, job: &SynthesisJob, audio: Bytes) -> bool {
        let chunk_size = self.config.chunk_bytes.max(1);
        let mut offset = 0usize;
        while offset < audio.len() {
            if job.cancel.is_cancelled() {
                return true;
            }
            let end = (offset + chunk_size).min(audio.len());
            if let Err(e) = self.transport.send_audio(audio.slice(offset..end)).await {
                warn!(job_id = job.id, error = %e, "audio delivery failed");
                return false;
            }
            offset = end;
        }
        false
    }
}

/// Split response text into sentences for incremental rendering.
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut rest = text;
    while let Some(pos) = find_clause_boundary(rest) {
        let sentence = rest[..=pos].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_owned());
        }
        rest = &rest[pos + 1..];
    }
    let tail = rest.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_owned());
    }
    sentences
}

/// Adapt a list of sentences into the channel shape `run_job` consumes.
fn sentences_stream(sentences: Vec<String>) -> mpsc::Receiver<SentenceChunk> {
    let (tx, rx) = mpsc::channel(sentences.len().max(1));
    let count = sentences.len();
    for (i, text) in sentences.into_iter().enumerate() {
        // Channel has capacity for every sentence; try_send cannot fail.
        let _ = tx.try_send(SentenceChunk {
            text,
            is_final: i + 1 == count,
        });
    }
    rx
}

//! Call/session lifecycle: state machine, per-session task wiring, and the
//! manager that binds a channel transport to one conversation.
//!
//! Each session is an independent group of tokio tasks (ingest, synthesis
//! jobs, a control loop) sharing one cancellation token. The only state
//! shared across sessions is the provider gateway, the response cache, and
//! the rate-limit counters.

pub mod transport;

use crate::audit::{AuditRecord, AuditSink, EndReason};
use crate::config::{AgentProfile, EngineConfig, IngestConfig};
use crate::error::{EngineError, Result};
use crate::functions::FunctionExecutor;
use crate::ingest::spawn_ingest;
use crate::interruption::InterruptionController;
use crate::llm::cache::{run_sweeper, ResponseCache};
use crate::messages::{AudioFrame, IngestEvent, InterruptionKind, SpeakingEvent};
use crate::orchestrator::ConversationOrchestrator;
use crate::provider::ProviderGateway;
use crate::synthesis::ResponseSynthesisPipeline;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use self::transport::{ChannelTransport, SessionChannel};
use tracing::{info, warn};
use uuid::Uuid;

/// Session lifecycle states. Transitions are validated and monotonic:
/// once `Ended`, a session never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, no call setup yet.
    Idle,
    /// Call setup requested, awaiting transport confirmation.
    Ringing,
    /// Live conversation.
    Active,
    /// Transfer in progress.
    Transferring,
    /// Parked; audio ignored.
    OnHold,
    /// Terminal.
    Ended,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            // Any live state may fail directly to Ended.
            (Ended, _) => false,
            (_, Ended) => true,
            (Idle, Ringing) => true,
            (Ringing, Active) => true,
            (Active, Transferring) | (Active, OnHold) => true,
            (Transferring, Active) | (OnHold, Active) => true,
            _ => false,
        }
    }
}

/// Public snapshot of a session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id.
    pub id: Uuid,
    /// Bound channel kind.
    pub channel: SessionChannel,
    /// Current lifecycle state.
    pub state: SessionState,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When it ended, if it has.
    pub ended_at: Option<DateTime<Utc>>,
}

/// State shared between the manager and a session's tasks.
struct SessionShared {
    id: Uuid,
    state: Mutex<SessionState>,
    created_at: DateTime<Utc>,
    ended_at: Mutex<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
    synthesis: Arc<ResponseSynthesisPipeline>,
    transport: Arc<dyn ChannelTransport>,
    audit: Arc<dyn AuditSink>,
    /// Ensures the session-closed record is emitted exactly once.
    closed: AtomicBool,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        self.state.lock().map(|s| *s).unwrap_or(SessionState::Ended)
    }

    fn transition(&self, next: SessionState) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::Session("state lock poisoned".to_owned()))?;
        if !state.can_transition(next) {
            return Err(EngineError::Session(format!(
                "illegal transition {:?} -> {next:?}",
                *state
            )));
        }
        info!(session = %self.id, from = ?*state, to = ?next, "session state change");
        *state = next;
        Ok(())
    }
}

/// Everything the manager keeps per session.
struct SessionHandle {
    shared: Arc<SessionShared>,
    channel: SessionChannel,
    frame_tx: mpsc::Sender<AudioFrame>,
    next_seq: AtomicU64,
}

/// End a session: state to `Ended`, cancel in-flight work, release the
/// transport, emit exactly one session-closed record.
async fn teardown(shared: &SessionShared, reason: EndReason) {
    if shared.closed.swap(true, Ordering::SeqCst) {
        return;
    }
    let _ = shared.transition(SessionState::Ended);
    let ended_at = Utc::now();
    if let Ok(mut slot) = shared.ended_at.lock() {
        *slot = Some(ended_at);
    }

    shared.synthesis.cancel_active();
    shared.cancel.cancel();
    if let Err(e) = shared.transport.close().await {
        warn!(session = %shared.id, error = %e, "transport close failed");
    }

    let record = AuditRecord::SessionClosed {
        session_id: shared.id,
        reason,
        started_at: shared.created_at,
        ended_at,
    };
    if let Err(e) = shared.audit.record(record).await {
        warn!(session = %shared.id, error = %e, "session-closed audit emission failed");
    }
    info!(session = %shared.id, ?reason, "session ended");
}

/// Owns all live sessions and the shared cache service.
pub struct CallSessionManager {
    config: EngineConfig,
    gateway: Arc<ProviderGateway>,
    cache: Arc<ResponseCache>,
    audit: Arc<dyn AuditSink>,
    functions: Arc<dyn FunctionExecutor>,
    sessions: Mutex<HashMap<Uuid, SessionHandle>>,
    sweeper_cancel: CancellationToken,
}

impl CallSessionManager {
    /// Create the manager, build the provider gateway, and start the cache
    /// sweep service.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigurationInvalid`] if configuration fails
    /// validation or the gateway cannot be built.
    pub fn new(
        config: EngineConfig,
        audit: Arc<dyn AuditSink>,
        functions: Arc<dyn FunctionExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        let gateway = Arc::new(ProviderGateway::from_config(&config.providers)?);
        let cache = Arc::new(ResponseCache::new(&config.cache));

        let sweeper_cancel = CancellationToken::new();
        tokio::spawn(run_sweeper(
            Arc::clone(&cache),
            Duration::from_millis(config.cache.sweep_interval_ms.max(1000)),
            sweeper_cancel.clone(),
        ));

        Ok(Self {
            config,
            gateway,
            cache,
            audit,
            functions,
            sessions: Mutex::new(HashMap::new()),
            sweeper_cancel,
        })
    }

    /// The provider gateway (read-only, shared across sessions).
    pub fn gateway(&self) -> &Arc<ProviderGateway> {
        &self.gateway
    }

    /// Start a session: run call setup on the transport and, once
    /// confirmed, wire up the conversation tasks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionSetupFailed`] when the transport
    /// cannot establish the call; the session is ended and a session-closed
    /// record is emitted.
    pub async fn start_session(
        &self,
        profile: AgentProfile,
        transport: Arc<dyn ChannelTransport>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let channel = transport.channel();
        let cancel = CancellationToken::new();

        let (speaking_tx, speaking_rx) = mpsc::channel::<SpeakingEvent>(32);
        let synthesis = Arc::new(ResponseSynthesisPipeline::new(
            self.config.synthesis.clone(),
            Arc::clone(&self.gateway),
            Arc::clone(&transport),
            profile.tts_provider,
            profile.voice.clone(),
            speaking_tx,
        ));

        let shared = Arc::new(SessionShared {
            id,
            state: Mutex::new(SessionState::Idle),
            created_at: Utc::now(),
            ended_at: Mutex::new(None),
            cancel: cancel.clone(),
            synthesis: Arc::clone(&synthesis),
            transport: Arc::clone(&transport),
            audit: Arc::clone(&self.audit),
            closed: AtomicBool::new(false),
        });

        shared.transition(SessionState::Ringing)?;
        if let Err(e) = transport.open().await {
            teardown(&shared, EndReason::TransportError).await;
            return Err(EngineError::SessionSetupFailed(e.to_string()));
        }
        shared.transition(SessionState::Active)?;

        // Ingest: per-session silence override applies here.
        let ingest_config = IngestConfig {
            silence_timeout_ms: profile
                .silence_timeout_ms
                .unwrap_or(self.config.ingest.silence_timeout_ms),
            ..self.config.ingest.clone()
        };
        let (ingest_tx, ingest_rx) = mpsc::channel::<IngestEvent>(32);
        let frame_tx = spawn_ingest(
            ingest_config,
            Arc::clone(&self.gateway),
            profile.stt_provider,
            None,
            ingest_tx,
            cancel.clone(),
        );

        let controller = InterruptionController::new(
            profile
                .interruption
                .clone()
                .unwrap_or_else(|| self.config.interruption.clone()),
        );

        let orchestrator = ConversationOrchestrator::new(
            id,
            self.config.llm.clone(),
            &profile.system_prompt,
            Arc::clone(&self.cache),
            Arc::clone(&self.functions),
            Arc::clone(&synthesis),
            Arc::clone(&self.audit),
        );

        let max_duration = Duration::from_millis(self.config.session.max_call_duration_ms);
        tokio::spawn(run_control_loop(
            Arc::clone(&shared),
            controller,
            orchestrator,
            ingest_rx,
            speaking_rx,
            max_duration,
        ));

        let handle = SessionHandle {
            shared,
            channel,
            frame_tx,
            next_seq: AtomicU64::new(0),
        };
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id, handle);
        }
        info!(session = %id, %channel, "session started");
        Ok(id)
    }

    /// Transport ingress: push one raw audio frame into a session.
    ///
    /// Frames are dropped with a warning when the session's inbound queue
    /// is full (the ingest pipeline finalizes early under sustained
    /// pressure rather than growing unbounded).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Session`] for unknown or ended sessions.
    pub fn push_audio_frame(
        &self,
        session_id: Uuid,
        bytes: bytes::Bytes,
        timestamp_ms: u64,
    ) -> Result<()> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| EngineError::Session("session map lock poisoned".to_owned()))?;
        let handle = sessions
            .get(&session_id)
            .ok_or_else(|| EngineError::Session(format!("unknown session {session_id}")))?;

        match handle.shared.state() {
            SessionState::Ended => {
                return Err(EngineError::Session(format!(
                    "session {session_id} has ended"
                )));
            }
            SessionState::OnHold => return Ok(()),
            _ => {}
        }

        let seq = handle.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = AudioFrame {
            seq,
            bytes,
            timestamp_ms,
        };
        if handle.frame_tx.try_send(frame).is_err() {
            warn!(session = %session_id, seq, "inbound frame queue full, frame dropped");
        }
        Ok(())
    }

    /// End a session (hangup or operator action).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Session`] for unknown sessions. Ending an
    /// already-ended session is a no-op.
    pub async fn end_session(&self, session_id: Uuid, reason: EndReason) -> Result<()> {
        let shared = {
            let mut sessions = self
                .sessions
                .lock()
                .map_err(|_| EngineError::Session("session map lock poisoned".to_owned()))?;
            let handle = sessions
                .remove(&session_id)
                .ok_or_else(|| EngineError::Session(format!("unknown session {session_id}")))?;
            handle.shared
        };
        teardown(&shared, reason).await;
        Ok(())
    }

    /// Transfer an active session to a new destination.
    ///
    /// On transport failure the session ends.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Session`] when transfer is disabled, the
    /// session is unknown, not `Active`, or the transport redirect fails.
    pub async fn transfer_session(&self, session_id: Uuid, destination: &str) -> Result<()> {
        if !self.config.session.transfer_enabled {
            return Err(EngineError::Session("transfer is disabled".to_owned()));
        }
        let shared = self.shared_for(session_id)?;
        shared.transition(SessionState::Transferring)?;

        // Park any in-flight speech before moving the call.
        shared.synthesis.cancel_active();

        match shared.transport.redirect(destination).await {
            Ok(()) => {
                shared.transition(SessionState::Active)?;
                info!(session = %session_id, destination, "transfer complete");
                Ok(())
            }
            Err(e) => {
                warn!(session = %session_id, error = %e, "transfer failed, ending session");
                teardown(&shared, EndReason::TransferFailed).await;
                Err(EngineError::Session(format!("transfer failed: {e}")))
            }
        }
    }

    /// Put an active session on hold.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Session`] for unknown sessions or illegal
    /// transitions.
    pub fn hold_session(&self, session_id: Uuid) -> Result<()> {
        let shared = self.shared_for(session_id)?;
        shared.transition(SessionState::OnHold)?;
        shared.synthesis.cancel_active();
        Ok(())
    }

    /// Resume a held session.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Session`] for unknown sessions or illegal
    /// transitions.
    pub fn resume_session(&self, session_id: Uuid) -> Result<()> {
        let shared = self.shared_for(session_id)?;
        shared.transition(SessionState::Active)
    }

    /// Snapshot one session.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Session`] for unknown sessions.
    pub fn session_info(&self, session_id: Uuid) -> Result<SessionInfo> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| EngineError::Session("session map lock poisoned".to_owned()))?;
        let handle = sessions
            .get(&session_id)
            .ok_or_else(|| EngineError::Session(format!("unknown session {session_id}")))?;
        Ok(SessionInfo {
            id: session_id,
            channel: handle.channel,
            state: handle.shared.state(),
            created_at: handle.shared.created_at,
            ended_at: handle.shared.ended_at.lock().ok().and_then(|e| *e),
        })
    }

    /// Ids of all sessions the manager still tracks.
    pub fn session_ids(&self) -> Vec<Uuid> {
        self.sessions
            .lock()
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default()
    }

    /// End every session and stop the cache service.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<SessionShared>> = {
            match self.sessions.lock() {
                Ok(mut sessions) => sessions.drain().map(|(_, h)| h.shared).collect(),
                Err(_) => Vec::new(),
            }
        };
        for shared in handles {
            teardown(&shared, EndReason::Shutdown).await;
        }
        self.sweeper_cancel.cancel();
        info!("session manager shut down");
    }

    fn shared_for(&self, session_id: Uuid) -> Result<Arc<SessionShared>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| EngineError::Session("session map lock poisoned".to_owned()))?;
        sessions
            .get(&session_id)
            .map(|h| Arc::clone(&h.shared))
            .ok_or_else(|| EngineError::Session(format!("unknown session {session_id}")))
    }
}

/// Per-session control loop: routes transcriptions through the
/// interruption controller into turns, applies the max-call-duration
/// limit, and reacts to ingest end-of-stream.
async fn run_control_loop(
    shared: Arc<SessionShared>,
    mut controller: InterruptionController,
    orchestrator: ConversationOrchestrator,
    mut ingest_rx: mpsc::Receiver<IngestEvent>,
    mut speaking_rx: mpsc::Receiver<SpeakingEvent>,
    max_duration: Duration,
) {
    let orchestrator = Arc::new(tokio::sync::Mutex::new(orchestrator));
    let mut turn_cancel = CancellationToken::new();
    let deadline = tokio::time::Instant::now() + max_duration;

    let start_turn = |orchestrator: &Arc<tokio::sync::Mutex<ConversationOrchestrator>>,
                      turn_cancel: &mut CancellationToken,
                      text: String| {
        // Supersede: the previous turn observes its token and yields the
        // orchestrator lock at its next suspension point.
        turn_cancel.cancel();
        *turn_cancel = CancellationToken::new();
        let orch = Arc::clone(orchestrator);
        let token = turn_cancel.clone();
        tokio::spawn(async move {
            let mut guard = orch.lock().await;
            if token.is_cancelled() {
                return;
            }
            if let Err(e) = guard.run_turn(text, token).await {
                warn!(error = %e, "turn failed");
            }
        });
    };

    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => break,
            () = tokio::time::sleep_until(deadline) => {
                info!(session = %shared.id, "max call duration reached");
                turn_cancel.cancel();
                teardown(&shared, EndReason::MaxDuration).await;
                break;
            }
            maybe = speaking_rx.recv() => {
                let Some(event) = maybe else { break };
                controller.on_speaking_event(event);
            }
            maybe = ingest_rx.recv() => {
                match maybe {
                    Some(IngestEvent::Transcription(chunk)) => {
                        let event = controller.on_transcription(&chunk);
                        match event.kind {
                            InterruptionKind::UserInterrupted => {
                                shared.synthesis.cancel_active();
                                let record = AuditRecord::InterruptionRecorded {
                                    session_id: shared.id,
                                    text: event.text.clone(),
                                    confidence: chunk.confidence,
                                    at: Utc::now(),
                                };
                                if let Err(e) = shared.audit.record(record).await {
                                    warn!(error = %e, "audit emission failed");
                                }
                                start_turn(&orchestrator, &mut turn_cancel, event.text);
                            }
                            InterruptionKind::UserSpeaking | InterruptionKind::AgentInterrupted => {
                                if chunk.is_final {
                                    start_turn(&orchestrator, &mut turn_cancel, chunk.text);
                                }
                            }
                        }
                    }
                    Some(IngestEvent::End) | None => {
                        turn_cancel.cancel();
                        teardown(&shared, EndReason::Hangup).await;
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn lifecycle_transitions_are_legal() {
        use SessionState::*;
        assert!(Idle.can_transition(Ringing));
        assert!(Ringing.can_transition(Active));
        assert!(Active.can_transition(Transferring));
        assert!(Transferring.can_transition(Active));
        assert!(Active.can_transition(OnHold));
        assert!(OnHold.can_transition(Active));
        assert!(Active.can_transition(Ended));
    }

    #[test]
    fn any_live_state_may_end() {
        use SessionState::*;
        for state in [Idle, Ringing, Active, Transferring, OnHold] {
            assert!(state.can_transition(Ended), "{state:?} should end");
        }
    }

    #[test]
    fn ended_is_terminal() {
        use SessionState::*;
        for next in [Idle, Ringing, Active, Transferring, OnHold, Ended] {
            assert!(!Ended.can_transition(next), "Ended -> {next:?} allowed");
        }
    }

    #[test]
    fn skipping_ringing_is_illegal() {
        use SessionState::*;
        assert!(!Idle.can_transition(Active));
        assert!(!Ringing.can_transition(Transferring));
        assert!(!OnHold.can_transition(Transferring));
    }
}

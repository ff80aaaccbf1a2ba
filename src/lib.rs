//! Palaver: real-time voice conversation engine for telephony and web agents.
//!
//! Turns a live audio stream into agent speech with low latency, correct
//! turn-taking, and barge-in handling, abstracting over multiple
//! third-party speech providers:
//! Transport → Ingest/VAD → STT → LLM → TTS → Transport
//!
//! # Architecture
//!
//! Each session is an independent group of tokio tasks connected by
//! channels:
//! - **Ingest**: buffers inbound PCM, segments utterances with energy VAD
//! - **Provider gateway**: uniform transcribe/synthesize over six vendors,
//!   with caller-driven fallback and per-provider rate limits
//! - **Orchestrator**: history, LLM calls (cached or streamed), function
//!   calling
//! - **Synthesis**: sentence-incremental rendering with cooperative
//!   cancellation for barge-in
//! - **Session manager**: lifecycle state machine binding a SIP leg or
//!   widget socket to one conversation

pub mod audit;
pub mod config;
pub mod error;
pub mod functions;
pub mod ingest;
pub mod interruption;
pub mod llm;
pub mod messages;
pub mod orchestrator;
pub mod provider;
pub mod session;
pub mod synthesis;

pub use audit::{AuditRecord, AuditSink, EndReason, MemoryAuditSink, NullAuditSink};
pub use config::{AgentProfile, EngineConfig, VoiceConfig};
pub use error::{EngineError, Result};
pub use functions::{FunctionCall, FunctionExecutor, FunctionSpec, NoFunctions};
pub use messages::{AudioFrame, InterruptionEvent, InterruptionKind, TranscriptionChunk};
pub use provider::{ProviderGateway, ProviderKind};
pub use session::transport::{ChannelTransport, SessionChannel};
pub use session::{CallSessionManager, SessionInfo, SessionState};

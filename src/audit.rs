//! Structured audit records for the persistence collaborator.
//!
//! Conversation turns, function calls, interruptions, and session closure
//! are emitted as records to an external store. Emission stays off the hot
//! path: sinks should enqueue and return.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Normal hangup from either side.
    Hangup,
    /// Maximum call duration reached.
    MaxDuration,
    /// Unrecoverable transport failure.
    TransportError,
    /// Unrecoverable provider failure.
    ProviderFailure,
    /// Transfer could not complete.
    TransferFailed,
    /// Engine shutdown.
    Shutdown,
}

/// One structured audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    /// A completed user/agent turn.
    TurnCompleted {
        /// Session the turn belongs to.
        session_id: Uuid,
        /// Final user utterance text.
        user_text: String,
        /// Agent response text.
        agent_text: String,
        /// When the turn completed.
        at: DateTime<Utc>,
    },
    /// A function the model invoked.
    FunctionInvoked {
        /// Session the call belongs to.
        session_id: Uuid,
        /// Function name.
        name: String,
        /// Arguments passed.
        arguments: serde_json::Value,
        /// Serialized result, or the error message on failure.
        outcome: String,
        /// When the call finished.
        at: DateTime<Utc>,
    },
    /// The user interrupted the agent.
    InterruptionRecorded {
        /// Session the interruption belongs to.
        session_id: Uuid,
        /// Interrupting utterance text.
        text: String,
        /// Transcription confidence.
        confidence: f32,
        /// When the interruption fired.
        at: DateTime<Utc>,
    },
    /// A session reached `Ended`. Emitted exactly once per session.
    SessionClosed {
        /// Session id.
        session_id: Uuid,
        /// Why it ended.
        reason: EndReason,
        /// When the session started.
        started_at: DateTime<Utc>,
        /// When it ended.
        ended_at: DateTime<Utc>,
    },
}

/// External persistence/audit collaborator.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Emit one record. Failures are the sink's problem; the engine logs
    /// and continues.
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()>;
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _record: AuditRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Count of session-closed records for one session.
    pub fn closed_count(&self, session_id: Uuid) -> usize {
        self.records()
            .iter()
            .filter(|r| matches!(r, AuditRecord::SessionClosed { session_id: id, .. } if *id == session_id))
            .count()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("audit sink lock poisoned"))?
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn memory_sink_collects_records() {
        let sink = MemoryAuditSink::new();
        let id = Uuid::new_v4();
        sink.record(AuditRecord::SessionClosed {
            session_id: id,
            reason: EndReason::Hangup,
            started_at: Utc::now(),
            ended_at: Utc::now(),
        })
        .await
        .unwrap();

        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.closed_count(id), 1);
        assert_eq!(sink.closed_count(Uuid::new_v4()), 0);
    }

    #[test]
    fn records_serialize_with_kind_tag() {
        let record = AuditRecord::InterruptionRecorded {
            session_id: Uuid::new_v4(),
            text: "wait".to_owned(),
            confidence: 0.9,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "interruption_recorded");
        assert_eq!(json["text"], "wait");
    }
}

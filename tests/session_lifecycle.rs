//! Session lifecycle tests: state machine, teardown, and the
//! max-call-duration limit, driven through a mock transport.

use bytes::Bytes;
use palaver::audit::{AuditRecord, EndReason, MemoryAuditSink};
use palaver::config::{AgentProfile, EngineConfig};
use palaver::session::transport::{ChannelTransport, SessionChannel};
use palaver::session::{CallSessionManager, SessionState};
use palaver::{EngineError, NoFunctions};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Transport test double: records calls, optionally refuses setup.
#[derive(Debug, Default)]
struct MockTransport {
    fail_open: bool,
    fail_redirect: bool,
    opened: AtomicBool,
    closed: AtomicUsize,
    redirects: AtomicUsize,
}

#[async_trait]
impl ChannelTransport for MockTransport {
    fn channel(&self) -> SessionChannel {
        SessionChannel::Sip
    }

    async fn open(&self) -> anyhow::Result<()> {
        if self.fail_open {
            anyhow::bail!("486 Busy Here");
        }
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_audio(&self, _frame: Bytes) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_text(&self, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn redirect(&self, _destination: &str) -> anyhow::Result<()> {
        if self.fail_redirect {
            anyhow::bail!("transfer refused");
        }
        self.redirects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn manager_with(config: EngineConfig, audit: Arc<MemoryAuditSink>) -> CallSessionManager {
    CallSessionManager::new(config, audit, Arc::new(NoFunctions)).expect("manager")
}

#[tokio::test(flavor = "multi_thread")]
async fn session_starts_active_and_ends_on_hangup() {
    let audit = Arc::new(MemoryAuditSink::new());
    let manager = manager_with(EngineConfig::default(), Arc::clone(&audit));
    let transport = Arc::new(MockTransport::default());

    let id = manager
        .start_session(AgentProfile::default(), Arc::clone(&transport) as Arc<dyn ChannelTransport>)
        .await
        .expect("session");

    assert!(transport.opened.load(Ordering::SeqCst));
    let info = manager.session_info(id).expect("info");
    assert_eq!(info.state, SessionState::Active);
    assert_eq!(info.channel, SessionChannel::Sip);
    assert!(info.ended_at.is_none());

    manager.end_session(id, EndReason::Hangup).await.expect("end");
    assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
    assert_eq!(audit.closed_count(id), 1);

    // The handle is gone afterwards.
    assert!(matches!(
        manager.session_info(id),
        Err(EngineError::Session(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_call_setup_reports_and_closes() {
    let audit = Arc::new(MemoryAuditSink::new());
    let manager = manager_with(EngineConfig::default(), Arc::clone(&audit));
    let transport = Arc::new(MockTransport {
        fail_open: true,
        ..MockTransport::default()
    });

    let err = manager
        .start_session(AgentProfile::default(), transport)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionSetupFailed(_)));

    // The aborted session still produced exactly one closed record.
    let closed: Vec<_> = audit
        .records()
        .into_iter()
        .filter(|r| matches!(r, AuditRecord::SessionClosed { .. }))
        .collect();
    assert_eq!(closed.len(), 1);
    match &closed[0] {
        AuditRecord::SessionClosed { reason, .. } => {
            assert_eq!(*reason, EndReason::TransportError);
        }
        other => panic!("unexpected record: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn max_call_duration_forces_ended_exactly_once() {
    let audit = Arc::new(MemoryAuditSink::new());
    let mut config = EngineConfig::default();
    config.session.max_call_duration_ms = 100;
    let manager = manager_with(config, Arc::clone(&audit));
    let transport = Arc::new(MockTransport::default());

    let id = manager
        .start_session(AgentProfile::default(), Arc::clone(&transport) as Arc<dyn ChannelTransport>)
        .await
        .expect("session");

    tokio::time::sleep(Duration::from_millis(400)).await;

    let info = manager.session_info(id).expect("info");
    assert_eq!(info.state, SessionState::Ended);
    assert!(info.ended_at.is_some());
    assert_eq!(audit.closed_count(id), 1);
    assert_eq!(transport.closed.load(Ordering::SeqCst), 1);

    let records = audit.records();
    let reason = records
        .iter()
        .find_map(|r| match r {
            AuditRecord::SessionClosed { reason, .. } => Some(*reason),
            _ => None,
        })
        .expect("closed record");
    assert_eq!(reason, EndReason::MaxDuration);

    // Frames to an ended session are rejected.
    let err = manager
        .push_audio_frame(id, Bytes::from_static(&[0u8; 64]), 0)
        .unwrap_err();
    assert!(matches!(err, EngineError::Session(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn hold_and_resume_roundtrip() {
    let audit = Arc::new(MemoryAuditSink::new());
    let manager = manager_with(EngineConfig::default(), Arc::clone(&audit));
    let transport = Arc::new(MockTransport::default());

    let id = manager
        .start_session(AgentProfile::default(), transport)
        .await
        .expect("session");

    manager.hold_session(id).expect("hold");
    assert_eq!(
        manager.session_info(id).expect("info").state,
        SessionState::OnHold
    );

    // Frames are silently dropped while held.
    manager
        .push_audio_frame(id, Bytes::from_static(&[0u8; 64]), 0)
        .expect("frame accepted but ignored");

    // Hold is not re-entrant.
    assert!(manager.hold_session(id).is_err());

    manager.resume_session(id).expect("resume");
    assert_eq!(
        manager.session_info(id).expect("info").state,
        SessionState::Active
    );

    manager.end_session(id, EndReason::Hangup).await.expect("end");
}

#[tokio::test(flavor = "multi_thread")]
async fn transfer_returns_to_active() {
    let audit = Arc::new(MemoryAuditSink::new());
    let manager = manager_with(EngineConfig::default(), Arc::clone(&audit));
    let transport = Arc::new(MockTransport::default());

    let id = manager
        .start_session(AgentProfile::default(), Arc::clone(&transport) as Arc<dyn ChannelTransport>)
        .await
        .expect("session");

    manager
        .transfer_session(id, "sip:support@example.com")
        .await
        .expect("transfer");
    assert_eq!(transport.redirects.load(Ordering::SeqCst), 1);
    assert_eq!(
        manager.session_info(id).expect("info").state,
        SessionState::Active
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_transfer_ends_session() {
    let audit = Arc::new(MemoryAuditSink::new());
    let manager = manager_with(EngineConfig::default(), Arc::clone(&audit));
    let transport = Arc::new(MockTransport {
        fail_redirect: true,
        ..MockTransport::default()
    });

    let id = manager
        .start_session(AgentProfile::default(), transport)
        .await
        .expect("session");

    let err = manager
        .transfer_session(id, "sip:support@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Session(_)));
    assert_eq!(
        manager.session_info(id).expect("info").state,
        SessionState::Ended
    );
    assert_eq!(audit.closed_count(id), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn transfer_disabled_is_rejected() {
    let audit = Arc::new(MemoryAuditSink::new());
    let mut config = EngineConfig::default();
    config.session.transfer_enabled = false;
    let manager = manager_with(config, Arc::clone(&audit));
    let transport = Arc::new(MockTransport::default());

    let id = manager
        .start_session(AgentProfile::default(), transport)
        .await
        .expect("session");

    assert!(manager.transfer_session(id, "anywhere").await.is_err());
    // Session is untouched.
    assert_eq!(
        manager.session_info(id).expect("info").state,
        SessionState::Active
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_session_is_an_error() {
    let audit = Arc::new(MemoryAuditSink::new());
    let manager = manager_with(EngineConfig::default(), audit);
    let id = uuid::Uuid::new_v4();

    assert!(manager.session_info(id).is_err());
    assert!(manager
        .push_audio_frame(id, Bytes::from_static(&[0u8; 4]), 0)
        .is_err());
    assert!(manager.end_session(id, EndReason::Hangup).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_every_session() {
    let audit = Arc::new(MemoryAuditSink::new());
    let manager = manager_with(EngineConfig::default(), Arc::clone(&audit));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let transport = Arc::new(MockTransport::default());
        ids.push(
            manager
                .start_session(AgentProfile::default(), transport)
                .await
                .expect("session"),
        );
    }
    assert_eq!(manager.session_ids().len(), 3);

    manager.shutdown().await;
    assert!(manager.session_ids().is_empty());
    for id in ids {
        assert_eq!(audit.closed_count(id), 1);
    }
}

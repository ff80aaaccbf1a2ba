//! Channel transport seam.
//!
//! The engine drives a SIP leg or a browser/widget socket through this
//! narrow interface; protocol framing, RTP, and WebSocket details belong
//! to the transport implementation.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of channel a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionChannel {
    /// Telephony leg signaled via SIP.
    Sip,
    /// Browser widget over a socket.
    Widget,
}

impl fmt::Display for SessionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionChannel::Sip => f.write_str("sip"),
            SessionChannel::Widget => f.write_str("widget"),
        }
    }
}

/// Transport contract. A session owns exactly one transport for its
/// lifetime; implementations must be safe to call from concurrent tasks.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Which channel kind this transport serves.
    fn channel(&self) -> SessionChannel;

    /// Establish the connection (answer the call / accept the socket).
    /// Called once, during `Ringing`.
    async fn open(&self) -> anyhow::Result<()>;

    /// Deliver synthesized audio to the end user.
    async fn send_audio(&self, frame: Bytes) -> anyhow::Result<()>;

    /// Deliver agent text (widget chat fallback, captions).
    async fn send_text(&self, text: &str) -> anyhow::Result<()>;

    /// Redirect the call to a new destination (transfer). Transports that
    /// cannot transfer should return an error.
    async fn redirect(&self, destination: &str) -> anyhow::Result<()>;

    /// Release transport resources. Idempotent.
    async fn close(&self) -> anyhow::Result<()>;
}

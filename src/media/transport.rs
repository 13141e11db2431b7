//! Transport seam for peer media connections.
//!
//! The negotiation logic is agnostic to the concrete transport: it needs
//! a descriptor to advertise during the offer/answer exchange and a
//! connection with datagram send/receive. The production implementation
//! is [`crate::media::iroh::IrohConnector`].

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("transport endpoint unavailable: {0}")]
    Endpoint(String),
    #[error("invalid peer descriptor: {0}")]
    BadDescriptor(String),
    #[error("connecting to peer failed: {0}")]
    Connect(String),
    #[error("negotiation timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("session is closed")]
    Closed,
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Opens peer connections for one client process.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Transport descriptor advertised to peers in Offer/Answer payloads.
    async fn local_descriptor(&self) -> Result<String, NegotiationError>;

    /// Open a connection to the peer behind `remote`. Implementations
    /// must bound this internally; the caller does not add a timeout.
    async fn open(&self, remote: &str) -> Result<Box<dyn PeerConnection>, NegotiationError>;

    /// Transport-specific candidate hint. Address-exchange transports
    /// have nothing to do here.
    async fn add_candidate(&self, _remote: &str, _payload: &str) -> Result<(), NegotiationError> {
        Ok(())
    }
}

/// One established peer connection with datagram semantics: unordered,
/// unreliable, no retransmission.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn send(&self, frame: Bytes) -> Result<(), MediaError>;

    /// Next inbound frame; `None` once the connection has ended.
    async fn recv(&self) -> Option<Bytes>;

    async fn close(&self, reason: &str);
}

//! iroh-backed peer transport.
//!
//! Peers are addressed by the persistent public-key identity of their
//! iroh endpoint, so negotiation needs nothing beyond an address
//! exchange: the Offer/Answer payloads carry endpoint ids and Candidate
//! messages are ignored. Audio frames travel as QUIC datagrams.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use iroh::{Endpoint, EndpointId};
use log::{info, warn};

use crate::media::transport::{MediaError, NegotiationError, PeerConnection, PeerConnector};

pub const VOIP_ALPN: &[u8] = b"phonebell/voip/1";

/// Both sides learn each other's address at the same time and race
/// connect against accept; the attempt is abandoned after this long.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct IrohConnector {
    endpoint: Endpoint,
}

impl IrohConnector {
    pub async fn bind() -> Result<Self, NegotiationError> {
        let endpoint = Endpoint::builder()
            .alpns(vec![VOIP_ALPN.to_vec()])
            .bind()
            .await
            .map_err(|e| NegotiationError::Endpoint(e.to_string()))?;
        info!(target: "Media", "iroh endpoint bound with id {}", endpoint.id());
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl PeerConnector for IrohConnector {
    async fn local_descriptor(&self) -> Result<String, NegotiationError> {
        Ok(self.endpoint.id().to_string())
    }

    async fn open(&self, remote: &str) -> Result<Box<dyn PeerConnection>, NegotiationError> {
        let remote_id: EndpointId = remote
            .parse()
            .map_err(|_| NegotiationError::BadDescriptor(remote.to_string()))?;

        // Dial and accept concurrently; whichever connection lands first
        // carries the call.
        let conn = tokio::select! {
            dialed = self.endpoint.connect(remote_id, VOIP_ALPN) => {
                dialed.map_err(|e| NegotiationError::Connect(e.to_string()))?
            }
            incoming = self.endpoint.accept() => match incoming {
                Some(incoming) => incoming
                    .await
                    .map_err(|e| NegotiationError::Connect(e.to_string()))?,
                None => return Err(NegotiationError::Endpoint("endpoint closed".to_string())),
            },
            _ = tokio::time::sleep(CONNECT_TIMEOUT) => {
                warn!(target: "Media", "Connection attempt to {remote_id} timed out");
                return Err(NegotiationError::Timeout);
            }
        };

        info!(target: "Media", "Connected to peer endpoint {}", conn.remote_id());
        Ok(Box::new(IrohConnection { conn }))
    }
}

struct IrohConnection {
    conn: iroh::endpoint::Connection,
}

#[async_trait]
impl PeerConnection for IrohConnection {
    async fn send(&self, frame: Bytes) -> Result<(), MediaError> {
        self.conn
            .send_datagram(frame)
            .map_err(|e| MediaError::Transport(e.to_string()))
    }

    async fn recv(&self) -> Option<Bytes> {
        self.conn.read_datagram().await.ok()
    }

    async fn close(&self, reason: &str) {
        self.conn.close(0u32.into(), reason.as_bytes());
    }
}

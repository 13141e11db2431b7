//! One live peer media connection.
//!
//! A [`MediaSession`] is created when negotiation completes and owns the
//! connection until explicit close, transport failure, or a `Leave` from
//! its peer. The audio boundary consumes it through `send`/`receive`;
//! the peer manager keeps a [`SessionHandle`] so a `Leave` can tear the
//! connection down. When the transport dies on its own the session
//! closes itself and reports back so the manager can free its slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

use crate::media::transport::{MediaError, PeerConnection};

const FRAME_BUFFER: usize = 256;

/// Which side of the negotiation created this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Initiator,
    Responder,
}

impl std::fmt::Display for SessionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionRole::Initiator => "initiator",
            SessionRole::Responder => "responder",
        })
    }
}

/// Sent to the peer manager when a session ends on its own (transport
/// failure or abandoned consumer), never for manager-initiated closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnded {
    pub peer: String,
    pub reason: String,
}

struct SessionShared {
    peer: String,
    conn: Arc<dyn PeerConnection>,
    muted: AtomicBool,
    closed: AtomicBool,
    done: watch::Sender<bool>,
    ended_tx: mpsc::Sender<SessionEnded>,
}

impl SessionShared {
    /// Returns true if this call performed the close.
    async fn close(&self, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(target: "Media", "Closing session with {}: {reason}", self.peer);
        self.conn.close(reason).await;
        let _ = self.done.send(true);
        true
    }

    async fn end_autonomously(&self, reason: &str) {
        if self.close(reason).await {
            let _ = self
                .ended_tx
                .send(SessionEnded {
                    peer: self.peer.clone(),
                    reason: reason.to_string(),
                })
                .await;
        }
    }
}

/// Audio-side handle to the session.
pub struct MediaSession {
    shared: Arc<SessionShared>,
    frames: mpsc::Receiver<Bytes>,
}

/// Peer-manager-side handle to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

/// Wrap an established connection, spawning its receive pump.
pub fn establish(
    peer: String,
    role: SessionRole,
    conn: Box<dyn PeerConnection>,
    ended_tx: mpsc::Sender<SessionEnded>,
) -> (MediaSession, SessionHandle) {
    info!(target: "Media", "Session with {peer} established ({role})");

    let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
    let (done_tx, done_rx) = watch::channel(false);
    let shared = Arc::new(SessionShared {
        peer,
        conn: Arc::from(conn),
        // Transmission stays suppressed until the call layer unmutes.
        muted: AtomicBool::new(true),
        closed: AtomicBool::new(false),
        done: done_tx,
        ended_tx,
    });

    tokio::spawn(receive_pump(shared.clone(), frame_tx, done_rx));

    (
        MediaSession {
            shared: shared.clone(),
            frames: frame_rx,
        },
        SessionHandle { shared },
    )
}

async fn receive_pump(
    shared: Arc<SessionShared>,
    frame_tx: mpsc::Sender<Bytes>,
    mut done: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = shared.conn.recv() => match frame {
                Some(frame) => {
                    if frame_tx.send(frame).await.is_err() {
                        shared.end_autonomously("receiver dropped").await;
                        return;
                    }
                }
                None => {
                    shared.end_autonomously("transport ended").await;
                    return;
                }
            },
            _ = done.changed() => return,
        }
    }
}

impl MediaSession {
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Transmit one opaque audio frame. Datagram semantics: no ordering,
    /// no retransmission. Silently dropped while muted.
    pub async fn send(&self, frame: Bytes) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::Closed);
        }
        if self.shared.muted.load(Ordering::SeqCst) {
            debug!(target: "Media", "Muted, dropping outbound frame");
            return Ok(());
        }
        if let Err(e) = self.shared.conn.send(frame).await {
            warn!(target: "Media", "Send failed: {e}");
            self.shared.end_autonomously("transport failure").await;
            return Err(e);
        }
        Ok(())
    }

    /// Next inbound frame; `None` once the session has ended.
    pub async fn receive(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }

    /// Gate local transmission without tearing the session down.
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::SeqCst);
    }

    /// Graceful teardown; idempotent.
    pub async fn close(&self, reason: &str) {
        self.shared.close(reason).await;
    }
}

impl SessionHandle {
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub async fn close(&self, reason: &str) {
        self.shared.close(reason).await;
    }
}

//! Peer discovery and media negotiation.
//!
//! The [`PeerManager`] consumes signaling messages on a single task and
//! owns every piece of session state: the [`PeerRegistry`] and the one
//! session slot. Sessions report their own demise back into the same
//! task, so slot creation and teardown never race.
//!
//! A client never holds more than one live peer connection. Negotiation
//! attempts while the slot is occupied are ignored, with two escapes so
//! the slot cannot wedge: crossing offers resolve by id order (the
//! smaller side yields and answers), and an unanswered offer expires.

mod registry;

pub use registry::PeerRegistry;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

use crate::media::session::{self, SessionEnded, SessionHandle, SessionRole};
use crate::media::transport::{PeerConnection, PeerConnector};
use crate::protocol::SignalMessage;

const SESSION_BUFFER: usize = 4;
const ENDED_BUFFER: usize = 8;

/// An offer that draws no answer is abandoned after this long, freeing
/// the slot for the next discovery round.
const OFFER_TIMEOUT: Duration = Duration::from_secs(10);

enum Slot {
    Idle,
    /// Offer sent, waiting for the peer's Answer.
    AwaitingAnswer { peer: String, expires: Instant },
    Live { handle: SessionHandle },
}

impl Slot {
    fn peer(&self) -> Option<&str> {
        match self {
            Slot::Idle => None,
            Slot::AwaitingAnswer { peer, .. } => Some(peer),
            Slot::Live { handle } => Some(handle.peer()),
        }
    }

    fn is_idle(&self) -> bool {
        matches!(self, Slot::Idle)
    }
}

pub struct PeerManager {
    self_id: String,
    connector: Arc<dyn PeerConnector>,
    registry: PeerRegistry,
    slot: Slot,
    signal_tx: mpsc::Sender<SignalMessage>,
    sessions_tx: mpsc::Sender<crate::media::MediaSession>,
    ended_tx: mpsc::Sender<SessionEnded>,
    ended_rx: Option<mpsc::Receiver<SessionEnded>>,
}

impl PeerManager {
    /// Returns the manager plus the receiver on which established
    /// sessions are handed to the audio boundary.
    pub fn new(
        self_id: String,
        connector: Arc<dyn PeerConnector>,
        signal_tx: mpsc::Sender<SignalMessage>,
    ) -> (Self, mpsc::Receiver<crate::media::MediaSession>) {
        let (sessions_tx, sessions_rx) = mpsc::channel(SESSION_BUFFER);
        let (ended_tx, ended_rx) = mpsc::channel(ENDED_BUFFER);
        let manager = Self {
            self_id,
            connector,
            registry: PeerRegistry::new(),
            slot: Slot::Idle,
            signal_tx,
            sessions_tx,
            ended_tx,
            ended_rx: Some(ended_rx),
        };
        (manager, sessions_rx)
    }

    pub async fn run(
        mut self,
        mut signals: mpsc::Receiver<SignalMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Some(mut ended_rx) = self.ended_rx.take() else {
            return;
        };

        loop {
            let offer_expiry = match &self.slot {
                Slot::AwaitingAnswer { expires, .. } => Some(*expires),
                _ => None,
            };

            tokio::select! {
                _ = shutdown.changed() => {
                    if let Slot::Live { handle } = &self.slot {
                        handle.close("shutting down").await;
                    }
                    return;
                }

                message = signals.recv() => match message {
                    Some(message) => self.handle_signal(message).await,
                    None => return,
                },

                ended = ended_rx.recv() => {
                    if let Some(event) = ended {
                        self.handle_ended(event);
                    }
                }

                _ = sleep_until(offer_expiry.unwrap_or_else(Instant::now)), if offer_expiry.is_some() => {
                    if let Slot::AwaitingAnswer { peer, .. } =
                        std::mem::replace(&mut self.slot, Slot::Idle)
                    {
                        warn!(target: "Peer", "Offer to {peer} went unanswered, abandoning");
                    }
                }
            }
        }
    }

    async fn handle_signal(&mut self, message: SignalMessage) {
        // Our own broadcasts come back to us; drop them, along with
        // anything addressed to somebody else.
        if message.sender() == self.self_id {
            return;
        }
        if let Some(to) = message.recipient()
            && to != self.self_id
        {
            return;
        }

        match message {
            SignalMessage::Join { from } => {
                info!(target: "Peer", "Peer joined: {from}");
                self.emit(SignalMessage::JoinAck {
                    from: self.self_id.clone(),
                })
                .await;
            }

            SignalMessage::JoinAck { from } => {
                if !self.slot.is_idle() {
                    debug!(target: "Peer", "Session slot busy, ignoring JoinAck from {from}");
                    return;
                }
                let descriptor = match self.connector.local_descriptor().await {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        warn!(target: "Peer", "Cannot start negotiation with {from}: {e}");
                        return;
                    }
                };
                info!(target: "Peer", "Offering session to {from}");
                self.emit(SignalMessage::Offer {
                    from: self.self_id.clone(),
                    to: from.clone(),
                    payload: descriptor,
                })
                .await;
                self.slot = Slot::AwaitingAnswer {
                    peer: from,
                    expires: Instant::now() + OFFER_TIMEOUT,
                };
            }

            SignalMessage::Offer { from, payload, .. } => {
                match &self.slot {
                    Slot::Idle => {}
                    // Both sides offered at once. The smaller id yields
                    // and answers; the larger keeps its offer outstanding
                    // and waits for that answer.
                    Slot::AwaitingAnswer { peer, .. }
                        if *peer == from && self.self_id < from =>
                    {
                        info!(target: "Peer", "Simultaneous offers with {from}, yielding");
                        self.slot = Slot::Idle;
                    }
                    _ => {
                        info!(target: "Peer", "Session slot busy, refusing offer from {from}");
                        return;
                    }
                }
                let descriptor = match self.connector.local_descriptor().await {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        warn!(target: "Peer", "Cannot answer {from}: {e}");
                        return;
                    }
                };
                self.registry.record(&from, &payload);
                // Answer before opening: the initiator needs our address
                // to join the connect race from its side.
                self.emit(SignalMessage::Answer {
                    from: self.self_id.clone(),
                    to: from.clone(),
                    payload: descriptor,
                })
                .await;
                self.connect_to(from, &payload, SessionRole::Responder).await;
            }

            SignalMessage::Answer { from, payload, .. } => {
                match &self.slot {
                    Slot::AwaitingAnswer { peer, .. } if *peer == from => {}
                    _ => {
                        debug!(target: "Peer", "Unexpected answer from {from}, ignoring");
                        return;
                    }
                }
                self.registry.record(&from, &payload);
                self.slot = Slot::Idle;
                self.connect_to(from, &payload, SessionRole::Initiator).await;
            }

            SignalMessage::Candidate { from, payload, .. } => {
                if self.slot.peer() == Some(from.as_str()) {
                    if let Err(e) = self.connector.add_candidate(&from, &payload).await {
                        debug!(target: "Peer", "Candidate from {from} rejected: {e}");
                    }
                } else {
                    debug!(target: "Peer", "Candidate from {from} without session, ignoring");
                }
            }

            SignalMessage::Leave { from } => {
                info!(target: "Peer", "Peer left: {from}");
                self.registry.forget(&from);
                if self.slot.peer() == Some(from.as_str()) {
                    if let Slot::Live { handle } = &self.slot {
                        handle.close("peer left").await;
                    }
                    self.slot = Slot::Idle;
                }
            }
        }
    }

    /// Open the transport connection and fill the slot. On failure the
    /// attempt is discarded; the peer stays eligible for a future Join.
    async fn connect_to(&mut self, peer: String, address: &str, role: SessionRole) {
        match self.connector.open(address).await {
            Ok(conn) => self.install_session(peer, role, conn),
            Err(e) => {
                warn!(target: "Peer", "Negotiation with {peer} failed: {e}");
                self.registry.forget(&peer);
                self.slot = Slot::Idle;
            }
        }
    }

    fn install_session(&mut self, peer: String, role: SessionRole, conn: Box<dyn PeerConnection>) {
        let (media, handle) = session::establish(peer, role, conn, self.ended_tx.clone());
        if let Err(e) = self.sessions_tx.try_send(media) {
            // Nobody is consuming sessions; the dropped session reports
            // itself ended and the slot frees up again.
            warn!(target: "Peer", "No session consumer: {e}");
        }
        self.slot = Slot::Live { handle };
    }

    fn handle_ended(&mut self, event: SessionEnded) {
        if self.slot.peer() == Some(event.peer.as_str()) {
            info!(target: "Peer", "Session with {} ended: {}", event.peer, event.reason);
            self.registry.forget(&event.peer);
            self.slot = Slot::Idle;
        }
    }

    async fn emit(&self, message: SignalMessage) {
        if self.signal_tx.send(message).await.is_err() {
            warn!(target: "Peer", "Signaling channel gone, dropping outbound message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::transport::mock::{FailingConnector, MockConnector};

    struct Harness {
        manager: PeerManager,
        signals: mpsc::Receiver<SignalMessage>,
        sessions: mpsc::Receiver<crate::media::MediaSession>,
        connector: Arc<MockConnector>,
    }

    fn harness() -> Harness {
        let (signal_tx, signals) = mpsc::channel(16);
        let connector = Arc::new(MockConnector::new("self-addr"));
        let (manager, sessions) =
            PeerManager::new("a".to_string(), connector.clone(), signal_tx);
        Harness {
            manager,
            signals,
            sessions,
            connector,
        }
    }

    fn join(from: &str) -> SignalMessage {
        SignalMessage::Join {
            from: from.to_string(),
        }
    }

    fn join_ack(from: &str) -> SignalMessage {
        SignalMessage::JoinAck {
            from: from.to_string(),
        }
    }

    fn offer(from: &str, to: &str, payload: &str) -> SignalMessage {
        SignalMessage::Offer {
            from: from.to_string(),
            to: to.to_string(),
            payload: payload.to_string(),
        }
    }

    fn answer(from: &str, to: &str, payload: &str) -> SignalMessage {
        SignalMessage::Answer {
            from: from.to_string(),
            to: to.to_string(),
            payload: payload.to_string(),
        }
    }

    #[tokio::test]
    async fn join_is_acknowledged() {
        let mut h = harness();
        h.manager.handle_signal(join("b")).await;

        assert_eq!(
            h.signals.try_recv().unwrap(),
            SignalMessage::JoinAck {
                from: "a".to_string()
            }
        );
    }

    #[tokio::test]
    async fn own_messages_are_ignored() {
        let mut h = harness();
        h.manager.handle_signal(join("a")).await;
        h.manager.handle_signal(join_ack("a")).await;

        assert!(h.signals.try_recv().is_err());
        assert!(h.manager.slot.is_idle());
    }

    #[tokio::test]
    async fn messages_for_others_are_ignored() {
        let mut h = harness();
        h.manager.handle_signal(offer("b", "z", "addr-b")).await;

        assert!(h.signals.try_recv().is_err());
        assert!(h.manager.slot.is_idle());
    }

    #[tokio::test]
    async fn join_ack_triggers_offer() {
        let mut h = harness();
        h.manager.handle_signal(join_ack("b")).await;

        assert_eq!(
            h.signals.try_recv().unwrap(),
            SignalMessage::Offer {
                from: "a".to_string(),
                to: "b".to_string(),
                payload: "self-addr".to_string(),
            }
        );
        assert_eq!(h.manager.slot.peer(), Some("b"));
    }

    #[tokio::test]
    async fn offer_creates_responder_session() {
        let mut h = harness();
        h.manager.handle_signal(offer("b", "a", "addr-b")).await;

        assert_eq!(
            h.signals.try_recv().unwrap(),
            SignalMessage::Answer {
                from: "a".to_string(),
                to: "b".to_string(),
                payload: "self-addr".to_string(),
            }
        );
        let session = h.sessions.try_recv().unwrap();
        assert_eq!(session.peer(), "b");
        assert_eq!(h.manager.registry.address_of("b"), Some("addr-b"));
        assert!(matches!(h.manager.slot, Slot::Live { .. }));
    }

    #[tokio::test]
    async fn answer_completes_initiator_session() {
        let mut h = harness();
        h.manager.handle_signal(join_ack("b")).await;
        let _offer = h.signals.try_recv().unwrap();

        h.manager.handle_signal(answer("b", "a", "addr-b")).await;

        let session = h.sessions.try_recv().unwrap();
        assert_eq!(session.peer(), "b");
        assert!(matches!(h.manager.slot, Slot::Live { .. }));
    }

    #[tokio::test]
    async fn answer_from_wrong_peer_is_ignored() {
        let mut h = harness();
        h.manager.handle_signal(join_ack("b")).await;
        let _offer = h.signals.try_recv().unwrap();

        h.manager.handle_signal(answer("c", "a", "addr-c")).await;

        assert!(h.sessions.try_recv().is_err());
        assert_eq!(h.manager.slot.peer(), Some("b"));
    }

    /// At most one session exists no matter how many peers negotiate.
    #[tokio::test]
    async fn single_session_across_multiple_peers() {
        let mut h = harness();
        h.manager.handle_signal(offer("b", "a", "addr-b")).await;
        let _answer = h.signals.try_recv().unwrap();

        // Peer c shows up while b's session is live.
        h.manager.handle_signal(join_ack("c")).await;
        h.manager.handle_signal(offer("c", "a", "addr-c")).await;

        assert!(h.signals.try_recv().is_err(), "no offer or answer to c");
        assert_eq!(h.sessions.try_recv().unwrap().peer(), "b");
        assert!(h.sessions.try_recv().is_err());
        assert_eq!(h.connector.opened.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    /// A duplicate JoinAck from the connected peer is idempotent.
    #[tokio::test]
    async fn duplicate_join_ack_is_idempotent() {
        let mut h = harness();
        h.manager.handle_signal(offer("b", "a", "addr-b")).await;
        let _answer = h.signals.try_recv().unwrap();

        h.manager.handle_signal(join_ack("b")).await;
        assert!(h.signals.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_tears_down_session_and_registry() {
        let mut h = harness();
        h.manager.handle_signal(offer("b", "a", "addr-b")).await;
        let mut session = h.sessions.try_recv().unwrap();

        h.manager
            .handle_signal(SignalMessage::Leave {
                from: "b".to_string(),
            })
            .await;

        assert!(h.manager.slot.is_idle());
        assert!(h.manager.registry.is_empty());
        assert_eq!(session.receive().await, None);
    }

    #[tokio::test]
    async fn leave_without_session_is_noop() {
        let mut h = harness();
        h.manager
            .handle_signal(SignalMessage::Leave {
                from: "stranger".to_string(),
            })
            .await;

        assert!(h.manager.slot.is_idle());
        assert!(h.manager.registry.is_empty());
    }

    /// A failed transport open discards the attempt; the peer stays
    /// eligible for a future discovery round.
    #[tokio::test]
    async fn failed_negotiation_frees_slot() {
        let (signal_tx, mut signals) = mpsc::channel(16);
        let (mut manager, mut sessions) = PeerManager::new(
            "a".to_string(),
            Arc::new(FailingConnector),
            signal_tx,
        );

        manager.handle_signal(offer("b", "a", "addr-b")).await;

        // The answer went out before the open failed.
        assert!(matches!(
            signals.try_recv().unwrap(),
            SignalMessage::Answer { .. }
        ));
        assert!(sessions.try_recv().is_err());
        assert!(manager.slot.is_idle());
        assert!(manager.registry.is_empty());
    }

    /// Both handsets boot together: each offers before seeing the
    /// other's offer. The smaller id yields and answers instead of
    /// refusing, so the glare resolves into a session.
    #[tokio::test]
    async fn simultaneous_offers_yield_to_smaller_id() {
        let mut h = harness();
        h.manager.handle_signal(join_ack("b")).await;
        let _offer = h.signals.try_recv().unwrap();

        // b's own offer crosses ours on the wire.
        h.manager.handle_signal(offer("b", "a", "addr-b")).await;

        assert!(matches!(
            h.signals.try_recv().unwrap(),
            SignalMessage::Answer { .. }
        ));
        assert_eq!(h.sessions.try_recv().unwrap().peer(), "b");
        assert!(matches!(h.manager.slot, Slot::Live { .. }));
    }

    #[tokio::test]
    async fn simultaneous_offers_larger_id_keeps_initiating() {
        let (signal_tx, mut signals) = mpsc::channel(16);
        let connector = Arc::new(MockConnector::new("self-addr"));
        let (mut manager, mut sessions) =
            PeerManager::new("z".to_string(), connector, signal_tx);

        manager.handle_signal(join_ack("b")).await;
        let _offer = signals.try_recv().unwrap();

        // z > b: the crossing offer is ignored, b yields and answers.
        manager.handle_signal(offer("b", "z", "addr-b")).await;
        assert!(signals.try_recv().is_err());
        assert!(sessions.try_recv().is_err());
        assert_eq!(manager.slot.peer(), Some("b"));

        manager.handle_signal(answer("b", "z", "addr-b")).await;
        assert_eq!(sessions.try_recv().unwrap().peer(), "b");
    }

    /// An offer nobody answers expires, freeing the slot for the next
    /// discovery round.
    #[tokio::test(start_paused = true)]
    async fn unanswered_offer_expires() {
        let (signal_tx, mut signals) = mpsc::channel(16);
        let connector = Arc::new(MockConnector::new("self-addr"));
        let (manager, _sessions) =
            PeerManager::new("a".to_string(), connector, signal_tx);
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(manager.run(inbound_rx, shutdown_rx));

        inbound_tx.send(join_ack("b")).await.unwrap();
        assert!(matches!(
            signals.recv().await.unwrap(),
            SignalMessage::Offer { ref to, .. } if to.as_str() == "b"
        ));

        // b never answers.
        tokio::time::sleep(OFFER_TIMEOUT + Duration::from_secs(1)).await;

        inbound_tx.send(join_ack("c")).await.unwrap();
        assert!(matches!(
            signals.recv().await.unwrap(),
            SignalMessage::Offer { ref to, .. } if to.as_str() == "c"
        ));
    }

    #[tokio::test]
    async fn session_end_event_frees_slot() {
        let mut h = harness();
        h.manager.handle_signal(offer("b", "a", "addr-b")).await;
        assert!(matches!(h.manager.slot, Slot::Live { .. }));

        h.manager.handle_ended(SessionEnded {
            peer: "b".to_string(),
            reason: "transport ended".to_string(),
        });

        assert!(h.manager.slot.is_idle());
        assert!(!h.manager.registry.contains("b"));

        // The peer can negotiate again afterwards.
        h.manager.handle_signal(join_ack("b")).await;
        assert!(matches!(
            h.signals.try_recv().unwrap(),
            SignalMessage::Offer { .. }
        ));
    }
}

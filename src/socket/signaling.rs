//! Shared peer-signaling channel.
//!
//! Every running client announces itself here and relays point-to-point
//! negotiation messages. The socket keeps the channel alive (same
//! reconnect policy as the control channel, with a full re-Join after
//! every reconnect) and moves parsed [`SignalMessage`]s between the
//! relay and the peer manager; all protocol decisions live in the peer
//! manager. Shutdown broadcasts `Leave` before the channel closes.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::Config;
use crate::protocol::SignalMessage;
use crate::socket::{Result, SessionEnd};

const OUTGOING_BUFFER: usize = 64;
const INCOMING_BUFFER: usize = 64;

pub struct SignalingSocket {
    config: Arc<Config>,
    client_id: String,
    outgoing: mpsc::Receiver<SignalMessage>,
    incoming: mpsc::Sender<SignalMessage>,
    shutdown: watch::Receiver<bool>,
}

impl SignalingSocket {
    /// Returns the socket plus the peer manager's ends of its queues.
    pub fn new(
        config: Arc<Config>,
        client_id: String,
        shutdown: watch::Receiver<bool>,
    ) -> (
        Self,
        mpsc::Sender<SignalMessage>,
        mpsc::Receiver<SignalMessage>,
    ) {
        let (signal_tx, signal_rx) = mpsc::channel(OUTGOING_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(INCOMING_BUFFER);
        let socket = Self {
            config,
            client_id,
            outgoing: signal_rx,
            incoming: inbound_tx,
            shutdown,
        };
        (socket, signal_tx, inbound_rx)
    }

    pub async fn run(mut self) {
        loop {
            match self.connect_and_run().await {
                Ok(SessionEnd::ShuttingDown) => return,
                Ok(SessionEnd::Closed) => {
                    info!(target: "Signaling", "Channel closed, reconnecting");
                }
                Err(e) => {
                    warn!(target: "Signaling", "Channel error: {e}, reconnecting");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = self.shutdown.changed() => return,
            }
        }
    }

    async fn connect_and_run(&mut self) -> Result<SessionEnd> {
        let url = self.config.signaling_url();
        let (stream, _) = connect_async(&url).await?;
        let (mut write, mut read) = stream.split();

        info!(target: "Signaling", "Connected to {url}");

        // The relay probes with a ping before it accepts data; answer it
        // before announcing ourselves.
        if let Some(Ok(Message::Ping(data))) = read.next().await {
            write.send(Message::Pong(data)).await?;
        }

        let join = SignalMessage::Join {
            from: self.client_id.clone(),
        };
        if let Ok(text) = serde_json::to_string(&join) {
            write.send(Message::Text(text.into())).await?;
        }

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(data))) => {
                        match serde_json::from_str::<SignalMessage>(&data) {
                            Ok(message) => {
                                debug!(target: "Signaling", "<-- {message:?}");
                                if self.incoming.send(message).await.is_err() {
                                    return Ok(SessionEnd::ShuttingDown);
                                }
                            }
                            Err(_) => {
                                debug!(target: "Signaling", "Dropping malformed message");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(_)) => {}
                },

                message = self.outgoing.recv() => match message {
                    Some(message) => {
                        debug!(target: "Signaling", "--> {message:?}");
                        if let Ok(text) = serde_json::to_string(&message) {
                            write.send(Message::Text(text.into())).await?;
                        }
                    }
                    None => return Ok(SessionEnd::ShuttingDown),
                },

                _ = self.shutdown.changed() => {
                    // Last words: let peers drop us before the socket dies.
                    let leave = SignalMessage::Leave {
                        from: self.client_id.clone(),
                    };
                    if let Ok(text) = serde_json::to_string(&leave) {
                        let _ = write.send(Message::Text(text.into())).await;
                    }
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::ShuttingDown);
                }
            }
        }
    }
}

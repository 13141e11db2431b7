//! Role-scoped control channel to the relay.
//!
//! Carries Hook/Dial events out and Ring/ClearDial commands in. The
//! channel reconnects forever on a fixed backoff, repeating the
//! credential handshake on every connect. Events queued while the
//! channel is down are dropped, not replayed.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::Config;
use crate::protocol::{ControlCommand, ControlEvent};
use crate::socket::{Result, SessionEnd};

const OUTGOING_BUFFER: usize = 64;
const INCOMING_BUFFER: usize = 64;

pub struct ControlSocket {
    config: Arc<Config>,
    outgoing: mpsc::Receiver<ControlEvent>,
    incoming: mpsc::Sender<ControlCommand>,
    shutdown: watch::Receiver<bool>,
}

impl ControlSocket {
    /// Returns the socket plus the caller's ends of its two queues: a
    /// sender for outbound events and a receiver for relay commands.
    pub fn new(
        config: Arc<Config>,
        shutdown: watch::Receiver<bool>,
    ) -> (
        Self,
        mpsc::Sender<ControlEvent>,
        mpsc::Receiver<ControlCommand>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(OUTGOING_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(INCOMING_BUFFER);
        let socket = Self {
            config,
            outgoing: event_rx,
            incoming: command_tx,
            shutdown,
        };
        (socket, event_tx, command_rx)
    }

    pub async fn run(mut self) {
        loop {
            match self.connect_and_run().await {
                Ok(SessionEnd::ShuttingDown) => return,
                Ok(SessionEnd::Closed) => {
                    info!(target: "Control", "Channel closed, reconnecting");
                }
                Err(e) => {
                    warn!(target: "Control", "Channel error: {e}, reconnecting");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = self.shutdown.changed() => return,
            }
        }
    }

    /// Events are best-effort; anything queued while disconnected is
    /// dropped rather than replayed against the fresh connection. Runs
    /// after the handshake so events enqueued during the backoff or the
    /// connect itself are covered too.
    fn drop_pending(&mut self) {
        while let Ok(event) = self.outgoing.try_recv() {
            warn!(target: "Control", "Dropping stale {event:?}");
        }
    }

    async fn connect_and_run(&mut self) -> Result<SessionEnd> {
        let url = self.config.control_url();
        let (stream, _) = connect_async(&url).await?;
        let (mut write, mut read) = stream.split();

        // The relay expects the credential before any event.
        write
            .send(Message::Text(self.config.api_key.clone().into()))
            .await?;

        self.drop_pending();

        info!(target: "Control", "Connected to {url}");

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(data))) => {
                        match serde_json::from_str::<ControlCommand>(&data) {
                            Ok(command) => {
                                debug!(target: "Control", "<-- {command:?}");
                                if self.incoming.send(command).await.is_err() {
                                    return Ok(SessionEnd::ShuttingDown);
                                }
                            }
                            Err(_) => {
                                debug!(target: "Control", "Dropping malformed message");
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

                event = self.outgoing.recv() => match event {
                    Some(event) => {
                        debug!(target: "Control", "--> {event:?}");
                        if let Ok(text) = serde_json::to_string(&event) {
                            write.send(Message::Text(text.into())).await?;
                        }
                    }
                    None => return Ok(SessionEnd::ShuttingDown),
                },

                _ = self.shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::ShuttingDown);
                }
            }
        }
    }
}

//! Wiring for one handset process.
//!
//! [`PhoneClient::start`] builds the two relay sockets, the peer
//! manager, and the call loop, connects them with channels, and spawns
//! each on its own task. The hardware boundary talks to the client
//! through an input queue and a state watch; established media sessions
//! come out of a session queue.

use std::sync::Arc;

use log::warn;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::call::{CallState, CallStateMachine, PhoneInput};
use crate::config::Config;
use crate::directory::NumberDirectory;
use crate::media::MediaSession;
use crate::media::transport::PeerConnector;
use crate::peer::PeerManager;
use crate::protocol::{ControlCommand, ControlEvent};
use crate::socket::{ControlSocket, SignalingSocket};

const INPUT_BUFFER: usize = 32;

pub struct PhoneClient {
    client_id: String,
    input_tx: mpsc::Sender<PhoneInput>,
    state_rx: watch::Receiver<CallState>,
    sessions_rx: Option<mpsc::Receiver<MediaSession>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PhoneClient {
    /// Wire everything up and spawn the channel tasks. Each relay socket
    /// maintains its own connection and reconnects on failure; the peer
    /// manager and call loop run until shutdown.
    pub fn start(config: Config, connector: Arc<dyn PeerConnector>) -> Self {
        let config = Arc::new(config);
        let client_id = Uuid::new_v4().to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (control, event_tx, command_rx) =
            ControlSocket::new(config.clone(), shutdown_rx.clone());
        let (signaling, signal_tx, signal_rx) =
            SignalingSocket::new(config.clone(), client_id.clone(), shutdown_rx.clone());
        let (peers, sessions_rx) = PeerManager::new(client_id.clone(), connector, signal_tx);

        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let (state_tx, state_rx) = watch::channel(CallState::default());

        let tasks = vec![
            tokio::spawn(control.run()),
            tokio::spawn(signaling.run()),
            tokio::spawn(peers.run(signal_rx, shutdown_rx.clone())),
            tokio::spawn(call_loop(
                input_rx,
                command_rx,
                event_tx,
                state_tx,
                shutdown_rx,
            )),
        ];

        Self {
            client_id,
            input_tx,
            state_rx,
            sessions_rx: Some(sessions_rx),
            shutdown_tx,
            tasks,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Queue for hook and digit inputs from the hardware boundary.
    pub fn inputs(&self) -> mpsc::Sender<PhoneInput> {
        self.input_tx.clone()
    }

    /// Watch over the call-control state; drives bell and mute.
    pub fn state(&self) -> watch::Receiver<CallState> {
        self.state_rx.clone()
    }

    /// Established media sessions, one at a time. Yields `None` after the
    /// first call; there is a single consumer.
    pub fn take_sessions(&mut self) -> Option<mpsc::Receiver<MediaSession>> {
        self.sessions_rx.take()
    }

    /// Signal every task to stop and wait for them to wind down. The
    /// signaling socket announces our departure before closing.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

/// Drives the [`CallStateMachine`] from local inputs and relay commands,
/// publishing a state snapshot after every transition.
async fn call_loop(
    mut inputs: mpsc::Receiver<PhoneInput>,
    mut commands: mpsc::Receiver<ControlCommand>,
    events: mpsc::Sender<ControlEvent>,
    state_tx: watch::Sender<CallState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut machine = CallStateMachine::new(NumberDirectory::default());

    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => return,

            input = inputs.recv() => match input {
                Some(input) => machine.handle_input(input),
                None => return,
            },

            command = commands.recv() => match command {
                Some(command) => {
                    machine.apply(command);
                    None
                }
                None => return,
            },
        };

        if let Some(event) = event {
            // Best effort: a full queue (relay down) never blocks or
            // rolls back the transition.
            if let Err(e) = events.try_send(event) {
                warn!(target: "Call", "Control event dropped: {e}");
            }
        }
        state_tx.send_replace(machine.state().clone());
    }
}

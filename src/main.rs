use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use phonebell::call::PhoneInput;
use phonebell::client::PhoneClient;
use phonebell::config::{Config, PhoneSide};
use phonebell::media::MediaSession;
use phonebell::media::iroh::IrohConnector;

/// One handset of a two-handset internet phone.
///
/// Reads handset input from stdin: digits dial, `h` toggles the hook
/// switch. The relay credential comes from the PHONE_API_KEY
/// environment variable.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Which handset this process is.
    #[arg(value_enum)]
    side: PhoneSide,

    /// Relay base URL override.
    #[arg(long)]
    relay: Option<String>,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let config = match Config::from_env(args.side, args.relay) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    rt.block_on(async {
        let connector = match IrohConnector::bind().await {
            Ok(connector) => Arc::new(connector),
            Err(e) => {
                error!("Failed to bind media endpoint: {e}");
                return;
            }
        };

        let mut client = PhoneClient::start(config, connector);
        info!("Handset {} up, client id {}", args.side, client.client_id());

        if let Some(sessions) = client.take_sessions() {
            tokio::spawn(audio_task(sessions, client.state()));
        }
        tokio::spawn(display_task(client.state()));
        tokio::spawn(stdin_task(client.inputs()));

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
        }
        info!("Shutting down");
        client.shutdown().await;
    });
}

/// Stand-in for the handset hardware: digits dial, `h` toggles the hook.
async fn stdin_task(inputs: tokio::sync::mpsc::Sender<PhoneInput>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut hooked = true;

    while let Ok(Some(line)) = lines.next_line().await {
        for c in line.trim().chars() {
            let input = match c {
                'h' | 'H' => {
                    hooked = !hooked;
                    PhoneInput::Hook { state: hooked }
                }
                d if d.is_ascii_digit() => PhoneInput::Digit(d),
                _ => {
                    warn!("Ignoring input {c:?}");
                    continue;
                }
            };
            if inputs.send(input).await.is_err() {
                return;
            }
        }
    }
}

/// Logs every call-state transition in place of bell and dial hardware.
async fn display_task(mut state: tokio::sync::watch::Receiver<phonebell::call::CallState>) {
    loop {
        let snapshot = state.borrow_and_update().clone();
        info!(
            target: "Call",
            "hook={} ring={} dialed={:?} in_call={}",
            if snapshot.hooked { "on" } else { "off" },
            snapshot.ringing,
            snapshot.dialed_number,
            snapshot.in_call,
        );
        if state.changed().await.is_err() {
            return;
        }
    }
}

/// Consumes media sessions one at a time, keeping the session mute flag
/// in step with the call state. Real audio capture would feed `send`
/// here; this binary only drains and counts inbound frames.
async fn audio_task(
    mut sessions: tokio::sync::mpsc::Receiver<MediaSession>,
    state: tokio::sync::watch::Receiver<phonebell::call::CallState>,
) {
    while let Some(mut session) = sessions.recv().await {
        info!(target: "Audio", "Media session with {} up", session.peer());
        let mut state = state.clone();
        session.set_muted(state.borrow_and_update().muted());

        let mut frames: u64 = 0;
        loop {
            tokio::select! {
                frame = session.receive() => match frame {
                    Some(_) => frames += 1,
                    None => break,
                },
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    session.set_muted(state.borrow_and_update().muted());
                }
            }
        }
        info!(target: "Audio", "Media session with {} ended after {frames} frames", session.peer());
    }
}

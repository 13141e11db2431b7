pub mod control;
pub mod error;
pub mod signaling;

pub use control::ControlSocket;
pub use error::{Result, SocketError};
pub use signaling::SignalingSocket;

/// Why one WebSocket session ended. `Closed` sessions are reconnected
/// after the fixed backoff; `ShuttingDown` stops the reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    Closed,
    ShuttingDown,
}

//! Wire types for the two relay WebSocket channels.
//!
//! Both channels speak JSON tagged unions discriminated by a `type` field.
//! Anything that fails to parse against these shapes is dropped by the
//! socket layer without affecting channel health.

use serde::{Deserialize, Serialize};

/// Events the phone sends to the relay over its role-scoped control channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ControlEvent {
    Dial { number: String },
    Hook { state: bool },
}

/// Commands the relay sends back over the control channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ControlCommand {
    Ring { state: bool },
    ClearDial,
}

/// Peer discovery and negotiation messages relayed on the shared
/// signaling channel. Point-to-point kinds carry a `to` recipient and an
/// opaque transport payload; broadcast kinds carry only the sender.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum SignalMessage {
    Join {
        from: String,
    },
    JoinAck {
        from: String,
    },
    Offer {
        from: String,
        to: String,
        payload: String,
    },
    Answer {
        from: String,
        to: String,
        payload: String,
    },
    Candidate {
        from: String,
        to: String,
        payload: String,
    },
    Leave {
        from: String,
    },
}

impl SignalMessage {
    pub fn sender(&self) -> &str {
        match self {
            SignalMessage::Join { from }
            | SignalMessage::JoinAck { from }
            | SignalMessage::Offer { from, .. }
            | SignalMessage::Answer { from, .. }
            | SignalMessage::Candidate { from, .. }
            | SignalMessage::Leave { from } => from,
        }
    }

    /// Recipient of a point-to-point message; `None` for broadcast kinds.
    pub fn recipient(&self) -> Option<&str> {
        match self {
            SignalMessage::Offer { to, .. }
            | SignalMessage::Answer { to, .. }
            | SignalMessage::Candidate { to, .. } => Some(to),
            SignalMessage::Join { .. }
            | SignalMessage::JoinAck { .. }
            | SignalMessage::Leave { .. } => None,
        }
    }
}

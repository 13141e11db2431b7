//! Call control and peer signaling for a two-handset internet phone.
//!
//! Each handset runs one [`client::PhoneClient`]: a call-control state
//! machine fed by hook and dial inputs, two WebSocket channels to a
//! shared relay (control events and peer signaling), and a peer-to-peer
//! media session negotiated over the signaling channel.

pub mod call;
pub mod client;
pub mod config;
pub mod directory;
pub mod media;
pub mod peer;
pub mod protocol;
pub mod socket;

pub mod iroh;
pub mod session;
pub mod transport;

pub use session::{MediaSession, SessionEnded, SessionHandle, SessionRole};
pub use transport::{MediaError, NegotiationError, PeerConnection, PeerConnector};

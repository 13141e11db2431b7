use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket is closed")]
    Closed,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SocketError>;

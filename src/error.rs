//! Error types shared across the engine.
//!
//! Buffer and frame errors are recovered where they happen and only logged.
//! Fetch and transport errors are surfaced to the caller because recovery
//! needs an explicit reload or reconnect.

/// A chunk did not start where the mirror currently ends.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("broken stream: expected offset {expected}, got {got}")]
pub struct BrokenStream {
    pub expected: u64,
    pub got: u64,
}

/// Full-reload fetch failures.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("invalid X-PtyDataOffset header: {0}")]
    InvalidOffset(String),

    #[error("invalid fetch endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Reported by an embedding host that performs the fetch itself.
    #[error("fetch failed: {0}")]
    Host(String),
}

/// A framed line that could not be turned into a packet.
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("line has no packet marker")]
    MissingMarker,

    #[error("packet has no json body")]
    MissingBody,

    #[error("bad packet json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Duplex transport failures.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("cannot connect: gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("connection dropped before a response arrived")]
    Disconnected,

    #[error("transport task has shut down")]
    Closed,

    #[error("request {0} was replaced by a newer request with the same id")]
    DuplicateRequest(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("bad message json: {0}")]
    Json(#[from] serde_json::Error),
}

/// The session task behind a handle has exited.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("session task has shut down")]
pub struct SessionClosed;

//! Errors surfaced by the camera client.
//!
//! Network and protocol failures are both plain values: callers treat
//! any `Err` as "the command did not take effect" and retry on the next
//! tick or user action.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    /// Issued while no camera link is up; no request was sent.
    #[error("not connected to a camera")]
    NotConnected,

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("camera answered HTTP {0}")]
    Status(u16),

    #[error("camera rejected the command: {0:?}")]
    Rejected(String),

    /// Wake-up command number `step` (0-based) did not succeed.
    #[error("handshake failed at step {step}: {source}")]
    Handshake {
        step: usize,
        #[source]
        source: Box<CameraError>,
    },

    #[error("no Wi-Fi gateway found")]
    NoGateway,

    #[error("unknown device family {0:?}")]
    UnknownFamily(String),

    #[error("cannot build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl CameraError {
    /// True for failures where the camera never produced a usable reply.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Status(_))
    }
}

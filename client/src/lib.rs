//! Client for Wi-Fi dashcams that speak the Novatek `Config.cgi` dialect.
//!
//! [`session::Dashcam`] is the entry point: it finds the camera, keeps
//! the link alive and reconciles the recording state.

pub mod error;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod settings;
pub mod transport;

#[cfg(test)]
mod testing;

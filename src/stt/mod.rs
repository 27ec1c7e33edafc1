//! # Speech-to-Text Relay
//!
//! Bridges a browser connection to the streaming recognition service.
//!
//! ## Key Components:
//! - **protocol**: Upstream message decoding, audio envelopes and the
//!   client-facing `sarvam-*` events
//! - **relay**: The per-connection state machine that accumulates interim
//!   fragments into final transcripts
//! - **sarvam**: The websocket connector that talks to the service

pub mod protocol;
pub mod relay;
pub mod sarvam;

pub use protocol::{normalize_audio, RelayEvent, StartOptions};
pub use relay::{RelayNotice, SttConnector, SttRelay};
pub use sarvam::SarvamConnector;

//! Receiver side of an SFU room.
//!
//! [`ReceiverSession::start_publishing`] connects to the signaling server,
//! answers the SFU's offer, trickles candidates both ways and keeps a
//! deduplicated list of inbound streams. Callers observe a read-only
//! [`ReceiverState`] through a watch channel.
//!
//! With the `plugin` feature the same session is exposed to a Tauri webview.

pub use models::*;

mod error;
mod models;

pub mod negotiation;
pub mod provider;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod webrtc;

#[cfg(feature = "plugin")]
mod commands;
#[cfg(feature = "plugin")]
mod plugin;

pub use error::{Error, Result};
pub use negotiation::NegotiationEngine;
pub use provider::{MediaProvider, ProviderEvent};
pub use registry::StreamRegistry;
pub use session::ReceiverSession;
pub use signaling::{SignalingClient, SignalingEvent, SignalingMessage};

#[cfg(feature = "plugin")]
pub use plugin::{init, SfuReceiver, SfuReceiverExt, STATE_EVENT};

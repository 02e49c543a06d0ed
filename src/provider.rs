//! Seam to the media/transport stack.
//!
//! Description and candidate operations are awaited calls. Everything the
//! stack reports on its own (local candidates, connection state, tracks)
//! arrives as a [`ProviderEvent`] on the channel handed to the provider at
//! construction, so the session loop can apply it in order.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ConnectionState, IceCandidate, RemoteStream};

#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn set_remote_offer(&self, sdp: String) -> Result<()>;

    /// Create an answer for the current remote offer. Does not apply it.
    async fn create_answer(&self) -> Result<String>;

    async fn set_local_answer(&self, sdp: String) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    LocalCandidate(IceCandidate),
    ConnectionStateChanged(ConnectionState),
    /// A remote track arrived; `streams` lists the streams it belongs to.
    TrackAdded { streams: Vec<RemoteStream> },
    /// A remote track of stream `stream_id` ended.
    TrackRemoved { stream_id: String },
}

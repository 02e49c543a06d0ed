//! Local half of the offer/answer exchange.
//!
//! The engine owns the connection state and the stream registry. It is
//! driven by one caller at a time (the session loop), so handling an offer
//! runs to completion before the next frame or provider event is looked at.

use std::sync::Arc;
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{
    ConnectionState, IceCandidate, IceCandidateEnvelope, ReceiverState, RemoteStream, Role,
};
use crate::provider::{MediaProvider, ProviderEvent};
use crate::registry::StreamRegistry;
use crate::signaling::{InboundFrame, SignalingMessage, SignalingSender};

pub struct NegotiationEngine<P: ?Sized> {
    session_id: String,
    provider: Arc<P>,
    outbound: SignalingSender,
    registry: StreamRegistry,
    connection_state: ConnectionState,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    own_stream_id: Option<String>,
    state_tx: watch::Sender<ReceiverState>,
}

impl<P: MediaProvider + ?Sized> NegotiationEngine<P> {
    pub fn new(
        session_id: String,
        provider: Arc<P>,
        outbound: SignalingSender,
        own_stream_id: Option<String>,
    ) -> (Self, watch::Receiver<ReceiverState>) {
        let (state_tx, state_rx) = watch::channel(ReceiverState::default());
        let engine = Self {
            session_id,
            provider,
            outbound,
            registry: StreamRegistry::new(),
            connection_state: ConnectionState::New,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            own_stream_id,
            state_tx,
        };
        (engine, state_rx)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Dispatch one decoded frame.
    ///
    /// Only `TransportClosed` is returned; every other failure is absorbed
    /// here and reflected in the published state.
    pub async fn handle_frame(&mut self, frame: InboundFrame) -> Result<()> {
        match frame.message {
            Some(SignalingMessage::Offer { sdp }) => self.handle_offer(sdp).await?,
            Some(SignalingMessage::StreamUpdate { streams }) => self.handle_stream_update(streams),
            Some(SignalingMessage::Trickle(envelope)) => {
                self.handle_remote_candidate(envelope).await
            }
            Some(other) => {
                log::debug!(
                    "[{}] No handler for inbound {} message",
                    self.session_id,
                    other.kind()
                );
            }
            None => {}
        }

        if let Some(envelope) = frame.candidate {
            self.handle_remote_candidate(envelope).await;
        }
        Ok(())
    }

    /// Remote description, then local answer, then the Answer frame.
    pub async fn handle_offer(&mut self, sdp: String) -> Result<()> {
        log::info!("[{}] Received offer", self.session_id);
        let answer = match self.negotiate(sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                log::error!("[{}] {}", self.session_id, e);
                self.transition(ConnectionState::Failed);
                return Ok(());
            }
        };
        self.outbound.send(SignalingMessage::Answer { sdp: answer })?;
        log::info!("[{}] Answer sent", self.session_id);
        Ok(())
    }

    async fn negotiate(&mut self, sdp: String) -> Result<String> {
        self.provider.set_remote_offer(sdp).await?;
        self.remote_description_set = true;
        self.flush_pending_candidates().await;

        let answer = self.provider.create_answer().await?;
        self.provider.set_local_answer(answer.clone()).await?;
        Ok(answer)
    }

    pub fn handle_stream_update(&mut self, streams: Vec<RemoteStream>) {
        self.registry.bulk_replace(streams);
        self.publish();
    }

    /// Apply a trickled candidate addressed to us, buffering it until the
    /// remote description is in place.
    pub async fn handle_remote_candidate(&mut self, envelope: IceCandidateEnvelope) {
        if !envelope.is_local() {
            log::debug!(
                "[{}] Ignoring candidate for target {}",
                self.session_id,
                envelope.target.target()
            );
            return;
        }
        if !self.remote_description_set {
            log::debug!(
                "[{}] Buffering candidate until remote description is set",
                self.session_id
            );
            self.pending_candidates.push(envelope.candidate);
            return;
        }
        self.apply_candidate(envelope.candidate).await;
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        match self.provider.add_ice_candidate(candidate).await {
            Ok(()) => log::debug!("[{}] Added remote ICE candidate", self.session_id),
            Err(e) => log::warn!(
                "[{}] Failed to add remote ICE candidate: {}",
                self.session_id,
                e
            ),
        }
    }

    async fn flush_pending_candidates(&mut self) {
        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            log::debug!(
                "[{}] Applying {} buffered candidates",
                self.session_id,
                pending.len()
            );
        }
        for candidate in pending {
            self.apply_candidate(candidate).await;
        }
    }

    pub fn handle_provider_event(&mut self, event: ProviderEvent) -> Result<()> {
        match event {
            ProviderEvent::LocalCandidate(candidate) => {
                self.outbound
                    .send(SignalingMessage::Trickle(IceCandidateEnvelope {
                        target: Role::Subscriber,
                        candidate,
                    }))?;
            }
            ProviderEvent::ConnectionStateChanged(state) => self.transition(state),
            ProviderEvent::TrackAdded { mut streams } => {
                if streams.len() != 1 {
                    log::debug!(
                        "[{}] Track event with {} streams ignored",
                        self.session_id,
                        streams.len()
                    );
                    return Ok(());
                }
                if let Some(stream) = streams.pop() {
                    if self.registry.add_or_replace_from_track_event(stream) {
                        self.publish();
                    }
                }
            }
            ProviderEvent::TrackRemoved { stream_id } => {
                if self.registry.remove(&stream_id) {
                    self.publish();
                }
            }
        }
        Ok(())
    }

    /// Abort whatever is pending and close the media session.
    pub async fn shutdown(&mut self) {
        self.pending_candidates.clear();
        if let Err(e) = self.provider.close().await {
            log::warn!("[{}] Failed to close media session: {}", self.session_id, e);
        }
        self.transition(ConnectionState::Closed);
    }

    fn transition(&mut self, state: ConnectionState) {
        if self.connection_state == state {
            return;
        }
        log::info!(
            "[{}] Connection state {} -> {}",
            self.session_id,
            self.connection_state,
            state
        );
        self.connection_state = state;
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(ReceiverState {
            connection_state: self.connection_state,
            streams: self.registry.render(self.own_stream_id.as_deref()),
        });
    }
}

use crate::error::{Error, Result};
use crate::models::{ConnectionState, IceCandidate, RemoteStream, RemoteTrack};
use crate::provider::{MediaProvider, ProviderEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// `MediaProvider` backed by a webrtc-rs peer connection.
///
/// Callbacks registered on the connection only forward [`ProviderEvent`]s;
/// they never touch session state.
pub struct WebRtcProvider {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcProvider {
    pub async fn new(
        ice_servers: Vec<RTCIceServer>,
        events: mpsc::UnboundedSender<ProviderEvent>,
    ) -> Result<Self> {
        // Create a MediaEngine with default codecs
        let mut media_engine = MediaEngine::default();

        // Register default codecs for video (VP8, VP9, H264) and audio (Opus)
        media_engine.register_default_codecs().map_err(|e| {
            Error::NegotiationFailure(format!("Failed to register codecs: {}", e))
        })?;

        let registry = register_default_interceptors(
            webrtc::interceptor::registry::Registry::new(),
            &mut media_engine,
        )
        .map_err(|e| Error::NegotiationFailure(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(|e| {
            Error::NegotiationFailure(format!("Failed to create peer connection: {}", e))
        })?);

        register_handlers(&pc, events);

        Ok(Self { pc })
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

fn register_handlers(pc: &RTCPeerConnection, events: mpsc::UnboundedSender<ProviderEvent>) {
    let candidate_tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = candidate_tx.clone();
        Box::pin(async move {
            // `None` marks the end of gathering
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = tx.send(ProviderEvent::LocalCandidate(init.into()));
                }
                Err(e) => log::warn!("Failed to serialize local ICE candidate: {}", e),
            }
        })
    }));

    let state_tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = state_tx.clone();
        Box::pin(async move {
            let _ = tx.send(ProviderEvent::ConnectionStateChanged(ConnectionState::from(
                state,
            )));
        })
    }));

    let track_tx = events;
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let tx = track_tx.clone();
            Box::pin(async move {
                let stream_id = track.stream_id();
                log::info!(
                    "Remote {} track {} in stream {}",
                    track.kind(),
                    track.id(),
                    stream_id
                );

                let streams = if stream_id.is_empty() {
                    Vec::new()
                } else {
                    vec![RemoteStream {
                        id: stream_id.clone(),
                        active: true,
                        tracks: vec![RemoteTrack {
                            id: track.id(),
                            kind: track.kind().to_string(),
                        }],
                    }]
                };
                let _ = tx.send(ProviderEvent::TrackAdded { streams });

                // Media is not rendered here; drain RTP until the track ends.
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    log::info!("Remote track {} ended", track.id());
                    if !stream_id.is_empty() {
                        let _ = tx.send(ProviderEvent::TrackRemoved { stream_id });
                    }
                });
            })
        },
    ));
}

#[async_trait]
impl MediaProvider for WebRtcProvider {
    async fn set_remote_offer(&self, sdp: String) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|e| Error::NegotiationFailure(format!("Failed to parse offer SDP: {}", e)))?;
        self.pc.set_remote_description(offer).await.map_err(|e| {
            Error::NegotiationFailure(format!("Failed to set remote description: {}", e))
        })
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::NegotiationFailure(format!("Failed to create answer: {}", e)))?;
        Ok(answer.sdp)
    }

    async fn set_local_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::NegotiationFailure(format!("Failed to parse answer SDP: {}", e)))?;
        self.pc.set_local_description(answer).await.map_err(|e| {
            Error::NegotiationFailure(format!("Failed to set local description: {}", e))
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| Error::NegotiationFailure(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| Error::NegotiationFailure(format!("Failed to close peer connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    #[tokio::test]
    async fn answers_a_real_offer() {
        let (offerer_tx, _offerer_rx) = mpsc::unbounded_channel();
        let offerer = WebRtcProvider::new(Vec::new(), offerer_tx).await.unwrap();
        offerer
            .peer_connection()
            .add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .unwrap();
        let offer = offerer.peer_connection().create_offer(None).await.unwrap();
        offerer
            .peer_connection()
            .set_local_description(offer.clone())
            .await
            .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let answerer = WebRtcProvider::new(Vec::new(), tx).await.unwrap();
        answerer.set_remote_offer(offer.sdp).await.unwrap();
        let answer = answerer.create_answer().await.unwrap();
        assert!(answer.starts_with("v=0"));
        answerer.set_local_answer(answer).await.unwrap();

        answerer.close().await.unwrap();
        offerer.close().await.unwrap();
    }

    #[tokio::test]
    async fn garbage_offer_is_a_negotiation_failure() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let provider = WebRtcProvider::new(Vec::new(), tx).await.unwrap();
        let err = provider
            .set_remote_offer("not an sdp".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NegotiationFailure(_)));
        provider.close().await.unwrap();
    }
}

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::{Config, ReceiverState};
use crate::negotiation::NegotiationEngine;
use crate::provider::{MediaProvider, ProviderEvent};
use crate::signaling::{InboundFrame, SignalingClient, SignalingEvent};
use crate::webrtc::WebRtcProvider;

/// A running receiver: one signaling channel, one media session, one event loop.
pub struct ReceiverSession {
    id: String,
    state_rx: watch::Receiver<ReceiverState>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReceiverSession {
    /// Connect to the SFU and wait for its offer.
    pub async fn start_publishing(config: &Config) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let endpoint = config.endpoint()?;
        log::info!("[{}] Starting session for room {}", id, config.room_id);

        let (signaling, signaling_events) = SignalingClient::connect(&endpoint).await?;
        let (provider_tx, provider_events) = mpsc::unbounded_channel();
        let provider = match WebRtcProvider::new(config.rtc_ice_servers(), provider_tx).await {
            Ok(provider) => provider,
            Err(e) => {
                signaling.close().await;
                return Err(e);
            }
        };

        Ok(Self::spawn(
            id,
            Arc::new(provider),
            provider_events,
            signaling,
            signaling_events,
            config.own_stream_id.clone(),
        ))
    }

    /// Run the event loop over an already-connected signaling client and provider.
    pub fn spawn<P: MediaProvider + 'static>(
        id: String,
        provider: Arc<P>,
        provider_events: mpsc::UnboundedReceiver<ProviderEvent>,
        signaling: SignalingClient,
        signaling_events: mpsc::UnboundedReceiver<SignalingEvent>,
        own_stream_id: Option<String>,
    ) -> Self {
        let (engine, state_rx) =
            NegotiationEngine::new(id.clone(), provider, signaling.sender(), own_stream_id);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(
            id.clone(),
            engine,
            signaling,
            signaling_events,
            provider_events,
            stop_rx,
        ));
        Self {
            id,
            state_rx,
            stop_tx: Some(stop_tx),
            task,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ReceiverState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReceiverState> {
        self.state_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Abort any in-flight negotiation, close the media session and the
    /// signaling channel. Returns the final state.
    pub async fn stop(mut self) -> ReceiverState {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            log::error!("[{}] Session task failed: {}", self.id, e);
        }
        self.state()
    }
}

async fn run<P: MediaProvider + ?Sized>(
    id: String,
    mut engine: NegotiationEngine<P>,
    signaling: SignalingClient,
    mut signaling_events: mpsc::UnboundedReceiver<SignalingEvent>,
    mut provider_events: mpsc::UnboundedReceiver<ProviderEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    // Frames that arrived while an earlier frame was being handled.
    let mut backlog: VecDeque<InboundFrame> = VecDeque::new();

    'session: loop {
        let frame = match backlog.pop_front() {
            Some(frame) => frame,
            None => tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    log::info!("[{}] Stop requested", id);
                    break;
                }
                event = signaling_events.recv() => match event {
                    Some(SignalingEvent::Frame(frame)) => frame,
                    Some(SignalingEvent::Closed) | None => {
                        log::info!("[{}] Signaling channel closed", id);
                        break;
                    }
                },
                Some(event) = provider_events.recv() => {
                    if let Err(e) = engine.handle_provider_event(event) {
                        log::warn!("[{}] {}", id, e);
                        break;
                    }
                    continue;
                }
            },
        };

        // Dropping the handling future on stop or close aborts the negotiation.
        let handling = engine.handle_frame(frame);
        tokio::pin!(handling);
        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    log::info!("[{}] Stop requested during negotiation", id);
                    break 'session;
                }
                outcome = &mut handling => break outcome,
                event = signaling_events.recv() => match event {
                    Some(SignalingEvent::Frame(frame)) => backlog.push_back(frame),
                    Some(SignalingEvent::Closed) | None => {
                        log::info!("[{}] Signaling channel closed during negotiation", id);
                        break 'session;
                    }
                },
            }
        };
        if let Err(e) = outcome {
            log::warn!("[{}] {}", id, e);
            break;
        }
    }

    engine.shutdown().await;
    signaling.close().await;
    log::info!("[{}] Session ended", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionState;
    use crate::provider::testing::{Call, FailAt, FakeProvider};
    use crate::signaling::{decode_frame, SignalingMessage};
    use std::time::Duration;

    struct Harness {
        session: ReceiverSession,
        provider: Arc<FakeProvider>,
        frames: mpsc::UnboundedSender<SignalingEvent>,
        provider_events: mpsc::UnboundedSender<ProviderEvent>,
        outbound: mpsc::UnboundedReceiver<SignalingMessage>,
    }

    fn harness(own: Option<&str>) -> Harness {
        harness_with(FakeProvider::new(), own)
    }

    fn harness_with(provider: FakeProvider, own: Option<&str>) -> Harness {
        let provider = Arc::new(provider);
        let (out_tx, outbound) = mpsc::unbounded_channel();
        let (frames, frame_rx) = mpsc::unbounded_channel();
        let (provider_events, provider_rx) = mpsc::unbounded_channel();
        let session = ReceiverSession::spawn(
            "test".to_string(),
            provider.clone(),
            provider_rx,
            SignalingClient::detached(out_tx),
            frame_rx,
            own.map(str::to_string),
        );
        Harness {
            session,
            provider,
            frames,
            provider_events,
            outbound,
        }
    }

    fn frame(text: &str) -> SignalingEvent {
        SignalingEvent::Frame(decode_frame(text).unwrap())
    }

    async fn wait_for<F>(rx: &mut watch::Receiver<ReceiverState>, pred: F) -> ReceiverState
    where
        F: FnMut(&ReceiverState) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed")
            .clone()
    }

    #[tokio::test]
    async fn offer_then_connected() {
        let mut h = harness(None);
        let mut state = h.session.subscribe();

        h.frames.send(frame(r#"{"type":"offer","sdp":"v=0..."}"#)).unwrap();
        let answer = tokio::time::timeout(Duration::from_secs(5), h.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            answer,
            SignalingMessage::Answer {
                sdp: "answer-to:v=0...".to_string()
            }
        );

        h.provider_events
            .send(ProviderEvent::ConnectionStateChanged(ConnectionState::Connected))
            .unwrap();
        wait_for(&mut state, |s| s.connection_state == ConnectionState::Connected).await;

        let last = h.session.stop().await;
        assert_eq!(last.connection_state, ConnectionState::Closed);
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_offer_waits_for_the_first() {
        let h = harness(None);
        h.frames.send(frame(r#"{"type":"offer","sdp":"one"}"#)).unwrap();
        h.frames.send(frame(r#"{"type":"offer","sdp":"two"}"#)).unwrap();
        h.frames
            .send(frame(r#"{"type":"stream-update","data":"[]"}"#))
            .unwrap();

        let mut state = h.session.subscribe();
        // The stream-update is handled last, after both offers.
        tokio::time::timeout(Duration::from_secs(5), state.changed())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            h.provider.calls(),
            vec![
                Call::SetRemote("one".to_string()),
                Call::CreateAnswer,
                Call::SetLocal("answer-to:one".to_string()),
                Call::SetRemote("two".to_string()),
                Call::CreateAnswer,
                Call::SetLocal("answer-to:two".to_string()),
            ]
        );
        h.session.stop().await;
    }

    #[tokio::test]
    async fn stream_updates_and_track_events_share_one_registry() {
        let h = harness(Some("B"));
        let mut state = h.session.subscribe();

        h.provider_events
            .send(ProviderEvent::TrackAdded {
                streams: vec![crate::models::RemoteStream::new("T")],
            })
            .unwrap();
        wait_for(&mut state, |s| s.stream_ids() == vec!["T"]).await;

        h.frames
            .send(frame(
                r#"{"type":"stream-update","data":"[{\"id\":\"A\"},{\"id\":\"B\"}]"}"#,
            ))
            .unwrap();
        let s = wait_for(&mut state, |s| s.stream_ids() == vec!["A"]).await;
        assert_eq!(s.connection_state, ConnectionState::New);

        h.session.stop().await;
    }

    #[tokio::test]
    async fn closed_signaling_ends_session() {
        let h = harness(None);
        let mut state = h.session.subscribe();

        h.frames.send(SignalingEvent::Closed).unwrap();
        wait_for(&mut state, |s| s.connection_state == ConnectionState::Closed).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while !h.session.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.provider.calls(), vec![Call::Close]);
    }

    #[tokio::test]
    async fn signaling_close_aborts_a_stalled_negotiation() {
        let mut h = harness_with(FakeProvider::stalling_at(FailAt::SetRemote), None);
        let mut state = h.session.subscribe();

        h.frames.send(frame(r#"{"type":"offer","sdp":"v=0"}"#)).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.provider.calls().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        h.frames.send(SignalingEvent::Closed).unwrap();
        wait_for(&mut state, |s| s.connection_state == ConnectionState::Closed).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while !h.session.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            h.provider.calls(),
            vec![Call::SetRemote("v=0".to_string()), Call::Close]
        );
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn frames_during_negotiation_are_handled_in_order() {
        let h = harness(None);
        let mut state = h.session.subscribe();
        h.frames.send(frame(r#"{"type":"offer","sdp":"v=0"}"#)).unwrap();
        h.frames
            .send(frame(r#"{"type":"stream-update","data":"[{\"id\":\"A\"}]"}"#))
            .unwrap();
        h.frames
            .send(frame(r#"{"type":"stream-update","data":"[{\"id\":\"B\"}]"}"#))
            .unwrap();

        wait_for(&mut state, |s| s.stream_ids() == vec!["B"]).await;
        assert_eq!(h.provider.calls().len(), 3);
        h.session.stop().await;
    }

    #[tokio::test]
    async fn malformed_frames_are_not_fatal() {
        let h = harness(None);
        // A decode failure never reaches the loop; the next good frame still does.
        assert!(decode_frame("{").is_err());
        h.frames
            .send(frame(r#"{"type":"stream-update","data":"[{\"id\":\"A\"}]"}"#))
            .unwrap();

        let mut state = h.session.subscribe();
        wait_for(&mut state, |s| s.stream_ids() == vec!["A"]).await;
        assert!(!h.session.is_finished());
        h.session.stop().await;
    }
}

//! Signaling channel to the SFU.
//!
//! Frames are JSON text. Inbound frames are decoded in two independent
//! passes: a primary dispatch on `type`, and a candidate relay that looks
//! for a flat `{candidate, target}` pair on any frame regardless of type.
//!
//! Wire shapes handled here:
//!
//! ```text
//! in   {"type":"offer","sdp":"v=0..."}
//! in   {"type":"stream-update","data":"[{\"id\":\"A\"}]"}
//! in   {"candidate":{...},"target":1}
//! out  {"type":"answer","data":"v=0..."}
//! out  {"type":"trickle","data":"{\"target\":1,\"candidates\":{...}}"}
//! ```

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::error::{Error, Result};
use crate::models::{IceCandidate, IceCandidateEnvelope, RemoteStream, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Trickle(IceCandidateEnvelope),
    StreamUpdate { streams: Vec<RemoteStream> },
}

/// Inner payload of a `trickle` frame. The SFU reads `candidates`.
#[derive(Debug, Serialize, Deserialize)]
struct TricklePayload {
    target: u64,
    #[serde(alias = "candidate")]
    candidates: IceCandidate,
}

impl SignalingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Trickle(_) => "trickle",
            SignalingMessage::StreamUpdate { .. } => "stream-update",
        }
    }

    /// Encode as a text frame
    pub fn encode(&self) -> Result<String> {
        let frame = match self {
            SignalingMessage::Offer { sdp } => json!({ "type": "offer", "sdp": sdp }),
            SignalingMessage::Answer { sdp } => json!({ "type": "answer", "data": sdp }),
            SignalingMessage::Trickle(envelope) => {
                let payload = TricklePayload {
                    target: u64::from(envelope.target.target()),
                    candidates: envelope.candidate.clone(),
                };
                json!({ "type": "trickle", "data": serde_json::to_string(&payload)? })
            }
            SignalingMessage::StreamUpdate { streams } => {
                json!({ "type": "stream-update", "data": serde_json::to_string(streams)? })
            }
        };
        Ok(frame.to_string())
    }
}

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InboundFrame {
    /// Primary instruction, `None` for unrecognized or missing types
    pub message: Option<SignalingMessage>,
    /// Flat candidate carried alongside (or instead of) the primary instruction
    pub candidate: Option<IceCandidateEnvelope>,
}

/// Loosely typed view of a frame. Every field is a raw value so that any
/// JSON object decodes and each pass can judge its own fields.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default)]
    sdp: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    candidate: Option<Value>,
    #[serde(default)]
    target: Option<Value>,
}

fn nested_string<'a>(kind: &str, data: &'a Option<Value>) -> Result<&'a str> {
    match data {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(Error::MalformedMessage(format!(
            "{} frame data is not an encoded string",
            kind
        ))),
        None => Err(Error::MalformedMessage(format!("{} frame has no data", kind))),
    }
}

/// Primary dispatch on `type`.
fn decode_instruction(raw: &RawFrame) -> Result<Option<SignalingMessage>> {
    let kind = match &raw.kind {
        Some(Value::String(kind)) => kind.as_str(),
        Some(other) => {
            log::debug!("Ignoring signaling message with non-string type {}", other);
            return Ok(None);
        }
        None => return Ok(None),
    };

    let message = match kind {
        "offer" => {
            let sdp = match (&raw.sdp, &raw.data) {
                (Some(Value::String(sdp)), _) => sdp.clone(),
                (None, Some(Value::String(sdp))) => sdp.clone(),
                _ => return Err(Error::MalformedMessage("offer frame has no sdp".to_string())),
            };
            Some(SignalingMessage::Offer { sdp })
        }
        "answer" => {
            let sdp = nested_string("answer", &raw.data)?;
            Some(SignalingMessage::Answer {
                sdp: sdp.to_string(),
            })
        }
        "stream-update" => {
            let encoded = nested_string("stream-update", &raw.data)?;
            let streams: Vec<RemoteStream> = serde_json::from_str(encoded).map_err(|e| {
                Error::MalformedMessage(format!("Failed to decode stream-update data: {}", e))
            })?;
            Some(SignalingMessage::StreamUpdate { streams })
        }
        "trickle" => {
            let encoded = nested_string("trickle", &raw.data)?;
            let payload: TricklePayload = serde_json::from_str(encoded).map_err(|e| {
                Error::MalformedMessage(format!("Failed to decode trickle data: {}", e))
            })?;
            Role::from_target(payload.target).map(|target| {
                SignalingMessage::Trickle(IceCandidateEnvelope {
                    target,
                    candidate: payload.candidates,
                })
            })
        }
        other => {
            log::debug!("Ignoring signaling message of type {}", other);
            None
        }
    };
    Ok(message)
}

/// Candidate relay, evaluated on every frame whatever its type.
fn decode_flat_candidate(raw: &RawFrame) -> Result<Option<IceCandidateEnvelope>> {
    let Some(value) = &raw.candidate else {
        return Ok(None);
    };
    // Targets that are not a known role are not addressed to us.
    let Some(target) = raw
        .target
        .as_ref()
        .and_then(Value::as_u64)
        .and_then(Role::from_target)
    else {
        return Ok(None);
    };
    let candidate: IceCandidate = serde_json::from_value(value.clone())
        .map_err(|e| Error::MalformedMessage(format!("Failed to decode candidate: {}", e)))?;
    Ok(Some(IceCandidateEnvelope { target, candidate }))
}

/// Decode one text frame.
///
/// Only text that is not a JSON object is an error. The primary
/// instruction and the flat candidate are decoded independently: when one
/// of them is malformed it is logged and dropped and the other survives.
pub fn decode_frame(text: &str) -> Result<InboundFrame> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::MalformedMessage(format!("Failed to decode frame: {}", e)))?;
    if !value.is_object() {
        return Err(Error::MalformedMessage(
            "frame is not a JSON object".to_string(),
        ));
    }
    let raw: RawFrame = serde_json::from_value(value)
        .map_err(|e| Error::MalformedMessage(format!("Failed to decode frame: {}", e)))?;

    let message = decode_instruction(&raw).unwrap_or_else(|e| {
        log::warn!("Dropping signaling instruction: {}", e);
        None
    });
    let candidate = decode_flat_candidate(&raw).unwrap_or_else(|e| {
        log::warn!("Dropping relayed candidate: {}", e);
        None
    });

    Ok(InboundFrame { message, candidate })
}

#[derive(Debug)]
pub enum SignalingEvent {
    Frame(InboundFrame),
    Closed,
}

/// Cloneable handle for queueing outbound messages
#[derive(Debug, Clone)]
pub struct SignalingSender {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl SignalingSender {
    pub fn new(tx: mpsc::UnboundedSender<SignalingMessage>) -> Self {
        Self { tx }
    }

    pub fn send(&self, message: SignalingMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::TransportClosed)
    }
}

/// Owns the WebSocket to the SFU for the lifetime of one session.
pub struct SignalingClient {
    sender: SignalingSender,
    close_tx: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl SignalingClient {
    /// Open the channel. Decoded inbound frames arrive on the returned receiver,
    /// followed by a single `SignalingEvent::Closed` when the socket ends.
    pub async fn connect(
        endpoint: &Url,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SignalingEvent>)> {
        let (ws_stream, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| Error::Signaling(format!("Failed to connect to {}: {}", endpoint, e)))?;
        log::info!("Signaling channel open: {}", endpoint);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<SignalingEvent>();
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        let writer = tokio::spawn(async move {
            let mut closing = false;
            loop {
                let message = tokio::select! {
                    biased;
                    message = out_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                    _ = &mut close_rx, if !closing => {
                        // Stop accepting new messages but flush the queued ones.
                        out_rx.close();
                        closing = true;
                        continue;
                    }
                };
                let text = match message.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("Failed to encode {} message: {}", message.kind(), e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    log::error!("Failed to send signaling message: {}", e);
                    break;
                }
            }
            // Closing the sink sends the Close frame.
            let _ = ws_tx.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            log::warn!("Dropping non-UTF-8 binary signaling frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => {
                        log::info!("Signaling channel closed by server");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        log::warn!("Signaling channel error: {}", e);
                        break;
                    }
                };
                match decode_frame(&text) {
                    Ok(frame) => {
                        if event_tx.send(SignalingEvent::Frame(frame)).is_err() {
                            return;
                        }
                    }
                    Err(e) => log::warn!("Dropping frame: {}", e),
                }
            }
            let _ = event_tx.send(SignalingEvent::Closed);
        });

        Ok((
            Self {
                sender: SignalingSender::new(out_tx),
                close_tx: Some(close_tx),
                writer: Some(writer),
                reader: Some(reader),
            },
            event_rx,
        ))
    }

    /// Client with no socket behind it; outbound messages land on `tx`.
    pub fn detached(tx: mpsc::UnboundedSender<SignalingMessage>) -> Self {
        Self {
            sender: SignalingSender::new(tx),
            close_tx: None,
            writer: None,
            reader: None,
        }
    }

    pub fn send(&self, message: SignalingMessage) -> Result<()> {
        self.sender.send(message)
    }

    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    /// Send a Close frame and release the socket
    pub async fn close(mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        log::info!("Signaling channel released");
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

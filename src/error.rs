use serde::{ser::Serializer, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error("Malformed signaling message: {0}")]
  MalformedMessage(String),
  #[error("Negotiation failed: {0}")]
  NegotiationFailure(String),
  #[error("Signaling transport closed")]
  TransportClosed,
  #[error("Signaling error: {0}")]
  Signaling(String),
  #[error("Invalid configuration: {0}")]
  InvalidConfig(String),
  #[error("Already publishing")]
  AlreadyPublishing,
  #[error("Not publishing")]
  NotPublishing,
}

impl Serialize for Error {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(self.to_string().as_ref())
  }
}

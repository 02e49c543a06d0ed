//! Live set of inbound media streams.
//!
//! Two writers feed the same collection: incremental track events from the
//! media provider and wholesale stream updates pushed by the server. Stream
//! entries are never edited in place; every change replaces or filters
//! whole entries, and identities stay unique.

use crate::models::RemoteStream;

#[derive(Debug, Default, Clone)]
pub struct StreamRegistry {
    streams: Vec<RemoteStream>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `stream` if it is active and its identity is not present yet.
    ///
    /// Returns whether the registry changed.
    pub fn add_or_replace_from_track_event(&mut self, stream: RemoteStream) -> bool {
        if !stream.active || self.contains(&stream.id) {
            log::debug!("Track event for stream {} ignored", stream.id);
            return false;
        }
        log::info!("Registered inbound stream {}", stream.id);
        self.streams.push(stream);
        true
    }

    /// Drop the entry with `id`. Absent identities are a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.streams.len();
        self.streams.retain(|s| s.id != id);
        let removed = self.streams.len() != before;
        if removed {
            log::info!("Removed inbound stream {}", id);
        }
        removed
    }

    /// Replace the whole collection with a server-pushed list (last write wins).
    ///
    /// Later duplicates of an identity are dropped so identities stay unique.
    pub fn bulk_replace(&mut self, streams: Vec<RemoteStream>) {
        let mut unique: Vec<RemoteStream> = Vec::with_capacity(streams.len());
        for stream in streams {
            if unique.iter().any(|s| s.id == stream.id) {
                log::warn!("Duplicate stream {} in stream update", stream.id);
                continue;
            }
            unique.push(stream);
        }
        log::info!("Stream update replaced registry with {} streams", unique.len());
        self.streams = unique;
    }

    /// Streams to show: everything active except the caller's own stream, in order.
    pub fn render(&self, own_id: Option<&str>) -> Vec<RemoteStream> {
        self.streams
            .iter()
            .filter(|s| s.active && Some(s.id.as_str()) != own_id)
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.streams.iter().any(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inactive(id: &str) -> RemoteStream {
        RemoteStream {
            active: false,
            ..RemoteStream::new(id)
        }
    }

    fn ids(streams: &[RemoteStream]) -> Vec<&str> {
        streams.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn duplicate_track_events_keep_one_entry() {
        let mut registry = StreamRegistry::new();
        assert!(registry.add_or_replace_from_track_event(RemoteStream::new("A")));
        assert!(!registry.add_or_replace_from_track_event(RemoteStream::new("A")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn inactive_track_event_is_ignored() {
        let mut registry = StreamRegistry::new();
        assert!(!registry.add_or_replace_from_track_event(inactive("A")));
        assert!(registry.is_empty());
    }

    #[test]
    fn removing_absent_identity_is_noop() {
        let mut registry = StreamRegistry::new();
        registry.add_or_replace_from_track_event(RemoteStream::new("A"));
        assert!(!registry.remove("missing"));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("A"));
        assert!(registry.is_empty());
    }

    #[test]
    fn bulk_replace_is_last_write_wins() {
        let mut registry = StreamRegistry::new();
        registry.add_or_replace_from_track_event(RemoteStream::new("track-only"));
        registry.bulk_replace(vec![RemoteStream::new("A"), RemoteStream::new("B")]);
        registry.bulk_replace(vec![RemoteStream::new("C"), RemoteStream::new("A")]);
        assert_eq!(ids(&registry.render(None)), vec!["C", "A"]);
        assert!(!registry.contains("track-only"));
    }

    #[test]
    fn bulk_replace_drops_repeated_identities() {
        let mut registry = StreamRegistry::new();
        registry.bulk_replace(vec![
            RemoteStream::new("A"),
            RemoteStream::new("B"),
            inactive("A"),
        ]);
        assert_eq!(registry.len(), 2);
        assert_eq!(ids(&registry.render(None)), vec!["A", "B"]);
    }

    #[test]
    fn render_hides_own_and_inactive_streams() {
        let mut registry = StreamRegistry::new();
        registry.bulk_replace(vec![
            RemoteStream::new("A"),
            inactive("B"),
            RemoteStream::new("me"),
            RemoteStream::new("C"),
        ]);
        assert_eq!(ids(&registry.render(Some("me"))), vec!["A", "C"]);
    }
}

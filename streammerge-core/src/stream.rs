//! Media stream: an identified, ordered set of tracks

use crate::track::{MediaStreamTrack, TrackKind};
use crate::types::StreamId;
use parking_lot::RwLock;
use std::sync::Arc;

/// A live media stream.
///
/// Streams are shared between the caller and the merger (`Arc<MediaStream>`),
/// so the track list uses interior mutability for `add_track`.
#[derive(Debug)]
pub struct MediaStream {
    id: StreamId,
    tracks: RwLock<Vec<Arc<dyn MediaStreamTrack>>>,
}

impl MediaStream {
    pub fn new(id: impl Into<StreamId>) -> Self {
        Self {
            id: id.into(),
            tracks: RwLock::new(Vec::new()),
        }
    }

    /// Build a stream with a generated id from an initial track list
    #[must_use]
    pub fn with_tracks(tracks: Vec<Arc<dyn MediaStreamTrack>>) -> Self {
        Self {
            id: StreamId::generate(),
            tracks: RwLock::new(tracks),
        }
    }

    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    /// Append a track. Duplicates are kept.
    pub fn add_track(&self, track: Arc<dyn MediaStreamTrack>) {
        self.tracks.write().push(track);
    }

    #[must_use]
    pub fn tracks(&self) -> Vec<Arc<dyn MediaStreamTrack>> {
        self.tracks.read().clone()
    }

    #[must_use]
    pub fn audio_tracks(&self) -> Vec<Arc<dyn MediaStreamTrack>> {
        self.tracks_of(TrackKind::Audio)
    }

    #[must_use]
    pub fn video_tracks(&self) -> Vec<Arc<dyn MediaStreamTrack>> {
        self.tracks_of(TrackKind::Video)
    }

    fn tracks_of(&self, kind: TrackKind) -> Vec<Arc<dyn MediaStreamTrack>> {
        self.tracks
            .read()
            .iter()
            .filter(|track| track.kind() == kind)
            .cloned()
            .collect()
    }

    /// Stop every track currently in the stream
    pub fn stop_all(&self) {
        for track in self.tracks.read().iter() {
            track.stop();
        }
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.tracks.read().len()
    }
}

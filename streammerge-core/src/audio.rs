//! Audio pass-through onto the captured output

use crate::stream::MediaStream;
use crate::track::MediaStreamTrack;
use std::sync::Arc;
use tracing::debug;

/// Attach `tracks` to `output` in order and hand the same stream back.
///
/// Tracks are forwarded as-is; their state is not checked.
pub fn inject(output: Arc<MediaStream>, tracks: &[Arc<dyn MediaStreamTrack>]) -> Arc<MediaStream> {
    for track in tracks {
        output.add_track(Arc::clone(track));
    }
    debug!(stream_id = %output.id(), injected = tracks.len(), "Injected audio tracks");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{LocalTrack, TrackKind};

    #[test]
    fn test_inject_preserves_order() {
        let output = Arc::new(MediaStream::new("out"));
        output.add_track(Arc::new(LocalTrack::video()));

        let first: Arc<dyn MediaStreamTrack> = Arc::new(LocalTrack::new("a1", TrackKind::Audio));
        let second: Arc<dyn MediaStreamTrack> = Arc::new(LocalTrack::new("a2", TrackKind::Audio));
        let result = inject(Arc::clone(&output), &[first, second]);

        assert!(Arc::ptr_eq(&result, &output));
        let ids: Vec<_> = result
            .audio_tracks()
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        assert_eq!(ids, ["a1", "a2"]);
    }

    #[test]
    fn test_stopped_tracks_are_still_attached() {
        let output = Arc::new(MediaStream::new("out"));
        let track: Arc<dyn MediaStreamTrack> = Arc::new(LocalTrack::audio());
        track.stop();

        inject(Arc::clone(&output), &[track]);
        assert_eq!(output.audio_tracks().len(), 1);
    }
}

//! Source registration
//!
//! Keeps the ordered list of registered sources (registration order is paint
//! order) and the append-only set of audio tracks to forward. Registering a
//! source grows the shared surface to fit it, never shrinking either axis.

use crate::frame::FrameProvider;
use crate::stream::MediaStream;
use crate::surface::RenderSurface;
use crate::track::MediaStreamTrack;
use crate::types::{Placement, SourceSize, StreamId, SurfaceSize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One registered input
pub struct SourceEntry {
    /// Source stream, shared with the caller
    pub stream: Arc<MediaStream>,

    /// Decoded-frame provider wrapping the stream
    pub provider: Box<dyn FrameProvider>,

    /// Declared size
    pub size: SourceSize,

    /// Explicit placement, centered when absent
    pub placement: Option<Placement>,
}

impl SourceEntry {
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        self.stream.id()
    }
}

impl fmt::Debug for SourceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceEntry")
            .field("stream_id", self.stream.id())
            .field("size", &self.size)
            .field("placement", &self.placement)
            .finish_non_exhaustive()
    }
}

/// Upper bound on surface growth (0 = unlimited)
#[derive(Debug, Clone, Copy, Default)]
pub struct SurfaceLimits {
    pub max_width: u32,
    pub max_height: u32,
}

impl SurfaceLimits {
    fn clamp(self, axis: &'static str, value: u32, max: u32) -> u32 {
        if max > 0 && value > max {
            warn!(axis, requested = value, max, "Surface growth capped");
            max
        } else {
            value
        }
    }
}

/// Ordered source list plus the audio tracks to forward
#[derive(Debug, Default)]
pub struct SourceRegistry {
    entries: Vec<SourceEntry>,
    audio_tracks: Vec<Arc<dyn MediaStreamTrack>>,
    limits: SurfaceLimits,
}

impl SourceRegistry {
    #[must_use]
    pub fn new(limits: SurfaceLimits) -> Self {
        Self {
            entries: Vec::new(),
            audio_tracks: Vec::new(),
            limits,
        }
    }

    /// Register a source, growing `surface` to fit its declared size.
    ///
    /// With `include_audio` every audio track of the stream is appended to
    /// the forwarded set. The same stream may be registered more than once.
    pub fn add_source(
        &mut self,
        surface: &mut dyn RenderSurface,
        stream: Arc<MediaStream>,
        provider: Box<dyn FrameProvider>,
        size: SourceSize,
        placement: Option<Placement>,
        include_audio: bool,
    ) {
        self.grow_surface(surface, size);

        if include_audio {
            let tracks = stream.audio_tracks();
            debug!(
                stream_id = %stream.id(),
                audio_tracks = tracks.len(),
                "Forwarding source audio"
            );
            self.audio_tracks.extend(tracks);
        }

        info!(
            stream_id = %stream.id(),
            width = ?size.width,
            height = ?size.height,
            placement = ?placement,
            include_audio,
            position = self.entries.len(),
            "Registered source"
        );

        self.entries.push(SourceEntry {
            stream,
            provider,
            size,
            placement,
        });
    }

    fn grow_surface(&self, surface: &mut dyn RenderSurface, size: SourceSize) {
        let current = surface.size();
        let limits = self.limits;
        let width = size.width.map_or(current.width, |w| {
            let w = limits.clamp("width", w, limits.max_width);
            current.width.max(w)
        });
        let height = size.height.map_or(current.height, |h| {
            let h = limits.clamp("height", h, limits.max_height);
            current.height.max(h)
        });

        let grown = SurfaceSize::new(width, height);
        if grown != current {
            debug!(from = %current, to = %grown, "Growing surface");
            surface.set_size(grown);
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    #[must_use]
    pub fn audio_tracks(&self) -> &[Arc<dyn MediaStreamTrack>] {
        &self.audio_tracks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The only source when exactly one is registered
    #[must_use]
    pub fn single(&self) -> Option<&SourceEntry> {
        match self.entries.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Stop every track of every source stream, then every forwarded track
    pub fn stop_tracks(&self) {
        for entry in &self.entries {
            entry.stream.stop_all();
        }
        for track in &self.audio_tracks {
            track.stop();
        }
        info!(
            sources = self.entries.len(),
            audio_tracks = self.audio_tracks.len(),
            "Stopped source tracks"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::StaticFrameProvider;
    use crate::surface::MemorySurface;
    use crate::track::LocalTrack;

    fn stream_with_audio(id: &str) -> Arc<MediaStream> {
        let stream = MediaStream::new(id);
        stream.add_track(Arc::new(LocalTrack::video()));
        stream.add_track(Arc::new(LocalTrack::audio()));
        Arc::new(stream)
    }

    #[derive(Default)]
    struct Fixture {
        registry: SourceRegistry,
        surface: MemorySurface,
    }

    impl Fixture {
        fn with_limits(limits: SurfaceLimits) -> Self {
            Self {
                registry: SourceRegistry::new(limits),
                surface: MemorySurface::new(),
            }
        }

        fn add(&mut self, size: SourceSize, include_audio: bool) {
            self.registry.add_source(
                &mut self.surface,
                stream_with_audio("s"),
                Box::new(StaticFrameProvider::unready()),
                size,
                None,
                include_audio,
            );
        }
    }

    #[test]
    fn test_surface_grows_monotonically() {
        let mut fx = Fixture::default();

        fx.add(SourceSize::new(100, 100), false);
        fx.add(SourceSize::new(300, 200), false);
        assert_eq!(fx.surface.size(), SurfaceSize::new(300, 200));

        fx.add(SourceSize::new(50, 50), false);
        assert_eq!(fx.surface.size(), SurfaceSize::new(300, 200));
    }

    #[test]
    fn test_axes_grow_independently() {
        let mut fx = Fixture::default();

        fx.add(SourceSize::new(400, 100), false);
        fx.add(SourceSize::new(100, 300), false);
        assert_eq!(fx.surface.size(), SurfaceSize::new(400, 300));

        let width_only = SourceSize {
            width: Some(500),
            height: None,
        };
        fx.add(width_only, false);
        assert_eq!(fx.surface.size(), SurfaceSize::new(500, 300));
    }

    #[test]
    fn test_limits_cap_growth() {
        let mut fx = Fixture::with_limits(SurfaceLimits {
            max_width: 200,
            max_height: 0,
        });

        fx.add(SourceSize::new(400, 400), false);
        assert_eq!(fx.surface.size(), SurfaceSize::new(200, 400));
    }

    #[test]
    fn test_unallocatable_size_keeps_surface() {
        let mut fx = Fixture::default();

        fx.add(SourceSize::new(20, 10), false);
        fx.add(SourceSize::new(u32::MAX, u32::MAX), false);

        assert_eq!(fx.registry.len(), 2);
        assert_eq!(fx.surface.size(), SurfaceSize::new(20, 10));
    }

    #[test]
    fn test_audio_collected_only_when_included() {
        let mut fx = Fixture::default();

        fx.add(SourceSize::new(10, 10), true);
        fx.add(SourceSize::new(10, 10), false);

        assert_eq!(fx.registry.len(), 2);
        assert_eq!(fx.registry.audio_tracks().len(), 1);
        assert!(fx.registry.single().is_none());
    }

    #[test]
    fn test_duplicate_registration_keeps_both() {
        let mut registry = SourceRegistry::default();
        let mut surface = MemorySurface::new();
        let stream = stream_with_audio("dup");

        for _ in 0..2 {
            registry.add_source(
                &mut surface,
                Arc::clone(&stream),
                Box::new(StaticFrameProvider::unready()),
                SourceSize::new(10, 10),
                None,
                true,
            );
        }

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.audio_tracks().len(), 2);
        let [first, second] = registry.entries() else {
            panic!("expected two entries");
        };
        assert_eq!(first.stream_id(), second.stream_id());
    }

    #[test]
    fn test_stop_tracks() {
        let mut registry = SourceRegistry::default();
        let mut surface = MemorySurface::new();
        let stream = stream_with_audio("cam");
        registry.add_source(
            &mut surface,
            Arc::clone(&stream),
            Box::new(StaticFrameProvider::unready()),
            SourceSize::new(10, 10),
            None,
            true,
        );

        registry.stop_tracks();
        assert!(stream.tracks().iter().all(|t| !t.is_live()));
        assert!(registry.audio_tracks().iter().all(|t| !t.is_live()));
    }
}

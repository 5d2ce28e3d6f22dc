//! Composition loop
//!
//! Each frame step either hands the single registered source straight
//! through, or paints every source onto the shared surface in registration
//! order. The first multi-source step captures the surface as the output
//! stream, injects the forwarded audio and delivers the stream exactly once.
//!
//! ## Phases
//!
//! - `Idle`: before `start`
//! - `Running`: steps are scheduled once per frame tick
//! - `Finished`: the single-source stream was delivered, nothing is rescheduled
//! - `Cancelled`: the scheduled loop was cancelled by the session

use crate::audio;
use crate::normalizer::normalize;
use crate::registry::SourceRegistry;
use crate::stream::MediaStream;
use crate::surface::RenderSurface;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Receives the output stream
pub type DeliveryCallback = Box<dyn FnOnce(Arc<MediaStream>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopPhase {
    Idle,
    Running,
    Finished,
    Cancelled,
}

/// Whether the loop wants another tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Reschedule,
    Finished,
}

/// A pending callback invocation.
///
/// Steps run under the session lock; the callback is invoked only after the
/// lock is released so it may call back into the session.
pub struct Delivery {
    callback: DeliveryCallback,
    stream: Arc<MediaStream>,
}

impl Delivery {
    pub fn deliver(self) {
        (self.callback)(self.stream);
    }

    #[must_use]
    pub fn stream(&self) -> &Arc<MediaStream> {
        &self.stream
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("stream_id", self.stream.id())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct StepResult {
    pub outcome: StepOutcome,
    pub delivery: Option<Delivery>,
}

/// Composition statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositionStats {
    /// Multi-source frame steps executed
    pub frames_drawn: u64,
    /// Full-surface clears performed
    pub surface_clears: u64,
    /// Callback invocations
    pub deliveries: u64,
    /// Whether the surface has been captured
    pub captured: bool,
}

/// Composition state machine
pub struct CompositionLoop {
    /// Frames since the last surface clear
    frame_counter: u64,
    /// One-way capture latch
    captured: bool,
    output: Option<Arc<MediaStream>>,
    callback: Option<DeliveryCallback>,
    phase: LoopPhase,
    clear_threshold: u64,
    stats: CompositionStats,
}

impl CompositionLoop {
    #[must_use]
    pub fn new(clear_threshold: u64) -> Self {
        Self {
            frame_counter: 0,
            captured: false,
            output: None,
            callback: None,
            phase: LoopPhase::Idle,
            clear_threshold,
            stats: CompositionStats::default(),
        }
    }

    /// Record the delivery callback and enter `Running`.
    ///
    /// A cancelled loop stays cancelled.
    pub fn begin(&mut self, callback: DeliveryCallback) {
        self.callback = Some(callback);
        if self.phase != LoopPhase::Cancelled {
            self.phase = LoopPhase::Running;
        }
    }

    pub fn cancel(&mut self) {
        if self.phase != LoopPhase::Finished {
            debug!(
                frames = self.stats.frames_drawn,
                "Composition loop cancelled"
            );
            self.phase = LoopPhase::Cancelled;
        }
    }

    /// Execute one frame step
    pub fn step(
        &mut self,
        surface: &mut dyn RenderSurface,
        registry: &SourceRegistry,
    ) -> StepResult {
        if let Some(single) = registry.single() {
            let stream = Arc::clone(&single.stream);
            self.output = Some(Arc::clone(&stream));
            self.phase = LoopPhase::Finished;
            info!(stream_id = %stream.id(), "Single source, passing stream through");
            return StepResult {
                outcome: StepOutcome::Finished,
                delivery: self.take_delivery(stream),
            };
        }

        if self.frame_counter > self.clear_threshold {
            let size = surface.size();
            surface.clear_rect(0.0, 0.0, f64::from(size.width), f64::from(size.height));
            self.frame_counter = 0;
            self.stats.surface_clears += 1;
            trace!(size = %size, "Cleared surface");
        }

        for entry in registry.entries() {
            let surface_size = surface.size();
            let coords = normalize(entry.placement, entry.size, surface_size);
            let size = entry.size.resolve(surface_size);
            surface.draw_image(
                entry.provider.as_ref(),
                coords.start_x,
                coords.start_y,
                f64::from(size.width),
                f64::from(size.height),
            );
        }

        let mut delivery = None;
        if !self.captured {
            let output = audio::inject(surface.capture_stream(), registry.audio_tracks());
            self.captured = true;
            self.stats.captured = true;
            self.output = Some(Arc::clone(&output));
            info!(
                stream_id = %output.id(),
                sources = registry.len(),
                audio_tracks = registry.audio_tracks().len(),
                "Captured composed output stream"
            );
            delivery = self.take_delivery(output);
        }

        self.frame_counter += 1;
        self.stats.frames_drawn += 1;

        StepResult {
            outcome: StepOutcome::Reschedule,
            delivery,
        }
    }

    fn take_delivery(&mut self, stream: Arc<MediaStream>) -> Option<Delivery> {
        let callback = self.callback.take()?;
        self.stats.deliveries += 1;
        Some(Delivery { callback, stream })
    }

    #[must_use]
    pub const fn phase(&self) -> LoopPhase {
        self.phase
    }

    #[must_use]
    pub const fn is_captured(&self) -> bool {
        self.captured
    }

    #[must_use]
    pub fn output(&self) -> Option<Arc<MediaStream>> {
        self.output.clone()
    }

    #[must_use]
    pub const fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    #[must_use]
    pub fn stats(&self) -> CompositionStats {
        self.stats.clone()
    }
}

impl fmt::Debug for CompositionLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionLoop")
            .field("phase", &self.phase)
            .field("frame_counter", &self.frame_counter)
            .field("captured", &self.captured)
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{MockFrameProvider, StaticFrameProvider, VideoFrame};
    use crate::track::{LocalTrack, MediaStreamTrack};
    use crate::types::{Placement, SourceSize, SurfaceSize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Surface that records calls instead of painting
    #[derive(Default)]
    struct RecordingSurface {
        size: SurfaceSize,
        draws: Vec<(f64, f64, f64, f64)>,
        clears: Vec<(f64, f64, f64, f64)>,
        captures: usize,
    }

    impl RenderSurface for RecordingSurface {
        fn size(&self) -> SurfaceSize {
            self.size
        }

        fn set_size(&mut self, size: SurfaceSize) {
            self.size = size;
        }

        fn draw_image(
            &mut self,
            _image: &dyn crate::frame::FrameProvider,
            x: f64,
            y: f64,
            width: f64,
            height: f64,
        ) {
            self.draws.push((x, y, width, height));
        }

        fn clear_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
            self.clears.push((x, y, width, height));
        }

        fn capture_stream(&mut self) -> Arc<MediaStream> {
            self.captures += 1;
            let track: Arc<dyn MediaStreamTrack> = Arc::new(LocalTrack::video());
            Arc::new(MediaStream::with_tracks(vec![track]))
        }
    }

    fn source(
        registry: &mut SourceRegistry,
        surface: &mut RecordingSurface,
        size: SourceSize,
        placement: Option<Placement>,
    ) {
        let frame = VideoFrame::solid(1, 1, [1, 1, 1, 255]);
        registry.add_source(
            surface,
            Arc::new(MediaStream::new("src")),
            Box::new(StaticFrameProvider::new(frame)),
            size,
            placement,
            false,
        );
    }

    fn counting_callback(counter: &Arc<AtomicUsize>) -> DeliveryCallback {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_single_source_passthrough() {
        let mut registry = SourceRegistry::default();
        let mut surface = RecordingSurface::default();
        let stream = Arc::new(MediaStream::new("only"));
        registry.add_source(
            &mut surface,
            Arc::clone(&stream),
            Box::new(StaticFrameProvider::unready()),
            SourceSize::new(10, 10),
            None,
            true,
        );

        let mut composition = CompositionLoop::new(200);
        composition.begin(Box::new(|_| {}));
        let result = composition.step(&mut surface, &registry);

        assert_eq!(result.outcome, StepOutcome::Finished);
        assert!(Arc::ptr_eq(result.delivery.unwrap().stream(), &stream));
        assert_eq!(composition.phase(), LoopPhase::Finished);
        assert!(surface.draws.is_empty());
        assert_eq!(surface.captures, 0);
        assert!(!composition.is_captured());
    }

    #[test]
    fn test_draws_in_registration_order() {
        let mut registry = SourceRegistry::default();
        let mut surface = RecordingSurface::default();
        source(&mut registry, &mut surface, SourceSize::new(300, 200), None);
        source(&mut registry, &mut surface, SourceSize::new(100, 100), None);
        let corner = Some(Placement::new(-5.0, 7.0));
        source(&mut registry, &mut surface, SourceSize::new(50, 50), corner);

        let mut composition = CompositionLoop::new(200);
        composition.begin(Box::new(|_| {}));
        composition.step(&mut surface, &registry);

        assert_eq!(
            surface.draws,
            vec![
                (0.0, 0.0, 300.0, 200.0),
                (100.0, 50.0, 100.0, 100.0),
                (-5.0, 7.0, 50.0, 50.0),
            ]
        );
    }

    #[test]
    fn test_capture_latch_delivers_once() {
        let mut registry = SourceRegistry::default();
        let mut surface = RecordingSurface::default();
        source(&mut registry, &mut surface, SourceSize::new(10, 10), None);
        source(&mut registry, &mut surface, SourceSize::new(20, 20), None);

        let calls = Arc::new(AtomicUsize::new(0));
        let mut composition = CompositionLoop::new(200);
        composition.begin(counting_callback(&calls));

        let first = composition.step(&mut surface, &registry);
        assert_eq!(first.outcome, StepOutcome::Reschedule);
        first.delivery.unwrap().deliver();

        for _ in 0..5 {
            assert!(composition.step(&mut surface, &registry).delivery.is_none());
        }

        // A later begin does not reopen the latch
        composition.begin(counting_callback(&calls));
        assert!(composition.step(&mut surface, &registry).delivery.is_none());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(surface.captures, 1);
        assert_eq!(composition.stats().deliveries, 1);
    }

    #[test]
    fn test_periodic_clear() {
        let mut registry = SourceRegistry::default();
        let mut surface = RecordingSurface::default();
        source(&mut registry, &mut surface, SourceSize::new(64, 48), None);
        source(&mut registry, &mut surface, SourceSize::new(32, 32), None);

        let mut composition = CompositionLoop::new(200);
        composition.begin(Box::new(|_| {}));
        for _ in 0..201 {
            composition.step(&mut surface, &registry);
        }
        assert!(surface.clears.is_empty());

        composition.step(&mut surface, &registry);
        assert_eq!(surface.clears, vec![(0.0, 0.0, 64.0, 48.0)]);
        assert_eq!(composition.frame_counter(), 1);
        assert_eq!(composition.stats().surface_clears, 1);
    }

    #[test]
    fn test_audio_injected_on_capture() {
        let mut registry = SourceRegistry::default();
        let mut surface = RecordingSurface::default();
        let audio: Arc<dyn MediaStreamTrack> = Arc::new(LocalTrack::audio());
        let with_audio = MediaStream::new("mic");
        with_audio.add_track(Arc::clone(&audio));
        registry.add_source(
            &mut surface,
            Arc::new(with_audio),
            Box::new(StaticFrameProvider::unready()),
            SourceSize::new(10, 10),
            None,
            true,
        );
        source(&mut registry, &mut surface, SourceSize::new(10, 10), None);

        let mut composition = CompositionLoop::new(200);
        composition.begin(Box::new(|_| {}));
        let delivery = composition.step(&mut surface, &registry).delivery.unwrap();

        let tracks = delivery.stream().audio_tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id(), audio.id());
    }

    #[test]
    fn test_unready_sources_do_not_block_capture() {
        let mut registry = SourceRegistry::default();
        let mut surface = RecordingSurface::default();
        for _ in 0..2 {
            let mut provider = MockFrameProvider::new();
            provider.expect_current_frame().never();
            provider.expect_is_ready().return_const(false);
            registry.add_source(
                &mut surface,
                Arc::new(MediaStream::new("late")),
                Box::new(provider),
                SourceSize::new(10, 10),
                None,
                false,
            );
        }

        let mut composition = CompositionLoop::new(200);
        composition.begin(Box::new(|_| {}));
        let result = composition.step(&mut surface, &registry);

        assert_eq!(surface.draws.len(), 2);
        assert!(result.delivery.is_some());
    }

    #[test]
    fn test_cancelled_loop_stays_cancelled() {
        let mut composition = CompositionLoop::new(200);
        composition.begin(Box::new(|_| {}));
        composition.cancel();
        assert_eq!(composition.phase(), LoopPhase::Cancelled);

        composition.begin(Box::new(|_| {}));
        assert_eq!(composition.phase(), LoopPhase::Cancelled);
    }
}

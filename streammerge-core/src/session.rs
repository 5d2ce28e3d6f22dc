//! Merger session - public entry point
//!
//! A session owns the shared surface, the source registry and the
//! composition loop. `start` runs one frame step synchronously and then keeps
//! stepping on a tokio task, once per scheduler tick, until the loop finishes
//! or is cancelled. Dropping the session cancels the task.

use crate::compositor::{
    CompositionLoop, CompositionStats, DeliveryCallback, LoopPhase, StepOutcome, StepResult,
};
use crate::config::MergerConfig;
use crate::error::{MergerError, Result};
use crate::frame::{FrameDecoder, FrameProvider, TestPatternDecoder};
use crate::registry::{SourceRegistry, SurfaceLimits};
use crate::scheduler::{FrameScheduler, IntervalScheduler};
use crate::stream::MediaStream;
use crate::surface::{MemorySurface, RenderSurface};
use crate::types::{Placement, SourceSize, SurfaceSize};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

/// Registration options for one source
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOptions {
    pub size: SourceSize,
    /// Explicit top-left placement; centered when absent
    pub placement: Option<Placement>,
    /// Forward the source's audio tracks into the composed output
    pub include_audio: bool,
}

impl SourceOptions {
    #[must_use]
    pub const fn sized(width: u32, height: u32) -> Self {
        Self {
            size: SourceSize::new(width, height),
            placement: None,
            include_audio: false,
        }
    }

    #[must_use]
    pub const fn at(mut self, x: f64, y: f64) -> Self {
        self.placement = Some(Placement::new(x, y));
        self
    }

    #[must_use]
    pub const fn with_audio(mut self) -> Self {
        self.include_audio = true;
        self
    }
}

/// Session statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub sources: usize,
    pub audio_tracks: usize,
    pub surface: SurfaceSize,
    pub phase: LoopPhase,
    pub composition: CompositionStats,
}

struct SessionInner {
    surface: Box<dyn RenderSurface>,
    registry: SourceRegistry,
    composition: CompositionLoop,
}

impl SessionInner {
    fn step(&mut self) -> StepResult {
        let Self {
            surface,
            registry,
            composition,
        } = self;
        composition.step(surface.as_mut(), registry)
    }
}

pub struct MergerSession {
    inner: Arc<Mutex<SessionInner>>,
    decoder: Arc<dyn FrameDecoder>,
    scheduler: Arc<dyn FrameScheduler>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MergerSession {
    /// Create a session over explicit collaborators
    pub fn new(
        config: &MergerConfig,
        surface: Box<dyn RenderSurface>,
        decoder: Arc<dyn FrameDecoder>,
        scheduler: Arc<dyn FrameScheduler>,
    ) -> Self {
        let limits = SurfaceLimits {
            max_width: config.max_surface_width,
            max_height: config.max_surface_height,
        };

        debug!(
            clear_threshold = config.clear_threshold,
            max_surface_width = config.max_surface_width,
            max_surface_height = config.max_surface_height,
            "Merger session created"
        );

        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                surface,
                registry: SourceRegistry::new(limits),
                composition: CompositionLoop::new(config.clear_threshold),
            })),
            decoder,
            scheduler,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Memory surface, test-pattern decoder and an interval scheduler at the
    /// configured frame rate
    #[must_use]
    pub fn with_defaults(config: &MergerConfig) -> Self {
        Self::new(
            config,
            Box::new(MemorySurface::new()),
            Arc::new(TestPatternDecoder::default()),
            Arc::new(IntervalScheduler::from_frame_rate(config.frame_rate)),
        )
    }

    /// Register a source, wrapping it with the session's decoder
    pub fn add_source(&self, stream: Arc<MediaStream>, options: SourceOptions) {
        let provider = self.decoder.attach(&stream);
        self.add_source_with_provider(stream, provider, options);
    }

    /// Register a source with a caller-supplied frame provider.
    ///
    /// Playback failures are logged and do not block registration.
    pub fn add_source_with_provider(
        &self,
        stream: Arc<MediaStream>,
        mut provider: Box<dyn FrameProvider>,
        options: SourceOptions,
    ) {
        match provider.play() {
            Ok(()) => info!(stream_id = %stream.id(), "Source video is playing"),
            Err(e) => error!(
                stream_id = %stream.id(),
                error = %e,
                "Failed to start source playback"
            ),
        }

        let mut guard = self.inner.lock();
        let SessionInner {
            surface,
            registry,
            ..
        } = &mut *guard;
        registry.add_source(
            surface.as_mut(),
            stream,
            provider,
            options.size,
            options.placement,
            options.include_audio,
        );
    }

    /// Start composing and deliver the output stream to `callback`.
    ///
    /// The first frame step runs before this returns. Must be called from
    /// within a tokio runtime when more than one source is registered.
    /// A cancelled session refuses to start and never invokes `callback`.
    pub fn start<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Arc<MediaStream>) + Send + 'static,
    {
        self.start_boxed(Box::new(callback))
    }

    /// Start composing and receive the output stream on a one-shot channel
    pub fn start_with_channel(&self) -> Result<oneshot::Receiver<Arc<MediaStream>>> {
        let (tx, rx) = oneshot::channel();
        self.start(move |stream| {
            let _ = tx.send(stream);
        })?;
        Ok(rx)
    }

    fn start_boxed(&self, callback: DeliveryCallback) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(MergerError::Cancelled);
        }

        let (result, runtime) = {
            let mut inner = self.inner.lock();
            if inner.registry.is_empty() {
                return Err(MergerError::NoSources);
            }
            // Only the multi-source path reschedules itself.
            let runtime = if inner.registry.len() > 1 {
                let handle = tokio::runtime::Handle::try_current()
                    .map_err(|e| {
                        MergerError::Internal(format!("tokio runtime required: {e}"))
                    })?;
                Some(handle)
            } else {
                None
            };
            inner.composition.begin(callback);
            (inner.step(), runtime)
        };

        let outcome = result.outcome;
        if let Some(delivery) = result.delivery {
            delivery.deliver();
        }

        if let (StepOutcome::Reschedule, Some(runtime)) = (outcome, runtime) {
            self.spawn_loop(&runtime);
        }
        Ok(())
    }

    fn spawn_loop(&self, runtime: &tokio::runtime::Handle) {
        if self.cancel.is_cancelled() {
            debug!("Session cancelled, not scheduling further frames");
            return;
        }

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let scheduler = Arc::clone(&self.scheduler);
        let cancel = self.cancel.clone();
        let span = tracing::info_span!("composition_loop");
        let handle = runtime.spawn(run_loop(inner, scheduler, cancel).instrument(span));
        *task = Some(handle);
    }

    /// Stop every track of every registered source and every forwarded
    /// audio track. The composition loop keeps running.
    pub fn stop_tracks(&self) {
        self.inner.lock().registry.stop_tracks();
    }

    /// Cancel the scheduled composition loop
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.inner.lock().composition.cancel();
    }

    /// Cancel the loop and stop all tracks
    pub fn stop(&self) {
        self.cancel();
        self.stop_tracks();
        info!("Merger session stopped");
    }

    /// Output stream, once produced
    #[must_use]
    pub fn output(&self) -> Option<Arc<MediaStream>> {
        self.inner.lock().composition.output()
    }

    #[must_use]
    pub fn surface_size(&self) -> SurfaceSize {
        self.inner.lock().surface.size()
    }

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.inner.lock().registry.len()
    }

    #[must_use]
    pub fn audio_track_count(&self) -> usize {
        self.inner.lock().registry.audio_tracks().len()
    }

    #[must_use]
    pub fn phase(&self) -> LoopPhase {
        self.inner.lock().composition.phase()
    }

    /// Whether the scheduled loop task is alive
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let inner = self.inner.lock();
        SessionStats {
            sources: inner.registry.len(),
            audio_tracks: inner.registry.audio_tracks().len(),
            surface: inner.surface.size(),
            phase: inner.composition.phase(),
            composition: inner.composition.stats(),
        }
    }
}

impl Drop for MergerSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        debug!("Merger session dropped");
    }
}

/// One step under the lock; the callback runs after the lock is released.
fn step_shared(inner: &Mutex<SessionInner>) -> StepOutcome {
    let result = inner.lock().step();
    if let Some(delivery) = result.delivery {
        delivery.deliver();
    }
    result.outcome
}

async fn run_loop(
    inner: Arc<Mutex<SessionInner>>,
    scheduler: Arc<dyn FrameScheduler>,
    cancel: CancellationToken,
) {
    debug!("Composition loop started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = scheduler.next_frame() => {}
        }

        if step_shared(&inner) == StepOutcome::Finished {
            break;
        }
    }

    debug!("Composition loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{MockFrameProvider, StaticFrameProvider, VideoFrame};
    use crate::scheduler::ManualScheduler;
    use crate::track::{LocalTrack, MediaStreamTrack};

    fn session_with(scheduler: Arc<ManualScheduler>) -> MergerSession {
        MergerSession::new(
            &MergerConfig::default(),
            Box::new(MemorySurface::new()),
            Arc::new(TestPatternDecoder::new(4, 4)),
            scheduler,
        )
    }

    #[test]
    fn test_start_without_sources() {
        let session = session_with(Arc::new(ManualScheduler::new()));
        assert!(matches!(session.start(|_| {}), Err(MergerError::NoSources)));
    }

    #[test]
    fn test_playback_failure_is_not_fatal() {
        let session = session_with(Arc::new(ManualScheduler::new()));
        let mut provider = MockFrameProvider::new();
        provider.expect_play().times(1).returning(|| {
            Err(MergerError::PlaybackFailed {
                stream_id: "broken".into(),
                reason: "not playable".to_string(),
            })
        });

        session.add_source_with_provider(
            Arc::new(MediaStream::new("broken")),
            Box::new(provider),
            SourceOptions::sized(10, 10),
        );
        assert_eq!(session.source_count(), 1);
    }

    #[test]
    fn test_single_source_needs_no_runtime() {
        let session = session_with(Arc::new(ManualScheduler::new()));
        let stream = Arc::new(MediaStream::new("solo"));
        session.add_source(Arc::clone(&stream), SourceOptions::sized(10, 10));

        let delivered = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&delivered);
        session.start(move |out| *slot.lock() = Some(out)).unwrap();

        assert!(Arc::ptr_eq(delivered.lock().as_ref().unwrap(), &stream));
        assert_eq!(session.phase(), LoopPhase::Finished);
        assert!(!session.is_running());
    }

    #[test]
    fn test_multi_source_without_runtime_errors() {
        let session = session_with(Arc::new(ManualScheduler::new()));
        for id in ["a", "b"] {
            session.add_source(Arc::new(MediaStream::new(id)), SourceOptions::sized(10, 10));
        }

        let result = session.start(|_| {});
        assert!(matches!(result, Err(MergerError::Internal(_))));
        assert!(session.output().is_none());
        assert_eq!(session.phase(), LoopPhase::Idle);
    }

    #[tokio::test]
    async fn test_loop_steps_per_tick() {
        let scheduler = Arc::new(ManualScheduler::new());
        let session = session_with(Arc::clone(&scheduler));
        let red = VideoFrame::solid(1, 1, [255, 0, 0, 255]);
        session.add_source_with_provider(
            Arc::new(MediaStream::new("a")),
            Box::new(StaticFrameProvider::new(red.clone())),
            SourceOptions::sized(8, 8),
        );
        session.add_source_with_provider(
            Arc::new(MediaStream::new("b")),
            Box::new(StaticFrameProvider::new(red)),
            SourceOptions::sized(4, 4).at(0.0, 0.0),
        );

        let rx = session.start_with_channel().unwrap();
        let output = rx.await.unwrap();
        assert_eq!(output.video_tracks().len(), 1);
        assert!(session.is_running());

        scheduler.tick(3);
        while scheduler.delivered() < 3 {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;

        session.cancel();
        for _ in 0..10 {
            if !session.is_running() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!session.is_running());
        assert_eq!(session.phase(), LoopPhase::Cancelled);
        assert!(session.stats().composition.frames_drawn >= 3);
    }

    #[tokio::test]
    async fn test_start_after_cancel_is_refused() {
        let session = session_with(Arc::new(ManualScheduler::new()));
        for id in ["a", "b"] {
            session.add_source(Arc::new(MediaStream::new(id)), SourceOptions::sized(10, 10));
        }
        session.cancel();

        let delivered = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&delivered);
        let result = session.start(move |_| *flag.lock() = true);

        assert!(matches!(result, Err(MergerError::Cancelled)));
        assert!(!*delivered.lock());
        assert!(session.output().is_none());
        assert_eq!(session.stats().composition.frames_drawn, 0);
        assert_eq!(session.phase(), LoopPhase::Cancelled);
        assert!(!session.is_running());
    }

    #[test]
    fn test_stop_tracks_reaches_every_track() {
        let session = session_with(Arc::new(ManualScheduler::new()));
        let audio: Arc<dyn MediaStreamTrack> = Arc::new(LocalTrack::audio());
        let video: Arc<dyn MediaStreamTrack> = Arc::new(LocalTrack::video());
        let stream = Arc::new(MediaStream::with_tracks(vec![
            Arc::clone(&video),
            Arc::clone(&audio),
        ]));

        let options = SourceOptions::sized(10, 10).with_audio();
        session.add_source(Arc::clone(&stream), options);
        assert_eq!(session.audio_track_count(), 1);

        session.stop_tracks();
        assert!(!audio.is_live());
        assert!(!video.is_live());
        assert_eq!(session.phase(), LoopPhase::Idle);
    }

    #[test]
    fn test_stats_serialize() {
        let session = session_with(Arc::new(ManualScheduler::new()));
        session.add_source(Arc::new(MediaStream::new("a")), SourceOptions::sized(16, 9));

        let stats = serde_json::to_value(session.stats()).unwrap();
        assert_eq!(stats["phase"], "idle");
        assert_eq!(stats["sources"], 1);
        assert_eq!(stats["surface"]["width"], 16);
        assert_eq!(stats["composition"]["captured"], false);
    }
}

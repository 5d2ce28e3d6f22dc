//! Render surfaces
//!
//! The compositor paints every source onto one [`RenderSurface`] and, once,
//! captures it as a live output stream. [`MemorySurface`] is an RGBA buffer
//! implementation with nearest-neighbour scaling.

use crate::frame::{FrameProvider, VideoFrame, BYTES_PER_PIXEL};
use crate::stream::MediaStream;
use crate::track::{MediaStreamTrack, TrackKind, TrackState};
use crate::types::{SurfaceSize, TrackId};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Largest pixel buffer a [`MemorySurface`] will allocate (1 GiB)
pub const MAX_SURFACE_BYTES: usize = 1 << 30;

/// Drawable region shared by all sources of a session
pub trait RenderSurface: Send {
    fn size(&self) -> SurfaceSize;

    fn set_size(&mut self, size: SurfaceSize);

    /// Paint the provider's current frame scaled into the given rectangle.
    /// Pixels are overwritten, not blended.
    fn draw_image(
        &mut self,
        image: &dyn FrameProvider,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    );

    fn clear_rect(&mut self, x: f64, y: f64, width: f64, height: f64);

    /// Capture the surface content as a live stream with one video track
    fn capture_stream(&mut self) -> Arc<MediaStream>;
}

#[derive(Debug, Default)]
struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    /// Reallocate the buffer. Sizes above [`MAX_SURFACE_BYTES`] are refused.
    fn resize(&mut self, width: u32, height: u32) -> bool {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL))
            .filter(|len| *len <= MAX_SURFACE_BYTES);
        let Some(len) = len else {
            warn!(
                width,
                height,
                max_bytes = MAX_SURFACE_BYTES,
                "Surface size refused"
            );
            return false;
        };

        self.width = width;
        self.height = height;
        // Resizing discards the previous content, as a canvas element does.
        self.pixels = vec![0; len];
        true
    }

    fn snapshot(&self) -> VideoFrame {
        VideoFrame {
            width: self.width,
            height: self.height,
            data: Bytes::copy_from_slice(&self.pixels),
        }
    }

    /// Intersect a rectangle with the canvas bounds, returning pixel ranges
    fn clip(&self, x: f64, y: f64, width: f64, height: f64) -> Option<(u32, u32, u32, u32)> {
        let x0 = x.round().max(0.0);
        let y0 = y.round().max(0.0);
        let x1 = (x + width).round().min(f64::from(self.width));
        let y1 = (y + height).round().min(f64::from(self.height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

/// In-memory RGBA surface
#[derive(Debug)]
pub struct MemorySurface {
    canvas: Arc<RwLock<Canvas>>,
    draw_count: u64,
    clear_count: u64,
}

impl MemorySurface {
    #[must_use]
    pub fn new() -> Self {
        Self::with_size(SurfaceSize::default())
    }

    /// Surface of the given size, or an empty one when the size is refused
    #[must_use]
    pub fn with_size(size: SurfaceSize) -> Self {
        let mut canvas = Canvas::default();
        canvas.resize(size.width, size.height);
        Self {
            canvas: Arc::new(RwLock::new(canvas)),
            draw_count: 0,
            clear_count: 0,
        }
    }

    /// Copy of the current pixel content
    #[must_use]
    pub fn snapshot(&self) -> VideoFrame {
        self.canvas.read().snapshot()
    }

    #[must_use]
    pub const fn draw_count(&self) -> u64 {
        self.draw_count
    }

    #[must_use]
    pub const fn clear_count(&self) -> u64 {
        self.clear_count
    }
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface for MemorySurface {
    fn size(&self) -> SurfaceSize {
        let canvas = self.canvas.read();
        SurfaceSize::new(canvas.width, canvas.height)
    }

    fn set_size(&mut self, size: SurfaceSize) {
        let mut canvas = self.canvas.write();
        if canvas.width != size.width || canvas.height != size.height {
            debug!(
                old_width = canvas.width,
                old_height = canvas.height,
                size = %size,
                "Resizing surface"
            );
            canvas.resize(size.width, size.height);
        }
    }

    fn draw_image(
        &mut self,
        image: &dyn FrameProvider,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) {
        let Some(frame) = image.current_frame() else {
            trace!("Source not ready, skipping paint");
            return;
        };
        if !frame.is_consistent() {
            trace!(
                width = frame.width,
                height = frame.height,
                len = frame.data.len(),
                "Frame buffer does not match its size, skipping paint"
            );
            return;
        }
        if frame.is_empty() || width <= 0.0 || height <= 0.0 {
            return;
        }

        let mut canvas = self.canvas.write();
        let Some((x0, y0, x1, y1)) = canvas.clip(x, y, width, height) else {
            return;
        };

        let origin_x = x.round();
        let origin_y = y.round();
        let row_stride = canvas.width as usize * BYTES_PER_PIXEL;
        for dy in y0..y1 {
            let sy = (((f64::from(dy) - origin_y) / height) * f64::from(frame.height)) as u32;
            let sy = sy.min(frame.height - 1);
            for dx in x0..x1 {
                let sx = (((f64::from(dx) - origin_x) / width) * f64::from(frame.width)) as u32;
                let sx = sx.min(frame.width - 1);
                let src = (sy as usize * frame.width as usize + sx as usize) * BYTES_PER_PIXEL;
                let dst = dy as usize * row_stride + dx as usize * BYTES_PER_PIXEL;
                canvas.pixels[dst..dst + BYTES_PER_PIXEL]
                    .copy_from_slice(&frame.data[src..src + BYTES_PER_PIXEL]);
            }
        }

        self.draw_count += 1;
    }

    fn clear_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        let mut canvas = self.canvas.write();
        self.clear_count += 1;
        let Some((x0, y0, x1, y1)) = canvas.clip(x, y, width, height) else {
            return;
        };
        let row_stride = canvas.width as usize * BYTES_PER_PIXEL;
        for row in y0..y1 {
            let start = row as usize * row_stride + x0 as usize * BYTES_PER_PIXEL;
            let end = row as usize * row_stride + x1 as usize * BYTES_PER_PIXEL;
            canvas.pixels[start..end].fill(0);
        }
    }

    fn capture_stream(&mut self) -> Arc<MediaStream> {
        let track: Arc<dyn MediaStreamTrack> = Arc::new(SurfaceCaptureTrack {
            id: TrackId::generate(),
            canvas: Arc::clone(&self.canvas),
            ended: AtomicBool::new(false),
            frames_read: AtomicU64::new(0),
        });
        let stream = MediaStream::with_tracks(vec![track]);
        debug!(stream_id = %stream.id(), size = %self.size(), "Captured surface stream");
        Arc::new(stream)
    }
}

/// Video track fed live from a [`MemorySurface`]
#[derive(Debug)]
pub struct SurfaceCaptureTrack {
    id: TrackId,
    canvas: Arc<RwLock<Canvas>>,
    ended: AtomicBool,
    frames_read: AtomicU64,
}

impl SurfaceCaptureTrack {
    #[must_use]
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }
}

impl MediaStreamTrack for SurfaceCaptureTrack {
    fn id(&self) -> &TrackId {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn state(&self) -> TrackState {
        if self.ended.load(Ordering::Acquire) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    fn stop(&self) {
        self.ended.store(true, Ordering::Release);
    }

    /// Current surface content, or `None` once the track has been stopped
    fn latest_frame(&self) -> Option<VideoFrame> {
        if self.ended.load(Ordering::Acquire) {
            return None;
        }
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(self.canvas.read().snapshot())
    }
}

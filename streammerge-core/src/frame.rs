//! Decoded video frames and the providers that produce them

use crate::error::{MergerError, Result};
use crate::stream::MediaStream;
use crate::types::StreamId;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Bytes per RGBA pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// A decoded RGBA8 frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA data, `width * height * 4` bytes
    pub data: Bytes,
}

impl VideoFrame {
    /// Returns `None` when the buffer length does not match the dimensions.
    #[must_use]
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> Option<Self> {
        let data = data.into();
        if data.len() != width as usize * height as usize * BYTES_PER_PIXEL {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Frame filled with a single color
    #[must_use]
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let data: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(pixels * BYTES_PER_PIXEL)
            .collect();
        Self {
            width,
            height,
            data: Bytes::from(data),
        }
    }

    /// Pixel at (x, y), or `None` outside the frame
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = self.data.get(offset..offset + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `data` holds exactly `width * height` RGBA pixels
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL))
            .is_some_and(|len| len == self.data.len())
    }
}

/// Wraps a source and exposes its current decoded frame.
///
/// An unready provider returns `None` from [`FrameProvider::current_frame`];
/// surfaces treat that as a no-op paint.
#[cfg_attr(test, mockall::automock)]
pub trait FrameProvider: Send {
    /// Begin producing frames
    fn play(&mut self) -> Result<()>;

    fn is_ready(&self) -> bool;

    fn current_frame(&self) -> Option<VideoFrame>;
}

/// Creates a frame provider for a source stream
pub trait FrameDecoder: Send + Sync {
    fn attach(&self, stream: &Arc<MediaStream>) -> Box<dyn FrameProvider>;
}

/// Provider that always yields the same frame
#[derive(Debug, Clone)]
pub struct StaticFrameProvider {
    frame: Option<VideoFrame>,
}

impl StaticFrameProvider {
    #[must_use]
    pub const fn new(frame: VideoFrame) -> Self {
        Self { frame: Some(frame) }
    }

    /// A provider whose source never becomes playable
    #[must_use]
    pub const fn unready() -> Self {
        Self { frame: None }
    }
}

impl FrameProvider for StaticFrameProvider {
    fn play(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.frame.is_some()
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        self.frame.clone()
    }
}

/// Synthetic source: a solid background with a bar that moves one column
/// per produced frame.
#[derive(Debug)]
pub struct TestPatternProvider {
    stream_id: StreamId,
    width: u32,
    height: u32,
    background: [u8; 4],
    playing: AtomicBool,
    sequence: AtomicU64,
}

impl TestPatternProvider {
    #[must_use]
    pub const fn new(stream_id: StreamId, width: u32, height: u32, background: [u8; 4]) -> Self {
        Self {
            stream_id,
            width,
            height,
            background,
            playing: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }
}

impl FrameProvider for TestPatternProvider {
    fn play(&mut self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MergerError::PlaybackFailed {
                stream_id: self.stream_id.clone(),
                reason: format!("empty pattern size {}x{}", self.width, self.height),
            });
        }
        self.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        if !self.is_ready() {
            return None;
        }
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let bar_x = (seq % u64::from(self.width)) as u32;
        let [r, g, b, _] = self.background;
        let bar = [255 - r, 255 - g, 255 - b, 255];

        let len = self.width as usize * self.height as usize * BYTES_PER_PIXEL;
        let mut data = Vec::with_capacity(len);
        for _ in 0..self.height {
            for x in 0..self.width {
                if x == bar_x {
                    data.extend_from_slice(&bar);
                } else {
                    data.extend_from_slice(&self.background);
                }
            }
        }

        Some(VideoFrame {
            width: self.width,
            height: self.height,
            data: Bytes::from(data),
        })
    }
}

/// Decoder that turns every stream into a test pattern whose color is
/// derived from the stream id.
#[derive(Debug, Clone, Copy)]
pub struct TestPatternDecoder {
    width: u32,
    height: u32,
}

impl TestPatternDecoder {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for TestPatternDecoder {
    fn default() -> Self {
        Self::new(160, 120)
    }
}

impl FrameDecoder for TestPatternDecoder {
    fn attach(&self, stream: &Arc<MediaStream>) -> Box<dyn FrameProvider> {
        Box::new(TestPatternProvider::new(
            stream.id().clone(),
            self.width,
            self.height,
            color_for(stream.id().as_str()),
        ))
    }
}

/// FNV-1a over the id, folded into an opaque color
fn color_for(id: &str) -> [u8; 4] {
    let hash = id.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |acc, b| {
        (acc ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    });
    let [r, g, b, ..] = hash.to_le_bytes();
    [r, g, b, 255]
}

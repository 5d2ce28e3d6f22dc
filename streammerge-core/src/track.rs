//! Media tracks
//!
//! A track is the smallest unit the merger forwards: sources expose their
//! audio tracks for injection, and teardown stops every track it can reach.

use crate::frame::VideoFrame;
use crate::types::TrackId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl From<&str> for TrackKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "audio" => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// Lifecycle state of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Live,
    Ended,
}

/// A live media track owned by a source or produced by a surface capture.
pub trait MediaStreamTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &TrackId;

    fn kind(&self) -> TrackKind;

    fn state(&self) -> TrackState;

    /// Stop the track. Stopping an ended track is a no-op.
    fn stop(&self);

    /// Most recent frame of a live video track, for tracks that can expose one
    fn latest_frame(&self) -> Option<VideoFrame> {
        None
    }

    fn is_audio(&self) -> bool {
        self.kind() == TrackKind::Audio
    }

    fn is_video(&self) -> bool {
        self.kind() == TrackKind::Video
    }

    fn is_live(&self) -> bool {
        self.state() == TrackState::Live
    }
}

/// Plain in-process track with an atomic ended flag
#[derive(Debug)]
pub struct LocalTrack {
    id: TrackId,
    kind: TrackKind,
    ended: AtomicBool,
}

impl LocalTrack {
    pub fn new(id: impl Into<TrackId>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            ended: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn audio() -> Self {
        Self::new(TrackId::generate(), TrackKind::Audio)
    }

    #[must_use]
    pub fn video() -> Self {
        Self::new(TrackId::generate(), TrackKind::Video)
    }
}

impl MediaStreamTrack for LocalTrack {
    fn id(&self) -> &TrackId {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn state(&self) -> TrackState {
        if self.ended.load(Ordering::Acquire) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    fn stop(&self) {
        if !self.ended.swap(true, Ordering::AcqRel) {
            debug!(track_id = %self.id, kind = ?self.kind, "Track stopped");
        }
    }
}

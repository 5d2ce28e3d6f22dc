//! `StreamMerge` core
//!
//! Composites several live video sources onto one shared surface and
//! produces a single output stream, optionally carrying the audio tracks of
//! selected sources.
//!
//! ## Architecture
//!
//! - **`normalizer`**: places a source at its explicit position or centers it
//! - **`SourceRegistry`**: ordered sources plus the forwarded audio tracks;
//!   grows the surface to fit each new source
//! - **`audio::inject`**: attaches forwarded audio to the captured output
//! - **`CompositionLoop`**: per-frame draw, periodic clear and one-time capture
//! - **`MergerSession`**: owns all of the above and drives the loop on a
//!   cancellable tokio task
//!
//! Sources, frame decoding, the render surface and frame timing are
//! collaborators behind the [`FrameProvider`], [`FrameDecoder`],
//! [`RenderSurface`] and [`FrameScheduler`] traits. In-memory
//! implementations of each are provided.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use streammerge_core::{MergerConfig, MergerSession, MediaStream, SourceOptions};
//!
//! let session = MergerSession::with_defaults(&MergerConfig::default());
//! session.add_source(camera, SourceOptions::sized(640, 480).with_audio());
//! session.add_source(screen, SourceOptions::sized(320, 240).at(0.0, 0.0));
//! let output = session.start_with_channel()?.await?;
//! ```

pub mod audio;
pub mod compositor;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod normalizer;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod stream;
pub mod surface;
pub mod track;
pub mod types;

pub use compositor::{CompositionLoop, CompositionStats, LoopPhase};
pub use config::{LoggingConfig, MergerConfig};
pub use error::{MergerError, Result};
pub use frame::{
    FrameDecoder, FrameProvider, StaticFrameProvider, TestPatternDecoder, TestPatternProvider,
    VideoFrame,
};
pub use registry::{SourceEntry, SourceRegistry};
pub use scheduler::{FrameScheduler, IntervalScheduler, ManualScheduler};
pub use session::{MergerSession, SessionStats, SourceOptions};
pub use stream::MediaStream;
pub use surface::{MemorySurface, RenderSurface, SurfaceCaptureTrack};
pub use track::{LocalTrack, MediaStreamTrack, TrackKind, TrackState};
pub use types::{Placement, RenderCoordinates, SourceSize, StreamId, SurfaceSize, TrackId};

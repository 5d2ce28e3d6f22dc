//! Source placement on the shared surface

use crate::types::{Placement, RenderCoordinates, SourceSize, SurfaceSize};

/// Compute the top-left draw position of a source.
///
/// An explicit placement is returned verbatim, without bounds checks. Without
/// one the declared rectangle is centered on each axis where it fits and
/// pinned to 0 where it does not. Unspecified declared axes take the surface
/// dimension.
#[must_use]
pub fn normalize(
    placement: Option<Placement>,
    declared: SourceSize,
    surface: SurfaceSize,
) -> RenderCoordinates {
    if let Some(Placement { x, y }) = placement {
        return RenderCoordinates {
            start_x: x,
            start_y: y,
        };
    }

    let size = declared.resolve(surface);
    RenderCoordinates {
        start_x: center(surface.width, size.width),
        start_y: center(surface.height, size.height),
    }
}

fn center(surface: u32, declared: u32) -> f64 {
    if surface >= declared {
        f64::from(surface - declared) / 2.0
    } else {
        0.0
    }
}

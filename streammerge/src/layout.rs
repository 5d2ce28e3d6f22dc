//! Demo layouts

use clap::ValueEnum;
use streammerge_core::SourceOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayoutMode {
    /// Full-size background with tiles placed on a grid over it
    Grid,
    /// Shrinking sources stacked on the surface center
    Centered,
}

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    mode: LayoutMode,
    tiles: usize,
    tile_width: u32,
    tile_height: u32,
    columns: u32,
}

impl Layout {
    pub fn new(
        mode: LayoutMode,
        tiles: usize,
        tile_width: u32,
        tile_height: u32,
        columns: u32,
    ) -> Self {
        Self {
            mode,
            tiles,
            tile_width,
            tile_height,
            columns: columns.max(1),
        }
    }

    pub fn has_background(&self) -> bool {
        self.mode == LayoutMode::Grid
    }

    /// Registration options in paint order
    pub fn options(&self, with_audio: bool) -> Vec<SourceOptions> {
        let tile = |options: SourceOptions| {
            if with_audio {
                options.with_audio()
            } else {
                options
            }
        };

        match self.mode {
            LayoutMode::Grid => {
                let tiles = u32::try_from(self.tiles).unwrap_or(u32::MAX);
                let rows = tiles.div_ceil(self.columns).max(1);
                let mut options = vec![SourceOptions::sized(
                    self.tile_width.saturating_mul(self.columns.min(tiles.max(1))),
                    self.tile_height.saturating_mul(rows),
                )];
                options.extend((0..tiles).map(|i| {
                    let x = f64::from(i % self.columns) * f64::from(self.tile_width);
                    let y = f64::from(i / self.columns) * f64::from(self.tile_height);
                    let cell = SourceOptions::sized(self.tile_width, self.tile_height);
                    tile(cell.at(x, y))
                }));
                options
            }
            LayoutMode::Centered => {
                let count = u32::try_from(self.tiles.max(1)).unwrap_or(u32::MAX);
                (0..count)
                    .map(|i| {
                        let width = self.tile_width * (count - i) / count;
                        let height = self.tile_height * (count - i) / count;
                        tile(SourceOptions::sized(width, height))
                    })
                    .collect()
            }
        }
    }
}

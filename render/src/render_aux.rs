use std::ops::Range;

use glam::UVec2;
use thiserror::Error;

use crate::shaders::VertexAttribute;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvariantViolation(String);

macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(InvariantViolation(format!($($arg)+)));
        }
    };
}

/// Intermediate buffers of one finished frame, read back from the device or
/// produced by the host reference.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAux {
    pub img_size: UVec2,
    pub tile_bounds: UVec2,
    pub attributes: Vec<VertexAttribute>,
    /// Scanned overlap counts, one longer than the splat count. Entry `i` is the
    /// first instance of splat `i`, the last entry is the instance total.
    pub offsets: Vec<u32>,
    /// Sorted `(tile << 32) | depth_bits` keys.
    pub keys: Vec<u64>,
    /// Splat index of each sorted key.
    pub values: Vec<u32>,
    /// `[start, end)` into the sorted instances, per tile.
    pub boundaries: Vec<[u32; 2]>,
}

impl FrameAux {
    pub fn num_splats(&self) -> usize {
        self.attributes.len()
    }

    pub fn num_instances(&self) -> u32 {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn num_visible(&self) -> usize {
        self.attributes.iter().filter(|a| a.is_visible()).count()
    }

    pub fn num_tiles(&self) -> u32 {
        self.tile_bounds.x * self.tile_bounds.y
    }

    pub fn overlap_count(&self, splat: usize) -> u32 {
        self.offsets[splat + 1] - self.offsets[splat]
    }

    pub fn tile_range(&self, tile: u32) -> Range<usize> {
        let [start, end] = self.boundaries[tile as usize];
        start as usize..end as usize
    }

    pub fn tile_of(&self, instance: usize) -> u32 {
        (self.keys[instance] >> 32) as u32
    }

    pub fn depth_of(&self, instance: usize) -> f32 {
        f32::from_bits(self.keys[instance] as u32)
    }

    /// Instances per tile, row major over the tile grid.
    pub fn calc_tile_depth(&self) -> Vec<u32> {
        self.boundaries.iter().map(|[start, end]| end - start).collect()
    }

    /// Checks every structural invariant of the binned frame.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let num_splats = self.num_splats();
        let num_tiles = self.num_tiles();

        ensure!(
            self.offsets.len() == num_splats + 1,
            "Expected {} offsets, got {}",
            num_splats + 1,
            self.offsets.len()
        );
        ensure!(self.offsets[0] == 0, "First offset is {}", self.offsets[0]);
        for (i, w) in self.offsets.windows(2).enumerate() {
            ensure!(w[0] <= w[1], "Offsets decrease at splat {i}: {} > {}", w[0], w[1]);
        }

        let total = self.num_instances();
        ensure!(
            self.keys.len() == total as usize && self.values.len() == total as usize,
            "Scan total {total} but {} keys and {} values",
            self.keys.len(),
            self.values.len()
        );

        for (i, attr) in self.attributes.iter().enumerate() {
            let count = self.overlap_count(i);
            ensure!(
                count == attr.tile_count(),
                "Splat {i} has {count} instances but covers {} tiles",
                attr.tile_count()
            );
            ensure!(
                attr.is_visible() == (count > 0),
                "Splat {i} visible = {} with {count} instances",
                attr.is_visible()
            );
            ensure!(
                attr.tile_max().cmple(self.tile_bounds).all(),
                "Splat {i} tile rect {:?} outside the grid {}",
                attr.aabb,
                self.tile_bounds
            );
        }

        for (i, w) in self.keys.windows(2).enumerate() {
            ensure!(
                w[0] <= w[1],
                "Keys out of order at {i}: {:#x} > {:#x}",
                w[0],
                w[1]
            );
        }

        let mut seen = vec![0u32; num_splats];
        for (i, &value) in self.values.iter().enumerate() {
            ensure!(
                (value as usize) < num_splats,
                "Instance {i} points at splat {value} of {num_splats}"
            );
            let attr = &self.attributes[value as usize];
            ensure!(
                self.depth_of(i) == attr.depth,
                "Instance {i} depth {} doesn't match splat {value} depth {}",
                self.depth_of(i),
                attr.depth
            );
            let tile = self.tile_of(i);
            let (tx, ty) = (tile % self.tile_bounds.x, tile / self.tile_bounds.x);
            let (min, max) = (attr.tile_min(), attr.tile_max());
            ensure!(
                tile < num_tiles && tx >= min.x && tx < max.x && ty >= min.y && ty < max.y,
                "Instance {i} in tile {tile} outside splat {value} rect {:?}",
                attr.aabb
            );
            seen[value as usize] += 1;
        }
        for (i, &n) in seen.iter().enumerate() {
            ensure!(
                n == self.overlap_count(i),
                "Splat {i} has {n} sorted instances, expected {}",
                self.overlap_count(i)
            );
        }

        ensure!(
            self.boundaries.len() == num_tiles as usize,
            "Expected {num_tiles} tile ranges, got {}",
            self.boundaries.len()
        );
        let mut cursor = 0;
        for tile in 0..num_tiles {
            let [start, end] = self.boundaries[tile as usize];
            ensure!(
                start == cursor && start <= end && end <= total,
                "Tile {tile} range {start}..{end} doesn't continue at {cursor}"
            );
            for i in start..end {
                ensure!(
                    self.tile_of(i as usize) == tile,
                    "Instance {i} of tile {} inside the range of tile {tile}",
                    self.tile_of(i as usize)
                );
            }
            cursor = end;
        }
        ensure!(
            cursor == total,
            "Tile ranges cover {cursor} of {total} instances"
        );

        Ok(())
    }

    pub fn debug_assert_valid(&self) {
        if let Err(err) = self.validate() {
            panic!("Invalid frame: {err}");
        }
    }
}

//! Host implementation of every pipeline stage, stage for stage the same as
//! the kernels. Slow, only meant as a reference.

pub mod preprocess;
pub mod rasterize;

use glam::UVec2;
use sort::join_key;

use crate::{
    camera::FrameState,
    gaussian_splats::SplatScene,
    render::sort_bits_for_tiles,
    render_aux::FrameAux,
    shaders::{RenderUniforms, VertexAttribute},
};

/// Unsorted `(tile, depth)` keys and splat indices, laid out the way the
/// expansion kernel writes them.
pub fn expand_instances(
    attributes: &[VertexAttribute],
    offsets: &[u32],
    tile_bounds: UVec2,
) -> (Vec<u64>, Vec<u32>) {
    let total = offsets.last().copied().unwrap_or(0) as usize;
    let mut keys = vec![0u64; total];
    let mut values = vec![0u32; total];

    for (idx, attr) in attributes.iter().enumerate() {
        let (start, end) = (offsets[idx] as usize, offsets[idx + 1] as usize);
        for (dst, tile) in (start..end).zip(attr.tile_ids(tile_bounds)) {
            keys[dst] = join_key(tile, attr.depth.to_bits());
            values[dst] = idx as u32;
        }
    }
    (keys, values)
}

/// `[start, end)` of every tile in the sorted keys. Tiles without instances get
/// an empty range at the position they would occupy.
pub fn tile_boundaries(keys: &[u64], num_tiles: u32) -> Vec<[u32; 2]> {
    let mut boundaries = Vec::with_capacity(num_tiles as usize);
    let mut cursor = 0usize;
    for tile in 0..num_tiles {
        let start = cursor;
        while cursor < keys.len() && (keys[cursor] >> 32) as u32 == tile {
            cursor += 1;
        }
        boundaries.push([start as u32, cursor as u32]);
    }
    boundaries
}

/// Runs the whole pipeline on the host. Returns the intermediate buffers and the
/// packed image.
pub fn render(scene: &SplatScene, frame: &FrameState, img_size: UVec2) -> (FrameAux, Vec<u32>) {
    let uniforms = RenderUniforms::new(frame, img_size, scene.num_splats(), scene.sh_degree());
    let tile_bounds = uniforms.tile_bounds();

    let (attributes, mut offsets) = preprocess::preprocess(scene.splats(), &uniforms);
    prefix_sum::cpu::inclusive_scan(&mut offsets);

    let (keys, values) = expand_instances(&attributes, &offsets, tile_bounds);
    let sort_bits = sort_bits_for_tiles(uniforms.num_tiles());
    let (keys, values) = sort::cpu::radix_argsort(&keys, &values, sort_bits);
    let boundaries = tile_boundaries(&keys, uniforms.num_tiles());

    let image = rasterize::rasterize(&uniforms, &boundaries, &values, &attributes);

    let aux = FrameAux {
        img_size,
        tile_bounds,
        attributes,
        offsets,
        keys,
        values,
        boundaries,
    };
    (aux, image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{UVec4, Vec2, Vec3, uvec2};

    fn rect(aabb: UVec4, depth: f32) -> VertexAttribute {
        VertexAttribute::new(Vec3::ONE, 0.5, Vec3::ONE, 2.0, aabb, Vec2::ZERO, depth)
    }

    #[test]
    fn expansion_walks_rect_row_major() {
        let attrs = [rect(UVec4::new(1, 0, 3, 2), 2.0), VertexAttribute::culled()];
        let (keys, values) = expand_instances(&attrs, &[0, 4, 4], uvec2(4, 2));
        let tiles: Vec<u32> = keys.iter().map(|k| (k >> 32) as u32).collect();
        assert_eq!(tiles, vec![1, 2, 5, 6]);
        assert!(keys.iter().all(|&k| k as u32 == 2.0f32.to_bits()));
        assert_eq!(values, vec![0; 4]);
    }

    #[test]
    fn boundaries_cover_empty_tiles() {
        let keys = [join_key(1, 0), join_key(1, 5), join_key(3, 0)];
        assert_eq!(
            tile_boundaries(&keys, 5),
            vec![[0, 0], [0, 2], [2, 2], [2, 3], [3, 3]]
        );
        assert_eq!(tile_boundaries(&[], 3), vec![[0, 0]; 3]);
    }
}

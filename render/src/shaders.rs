//! WGSL sources and the host side of their structs. The structs are declared in
//! `render::helpers` (`shaders/helpers.wgsl`); the layout tests below check the
//! mirrors against what naga makes of them.

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, UVec4, Vec2, Vec3, Vec4};
use kernel::ShaderImports;

use crate::{TILE_WIDTH, camera::FrameState, render::calc_tile_bounds, sh::MAX_SH_COEFFS};

/// `render::helpers`: splat structs and tile constants.
pub const HELPERS: &str = include_str!("shaders/helpers.wgsl");
pub const PREPROCESS: &str = include_str!("shaders/preprocess.wgsl");
pub const MAP_GAUSSIAN_TO_INTERSECTS: &str =
    include_str!("shaders/map_gaussian_to_intersects.wgsl");
pub const TILE_BOUNDARIES: &str = include_str!("shaders/tile_boundaries.wgsl");
pub const RASTERIZE: &str = include_str!("shaders/rasterize.wgsl");

pub const IMPORTS: ShaderImports = ShaderImports {
    modules: &[HELPERS],
    defs: &[
        ("TILE_WIDTH", TILE_WIDTH),
        ("TILE_SIZE", TILE_WIDTH * TILE_WIDTH),
        ("MAX_SH_COEFFS", MAX_SH_COEFFS as u32),
    ],
};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RenderUniforms {
    pub viewmat: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub focal: [f32; 2],
    pub pixel_center: [f32; 2],
    pub img_size: [u32; 2],
    pub tile_bounds: [u32; 2],
    pub tan_fov: [f32; 2],
    pub near: f32,
    pub far: f32,
    pub background: [f32; 4],
    pub num_splats: u32,
    pub sh_degree: u32,
    pub _pad: [u32; 2],
}

impl RenderUniforms {
    pub fn new(frame: &FrameState, img_size: UVec2, num_splats: u32, sh_degree: u32) -> Self {
        let camera = &frame.camera;
        Self {
            viewmat: frame.view_matrix().to_cols_array_2d(),
            camera_position: frame.camera_in_scene().extend(0.0).to_array(),
            focal: camera.focal(img_size).into(),
            pixel_center: camera.center(img_size).into(),
            img_size: img_size.into(),
            tile_bounds: calc_tile_bounds(img_size).into(),
            tan_fov: camera.tan_half_fov().into(),
            near: camera.near,
            far: camera.far,
            background: frame.background.to_array(),
            num_splats,
            sh_degree,
            _pad: [0; 2],
        }
    }

    pub fn tile_bounds(&self) -> UVec2 {
        UVec2::from(self.tile_bounds)
    }

    pub fn num_tiles(&self) -> u32 {
        self.tile_bounds[0] * self.tile_bounds[1]
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuSplat {
    pub position_opacity: [f32; 4],
    pub scale: [f32; 4],
    /// (x, y, z, w)
    pub rotation: [f32; 4],
    pub sh: [[f32; 4]; MAX_SH_COEFFS],
}

/// Per splat output of the preprocess pass. All zero for culled splats.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VertexAttribute {
    pub conic_opacity: [f32; 4],
    pub color_radii: [f32; 4],
    pub aabb: [u32; 4],
    pub uv: [f32; 2],
    pub depth: f32,
    pub _pad: u32,
}

impl VertexAttribute {
    pub fn culled() -> Self {
        Self::zeroed()
    }

    pub fn new(
        conic: Vec3,
        opacity: f32,
        color: Vec3,
        radius: f32,
        aabb: UVec4,
        uv: Vec2,
        depth: f32,
    ) -> Self {
        Self {
            conic_opacity: conic.extend(opacity).to_array(),
            color_radii: color.extend(radius).to_array(),
            aabb: aabb.to_array(),
            uv: uv.to_array(),
            depth,
            _pad: 0,
        }
    }

    pub fn radius(&self) -> f32 {
        self.color_radii[3]
    }

    pub fn is_visible(&self) -> bool {
        self.radius() > 0.0
    }

    pub fn conic(&self) -> Vec3 {
        Vec4::from(self.conic_opacity).truncate()
    }

    pub fn opacity(&self) -> f32 {
        self.conic_opacity[3]
    }

    pub fn color(&self) -> Vec3 {
        Vec4::from(self.color_radii).truncate()
    }

    pub fn tile_min(&self) -> UVec2 {
        UVec2::new(self.aabb[0], self.aabb[1])
    }

    /// Exclusive.
    pub fn tile_max(&self) -> UVec2 {
        UVec2::new(self.aabb[2], self.aabb[3])
    }

    pub fn tile_count(&self) -> u32 {
        let extent = self.tile_max().saturating_sub(self.tile_min());
        extent.x * extent.y
    }

    /// Tile ids in the order the expansion pass writes them.
    pub fn tile_ids(&self, tile_bounds: UVec2) -> impl Iterator<Item = u32> + use<> {
        let (min, max) = (self.tile_min(), self.tile_max());
        (min.y..max.y).flat_map(move |ty| (min.x..max.x).map(move |tx| ty * tile_bounds.x + tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    fn wgsl_layout(name: &str) -> kernel::StructLayout {
        let module = kernel::compose_module("render helpers", HELPERS, &IMPORTS).expect("compose");
        kernel::struct_layout(&module, name).expect(name)
    }

    fn offsets<const N: usize>(offsets: [usize; N]) -> Vec<u32> {
        offsets.map(|offset| offset as u32).to_vec()
    }

    #[test]
    fn uniforms_match_wgsl() {
        let layout = wgsl_layout("RenderUniforms");
        assert_eq!(layout.size as usize, size_of::<RenderUniforms>());
        assert_eq!(
            layout.offsets,
            offsets([
                offset_of!(RenderUniforms, viewmat),
                offset_of!(RenderUniforms, camera_position),
                offset_of!(RenderUniforms, focal),
                offset_of!(RenderUniforms, pixel_center),
                offset_of!(RenderUniforms, img_size),
                offset_of!(RenderUniforms, tile_bounds),
                offset_of!(RenderUniforms, tan_fov),
                offset_of!(RenderUniforms, near),
                offset_of!(RenderUniforms, far),
                offset_of!(RenderUniforms, background),
                offset_of!(RenderUniforms, num_splats),
                offset_of!(RenderUniforms, sh_degree),
                offset_of!(RenderUniforms, _pad),
            ])
        );
    }

    #[test]
    fn splat_matches_wgsl() {
        let layout = wgsl_layout("Splat");
        assert_eq!(layout.size as usize, size_of::<GpuSplat>());
        assert_eq!(
            layout.offsets,
            offsets([
                offset_of!(GpuSplat, position_opacity),
                offset_of!(GpuSplat, scale),
                offset_of!(GpuSplat, rotation),
                offset_of!(GpuSplat, sh),
            ])
        );
    }

    #[test]
    fn vertex_attribute_matches_wgsl() {
        let layout = wgsl_layout("VertexAttribute");
        assert_eq!(layout.size as usize, size_of::<VertexAttribute>());
        assert_eq!(
            layout.offsets,
            offsets([
                offset_of!(VertexAttribute, conic_opacity),
                offset_of!(VertexAttribute, color_radii),
                offset_of!(VertexAttribute, aabb),
                offset_of!(VertexAttribute, uv),
                offset_of!(VertexAttribute, depth),
                offset_of!(VertexAttribute, _pad),
            ])
        );
    }

    #[test]
    fn tile_ids_are_row_major() {
        let attr = VertexAttribute::new(
            Vec3::ONE,
            1.0,
            Vec3::ONE,
            4.0,
            UVec4::new(1, 2, 3, 4),
            Vec2::ZERO,
            1.0,
        );
        assert_eq!(attr.tile_count(), 4);
        let ids: Vec<u32> = attr.tile_ids(UVec2::new(10, 10)).collect();
        assert_eq!(ids, vec![21, 22, 31, 32]);
        assert_eq!(VertexAttribute::culled().tile_count(), 0);
        assert!(!VertexAttribute::culled().is_visible());
    }
}

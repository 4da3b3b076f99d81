use glam::{UVec2, Vec2, Vec3, Vec4};

use crate::{TILE_WIDTH, shaders::RenderUniforms, shaders::VertexAttribute};

const ALPHA_MIN: f32 = 1.0 / 255.0;
const ALPHA_MAX: f32 = 0.99;
const TRANSMITTANCE_MIN: f32 = 1e-4;

/// Same rounding as WGSL `pack4x8unorm`, red in the low byte.
pub fn pack_rgba(color: Vec4) -> u32 {
    let [r, g, b, a] = color
        .clamp(Vec4::ZERO, Vec4::ONE)
        .mul_add(Vec4::splat(255.0), Vec4::splat(0.5))
        .floor()
        .to_array()
        .map(|c| c as u32);
    r | (g << 8) | (b << 16) | (a << 24)
}

pub fn unpack_rgba(packed: u32) -> [u8; 4] {
    packed.to_le_bytes()
}

/// Composites one pixel front to back over the sorted instances of its tile.
pub fn shade_pixel(
    pixel: UVec2,
    instances: &[u32],
    attributes: &[VertexAttribute],
    background: Vec4,
) -> Vec4 {
    let pixel_coord = pixel.as_vec2() + 0.5;
    let mut transmittance = 1.0f32;
    let mut color = Vec3::ZERO;

    for &splat in instances {
        let attr = &attributes[splat as usize];
        let d = Vec2::from(attr.uv) - pixel_coord;
        let conic = attr.conic();
        let power = -0.5 * (conic.x * d.x * d.x + conic.z * d.y * d.y) - conic.y * d.x * d.y;
        if power > 0.0 {
            continue;
        }

        let alpha = (attr.opacity() * power.exp()).min(ALPHA_MAX);
        if alpha < ALPHA_MIN {
            continue;
        }

        let next_transmittance = transmittance * (1.0 - alpha);
        if next_transmittance < TRANSMITTANCE_MIN {
            break;
        }
        color += attr.color() * alpha * transmittance;
        transmittance = next_transmittance;
    }

    (color + transmittance * background.truncate())
        .extend((1.0 - transmittance) + transmittance * background.w)
}

/// Packed RGBA8 image, row major.
pub fn rasterize(
    uniforms: &RenderUniforms,
    boundaries: &[[u32; 2]],
    values: &[u32],
    attributes: &[VertexAttribute],
) -> Vec<u32> {
    let img_size = UVec2::from(uniforms.img_size);
    let tile_bounds = uniforms.tile_bounds();
    let background = Vec4::from(uniforms.background);

    let mut image = vec![0u32; (img_size.x * img_size.y) as usize];
    for y in 0..img_size.y {
        for x in 0..img_size.x {
            let tile = (y / TILE_WIDTH) * tile_bounds.x + x / TILE_WIDTH;
            let [start, end] = boundaries[tile as usize];
            let instances = &values[start as usize..end as usize];
            let color = shade_pixel(UVec2::new(x, y), instances, attributes, background);
            image[(y * img_size.x + x) as usize] = pack_rgba(color);
        }
    }
    image
}

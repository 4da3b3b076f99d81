use glam::{IVec2, Mat3, Mat4, UVec4, Vec2, Vec3, Vec4};

use crate::{
    TILE_WIDTH, gaussian_splats::Splat, sh::eval_sh, shaders::RenderUniforms,
    shaders::VertexAttribute,
};

const COV_BLUR: f32 = 0.3;

fn quat_to_mat(q: Vec4) -> Mat3 {
    let (x, y, z, w) = (q.x, q.y, q.z, q.w);
    Mat3::from_cols(
        Vec3::new(1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y + w * z), 2.0 * (x * z - w * y)),
        Vec3::new(2.0 * (x * y - w * z), 1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z + w * x)),
        Vec3::new(2.0 * (x * z + w * y), 2.0 * (y * z - w * x), 1.0 - 2.0 * (x * x + y * y)),
    )
}

/// Projects one splat. `None` when it is culled or degenerate.
pub fn project_splat(
    splat: &Splat,
    uniforms: &RenderUniforms,
) -> Option<(VertexAttribute, u32)> {
    let viewmat = Mat4::from_cols_array_2d(&uniforms.viewmat);
    let p_view = (viewmat * splat.position.extend(1.0)).truncate();
    let z = p_view.z;
    if !p_view.is_finite() || z <= uniforms.near || z > uniforms.far {
        return None;
    }

    let quat = Vec4::from(splat.rotation.to_array());
    let quat_len = quat.length();
    if !quat_len.is_finite() || quat_len <= 0.0 {
        return None;
    }
    let rot = quat_to_mat(quat / quat_len);
    let m = Mat3::from_cols(
        rot.x_axis * splat.scale.x,
        rot.y_axis * splat.scale.y,
        rot.z_axis * splat.scale.z,
    );
    let w = Mat3::from_mat4(viewmat);
    let cov = w * (m * m.transpose()) * w.transpose();

    let lim = 1.3 * Vec2::from(uniforms.tan_fov);
    let tx = (p_view.x / z).clamp(-lim.x, lim.x) * z;
    let ty = (p_view.y / z).clamp(-lim.y, lim.y) * z;
    let f = Vec2::from(uniforms.focal);
    let j0 = Vec3::new(f.x / z, 0.0, -f.x * tx / (z * z));
    let j1 = Vec3::new(0.0, f.y / z, -f.y * ty / (z * z));

    let a = j0.dot(cov * j0) + COV_BLUR;
    let b = j0.dot(cov * j1);
    let c = j1.dot(cov * j1) + COV_BLUR;
    let det = a * c - b * b;
    if !(a.is_finite() && b.is_finite() && c.is_finite() && det.is_finite()) || det <= 0.0 {
        return None;
    }
    let conic = Vec3::new(c / det, -b / det, a / det);

    let mid = 0.5 * (a + c);
    let lambda = mid + (mid * mid - det).max(0.1).sqrt();
    let radius = (3.0 * lambda.sqrt()).ceil();

    let uv = f * p_view.truncate() / z + Vec2::from(uniforms.pixel_center);
    if !uv.is_finite() {
        return None;
    }

    let tile = TILE_WIDTH as f32;
    let grid = IVec2::from(uniforms.tile_bounds.map(|b| b as i32));
    let tile_min = ((uv - radius) / tile).as_ivec2().clamp(IVec2::ZERO, grid).as_uvec2();
    let tile_max = ((uv + radius + tile - 1.0) / tile)
        .as_ivec2()
        .clamp(IVec2::ZERO, grid)
        .as_uvec2();
    let extent = tile_max - tile_min;
    let count = extent.x * extent.y;
    if count == 0 {
        return None;
    }

    let mut dir = splat.position - Vec4::from(uniforms.camera_position).truncate();
    let dist = dir.length();
    if dist > 0.0 {
        dir /= dist;
    }
    let color = (eval_sh(&splat.sh, uniforms.sh_degree, dir) + 0.5).max(Vec3::ZERO);

    let attribute = VertexAttribute::new(
        conic,
        splat.opacity,
        color,
        radius,
        UVec4::new(tile_min.x, tile_min.y, tile_max.x, tile_max.y),
        uv,
        z,
    );
    Some((attribute, count))
}

/// Vertex attributes and the `N + 1` long count array, unscanned.
pub fn preprocess(splats: &[Splat], uniforms: &RenderUniforms) -> (Vec<VertexAttribute>, Vec<u32>) {
    let mut attributes = Vec::with_capacity(splats.len());
    let mut counts = Vec::with_capacity(splats.len() + 1);
    counts.push(0);

    for splat in splats {
        let (attribute, count) =
            project_splat(splat, uniforms).unwrap_or((VertexAttribute::culled(), 0));
        attributes.push(attribute);
        counts.push(count);
    }
    (attributes, counts)
}

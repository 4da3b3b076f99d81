use glam::Vec3;

pub const SH_C0: f32 = 0.28209479177387814;
const SH_C1: f32 = 0.4886025119029199;
const SH_C2: [f32; 5] = [
    1.0925484305920792,
    -1.0925484305920792,
    0.31539156525252005,
    -1.0925484305920792,
    0.5462742152960396,
];
const SH_C3: [f32; 7] = [
    -0.5900435899266435,
    2.890611442640554,
    -0.4570457994644658,
    0.3731763325901154,
    -0.4570457994644658,
    1.445305721320277,
    -0.5900435899266435,
];

/// Highest degree the preprocess kernel evaluates.
pub const MAX_SH_DEGREE: u32 = 3;
pub const MAX_SH_COEFFS: usize = sh_coeffs_for_degree(MAX_SH_DEGREE) as usize;

pub const fn sh_coeffs_for_degree(degree: u32) -> u32 {
    (degree + 1).pow(2)
}

pub fn channel_to_sh(rgb: f32) -> f32 {
    (rgb - 0.5) / SH_C0
}

pub fn rgb_to_sh(rgb: Vec3) -> Vec3 {
    glam::vec3(
        channel_to_sh(rgb.x),
        channel_to_sh(rgb.y),
        channel_to_sh(rgb.z),
    )
}

/// View dependent colour before the `+0.5` offset. `dir` points from the camera
/// to the splat.
pub fn eval_sh(sh: &[Vec3; MAX_SH_COEFFS], degree: u32, dir: Vec3) -> Vec3 {
    let mut color = SH_C0 * sh[0];
    if degree == 0 {
        return color;
    }

    let Vec3 { x, y, z } = dir;
    color += SH_C1 * (-y * sh[1] + z * sh[2] - x * sh[3]);
    if degree == 1 {
        return color;
    }

    let (xx, yy, zz) = (x * x, y * y, z * z);
    color += SH_C2[0] * x * y * sh[4]
        + SH_C2[1] * y * z * sh[5]
        + SH_C2[2] * (2.0 * zz - xx - yy) * sh[6]
        + SH_C2[3] * x * z * sh[7]
        + SH_C2[4] * (xx - yy) * sh[8];
    if degree == 2 {
        return color;
    }

    color += SH_C3[0] * y * (3.0 * xx - yy) * sh[9]
        + SH_C3[1] * x * y * z * sh[10]
        + SH_C3[2] * y * (4.0 * zz - xx - yy) * sh[11]
        + SH_C3[3] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy) * sh[12]
        + SH_C3[4] * x * (4.0 * zz - xx - yy) * sh[13]
        + SH_C3[5] * z * (xx - yy) * sh[14]
        + SH_C3[6] * x * (xx - 3.0 * yy) * sh[15];
    color
}

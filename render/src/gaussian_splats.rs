use crate::{
    sh::{MAX_SH_COEFFS, MAX_SH_DEGREE, rgb_to_sh, sh_coeffs_for_degree},
    shaders::GpuSplat,
};
use burn::config::Config;
use glam::{Quat, Vec3};
use rand::Rng;

#[derive(Config, Debug)]
pub struct RandomSplatsConfig {
    #[config(default = 10000)]
    pub init_count: usize,

    /// Half extent of the cube splats are scattered in, centred on the origin.
    #[config(default = 1.0)]
    pub extent: f32,

    #[config(default = 0.01)]
    pub min_scale: f32,

    #[config(default = 0.05)]
    pub max_scale: f32,

    #[config(default = 0)]
    pub sh_degree: u32,
}

/// One anisotropic Gaussian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splat {
    pub position: Vec3,
    /// Linear scale along the local axes.
    pub scale: Vec3,
    pub rotation: Quat,
    pub opacity: f32,
    /// RGB coefficients, bands beyond the scene degree are zero.
    pub sh: [Vec3; MAX_SH_COEFFS],
}

impl Splat {
    pub fn new(position: Vec3, scale: Vec3, rotation: Quat, opacity: f32, rgb: Vec3) -> Self {
        let mut sh = [Vec3::ZERO; MAX_SH_COEFFS];
        sh[0] = rgb_to_sh(rgb);
        Self {
            position,
            scale,
            rotation,
            opacity,
            sh,
        }
    }

    /// Isotropic splat with a flat colour.
    pub fn sphere(position: Vec3, radius: f32, opacity: f32, rgb: Vec3) -> Self {
        Self::new(position, Vec3::splat(radius), Quat::IDENTITY, opacity, rgb)
    }

    pub fn to_gpu(&self) -> GpuSplat {
        let mut sh = [[0.0; 4]; MAX_SH_COEFFS];
        for (dst, src) in sh.iter_mut().zip(&self.sh) {
            *dst = src.extend(0.0).to_array();
        }
        GpuSplat {
            position_opacity: self.position.extend(self.opacity).to_array(),
            scale: self.scale.extend(0.0).to_array(),
            rotation: self.rotation.to_array(),
            sh,
        }
    }
}

/// Immutable splat set. An empty scene is valid and renders the background.
#[derive(Debug, Clone, Default)]
pub struct SplatScene {
    splats: Vec<Splat>,
    sh_degree: u32,
}

impl SplatScene {
    pub fn new(splats: Vec<Splat>, sh_degree: u32) -> Self {
        assert!(
            sh_degree <= MAX_SH_DEGREE,
            "SH degree {sh_degree} above {MAX_SH_DEGREE} isn't supported"
        );
        Self { splats, sh_degree }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_random_config(config: &RandomSplatsConfig, rng: &mut impl Rng) -> Self {
        let extent = config.extent;
        let n_coeffs = sh_coeffs_for_degree(config.sh_degree) as usize;

        let splats = (0..config.init_count)
            .map(|_| {
                let position = Vec3::new(
                    rng.random_range(-extent..extent),
                    rng.random_range(-extent..extent),
                    rng.random_range(-extent..extent),
                );
                let scale = Vec3::new(
                    rng.random_range(config.min_scale..=config.max_scale),
                    rng.random_range(config.min_scale..=config.max_scale),
                    rng.random_range(config.min_scale..=config.max_scale),
                );
                let rotation = Quat::from_xyzw(
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                )
                .normalize();
                let rgb = Vec3::new(rng.random(), rng.random(), rng.random());
                let opacity = rng.random_range(0.1..0.9);

                let mut splat = Splat::new(position, scale, rotation, opacity, rgb);
                for coeff in splat.sh.iter_mut().take(n_coeffs).skip(1) {
                    *coeff = Vec3::new(
                        rng.random_range(-0.2..0.2),
                        rng.random_range(-0.2..0.2),
                        rng.random_range(-0.2..0.2),
                    );
                }
                splat
            })
            .collect();

        Self::new(splats, config.sh_degree)
    }

    pub fn splats(&self) -> &[Splat] {
        &self.splats
    }

    pub fn num_splats(&self) -> u32 {
        self.splats.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.splats.is_empty()
    }

    pub fn sh_degree(&self) -> u32 {
        self.sh_degree
    }

    pub fn to_gpu(&self) -> Vec<GpuSplat> {
        self.splats.iter().map(Splat::to_gpu).collect()
    }

    pub fn estimate_bounds(&self) -> Option<(Vec3, Vec3)> {
        if self.splats.is_empty() {
            return None;
        }
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for splat in &self.splats {
            min = min.min(splat.position);
            max = max.max(splat.position);
        }
        Some((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn random_scene_respects_config() {
        let config = RandomSplatsConfig::new()
            .with_init_count(500)
            .with_extent(2.0)
            .with_sh_degree(1);
        let mut rng = StdRng::seed_from_u64(3);
        let scene = SplatScene::from_random_config(&config, &mut rng);

        assert_eq!(scene.num_splats(), 500);
        assert_eq!(scene.sh_degree(), 1);
        let (min, max) = scene.estimate_bounds().expect("non empty");
        assert!(min.min_element() >= -2.0 && max.max_element() <= 2.0);
        for splat in scene.splats() {
            assert!((splat.rotation.length() - 1.0).abs() < 1e-4);
            assert!(splat.sh[4..].iter().all(|c| *c == Vec3::ZERO));
        }
    }

    #[test]
    fn gpu_layout() {
        assert_eq!(size_of::<GpuSplat>(), 304);
        let splat = Splat::sphere(Vec3::new(1.0, 2.0, 3.0), 0.5, 0.7, Vec3::ONE);
        let gpu = splat.to_gpu();
        assert_eq!(gpu.position_opacity, [1.0, 2.0, 3.0, 0.7]);
        assert_eq!(gpu.rotation, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(gpu.sh[0][3], 0.0);
    }

    #[test]
    fn empty_scene_has_no_bounds() {
        assert!(SplatScene::empty().estimate_bounds().is_none());
        assert!(SplatScene::empty().to_gpu().is_empty());
    }
}

//! Binning properties of the host pipeline.

use glam::{Quat, UVec2, Vec3, Vec4, uvec2};
use rand::{SeedableRng, rngs::StdRng};
use render::{
    camera::{Camera, FrameState},
    cpu::{self, rasterize::pack_rgba},
    gaussian_splats::{RandomSplatsConfig, Splat, SplatScene},
};
use std::f64::consts::FRAC_PI_2;

const IMG_SIZE: UVec2 = uvec2(64, 64);

fn frame() -> FrameState {
    let camera = Camera::new(Vec3::ZERO, Quat::IDENTITY, FRAC_PI_2, FRAC_PI_2);
    FrameState::new(camera).with_background(Vec4::new(0.1, 0.2, 0.3, 1.0))
}

// Projects to pixel (24, 24), inside tile (1, 1), at the given depth.
fn splat_in_tile_5(depth: f32, rgb: Vec3) -> Splat {
    Splat::sphere(Vec3::new(-depth / 4.0, -depth / 4.0, depth), 0.01, 0.8, rgb)
}

#[test]
fn empty_scene_gives_background() {
    let (aux, image) = cpu::render(&SplatScene::empty(), &frame(), IMG_SIZE);
    aux.validate().expect("valid");
    assert_eq!(aux.num_instances(), 0);
    assert_eq!(aux.offsets, vec![0]);
    assert_eq!(aux.boundaries, vec![[0, 0]; 16]);
    let bg = pack_rgba(frame().background);
    assert!(image.iter().all(|&p| p == bg));
}

#[test]
fn culled_splats_get_no_instances() {
    let scene = SplatScene::new(
        vec![
            Splat::sphere(Vec3::new(0.0, 0.0, -3.0), 0.5, 0.8, Vec3::ONE),
            splat_in_tile_5(4.0, Vec3::ONE),
            Splat::sphere(Vec3::new(0.0, 0.0, 2000.0), 0.5, 0.8, Vec3::ONE),
        ],
        0,
    );
    let (aux, _) = cpu::render(&scene, &frame(), IMG_SIZE);
    aux.validate().expect("valid");
    assert_eq!(aux.overlap_count(0), 0);
    assert_eq!(aux.overlap_count(2), 0);
    assert!(!aux.attributes[0].is_visible());
    assert!(aux.values.iter().all(|&v| v == 1));
}

#[test]
fn single_splat_in_one_tile() {
    let scene = SplatScene::new(vec![splat_in_tile_5(4.0, Vec3::X)], 0);
    let (aux, image) = cpu::render(&scene, &frame(), IMG_SIZE);
    aux.validate().expect("valid");
    assert_eq!(aux.offsets, vec![0, 1]);
    assert_eq!(aux.tile_of(0), 5);
    assert_eq!(aux.tile_range(5), 0..1);
    for tile in (0..16).filter(|&t| t != 5) {
        assert!(aux.tile_range(tile).is_empty());
    }

    let bg = pack_rgba(frame().background);
    assert_ne!(image[24 * 64 + 24], bg);
    assert_eq!(image[0], bg);
}

#[test]
fn nearer_splat_sorts_first() {
    let scene = SplatScene::new(
        vec![splat_in_tile_5(8.0, Vec3::Y), splat_in_tile_5(4.0, Vec3::X)],
        0,
    );
    let (aux, _) = cpu::render(&scene, &frame(), IMG_SIZE);
    aux.validate().expect("valid");
    assert_eq!(aux.tile_range(5), 0..2);
    assert_eq!(aux.values, vec![1, 0]);
    assert!(aux.depth_of(0) < aux.depth_of(1));
}

#[test]
fn random_scene_is_binned_consistently() {
    let mut rng = StdRng::seed_from_u64(7);
    let config = RandomSplatsConfig::new().with_init_count(2000).with_sh_degree(2);
    let scene = SplatScene::from_random_config(&config, &mut rng);
    let camera = Camera::look_at(
        Vec3::new(0.0, -3.0, 0.0),
        Vec3::ZERO,
        Vec3::Z,
        FRAC_PI_2,
        FRAC_PI_2,
    );
    let frame = FrameState::new(camera).with_scene_rotation(Quat::from_rotation_z(0.3));

    let (aux, image) = cpu::render(&scene, &frame, uvec2(100, 75));
    aux.debug_assert_valid();
    assert!(aux.num_visible() > 0);
    assert_eq!(image.len(), 100 * 75);

    let per_tile: u32 = aux.calc_tile_depth().iter().sum();
    assert_eq!(per_tile, aux.num_instances());

    // Same input, same output.
    let (again, image_again) = cpu::render(&scene, &frame, uvec2(100, 75));
    assert_eq!(aux, again);
    assert_eq!(image, image_again);
}

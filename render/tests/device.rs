//! Device pipeline against the host reference. Every test returns early when no
//! adapter is available.

use glam::{Quat, UVec2, Vec3, Vec4, uvec2};
use rand::{SeedableRng, rngs::StdRng};
use render::{
    CapacityPolicy, FrameError, Renderer, RendererConfig,
    camera::{Camera, FrameState},
    cpu::{self, rasterize::unpack_rgba},
    gaussian_splats::{RandomSplatsConfig, Splat, SplatScene},
};
use std::f64::consts::FRAC_PI_2;

fn renderer(config: RendererConfig, img_size: UVec2) -> Option<Renderer> {
    let (device, queue) = kernel::test_device()?;
    Some(Renderer::new(device, queue, config, img_size).expect("renderer"))
}

fn frame() -> FrameState {
    let camera = Camera::new(Vec3::ZERO, Quat::IDENTITY, FRAC_PI_2, FRAC_PI_2);
    FrameState::new(camera).with_background(Vec4::new(0.1, 0.2, 0.3, 1.0))
}

// Every splat covers the whole image.
fn big_splats(count: usize) -> SplatScene {
    let splats = (0..count)
        .map(|i| Splat::sphere(Vec3::new(0.0, 0.0, 4.0 + i as f32 * 0.1), 2.0, 0.3, Vec3::ONE))
        .collect();
    SplatScene::new(splats, 0)
}

fn assert_images_close(device: &[u32], host: &[u32]) {
    assert_eq!(device.len(), host.len());
    for (i, (&d, &h)) in device.iter().zip(host).enumerate() {
        let (d, h) = (unpack_rgba(d), unpack_rgba(h));
        for c in 0..4 {
            assert!(
                d[c].abs_diff(h[c]) <= 2,
                "Pixel {i} differs: device {d:?}, host {h:?}"
            );
        }
    }
}

#[test]
fn empty_scene_renders_background() {
    let img_size = uvec2(40, 24);
    let Some(mut renderer) = renderer(RendererConfig::new(), img_size) else {
        return;
    };
    let output = renderer.render_frame(frame()).expect("frame");
    assert_eq!(output.stats.num_instances, 0);

    let aux = renderer.read_aux(&output).expect("aux");
    aux.validate().expect("valid");
    assert!(aux.boundaries.iter().all(|&b| b == [0, 0]));

    let (_, host) = cpu::render(&SplatScene::empty(), &frame(), img_size);
    assert_images_close(&renderer.read_output(&output).expect("image"), &host);
}

#[test]
fn two_splats_match_host() {
    let img_size = uvec2(64, 64);
    let Some(mut renderer) = renderer(RendererConfig::new(), img_size) else {
        return;
    };
    let scene = SplatScene::new(
        vec![
            Splat::sphere(Vec3::new(-2.0, -2.0, 8.0), 0.01, 0.8, Vec3::Y),
            Splat::sphere(Vec3::new(-1.0, -1.0, 4.0), 0.01, 0.8, Vec3::X),
        ],
        0,
    );
    renderer.set_scene(&scene).expect("scene");
    let output = renderer.render_frame(frame()).expect("frame");

    let aux = renderer.read_aux(&output).expect("aux");
    aux.validate().expect("valid");
    let (host, host_image) = cpu::render(&scene, &frame(), img_size);
    assert_eq!(aux.offsets, host.offsets);
    assert_eq!(aux.keys, host.keys);
    assert_eq!(aux.values, vec![1, 0]);
    assert_eq!(aux.boundaries, host.boundaries);

    assert_images_close(&renderer.read_output(&output).expect("image"), &host_image);
}

#[test]
fn random_scene_is_valid() {
    let img_size = uvec2(150, 100);
    let Some(mut renderer) = renderer(RendererConfig::new(), img_size) else {
        return;
    };
    let mut rng = StdRng::seed_from_u64(3);
    let config = RandomSplatsConfig::new().with_init_count(5000).with_sh_degree(3);
    let scene = SplatScene::from_random_config(&config, &mut rng);
    renderer.set_scene(&scene).expect("scene");

    let camera = Camera::look_at(Vec3::new(0.0, -3.0, 0.0), Vec3::ZERO, Vec3::Z, 1.2, 0.9);
    for angle in [0.0f32, 0.7, 1.9] {
        let state = FrameState::new(camera).with_scene_rotation(Quat::from_rotation_z(angle));
        let output = renderer.render_frame(state).expect("frame");
        let aux = renderer.read_aux(&output).expect("aux");
        aux.validate().expect("valid");
        assert_eq!(output.stats.num_instances, aux.num_instances());
        assert!(aux.num_visible() > 0);
    }
}

#[test]
fn grow_policy_finishes_the_frame() {
    let img_size = uvec2(128, 128);
    let config = RendererConfig::new()
        .with_frames_in_flight(1)
        .with_instance_multiplier(1);
    let Some(mut renderer) = renderer(config, img_size) else {
        return;
    };
    renderer.set_scene(&big_splats(10)).expect("scene");

    let output = renderer.render_frame(frame()).expect("frame");
    assert_eq!(output.stats.num_instances, 640);
    assert_eq!(output.stats.arena_generation, 1);
    assert!(output.stats.instance_capacity >= 640);
    renderer
        .read_aux(&output)
        .expect("aux")
        .validate()
        .expect("valid");

    // Already big enough.
    let output = renderer.render_frame(frame()).expect("frame");
    assert_eq!(output.stats.arena_generation, 1);
}

#[test]
fn skip_policy_grows_before_next_frame() {
    let img_size = uvec2(128, 128);
    let config = RendererConfig::new()
        .with_frames_in_flight(1)
        .with_instance_multiplier(1)
        .with_capacity_policy(CapacityPolicy::SkipFrame);
    let Some(mut renderer) = renderer(config, img_size) else {
        return;
    };
    renderer.set_scene(&big_splats(10)).expect("scene");

    match renderer.render_frame(frame()) {
        Err(FrameError::CapacityExceeded { required, capacity }) => {
            assert_eq!(required, 640);
            assert_eq!(capacity, 256);
        }
        other => panic!("Expected a skipped frame, got {other:?}"),
    }

    let output = renderer.render_frame(frame()).expect("frame");
    assert_eq!(output.stats.arena_generation, 1);
    assert!(output.stats.instance_capacity >= 640);
    renderer
        .read_aux(&output)
        .expect("aux")
        .validate()
        .expect("valid");
}

#[test]
fn skip_policy_recovers_with_frames_in_flight() {
    let img_size = uvec2(128, 128);
    let config = RendererConfig::new()
        .with_frames_in_flight(3)
        .with_instance_multiplier(1)
        .with_capacity_policy(CapacityPolicy::SkipFrame);
    let Some(mut renderer) = renderer(config, img_size) else {
        return;
    };
    renderer.set_scene(&big_splats(10)).expect("scene");

    match renderer.render_frame(frame()) {
        Err(FrameError::CapacityExceeded { required, capacity }) => {
            assert_eq!(required, 640);
            assert_eq!(capacity, 256);
        }
        other => panic!("Expected a skipped frame, got {other:?}"),
    }

    // Only one frame is dropped, whichever slot the next frames land on.
    for _ in 0..3 {
        let output = renderer.render_frame(frame()).expect("frame");
        assert_eq!(output.stats.num_instances, 640);
        assert!(output.stats.instance_capacity >= 640);
        renderer
            .read_aux(&output)
            .expect("aux")
            .validate()
            .expect("valid");
    }
}

#[test]
fn totals_beyond_max_instances_are_rejected() {
    for policy in [CapacityPolicy::Grow, CapacityPolicy::SkipFrame] {
        let config = RendererConfig::new()
            .with_instance_multiplier(1)
            .with_max_instances(300)
            .with_capacity_policy(policy);
        let Some(mut renderer) = renderer(config, uvec2(128, 128)) else {
            return;
        };
        renderer.set_scene(&big_splats(10)).expect("scene");

        for _ in 0..3 {
            match renderer.render_frame(frame()) {
                Err(FrameError::CapacityExceeded { required, capacity }) => {
                    assert_eq!(required, 640);
                    assert_eq!(capacity, 256);
                }
                other => panic!("{policy:?}: expected CapacityExceeded, got {other:?}"),
            }
        }

        // 4 splats over 64 tiles fit the initial arena exactly.
        renderer.set_scene(&big_splats(4)).expect("scene");
        let output = renderer.render_frame(frame()).expect("frame");
        assert_eq!(output.stats.num_instances, 256);
        assert_eq!(output.stats.arena_generation, 0);
    }
}

#[test]
fn overflowing_total_skips_frame() {
    // 256x256 tiles, all covered by every splat: the total doesn't fit a u32.
    let img_size = uvec2(4096, 4096);
    let Some(mut renderer) = renderer(RendererConfig::new(), img_size) else {
        return;
    };
    let splats = (0..100_000)
        .map(|i| {
            let depth = 4.0 + (i % 10) as f32 * 0.1;
            Splat::sphere(Vec3::new(0.0, 0.0, depth), 2.0, 0.3, Vec3::ONE)
        })
        .collect();
    renderer.set_scene(&SplatScene::new(splats, 0)).expect("scene");

    let result = renderer.render_frame(frame());
    assert!(
        matches!(result, Err(FrameError::InstanceOverflow)),
        "Expected an overflow, got {result:?}"
    );

    renderer.set_scene(&big_splats(2)).expect("scene");
    let output = renderer.render_frame(frame()).expect("frame");
    assert_eq!(output.stats.num_instances, 2 * 256 * 256);
}

#[test]
fn reused_slot_invalidates_old_frame() {
    let img_size = uvec2(32, 32);
    let config = RendererConfig::new().with_frames_in_flight(2);
    let Some(mut renderer) = renderer(config, img_size) else {
        return;
    };
    renderer.set_scene(&big_splats(3)).expect("scene");

    let first = renderer.render_frame(frame()).expect("frame");
    let second = renderer.render_frame(frame()).expect("frame");
    assert!(renderer.read_output(&first).is_ok());

    let third = renderer.render_frame(frame()).expect("frame");
    assert!(matches!(
        renderer.read_output(&first),
        Err(FrameError::NoFrame)
    ));
    assert_eq!(
        renderer.read_output(&second).expect("second"),
        renderer.read_output(&third).expect("third")
    );

    renderer.resize(uvec2(48, 16)).expect("resize");
    assert!(matches!(
        renderer.read_output(&third),
        Err(FrameError::NoFrame)
    ));
    let resized = renderer.render_frame(frame()).expect("frame");
    assert_eq!(resized.img_size(), uvec2(48, 16));
    assert_eq!(renderer.read_output(&resized).expect("image").len(), 48 * 16);
}

//! End-to-end scenarios through `World::step`.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::cast_precision_loss
)]

use approx::assert_relative_eq;
use nalgebra::{Point3, UnitQuaternion, Vector3};
use physics_core::{BodyHandle, Shape, World};
use physics_types::{BodyDef, Gravity, WorldConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FLOOR_TOP: f64 = 0.5;

/// A world with a large static box whose top face is at `FLOOR_TOP`.
fn world_with_floor(config: WorldConfig) -> World {
    let mut world = World::new(config).unwrap();
    let floor = world.create_body(&BodyDef::static_body()).unwrap();
    world
        .create_fixture(floor, Shape::cuboid(Vector3::new(10.0, 0.5, 10.0)))
        .unwrap();
    world
}

fn add_dynamic(world: &mut World, def: BodyDef, shape: Shape) -> BodyHandle {
    let handle = world.create_body(&def).unwrap();
    world.create_fixture(handle, shape).unwrap();
    handle
}

fn unit_box() -> Shape {
    Shape::cuboid(Vector3::repeat(0.5))
}

fn run(world: &mut World, steps: usize) {
    for _ in 0..steps {
        world.step().unwrap();
    }
}

#[test]
fn test_box_settles_on_floor() {
    let mut world = world_with_floor(WorldConfig::default());
    let handle = add_dynamic(
        &mut world,
        BodyDef::dynamic().with_position(Point3::new(0.0, 2.0, 0.0)),
        unit_box(),
    );

    run(&mut world, 240);

    let body = world.body(handle).unwrap();
    let y = body.position().y;
    assert!((0.98..1.01).contains(&y), "resting height {y}");
    assert!(body.position().x.abs() < 1e-6);
    assert!(body.position().z.abs() < 1e-6);
    assert!(body.linear_velocity().norm() < 0.1);
    assert_eq!(world.contact_count(), 1);
}

#[test]
fn test_five_box_stack_is_stable() {
    let mut world = world_with_floor(WorldConfig::default());
    let boxes: Vec<BodyHandle> = (0..5)
        .map(|i| {
            let y = 1.0 + f64::from(i);
            add_dynamic(
                &mut world,
                BodyDef::dynamic().with_position(Point3::new(0.0, y, 0.0)),
                unit_box(),
            )
        })
        .collect();

    run(&mut world, 500);

    for (i, &handle) in boxes.iter().enumerate() {
        let p = world.body(handle).unwrap().position();
        let expected = 1.0 + i as f64;
        assert!(p.x.abs() < 1e-3 && p.z.abs() < 1e-3, "box {i} drifted to {p:?}");
        assert!((p.y - expected).abs() < 0.1, "box {i} at height {}", p.y);
    }
    let rotation = world.body(boxes[4]).unwrap().rotation();
    assert!(rotation.angle() < 1e-3);
}

#[test]
fn test_sleep_and_wake_by_force() {
    let mut world = world_with_floor(WorldConfig::default());
    let handle = add_dynamic(
        &mut world,
        BodyDef::dynamic().with_position(Point3::new(0.0, 1.0, 0.0)),
        unit_box(),
    );

    run(&mut world, 120);
    let body = world.body(handle).unwrap();
    assert!(!body.is_awake(), "resting box should sleep");
    assert_eq!(body.linear_velocity(), Vector3::zeros());
    let rest = body.position();

    // Asleep bodies do not move.
    run(&mut world, 10);
    assert_eq!(world.body(handle).unwrap().position(), rest);

    // The floor was created first, so the box has creation index 1.
    world.register_body_force(1, Vector3::new(0.0, 600.0, 0.0)).unwrap();
    assert!(world.body(handle).unwrap().is_awake());
    world.step().unwrap();

    let body = world.body(handle).unwrap();
    assert!(body.is_awake());
    assert!(body.linear_velocity().y > 0.0);
    assert!(body.position().y > rest.y);
}

#[test]
fn test_never_sleep_stays_awake() {
    let mut world = world_with_floor(WorldConfig::default());
    let handle = add_dynamic(
        &mut world,
        BodyDef::dynamic()
            .with_position(Point3::new(0.0, 1.0, 0.0))
            .never_sleep(),
        unit_box(),
    );
    run(&mut world, 120);
    assert!(world.body(handle).unwrap().is_awake());
}

#[test]
fn test_momentum_conserved_without_forces() {
    let config = WorldConfig::default().zero_gravity();
    let mut world = World::new(config).unwrap();
    let a = add_dynamic(
        &mut world,
        BodyDef::dynamic()
            .with_position(Point3::new(-3.0, 0.0, 0.0))
            .with_linear_velocity(Vector3::new(2.0, 0.0, 0.0)),
        Shape::sphere(0.5),
    );
    let b = add_dynamic(
        &mut world,
        BodyDef::dynamic()
            .with_position(Point3::new(3.0, 0.0, 0.0))
            .with_linear_velocity(Vector3::new(-1.0, 0.0, 0.0)),
        Shape::sphere(0.4),
    );
    let momentum = world.total_linear_momentum();

    // Free flight: velocities are untouched.
    run(&mut world, 30);
    assert_relative_eq!(world.body(a).unwrap().linear_velocity(), Vector3::new(2.0, 0.0, 0.0));
    assert_relative_eq!(world.body(b).unwrap().linear_velocity(), Vector3::new(-1.0, 0.0, 0.0));
    assert_relative_eq!(
        world.body(a).unwrap().position(),
        Point3::new(-2.0, 0.0, 0.0),
        epsilon = 1e-9
    );

    // Through the collision: contact impulses are equal and opposite.
    run(&mut world, 120);
    assert_relative_eq!(world.total_linear_momentum(), momentum, epsilon = 1e-9);
    let (va, vb) = (
        world.body(a).unwrap().linear_velocity().x,
        world.body(b).unwrap().linear_velocity().x,
    );
    assert!(va < 2.0 && vb > -1.0, "va {va}, vb {vb}");
}

#[test]
fn test_mixed_shapes_come_to_rest_on_floor() {
    let config = WorldConfig::default().with_gravity(Gravity::earth());
    let mut world = world_with_floor(config);
    let lying = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);

    let drops = [
        add_dynamic(
            &mut world,
            BodyDef::dynamic().with_position(Point3::new(-3.0, 2.0, 0.0)),
            Shape::sphere(0.5),
        ),
        add_dynamic(
            &mut world,
            BodyDef::dynamic()
                .with_position(Point3::new(0.0, 2.0, 0.0))
                .with_rotation(lying),
            Shape::capsule(0.3, 1.0),
        ),
        add_dynamic(
            &mut world,
            BodyDef::dynamic().with_position(Point3::new(3.0, 2.0, 0.0)),
            Shape::cylinder(0.5, 1.0),
        ),
    ];

    run(&mut world, 300);

    for handle in drops {
        let body = world.body(handle).unwrap();
        assert!(body.is_finite());
        assert!(body.linear_velocity().norm() < 0.5, "{:?}", body.linear_velocity());
        // Fixture AABBs carry a 0.1 skin.
        let bottom = body.fixtures()[0].aabb().min.y + 0.1;
        assert!(bottom > FLOOR_TOP - 0.05, "body {} sank to {bottom}", body.id());
        assert!(body.position().y < 2.0);
    }

    let sphere = world.body(drops[0]).unwrap();
    assert!((sphere.position().y - (FLOOR_TOP + 0.5)).abs() < 0.02);
}

#[test]
fn test_shallow_sphere_pairs_touch_after_one_step() {
    let mut rng = StdRng::seed_from_u64(2024);
    for i in 0..500 {
        let mut world = World::new(WorldConfig::default().zero_gravity()).unwrap();
        let ra = rng.gen_range(0.1..2.0);
        let rb = rng.gen_range(0.1..2.0);
        let depth = rng.gen_range(0.01..0.2);
        let dir = Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        )
        .try_normalize(1e-3)
        .unwrap_or_else(Vector3::x);
        let origin = Point3::new(
            rng.gen_range(-20.0..20.0),
            rng.gen_range(-20.0..20.0),
            rng.gen_range(-20.0..20.0),
        );

        add_dynamic(
            &mut world,
            BodyDef::dynamic().with_position(origin),
            Shape::sphere(ra),
        );
        add_dynamic(
            &mut world,
            BodyDef::dynamic().with_position(origin + dir * (ra + rb - depth)),
            Shape::sphere(rb),
        );
        world.step().unwrap();

        assert_eq!(world.contact_count(), 1, "pair {i}");
        let (_, contact) = world.contacts().next().unwrap();
        assert!(contact.is_touching(), "pair {i} overlapping by {depth} not touching");
    }
}

//! # Multibody Viewer
//!
//! 多体动力学仿真的可视化程序
//!
//! 用Bevy渲染一个演示场景，每帧按真实时间推进仿真。
//!
//! ```text
//! cargo run --features viewer -- --demo falling-ball
//! ```
//!
//! ## 操作
//!
//! - 左/右方向键: 绕Z轴旋转相机
//! - 上/下方向键: 拉近/拉远
//! - 空格: 暂停/继续
//! - R: 重置

use bevy::prelude::*;
use clap::Parser;

use multibody_sim::demos::{Demo, Visual};
use multibody_sim::multibody::{Simulation, Transform as BodyTransform};

/// 每帧最多推进的物理步数，防止卡顿后追帧
const MAX_STEPS_PER_FRAME: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "multibody_viewer", about = "Articulated rigid-body simulation viewer")]
struct Cli {
    /// 演示场景
    #[arg(long, value_enum, default_value_t = Demo::HingeChain)]
    demo: Demo,

    /// 仿真速度倍率
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// 启动时暂停
    #[arg(long)]
    paused: bool,
}

/// 物理仿真资源
#[derive(Resource)]
struct Physics {
    demo: Demo,
    sim: Simulation,
    speed: f64,
    paused: bool,
    /// 尚未推进的真实时间
    accumulator: f64,
    /// 上一次打印状态的仿真时间
    last_report: f64,
}

/// 跟随刚体运动的可视体
#[derive(Component)]
struct BodyVisual {
    body: usize,
    /// 可视体相对刚体的位姿
    offset: BodyTransform,
    /// 网格自身的基础旋转（例如把Bevy的Y轴胶囊转到Z轴）
    base_rotation: Quat,
}

fn main() {
    let cli = Cli::parse();

    let sim = match cli.demo.simulation() {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("failed to build demo '{}': {e}", cli.demo.title());
            std::process::exit(1);
        }
    };

    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: format!("{} - Multibody Dynamics Simulation", cli.demo.title()),
                resolution: (1280.0, 720.0).into(),
                ..default()
            }),
            ..default()
        }))
        .insert_resource(ClearColor(Color::srgb(0.1, 0.1, 0.15)))
        .insert_resource(Physics {
            demo: cli.demo,
            sim,
            speed: cli.speed.max(0.0),
            paused: cli.paused,
            accumulator: 0.0,
            last_report: 0.0,
        })
        .add_systems(Startup, setup)
        .add_systems(
            Update,
            (keyboard_controls, physics_step, update_visuals, camera_controller).chain(),
        )
        .run();
}

fn to_vec3(v: &nalgebra::Vector3<f64>) -> Vec3 {
    Vec3::new(v.x as f32, v.y as f32, v.z as f32)
}

fn to_quat(x: &BodyTransform) -> Quat {
    let q = x.quaternion();
    Quat::from_xyzw(q.i as f32, q.j as f32, q.k as f32, q.w as f32)
}

/// 初始化场景
fn setup(
    mut commands: Commands,
    physics: Res<Physics>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let body_material = materials.add(StandardMaterial {
        base_color: Color::srgb(0.7, 0.5, 0.3),
        metallic: 0.3,
        perceptual_roughness: 0.5,
        ..default()
    });
    let ground_material = materials.add(StandardMaterial {
        base_color: Color::srgb(0.35, 0.38, 0.4),
        perceptual_roughness: 0.9,
        ..default()
    });

    let world = physics.sim.world();
    for visual in physics.demo.visuals(world) {
        let (mesh, offset, base_rotation, material) = match visual {
            Visual::Capsule {
                pose, radius, length, ..
            } => (
                meshes.add(Capsule3d::new(radius as f32, length as f32)),
                pose,
                // Bevy的Capsule3d默认沿Y轴，旋转90度使其沿Z轴
                Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
                body_material.clone(),
            ),
            Visual::Sphere { pose, radius, .. } => (
                meshes.add(Sphere::new(radius as f32)),
                pose,
                Quat::IDENTITY,
                body_material.clone(),
            ),
            Visual::Cuboid {
                pose, half_extents, ..
            } => (
                meshes.add(Cuboid::from_size(to_vec3(&(half_extents * 2.0)))),
                pose,
                Quat::IDENTITY,
                if visual.body() == 0 {
                    ground_material.clone()
                } else {
                    body_material.clone()
                },
            ),
            Visual::Ground { pose, offset, .. } => (
                meshes.add(Plane3d::new(Vec3::Z, Vec2::splat(5.0))),
                pose.compose(&BodyTransform::from_translation(nalgebra::Vector3::new(0.0, 0.0, offset))),
                Quat::IDENTITY,
                ground_material.clone(),
            ),
        };
        commands.spawn((
            Mesh3d(mesh),
            MeshMaterial3d(material),
            Transform::default(),
            BodyVisual {
                body: visual.body(),
                offset,
                base_rotation,
            },
        ));
    }

    // 世界原点（红色小球）
    let anchor_material = materials.add(StandardMaterial {
        base_color: Color::srgb(1.0, 0.0, 0.0),
        ..default()
    });
    commands.spawn((
        Mesh3d(meshes.add(Sphere::new(0.03))),
        MeshMaterial3d(anchor_material),
        Transform::from_xyz(0.0, 0.0, 0.0),
    ));

    // 添加光照
    commands.spawn((
        DirectionalLight {
            illuminance: 10000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(3.0, 5.0, 3.0).looking_at(Vec3::ZERO, Dir3::Z),
    ));

    commands.spawn((
        DirectionalLight {
            illuminance: 5000.0,
            shadows_enabled: false,
            ..default()
        },
        Transform::from_xyz(-3.0, -5.0, 3.0).looking_at(Vec3::ZERO, Dir3::Z),
    ));

    // 相机（Z轴向上）
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(3.0, 3.0, 1.0).looking_at(camera_target(), Dir3::Z),
    ));

    info!(
        demo = physics.demo.title(),
        bodies = world.nbody(),
        nq = world.nq(),
        nv = world.nv(),
        "viewer started (arrows: camera, space: pause, R: reset)"
    );
}

fn camera_target() -> Vec3 {
    Vec3::new(0.0, 0.0, -0.5)
}

/// 暂停与重置
fn keyboard_controls(keyboard: Res<ButtonInput<KeyCode>>, mut physics: ResMut<Physics>) {
    if keyboard.just_pressed(KeyCode::Space) {
        physics.paused = !physics.paused;
    }
    if keyboard.just_pressed(KeyCode::KeyR) {
        physics.sim.reset();
        physics.accumulator = 0.0;
        physics.last_report = 0.0;
    }
}

/// 物理仿真步进
fn physics_step(time: Res<Time>, mut physics: ResMut<Physics>) {
    if physics.paused {
        return;
    }
    let dt = physics.sim.config().timestep;
    physics.accumulator += time.delta_secs_f64() * physics.speed;

    let mut steps = 0;
    while physics.accumulator >= dt && steps < MAX_STEPS_PER_FRAME {
        match physics.sim.step() {
            Ok(report) => {
                if let Some(diagnostic) = report.diagnostic {
                    debug!(step = report.step, "{diagnostic}");
                }
            }
            Err(e) => {
                error!("simulation stopped: {e}");
                physics.paused = true;
                return;
            }
        }
        physics.accumulator -= dt;
        steps += 1;
    }
    if steps == MAX_STEPS_PER_FRAME {
        physics.accumulator = 0.0;
    }

    // 定期打印状态
    let t = physics.sim.time();
    if t - physics.last_report >= 1.0 {
        physics.last_report = t;
        let state = physics.sim.state();
        let com_z = physics
            .sim
            .center_of_mass()
            .map(|(_, com)| com.z)
            .unwrap_or(f64::NAN);
        info!(
            "Time: {:.2}s | q[0]: {:.3} | qvel[0]: {:.3} | com z: {:.3}",
            t,
            state.q.get(0).copied().unwrap_or_default(),
            state.qvel.get(0).copied().unwrap_or_default(),
            com_z
        );
    }
}

/// 从物理引擎同步位置和姿态
fn update_visuals(physics: Res<Physics>, mut query: Query<(&mut Transform, &BodyVisual)>) {
    let kin = match physics.sim.kinematics() {
        Ok(kin) => kin,
        Err(e) => {
            warn!("kinematics failed: {e}");
            return;
        }
    };
    for (mut transform, visual) in query.iter_mut() {
        let Some(pose) = kin.body_poses.get(visual.body) else {
            continue;
        };
        let x = pose.compose(&visual.offset);
        transform.translation = to_vec3(&x.translation);
        // 先应用物理引擎的姿态，再应用网格的基础旋转
        transform.rotation = to_quat(&x) * visual.base_rotation;
    }
}

/// 相机控制器
fn camera_controller(
    keyboard: Res<ButtonInput<KeyCode>>,
    time: Res<Time>,
    mut query: Query<&mut Transform, With<Camera3d>>,
) {
    for mut transform in query.iter_mut() {
        let mut rotation_delta: f32 = 0.0;
        let mut zoom_delta: f32 = 0.0;

        if keyboard.pressed(KeyCode::ArrowLeft) {
            rotation_delta -= 1.0;
        }
        if keyboard.pressed(KeyCode::ArrowRight) {
            rotation_delta += 1.0;
        }
        if keyboard.pressed(KeyCode::ArrowUp) {
            zoom_delta -= 1.0;
        }
        if keyboard.pressed(KeyCode::ArrowDown) {
            zoom_delta += 1.0;
        }

        // 绕Z轴旋转（Z轴向上的坐标系）
        if rotation_delta.abs() > 0.01 {
            let rotation = Quat::from_rotation_z(rotation_delta * time.delta_secs());
            transform.translation = rotation * transform.translation;
            transform.look_at(camera_target(), Dir3::Z);
        }

        // 缩放
        if zoom_delta.abs() > 0.01 {
            let direction = (transform.translation - camera_target()).normalize();
            transform.translation += direction * zoom_delta * time.delta_secs() * 2.0;
        }
    }
}

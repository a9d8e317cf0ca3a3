//! 端到端性质测试：装配确定性、变换代数、无漂移、单摆解析解、
//! 质量矩阵正定、互补松弛、重复运行逐位一致、错误传播。

use approx::assert_relative_eq;
use nalgebra::{DVector, Matrix3, UnitQuaternion, Vector3};

use multibody_sim::demos::{falling_ball, hinge_chain};
use multibody_sim::multibody::constraint::{assemble_rows, detect_constraints, solve_pgs};
use multibody_sim::multibody::dynamics::factorize;
use multibody_sim::multibody::*;

/// 带分叉、混合关节类型的树
fn branching_scene() -> SceneSpec {
    let inertia = Matrix3::from_diagonal(&Vector3::new(0.03, 0.02, 0.01));
    let mut spec = SceneSpec::new();
    for name in ["torso", "left", "right", "left_hand", "slider", "screw"] {
        spec.add_body(Body::new(name, 1.2, Vector3::new(0.0, 0.05, -0.1), inertia));
    }
    let offset = |x: f64| Transform::from_translation(Vector3::new(x, 0.0, -0.3));
    spec.add_joint(
        JointSpec::new("root", JointKind::Free, GROUND, "torso")
            .initial_q(vec![0.1, -0.2, 1.0, 0.9, 0.1, 0.3, -0.2]),
    )
    .add_joint(
        JointSpec::new("hip_r", JointKind::Revolute { axis: Vector3::y() }, "torso", "right")
            .parent_anchor(offset(0.2))
            .initial_q(vec![0.4]),
    )
    .add_joint(
        JointSpec::new("hip_l", JointKind::Revolute { axis: Vector3::x() }, "torso", "left")
            .parent_anchor(offset(-0.2))
            .initial_q(vec![-0.3]),
    )
    .add_joint(
        JointSpec::new("wrist", JointKind::Revolute { axis: Vector3::new(1.0, 1.0, 0.0) }, "left", "left_hand")
            .parent_anchor(offset(0.0))
            .damping(0.2)
            .armature(0.01),
    )
    .add_joint(
        JointSpec::new("rail", JointKind::Prismatic { axis: Vector3::z() }, "right", "slider")
            .parent_anchor(offset(0.0))
            .initial_q(vec![0.05]),
    )
    .add_joint(
        JointSpec::new("bolt", JointKind::Screw { axis: Vector3::z(), pitch: 0.02 }, "torso", "screw")
            .initial_q(vec![1.5]),
    );
    spec
}

#[test]
fn dof_ordering_is_deterministic() {
    let spec = branching_scene();
    let a = World::build(&spec).unwrap();
    let b = World::build(&spec).unwrap();

    assert_eq!(a.dof_body(), b.dof_body());
    assert_eq!(a.dof_parent(), b.dof_parent());
    let names = |w: &World| w.joints().iter().map(|j| j.name.clone()).collect::<Vec<_>>();
    assert_eq!(names(&a), names(&b));
    assert_eq!(a.initial_q(), b.initial_q());

    // 深度优先先序，子节点按关节声明顺序
    assert_eq!(names(&a), ["root", "hip_r", "rail", "hip_l", "wrist", "bolt"]);
    assert_eq!(a.nq(), 7 + 5);
    assert_eq!(a.nv(), 6 + 5);
    for body in 1..a.nbody() {
        assert!(a.parent(body).unwrap() < body);
    }
}

#[test]
fn compose_with_inverse_is_identity() {
    let axes = [
        Vector3::new(1.0, 2.0, 3.0),
        Vector3::new(-0.3, 0.0, 1.0),
        Vector3::new(0.0, 1.0, 0.0),
    ];
    for (i, axis) in axes.iter().enumerate() {
        let rotation = UnitQuaternion::from_scaled_axis(axis * (0.7 + i as f64));
        let a = Transform::from_quaternion(&rotation, Vector3::new(1.5, -2.0, 0.25 * i as f64));
        assert!(a.compose(&a.inverse()).approx_eq(&Transform::identity(), 1e-12));
        assert!(a.inverse().compose(&a).approx_eq(&Transform::identity(), 1e-12));
    }
}

#[test]
fn free_body_does_not_drift_in_zero_gravity() {
    let mut spec = SceneSpec::new();
    spec.add_body(Body::new(
        "block",
        2.0,
        Vector3::zeros(),
        Matrix3::from_diagonal(&Vector3::new(0.1, 0.2, 0.3)),
    ))
    .add_joint(
        JointSpec::new("free", JointKind::Free, GROUND, "block")
            .initial_q(vec![0.3, -0.1, 2.0, 0.5, 0.5, 0.5, 0.5]),
    );

    for integrator in [IntegratorKind::SemiImplicitEuler, IntegratorKind::RungeKutta4] {
        let world = World::build(&spec).unwrap();
        let q0 = world.initial_q().clone();
        let config = SimulationConfig::default().zero_gravity().integrator(integrator);
        let mut sim = Simulation::new(world, config).unwrap();
        for _ in 0..1000 {
            sim.step().unwrap();
        }
        assert_relative_eq!(sim.state().q, q0, epsilon = 1e-12);
        assert_eq!(sim.state().qvel, DVector::zeros(6));
    }
}

#[test]
fn pendulum_acceleration_matches_closed_form() {
    let length = 0.8;
    let mass = 1.5;
    for theta in [0.0, 0.3, -1.0, 2.0] {
        let mut spec = SceneSpec::new();
        spec.add_body(Body::point_mass("bob", mass, Vector3::new(length, 0.0, 0.0)))
            .add_joint(
                JointSpec::new("pivot", JointKind::Revolute { axis: -Vector3::y() }, GROUND, "bob")
                    .initial_q(vec![theta]),
            );
        let world = World::build(&spec).unwrap();
        let mut sim = Simulation::new(world, SimulationConfig::default()).unwrap();
        sim.step().unwrap();

        let inertia = mass * length * length;
        let expected = -9.81 * mass * length * theta.cos() / inertia;
        assert_relative_eq!(sim.state().qacc[0], expected, epsilon = 1e-10);
    }
}

#[test]
fn mass_matrix_is_symmetric_positive_definite() {
    let world = World::build(&branching_scene()).unwrap();
    let configurations = [
        world.initial_q().clone(),
        DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.2, -0.4, 2.0, 0.7, -3.0]),
    ];
    for q in &configurations {
        let kin = forward_kinematics(&world, q).unwrap();
        let m = compute_mass_matrix(&world, &kin);
        assert!((&m - m.transpose()).norm() < 1e-12);
        let eigenvalues = m.clone().symmetric_eigenvalues();
        assert!(eigenvalues.iter().all(|&e| e > 0.0), "eigenvalues: {eigenvalues}");
        assert!(factorize(&m).is_ok());
    }
}

#[test]
fn resting_contact_produces_no_force() {
    // 球恰好接触地面，速度向上：互补条件要求约束力为零
    let mut spec = falling_ball::scene(0.0);
    spec.joints[0].initial_q = Some(vec![0.0, 0.0, falling_ball::BALL_RADIUS, 1.0, 0.0, 0.0, 0.0]);
    spec.joints[0].initial_qvel = Some(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.5]);
    let world = World::build(&spec).unwrap();

    let config = SolverConfig::default();
    let dt = 0.001;
    let kin = forward_kinematics(&world, world.initial_q()).unwrap();
    let constraints = detect_constraints(&world, &kin, world.initial_q(), &config).unwrap();
    assert_eq!(constraints.len(), 1);
    assert_relative_eq!(constraints[0].gap(), 0.0, epsilon = 1e-12);

    let rows = assemble_rows(&world, &kin, &constraints, dt, config.erp);
    let fact = factorize(&compute_mass_matrix(&world, &kin)).unwrap();
    let solution = solve_pgs(&fact, world.initial_qvel(), &rows, dt, &config);
    assert!(solution.converged());
    assert!(solution.qfrc_constraint.iter().all(|&f| f == 0.0));
}

fn run(mut sim: Simulation, steps: usize) -> Vec<SimulationState> {
    (0..steps)
        .map(|_| {
            sim.step().unwrap();
            sim.state().clone()
        })
        .collect()
}

#[test]
fn repeated_runs_are_bit_identical() {
    let make = || Simulation::new(hinge_chain::build().unwrap(), hinge_chain::config()).unwrap();
    assert_eq!(run(make(), 300), run(make(), 300));

    let make = || Simulation::new(falling_ball::build().unwrap(), falling_ball::config()).unwrap();
    assert_eq!(run(make(), 800), run(make(), 800));
}

#[test]
fn singular_inertia_aborts_step_without_corrupting_state() {
    let mut spec = SceneSpec::new();
    spec.add_body(Body::massless("ghost"))
        .add_joint(JointSpec::new("slide", JointKind::Prismatic { axis: Vector3::x() }, GROUND, "ghost"));
    let world = World::build(&spec).unwrap();
    let mut sim = Simulation::new(world, SimulationConfig::default()).unwrap();
    let before = sim.state().clone();

    let err = sim.step().unwrap_err();
    assert!(matches!(err, SimError::SingularInertia { .. }));
    assert!(!err.is_recoverable());
    assert_eq!(sim.state(), &before);
}

#[test]
fn structural_errors_abort_assembly() {
    let mut spec = SceneSpec::new();
    spec.add_body(Body::point_mass("a", 1.0, Vector3::zeros()))
        .add_body(Body::point_mass("b", 1.0, Vector3::zeros()))
        .add_joint(JointSpec::new("ab", JointKind::Revolute { axis: Vector3::x() }, "a", "b"))
        .add_joint(JointSpec::new("ba", JointKind::Revolute { axis: Vector3::x() }, "b", "a"));
    let err = World::build(&spec).unwrap_err();
    assert!(matches!(err, SimError::Structural { .. }));
    assert!(err.is_assembly_error());
}

#[test]
fn snapshots_stream_as_json_lines() {
    let mut sim = Simulation::new(hinge_chain::build().unwrap(), hinge_chain::config()).unwrap();
    let mut writer = JsonLinesWriter::new(Vec::new());
    let timeline = uniform_timeline(0.0, 0.002, 20);
    simulate(&mut sim, &timeline, &mut [&mut writer]).unwrap();

    let text = String::from_utf8(writer.into_inner()).unwrap();
    let snapshots: Vec<Snapshot> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(snapshots.len(), 21);
    assert_eq!(snapshots[20].step, 20);
    assert_eq!(snapshots[20].q, sim.state().q.iter().copied().collect::<Vec<_>>());
    assert_eq!(snapshots[20].body_poses.len(), sim.world().nbody());
}

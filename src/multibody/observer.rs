//! # 观察者
//!
//! 每完成一步，仿真驱动同步调用观察者的 `update`。观察者只读快照，
//! 返回值不影响仿真。可视化、持久化等外部协作方都通过这个接口接入。

use std::io::Write;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::time::{Duration, Instant};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::spatial_algebra::SpatialMotion;
use super::transform::Transform;
use super::world::World;

/// 一步结束时的状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: f64,
    pub step: u64,
    pub q: Vec<f64>,
    pub qvel: Vec<f64>,
    /// 每个刚体的绝对位姿（含地面）
    pub body_poses: Vec<Transform>,
    /// 每个刚体的空间速度（世界坐标系原点）
    pub body_velocities: Vec<SpatialMotion>,
    /// 本步的可恢复诊断（例如约束求解未收敛）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// 观察者接口
pub trait Observer {
    /// 仿真开始前调用一次，参数为初始快照
    fn init(&mut self, _world: &World, _initial: &Snapshot) {}

    /// 每完成一步调用一次
    fn update(&mut self, world: &World, snapshot: &Snapshot);

    /// 仿真结束（包括因错误中止）时调用一次
    fn finish(&mut self) {}
}

/// 机械能分量
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergySample {
    pub time: f64,
    pub kinetic: f64,
    pub potential: f64,
}

impl EnergySample {
    pub fn total(&self) -> f64 {
        self.kinetic + self.potential
    }
}

/// 计算快照的动能与重力势能
///
/// ```text
/// T = Σ ½ Vᵢ · (Iᵢ Vᵢ)
/// V = -Σ mᵢ g · cᵢ
/// ```
pub fn compute_energy(world: &World, snapshot: &Snapshot, gravity: &Vector3<f64>) -> EnergySample {
    let mut kinetic = 0.0;
    let mut potential = 0.0;
    for ((body, pose), velocity) in world
        .bodies()
        .iter()
        .zip(&snapshot.body_poses)
        .zip(&snapshot.body_velocities)
        .skip(1)
    {
        let inertia = body.spatial_inertia().transformed(pose);
        kinetic += inertia.kinetic_energy(velocity);
        potential -= body.mass * gravity.dot(&pose.transform_point(&body.com));
    }
    EnergySample {
        time: snapshot.time,
        kinetic,
        potential,
    }
}

/// 记录每步的机械能
#[derive(Debug, Clone)]
pub struct EnergyMonitor {
    gravity: Vector3<f64>,
    samples: Vec<EnergySample>,
}

impl EnergyMonitor {
    pub fn new(gravity: Vector3<f64>) -> Self {
        Self {
            gravity,
            samples: Vec::new(),
        }
    }

    pub fn samples(&self) -> &[EnergySample] {
        &self.samples
    }

    /// 相对初始值的最大机械能偏差
    pub fn max_drift(&self) -> f64 {
        let Some(first) = self.samples.first() else {
            return 0.0;
        };
        let e0 = first.total();
        self.samples
            .iter()
            .map(|s| (s.total() - e0).abs())
            .fold(0.0, f64::max)
    }
}

impl Observer for EnergyMonitor {
    fn init(&mut self, world: &World, initial: &Snapshot) {
        self.samples.clear();
        self.samples.push(compute_energy(world, initial, &self.gravity));
    }

    fn update(&mut self, world: &World, snapshot: &Snapshot) {
        self.samples.push(compute_energy(world, snapshot, &self.gravity));
    }

    fn finish(&mut self) {
        debug!(
            samples = self.samples.len(),
            max_drift = self.max_drift(),
            "energy monitor finished"
        );
    }
}

/// 步间墙钟时间统计
#[derive(Debug, Clone, Default)]
pub struct PerfMonitor {
    last: Option<Instant>,
    steps: u64,
    total: Duration,
    max: Duration,
}

impl PerfMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn mean(&self) -> Duration {
        if self.steps == 0 {
            Duration::ZERO
        } else {
            self.total / self.steps as u32
        }
    }
}

impl Observer for PerfMonitor {
    fn init(&mut self, _world: &World, _initial: &Snapshot) {
        *self = Self::default();
        self.last = Some(Instant::now());
    }

    fn update(&mut self, _world: &World, _snapshot: &Snapshot) {
        let now = Instant::now();
        if let Some(last) = self.last {
            let elapsed = now - last;
            self.total += elapsed;
            self.max = self.max.max(elapsed);
            self.steps += 1;
        }
        self.last = Some(now);
    }

    fn finish(&mut self) {
        debug!(
            steps = self.steps,
            mean_us = self.mean().as_micros() as u64,
            max_us = self.max.as_micros() as u64,
            "perf monitor finished"
        );
    }
}

/// 在内存中记录快照，`stride` 控制每隔几步记录一次
#[derive(Debug, Clone)]
pub struct TrajectoryRecorder {
    stride: u64,
    snapshots: Vec<Snapshot>,
}

impl TrajectoryRecorder {
    pub fn new() -> Self {
        Self::with_stride(1)
    }

    pub fn with_stride(stride: u64) -> Self {
        Self {
            stride: stride.max(1),
            snapshots: Vec::new(),
        }
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn into_snapshots(self) -> Vec<Snapshot> {
        self.snapshots
    }
}

impl Default for TrajectoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for TrajectoryRecorder {
    fn init(&mut self, _world: &World, initial: &Snapshot) {
        self.snapshots.clear();
        self.snapshots.push(initial.clone());
    }

    fn update(&mut self, _world: &World, snapshot: &Snapshot) {
        if snapshot.step % self.stride == 0 {
            self.snapshots.push(snapshot.clone());
        }
    }
}

/// 以 JSON Lines 格式写出快照（每行一个）
///
/// 写入失败不会中断仿真：记录 `warn!`，保存在 `last_error` 中，之后的快照跳过。
pub struct JsonLinesWriter<W: Write> {
    writer: W,
    written: u64,
    last_error: Option<String>,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            written: 0,
            last_error: None,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write(&mut self, snapshot: &Snapshot) {
        if self.last_error.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut self.writer, snapshot)
            .map_err(|e| e.to_string())
            .and_then(|()| self.writer.write_all(b"\n").map_err(|e| e.to_string()));
        match result {
            Ok(()) => self.written += 1,
            Err(e) => {
                warn!(error = %e, step = snapshot.step, "failed to write snapshot");
                self.last_error = Some(e);
            }
        }
    }
}

impl<W: Write> Observer for JsonLinesWriter<W> {
    fn init(&mut self, _world: &World, initial: &Snapshot) {
        self.write(initial);
    }

    fn update(&mut self, _world: &World, snapshot: &Snapshot) {
        self.write(snapshot);
    }

    fn finish(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "failed to flush snapshot writer");
            self.last_error.get_or_insert(e.to_string());
        }
    }
}

/// 通过有界通道把快照交给另一个线程（例如渲染器）
///
/// 通道满时阻塞仿真；接收端断开后不再发送。
pub struct ChannelObserver {
    sender: SyncSender<Snapshot>,
    disconnected: bool,
}

impl ChannelObserver {
    /// 创建容量为 `capacity` 的通道
    pub fn bounded(capacity: usize) -> (Self, Receiver<Snapshot>) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        (
            Self {
                sender,
                disconnected: false,
            },
            receiver,
        )
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn send(&mut self, snapshot: &Snapshot) {
        if self.disconnected {
            return;
        }
        let result = match self.sender.try_send(snapshot.clone()) {
            Err(TrySendError::Full(s)) => self.sender.send(s).map_err(|_| ()),
            Err(TrySendError::Disconnected(_)) => Err(()),
            Ok(()) => Ok(()),
        };
        if result.is_err() {
            warn!(step = snapshot.step, "snapshot receiver disconnected");
            self.disconnected = true;
        }
    }
}

impl Observer for ChannelObserver {
    fn init(&mut self, _world: &World, initial: &Snapshot) {
        self.send(initial);
    }

    fn update(&mut self, _world: &World, snapshot: &Snapshot) {
        self.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multibody::joint::JointKind;
    use crate::multibody::model::Body;
    use crate::multibody::world::{JointSpec, SceneSpec, GROUND};
    use approx::assert_relative_eq;

    fn ball_world() -> World {
        let mut spec = SceneSpec::new();
        spec.add_body(Body::point_mass("ball", 2.0, Vector3::zeros()))
            .add_joint(JointSpec::new("free", JointKind::Free, GROUND, "ball"));
        World::build(&spec).unwrap()
    }

    fn snapshot(step: u64, height: f64, speed: f64) -> Snapshot {
        Snapshot {
            time: step as f64 * 0.01,
            step,
            q: vec![0.0, 0.0, height, 1.0, 0.0, 0.0, 0.0],
            qvel: vec![0.0, 0.0, 0.0, 0.0, 0.0, speed],
            body_poses: vec![
                Transform::identity(),
                Transform::from_translation(Vector3::new(0.0, 0.0, height)),
            ],
            body_velocities: vec![
                SpatialMotion::zero(),
                SpatialMotion::new(Vector3::zeros(), Vector3::new(0.0, 0.0, speed)),
            ],
            diagnostic: None,
        }
    }

    #[test]
    fn test_energy_monitor() {
        let world = ball_world();
        let mut monitor = EnergyMonitor::new(Vector3::new(0.0, 0.0, -10.0));
        monitor.init(&world, &snapshot(0, 1.0, 0.0));
        monitor.update(&world, &snapshot(1, 0.95, -1.0));

        let samples = monitor.samples();
        assert_relative_eq!(samples[0].potential, 20.0, epsilon = 1e-12);
        assert_relative_eq!(samples[1].kinetic, 1.0, epsilon = 1e-12);
        assert_relative_eq!(samples[1].total(), 20.0, epsilon = 1e-12);
        assert_relative_eq!(monitor.max_drift(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_trajectory_recorder_stride() {
        let world = ball_world();
        let mut recorder = TrajectoryRecorder::with_stride(2);
        recorder.init(&world, &snapshot(0, 1.0, 0.0));
        for step in 1..=4 {
            recorder.update(&world, &snapshot(step, 1.0, 0.0));
        }
        let steps: Vec<u64> = recorder.snapshots().iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![0, 2, 4]);
        assert_eq!(recorder.into_snapshots().len(), 3);
    }

    #[test]
    fn test_json_lines_writer() {
        let world = ball_world();
        let mut writer = JsonLinesWriter::new(Vec::new());
        writer.init(&world, &snapshot(0, 1.0, 0.0));
        writer.update(&world, &snapshot(1, 0.9, -1.0));
        writer.finish();
        assert_eq!(writer.written(), 2);
        assert!(writer.last_error().is_none());

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Snapshot = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, snapshot(1, 0.9, -1.0));
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_json_lines_writer_records_error() {
        let world = ball_world();
        let mut writer = JsonLinesWriter::new(FailingWriter);
        writer.update(&world, &snapshot(1, 1.0, 0.0));
        writer.update(&world, &snapshot(2, 1.0, 0.0));
        assert_eq!(writer.written(), 0);
        assert!(writer.last_error().is_some_and(|e| e.contains("disk full")));
    }

    #[test]
    fn test_channel_observer() {
        let world = ball_world();
        let (mut observer, receiver) = ChannelObserver::bounded(4);
        observer.init(&world, &snapshot(0, 1.0, 0.0));
        observer.update(&world, &snapshot(1, 1.0, 0.0));
        assert_eq!(receiver.recv().unwrap().step, 0);
        assert_eq!(receiver.recv().unwrap().step, 1);

        drop(receiver);
        observer.update(&world, &snapshot(2, 1.0, 0.0));
        assert!(observer.is_disconnected());
    }
}

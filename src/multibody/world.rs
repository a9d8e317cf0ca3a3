//! # 运动学树 (World)
//!
//! 从声明式的 [`SceneSpec`] 装配出一棵有根树：
//!
//! - 根是地面刚体（索引 0，固定在惯性系中）
//! - 每个其他刚体恰好有一个父关节
//! - 刚体按深度优先先序存储（子节点按关节声明顺序），关节 `i` 是刚体 `i + 1` 的父关节
//! - 广义坐标向量按该顺序串联各关节的坐标
//!
//! 同样的输入总是得到同样的顺序。拓扑在装配后不可变。

use std::collections::HashMap;
use std::ops::Range;

use nalgebra::{DVector, Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::collision::{is_supported_pair, Shape};
use super::error::{Result, SimError};
use super::joint::{Joint, JointKind};
use super::model::{Body, SimulationState};
use super::transform::{Transform, RIGID_TOLERANCE};

/// 地面刚体的保留名称
pub const GROUND: &str = "ground";

/// 关节声明（通过名称引用刚体）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointSpec {
    pub name: String,
    pub kind: JointKind,
    pub parent: String,
    pub child: String,
    #[serde(default)]
    pub parent_anchor: Transform,
    #[serde(default)]
    pub child_anchor: Transform,
    #[serde(default)]
    pub damping: f64,
    #[serde(default)]
    pub armature: f64,
    #[serde(default)]
    pub limits: Option<[f64; 2]>,
    /// 初始坐标，缺省为零位
    #[serde(default)]
    pub initial_q: Option<Vec<f64>>,
    /// 初始速度，缺省为零
    #[serde(default)]
    pub initial_qvel: Option<Vec<f64>>,
}

impl JointSpec {
    pub fn new(
        name: impl Into<String>,
        kind: JointKind,
        parent: impl Into<String>,
        child: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            parent: parent.into(),
            child: child.into(),
            parent_anchor: Transform::identity(),
            child_anchor: Transform::identity(),
            damping: 0.0,
            armature: 0.0,
            limits: None,
            initial_q: None,
            initial_qvel: None,
        }
    }

    #[must_use]
    pub fn parent_anchor(mut self, anchor: Transform) -> Self {
        self.parent_anchor = anchor;
        self
    }

    #[must_use]
    pub fn child_anchor(mut self, anchor: Transform) -> Self {
        self.child_anchor = anchor;
        self
    }

    #[must_use]
    pub fn damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    #[must_use]
    pub fn armature(mut self, armature: f64) -> Self {
        self.armature = armature;
        self
    }

    #[must_use]
    pub fn limits(mut self, lower: f64, upper: f64) -> Self {
        self.limits = Some([lower, upper]);
        self
    }

    #[must_use]
    pub fn initial_q(mut self, q: Vec<f64>) -> Self {
        self.initial_q = Some(q);
        self
    }

    #[must_use]
    pub fn initial_qvel(mut self, qvel: Vec<f64>) -> Self {
        self.initial_qvel = Some(qvel);
        self
    }
}

/// 形状声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeSpec {
    pub name: String,
    /// 所附着的刚体名称（可以是 `ground`）
    pub body: String,
    /// 形状坐标系在刚体坐标系中的位姿
    #[serde(default)]
    pub pose: Transform,
    pub shape: Shape,
}

/// 固连在刚体上的命名坐标系声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSpec {
    pub name: String,
    /// 所附着的刚体名称（可以是 `ground`）
    pub body: String,
    /// 坐标系在刚体坐标系中的位姿
    #[serde(default)]
    pub pose: Transform,
}

/// 接触对声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactPairSpec {
    pub shape_a: String,
    pub shape_b: String,
    /// 库仑摩擦系数
    #[serde(default)]
    pub friction: f64,
}

/// 声明式场景描述
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneSpec {
    #[serde(default)]
    pub bodies: Vec<Body>,
    #[serde(default)]
    pub joints: Vec<JointSpec>,
    #[serde(default)]
    pub shapes: Vec<ShapeSpec>,
    #[serde(default)]
    pub contact_pairs: Vec<ContactPairSpec>,
    #[serde(default)]
    pub frames: Vec<FrameSpec>,
}

impl SceneSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_body(&mut self, body: Body) -> &mut Self {
        self.bodies.push(body);
        self
    }

    pub fn add_joint(&mut self, joint: JointSpec) -> &mut Self {
        self.joints.push(joint);
        self
    }

    pub fn add_shape(
        &mut self,
        name: impl Into<String>,
        body: impl Into<String>,
        pose: Transform,
        shape: Shape,
    ) -> &mut Self {
        self.shapes.push(ShapeSpec {
            name: name.into(),
            body: body.into(),
            pose,
            shape,
        });
        self
    }

    pub fn add_frame(&mut self, name: impl Into<String>, body: impl Into<String>, pose: Transform) -> &mut Self {
        self.frames.push(FrameSpec {
            name: name.into(),
            body: body.into(),
            pose,
        });
        self
    }

    pub fn add_contact_pair(
        &mut self,
        shape_a: impl Into<String>,
        shape_b: impl Into<String>,
        friction: f64,
    ) -> &mut Self {
        self.contact_pairs.push(ContactPairSpec {
            shape_a: shape_a.into(),
            shape_b: shape_b.into(),
            friction,
        });
        self
    }
}

/// 附着在刚体上的形状
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeInstance {
    pub name: String,
    pub body: usize,
    pub pose: Transform,
    pub shape: Shape,
}

/// 固连在刚体上的命名坐标系
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInstance {
    pub name: String,
    pub body: usize,
    /// 相对刚体坐标系的位姿
    pub pose: Transform,
}

/// 已解析的接触对
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPair {
    pub shape_a: usize,
    pub shape_b: usize,
    pub friction: f64,
    /// 禁用的接触对不参与检测
    pub enabled: bool,
}

/// 运动学树
#[derive(Debug, Clone)]
pub struct World {
    bodies: Vec<Body>,
    joints: Vec<Joint>,
    /// 每个刚体的父刚体（地面为 None）
    parents: Vec<Option<usize>>,
    shapes: Vec<ShapeInstance>,
    contact_pairs: Vec<ContactPair>,
    frames: Vec<FrameInstance>,
    /// 每个自由度所属的刚体
    dof_body: Vec<usize>,
    /// 每个自由度在祖先链上的前一个自由度
    dof_parent: Vec<Option<usize>>,
    nq: usize,
    nv: usize,
    initial_q: DVector<f64>,
    initial_qvel: DVector<f64>,
}

impl World {
    /// 从场景描述装配
    ///
    /// ## 错误
    /// - `Configuration`: 刚体/关节/形状参数非法、初始坐标长度错误
    /// - `Structural`: 重名、未知引用、一个刚体有两个父关节、子体是地面、
    ///   刚体无法从地面到达（多个根或环）
    pub fn build(spec: &SceneSpec) -> Result<World> {
        // ===== 1. 刚体名称表（声明顺序，地面为 0） =====
        let mut body_index: HashMap<&str, usize> = HashMap::new();
        body_index.insert(GROUND, 0);
        for (i, body) in spec.bodies.iter().enumerate() {
            body.validate()?;
            if body_index.insert(body.name.as_str(), i + 1).is_some() {
                return Err(SimError::structural(format!(
                    "duplicate body name '{}'",
                    body.name
                )));
            }
        }
        let nbody = spec.bodies.len() + 1;

        // ===== 2. 解析关节，建立父子关系 =====
        let mut joint_names: HashMap<&str, usize> = HashMap::new();
        let mut parent_joint: Vec<Option<usize>> = vec![None; nbody];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); nbody];
        let mut resolved = Vec::with_capacity(spec.joints.len());

        for (j, js) in spec.joints.iter().enumerate() {
            if joint_names.insert(js.name.as_str(), j).is_some() {
                return Err(SimError::structural(format!(
                    "duplicate joint name '{}'",
                    js.name
                )));
            }
            let lookup = |name: &str, role: &str| {
                body_index.get(name).copied().ok_or_else(|| {
                    SimError::structural(format!(
                        "joint '{}' references unknown {role} body '{name}'",
                        js.name
                    ))
                })
            };
            let parent = lookup(&js.parent, "parent")?;
            let child = lookup(&js.child, "child")?;
            if child == 0 {
                return Err(SimError::structural(format!(
                    "joint '{}' has the ground as its child",
                    js.name
                )));
            }
            if parent == child {
                return Err(SimError::structural(format!(
                    "joint '{}' connects body '{}' to itself",
                    js.name, js.child
                )));
            }
            if let Some(other) = parent_joint[child] {
                return Err(SimError::structural(format!(
                    "body '{}' has two parent joints ('{}' and '{}')",
                    js.child, spec.joints[other].name, js.name
                )));
            }
            parent_joint[child] = Some(j);
            children[parent].push(child);
            resolved.push((parent, child, js.kind.validated()?));
        }

        // ===== 3. 深度优先先序（迭代，避免递归） =====
        let mut order = Vec::with_capacity(nbody);
        let mut stack = vec![0usize];
        let mut visited = vec![false; nbody];
        while let Some(b) = stack.pop() {
            if visited[b] {
                continue;
            }
            visited[b] = true;
            order.push(b);
            for &c in children[b].iter().rev() {
                stack.push(c);
            }
        }
        if order.len() != nbody {
            let unreachable: Vec<&str> = (1..nbody)
                .filter(|&b| !visited[b])
                .map(|b| spec.bodies[b - 1].name.as_str())
                .collect();
            return Err(SimError::structural(format!(
                "bodies not reachable from ground (extra root or cycle): {}",
                unreachable.join(", ")
            )));
        }

        // 声明索引 → 树索引
        let mut new_index = vec![0usize; nbody];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }

        // ===== 4. 按新顺序生成刚体与关节 =====
        let mut bodies = Vec::with_capacity(nbody);
        let mut parents = vec![None; nbody];
        let mut joints = Vec::with_capacity(nbody - 1);
        let mut initial_q = Vec::new();
        let mut initial_qvel = Vec::new();
        let (mut nq, mut nv) = (0usize, 0usize);

        for &old in &order {
            if old == 0 {
                bodies.push(Body::massless(GROUND));
                continue;
            }
            bodies.push(spec.bodies[old - 1].clone());

            // 可达的非地面刚体一定有父关节
            let Some(j) = parent_joint[old] else {
                return Err(SimError::structural(format!(
                    "body '{}' has no parent joint",
                    spec.bodies[old - 1].name
                )));
            };
            let js = &spec.joints[j];
            let (parent, child, kind) = resolved[j];
            parents[new_index[child]] = Some(new_index[parent]);

            let joint = Joint {
                name: js.name.clone(),
                kind,
                parent: new_index[parent],
                child: new_index[child],
                parent_anchor: js.parent_anchor,
                child_anchor: js.child_anchor,
                damping: js.damping,
                armature: js.armature,
                limits: js.limits,
                q_offset: nq,
                v_offset: nv,
            };
            joint.validate_parameters()?;

            initial_q.extend(initial_coordinates(js, &kind)?);
            match &js.initial_qvel {
                Some(v) if v.len() != kind.nv() => {
                    return Err(SimError::configuration(format!(
                        "joint '{}': initial_qvel has {} entries, expected {}",
                        js.name,
                        v.len(),
                        kind.nv()
                    )));
                }
                Some(v) if v.iter().any(|x| !x.is_finite()) => {
                    return Err(SimError::configuration(format!(
                        "joint '{}': initial_qvel must be finite",
                        js.name
                    )));
                }
                Some(v) => initial_qvel.extend_from_slice(v),
                None => initial_qvel.extend(std::iter::repeat(0.0).take(kind.nv())),
            }

            nq += kind.nq();
            nv += kind.nv();
            joints.push(joint);
        }

        // ===== 5. 自由度拓扑 =====
        let mut dof_body = Vec::with_capacity(nv);
        let mut dof_parent = Vec::with_capacity(nv);
        // 每个刚体（含祖先）最后一个自由度
        let mut last_dof: Vec<Option<usize>> = vec![None; nbody];
        for joint in &joints {
            let mut prev = parents[joint.child].and_then(|p| last_dof[p]);
            for k in joint.v_range() {
                dof_body.push(joint.child);
                dof_parent.push(prev);
                prev = Some(k);
            }
            last_dof[joint.child] = prev;
        }

        // ===== 6. 形状与接触对 =====
        let mut shape_index: HashMap<&str, usize> = HashMap::new();
        let mut shapes = Vec::with_capacity(spec.shapes.len());
        for (i, ss) in spec.shapes.iter().enumerate() {
            ss.shape.validate()?;
            if !ss.pose.is_rigid(RIGID_TOLERANCE) {
                return Err(SimError::configuration(format!(
                    "shape '{}': pose is not a rigid transform",
                    ss.name
                )));
            }
            if shape_index.insert(ss.name.as_str(), i).is_some() {
                return Err(SimError::structural(format!(
                    "duplicate shape name '{}'",
                    ss.name
                )));
            }
            let body = body_index.get(ss.body.as_str()).copied().ok_or_else(|| {
                SimError::structural(format!(
                    "shape '{}' references unknown body '{}'",
                    ss.name, ss.body
                ))
            })?;
            shapes.push(ShapeInstance {
                name: ss.name.clone(),
                body: new_index[body],
                pose: ss.pose,
                shape: ss.shape,
            });
        }

        let mut contact_pairs = Vec::with_capacity(spec.contact_pairs.len());
        for cp in &spec.contact_pairs {
            let lookup = |name: &str| {
                shape_index.get(name).copied().ok_or_else(|| {
                    SimError::structural(format!("contact pair references unknown shape '{name}'"))
                })
            };
            let a = lookup(&cp.shape_a)?;
            let b = lookup(&cp.shape_b)?;
            if !is_supported_pair(&shapes[a].shape, &shapes[b].shape) {
                return Err(SimError::configuration(format!(
                    "no contact solver for shapes '{}' and '{}'",
                    cp.shape_a, cp.shape_b
                )));
            }
            if shapes[a].body == shapes[b].body {
                return Err(SimError::configuration(format!(
                    "contact pair '{}'-'{}' lies on a single body",
                    cp.shape_a, cp.shape_b
                )));
            }
            if !cp.friction.is_finite() || cp.friction < 0.0 {
                return Err(SimError::configuration(format!(
                    "friction must be finite and >= 0, got {}",
                    cp.friction
                )));
            }
            contact_pairs.push(ContactPair {
                shape_a: a,
                shape_b: b,
                friction: cp.friction,
                enabled: true,
            });
        }

        // ===== 7. 命名坐标系 =====
        let mut frames: Vec<FrameInstance> = Vec::with_capacity(spec.frames.len());
        for fs in &spec.frames {
            if frames.iter().any(|f| f.name == fs.name) {
                return Err(SimError::structural(format!(
                    "duplicate frame name '{}'",
                    fs.name
                )));
            }
            let body = body_index.get(fs.body.as_str()).copied().ok_or_else(|| {
                SimError::structural(format!(
                    "frame '{}' references unknown body '{}'",
                    fs.name, fs.body
                ))
            })?;
            if !fs.pose.is_rigid(RIGID_TOLERANCE) {
                return Err(SimError::configuration(format!(
                    "frame '{}': pose is not a rigid transform",
                    fs.name
                )));
            }
            frames.push(FrameInstance {
                name: fs.name.clone(),
                body: new_index[body],
                pose: fs.pose,
            });
        }

        debug!(
            bodies = nbody,
            joints = joints.len(),
            nq,
            nv,
            shapes = shapes.len(),
            contact_pairs = contact_pairs.len(),
            frames = frames.len(),
            "assembled world"
        );

        Ok(World {
            bodies,
            joints,
            parents,
            shapes,
            contact_pairs,
            frames,
            dof_body,
            dof_parent,
            nq,
            nv,
            initial_q: DVector::from_vec(initial_q),
            initial_qvel: DVector::from_vec(initial_qvel),
        })
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn shapes(&self) -> &[ShapeInstance] {
        &self.shapes
    }

    pub fn contact_pairs(&self) -> &[ContactPair] {
        &self.contact_pairs
    }

    pub fn frames(&self) -> &[FrameInstance] {
        &self.frames
    }

    pub fn frame_id(&self, name: &str) -> Option<usize> {
        self.frames.iter().position(|f| f.name == name)
    }

    /// 移动一个命名坐标系（相对所在刚体）
    pub fn set_frame_pose(&mut self, frame: usize, pose: Transform) -> Result<()> {
        let Some(instance) = self.frames.get_mut(frame) else {
            return Err(SimError::configuration(format!("unknown frame index {frame}")));
        };
        if !pose.is_rigid(RIGID_TOLERANCE) {
            return Err(SimError::configuration(format!(
                "frame '{}': pose is not a rigid transform",
                instance.name
            )));
        }
        instance.pose = pose;
        Ok(())
    }

    /// 启用或禁用两个形状之间的接触对（顺序无关）
    pub fn set_contact_enabled(&mut self, shape_a: &str, shape_b: &str, enabled: bool) -> Result<()> {
        let (Some(a), Some(b)) = (self.shape_id(shape_a), self.shape_id(shape_b)) else {
            return Err(SimError::configuration(format!(
                "unknown shape in contact pair '{shape_a}'-'{shape_b}'"
            )));
        };
        let mut found = false;
        for pair in &mut self.contact_pairs {
            if (pair.shape_a, pair.shape_b) == (a, b) || (pair.shape_a, pair.shape_b) == (b, a) {
                pair.enabled = enabled;
                found = true;
            }
        }
        if !found {
            return Err(SimError::configuration(format!(
                "no contact pair between '{shape_a}' and '{shape_b}'"
            )));
        }
        Ok(())
    }

    /// 影响刚体运动的全部自由度（从刚体的父关节到根）
    pub fn supporting_dofs(&self, body: usize) -> Vec<usize> {
        let mut dofs = Vec::new();
        let mut b = body;
        while let Some(joint) = self.parent_joint(b) {
            dofs.extend(joint.v_range());
            b = joint.parent;
        }
        dofs
    }

    /// 刚体数量（含地面）
    pub fn nbody(&self) -> usize {
        self.bodies.len()
    }

    pub fn nq(&self) -> usize {
        self.nq
    }

    pub fn nv(&self) -> usize {
        self.nv
    }

    pub fn parent(&self, body: usize) -> Option<usize> {
        self.parents.get(body).copied().flatten()
    }

    /// 刚体的父关节
    pub fn parent_joint(&self, body: usize) -> Option<&Joint> {
        body.checked_sub(1).and_then(|j| self.joints.get(j))
    }

    pub fn dof_body(&self) -> &[usize] {
        &self.dof_body
    }

    pub fn dof_parent(&self) -> &[Option<usize>] {
        &self.dof_parent
    }

    pub fn body_id(&self, name: &str) -> Option<usize> {
        self.bodies.iter().position(|b| b.name == name)
    }

    pub fn joint_id(&self, name: &str) -> Option<usize> {
        self.joints.iter().position(|j| j.name == name)
    }

    pub fn shape_id(&self, name: &str) -> Option<usize> {
        self.shapes.iter().position(|s| s.name == name)
    }

    /// 关节在 qvel 中的自由度范围
    pub fn joint_dofs(&self, joint: usize) -> Option<Range<usize>> {
        self.joints.get(joint).map(Joint::v_range)
    }

    /// 关节在 q 中的坐标范围
    pub fn joint_coords(&self, joint: usize) -> Option<Range<usize>> {
        self.joints.get(joint).map(Joint::q_range)
    }

    pub fn initial_q(&self) -> &DVector<f64> {
        &self.initial_q
    }

    pub fn initial_qvel(&self) -> &DVector<f64> {
        &self.initial_qvel
    }

    /// 由初始坐标构造仿真状态
    pub fn initial_state(&self) -> SimulationState {
        let mut state = SimulationState::new(self.initial_q.clone(), self.nv);
        state.qvel.copy_from(&self.initial_qvel);
        state
    }

    /// 修改刚体惯性参数（只能在两次运行之间调用）
    pub fn set_inertia(
        &mut self,
        body: usize,
        mass: f64,
        com: Vector3<f64>,
        inertia: Matrix3<f64>,
    ) -> Result<()> {
        if body == 0 || body >= self.bodies.len() {
            return Err(SimError::configuration(format!(
                "cannot set inertia of body index {body}"
            )));
        }
        let updated = Body::new(self.bodies[body].name.clone(), mass, com, inertia)
            .with_viscosity(self.bodies[body].viscosity);
        updated.validate()?;
        self.bodies[body] = updated;
        Ok(())
    }

    /// 检查外部给定的位形：长度、有限性，并归一化自由关节的四元数
    pub fn normalize_configuration(&self, q: &mut DVector<f64>) -> Result<()> {
        if q.len() != self.nq {
            return Err(SimError::configuration(format!(
                "q has {} entries, world expects {}",
                q.len(),
                self.nq
            )));
        }
        if q.iter().any(|x| !x.is_finite()) {
            return Err(SimError::configuration("q must be finite"));
        }
        for joint in &self.joints {
            if let JointKind::Free = joint.kind {
                let start = joint.q_offset + 3;
                normalize_quaternion(&joint.name, &mut q.as_mut_slice()[start..start + 4])?;
            }
        }
        Ok(())
    }

    /// 检查 q、qvel 的长度
    pub fn check_state(&self, q: &DVector<f64>, qvel: &DVector<f64>) -> Result<()> {
        if q.len() != self.nq || qvel.len() != self.nv {
            return Err(SimError::configuration(format!(
                "state has nq={} nv={}, world expects nq={} nv={}",
                q.len(),
                qvel.len(),
                self.nq,
                self.nv
            )));
        }
        Ok(())
    }
}

/// 关节的初始坐标：缺省为零位，自由关节的四元数归一化
fn initial_coordinates(js: &JointSpec, kind: &JointKind) -> Result<Vec<f64>> {
    let Some(q) = &js.initial_q else {
        return Ok(kind.neutral_position());
    };
    if q.len() != kind.nq() {
        return Err(SimError::configuration(format!(
            "joint '{}': initial_q has {} entries, expected {}",
            js.name,
            q.len(),
            kind.nq()
        )));
    }
    if q.iter().any(|x| !x.is_finite()) {
        return Err(SimError::configuration(format!(
            "joint '{}': initial_q must be finite",
            js.name
        )));
    }
    let mut q = q.clone();
    if let JointKind::Free = kind {
        normalize_quaternion(&js.name, &mut q[3..7])?;
    }
    Ok(q)
}

/// 把自由关节的四元数坐标归一化；零四元数是配置错误
fn normalize_quaternion(joint: &str, coords: &mut [f64]) -> Result<()> {
    let norm = coords.iter().map(|x| x * x).sum::<f64>().sqrt();
    if !norm.is_finite() || norm < 1e-12 {
        return Err(SimError::configuration(format!(
            "joint '{joint}': free joint quaternion must be non-zero"
        )));
    }
    for x in coords {
        *x /= norm;
    }
    Ok(())
}

//! # multibody_sim
//!
//! 铰接刚体动力学仿真：运动学树、CRBA/RNE、接触与关节限位约束、时间积分。
//!
//! - `multibody`: 通用的多体动力学求解框架
//! - `demos`: 示例场景（hinge chain、三连杆机械臂、单摆、落球）

pub mod demos;
pub mod multibody;

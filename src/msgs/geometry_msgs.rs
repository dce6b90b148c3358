//! Points, poses, transforms and their covariance-carrying variants.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::SE3;

use super::std_msgs::Header;

/// Row-major 6x6 covariance.
pub type Covariance = Vec<f64>;

pub const COVARIANCE_LEN: usize = 36;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point32 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3Msg {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    pub header: Header,
    pub pose: Pose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseWithCovariance {
    pub pose: Pose,
    pub covariance: Covariance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3Msg,
    pub angular: Vector3Msg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwistWithCovariance {
    pub twist: Twist,
    pub covariance: Covariance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vector3Msg,
    pub rotation: Quaternion,
}

/// Transform from `header.frame_id` (parent) to `child_frame_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformStamped {
    pub header: Header,
    pub child_frame_id: String,
    pub transform: Transform,
}

impl Default for PoseWithCovariance {
    fn default() -> Self {
        Self {
            pose: Pose::default(),
            covariance: vec![0.0; COVARIANCE_LEN],
        }
    }
}

impl Default for TwistWithCovariance {
    fn default() -> Self {
        Self {
            twist: Twist::default(),
            covariance: vec![0.0; COVARIANCE_LEN],
        }
    }
}

impl From<&UnitQuaternion<f64>> for Quaternion {
    fn from(q: &UnitQuaternion<f64>) -> Self {
        Self {
            x: q.coords.x,
            y: q.coords.y,
            z: q.coords.z,
            w: q.w,
        }
    }
}

impl From<&Vector3<f64>> for Point {
    fn from(v: &Vector3<f64>) -> Self {
        Self {
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

impl From<&Vector3<f64>> for Point32 {
    fn from(v: &Vector3<f64>) -> Self {
        Self {
            x: v.x as f32,
            y: v.y as f32,
            z: v.z as f32,
        }
    }
}

impl From<&Vector3<f64>> for Vector3Msg {
    fn from(v: &Vector3<f64>) -> Self {
        Self {
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

impl From<&SE3> for Pose {
    fn from(se3: &SE3) -> Self {
        Self {
            position: Point::from(&se3.translation),
            orientation: Quaternion::from(&se3.rotation),
        }
    }
}

impl From<&SE3> for Transform {
    fn from(se3: &SE3) -> Self {
        Self {
            translation: Vector3Msg::from(&se3.translation),
            rotation: Quaternion::from(&se3.rotation),
        }
    }
}

impl Pose {
    pub fn to_se3(&self) -> SE3 {
        let q = &self.orientation;
        let p = &self.position;
        SE3::from_quaternion(q.w, q.x, q.y, q.z, Vector3::new(p.x, p.y, p.z))
    }
}

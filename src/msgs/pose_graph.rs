//! Pose-graph exchange messages: graph, bag-of-words query and frame lookup.

use serde::{Deserialize, Serialize};

use super::geometry_msgs::{Covariance, Pose};
use super::sensor_msgs::{Image, PointCloud};
use super::std_msgs::Header;

/// Edge category. Discriminants match the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EdgeType {
    Odometry = 0,
    LoopClosure = 1,
    RejectedLoopClosure = 3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseGraphEdge {
    pub header: Header,
    pub key_from: u64,
    pub key_to: u64,
    pub robot_from: u16,
    pub robot_to: u16,
    pub edge_type: EdgeType,
    /// Relative pose from `key_from` to `key_to`.
    pub pose: Pose,
    pub covariance: Covariance,
}

impl PoseGraphEdge {
    pub fn endpoints(&self) -> (u64, u64) {
        (self.key_from, self.key_to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseGraphNode {
    pub header: Header,
    pub robot_id: u16,
    pub key: u64,
    pub pose: Pose,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseGraph {
    pub header: Header,
    pub nodes: Vec<PoseGraphNode>,
    pub edges: Vec<PoseGraphEdge>,
}

impl PoseGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Sparse bag-of-words vector; `word_ids[i]` has weight `word_values[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BowVectorMsg {
    pub word_ids: Vec<u32>,
    pub word_values: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BowQuery {
    pub robot_id: u16,
    pub pose_id: u32,
    pub bow_vector: BowVectorMsg,
}

/// Keypoints and descriptors of one processed frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VlcFrameMsg {
    pub robot_id: u16,
    pub pose_id: u32,
    pub keypoints: PointCloud,
    pub descriptors_mat: Image,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlcFrameQueryRequest {
    pub robot_id: u16,
    pub pose_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VlcFrameQueryResponse {
    pub frame: VlcFrameMsg,
}

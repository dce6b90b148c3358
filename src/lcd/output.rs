//! Per-frame output record of the loop-closure detector.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, Vector3};

use crate::geometry::SE3;

use super::factor_graph::{NonlinearFactorGraph, Values};
use super::symbol::Timestamp;

/// Keyframe index as used by the detector.
pub type FrameId = u64;

/// Frame index -> timestamp of that keyframe.
pub type FrameIdTimestampMap = BTreeMap<FrameId, Timestamp>;

/// 3D landmarks of a frame, in the body frame.
pub type Landmarks = Vec<Vector3<f64>>;

/// Binary ORB descriptors: one row per keypoint, one column per byte.
pub type OrbDescriptor = DMatrix<u8>;

/// Bag-of-Words vector: word_id -> weight.
pub type BowVector = BTreeMap<u32, f64>;

/// Everything the detector reports after processing one keyframe.
#[derive(Debug, Clone)]
pub struct LcdOutput {
    /// Timestamp of the processed keyframe.
    pub timestamp: Timestamp,

    /// Timestamps of every keyframe known to the optimizer.
    pub timestamp_map: FrameIdTimestampMap,

    /// Whether this keyframe closed a loop.
    pub is_loop_closure: bool,

    /// Matched (older) keyframe of the loop, if any.
    pub id_match: FrameId,

    /// Query (current) keyframe of the loop, if any.
    pub id_recent: FrameId,

    /// Drift correction computed by the pose-graph optimizer (T_world_map).
    pub w_pose_map: SE3,

    /// Optimized factor graph.
    pub nfg: NonlinearFactorGraph,

    /// Optimized keyframe poses.
    pub states: Values,

    pub keypoints_3d: Landmarks,
    pub descriptors_mat: OrbDescriptor,
    pub bow_vec: BowVector,
}

impl LcdOutput {
    /// Empty output for a keyframe at `timestamp`.
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            timestamp_map: FrameIdTimestampMap::new(),
            is_loop_closure: false,
            id_match: 0,
            id_recent: 0,
            w_pose_map: SE3::identity(),
            nfg: NonlinearFactorGraph::new(),
            states: Values::new(),
            keypoints_3d: Landmarks::new(),
            descriptors_mat: OrbDescriptor::zeros(0, 0),
            bow_vec: BowVector::new(),
        }
    }
}

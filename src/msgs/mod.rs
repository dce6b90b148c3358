//! Message schema of the middleware bus.
//!
//! Field layout follows the standard robotics message definitions
//! (header/stamp/frame id, row-major covariances, xyzw quaternions) so the
//! types can be bridged onto a real transport one-to-one.

pub mod geometry_msgs;
pub mod nav_msgs;
pub mod pose_graph;
pub mod sensor_msgs;
pub mod std_msgs;

pub use geometry_msgs::{Pose, PoseStamped, Transform, TransformStamped};
pub use nav_msgs::{Odometry, Path};
pub use pose_graph::{
    BowQuery, BowVectorMsg, EdgeType, PoseGraph, PoseGraphEdge, PoseGraphNode, VlcFrameMsg,
    VlcFrameQueryRequest, VlcFrameQueryResponse,
};
pub use sensor_msgs::{Image, PointCloud};
pub use std_msgs::{Header, Time};

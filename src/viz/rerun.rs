//! Rerun sink for the published streams.
//!
//! Entity hierarchy:
//!     world/
//!         trajectory              - Optimized trajectory (gray line)
//!         pose_graph/nodes        - Pose-graph nodes (blue dots)
//!         pose_graph/odometry     - Odometry edges (gray lines)
//!         pose_graph/loop_closures - Loop-closure edges (orange lines)
//!         tf/<child_frame_id>     - Broadcast transforms

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rerun::{RecordingStream, external::glam};

use crate::msgs::{EdgeType, Path, PoseGraph, Time, Transform, TransformStamped};
use crate::transport::{Publisher, TransformBroadcaster};

pub struct RerunSink {
    rec: RecordingStream,
    start_sec: Mutex<Option<f64>>,
    // Node positions by key, so edges of incremental graphs can be drawn.
    node_positions: Mutex<BTreeMap<u64, [f32; 3]>>,
}

impl RerunSink {
    /// Spawn a viewer process and log into it.
    pub fn spawn(app_name: &str) -> Result<Self> {
        let rec = rerun::RecordingStreamBuilder::new(app_name)
            .spawn()
            .context("Failed to spawn rerun viewer")?;
        Ok(Self::from_stream(rec))
    }

    pub fn from_stream(rec: RecordingStream) -> Self {
        rec.log_static("world", &rerun::ViewCoordinates::RFU()).ok();
        Self {
            rec,
            start_sec: Mutex::new(None),
            node_positions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Set the timeline to `stamp`, relative to the first stamp seen.
    fn set_time(&self, stamp: Time) {
        let now = stamp.to_sec();
        let start = *self.start_sec.lock().get_or_insert(now);
        self.rec.set_duration_secs("time", (now - start).max(0.0));
    }

    fn log_edges(&self, entity: &str, strips: Vec<Vec<[f32; 3]>>, color: [u8; 3]) {
        if strips.is_empty() {
            return;
        }
        self.rec
            .log(
                entity,
                &rerun::LineStrips3D::new(strips)
                    .with_colors([color])
                    .with_radii([0.01f32]),
            )
            .ok();
    }
}

fn to_glam(transform: &Transform) -> (glam::Vec3, glam::Quat) {
    let t = &transform.translation;
    let q = &transform.rotation;
    (
        glam::Vec3::new(t.x as f32, t.y as f32, t.z as f32),
        glam::Quat::from_xyzw(q.x as f32, q.y as f32, q.z as f32, q.w as f32),
    )
}

impl Publisher<Path> for RerunSink {
    fn publish(&self, path: &Path) {
        if path.poses.len() < 2 {
            return;
        }
        self.set_time(path.header.stamp);

        let pts: Vec<[f32; 3]> = path
            .poses
            .iter()
            .map(|p| {
                let p = &p.pose.position;
                [p.x as f32, p.y as f32, p.z as f32]
            })
            .collect();

        self.rec
            .log(
                "world/trajectory",
                &rerun::LineStrips3D::new([pts])
                    .with_colors([[128u8, 128, 128]])
                    .with_radii([0.005f32]),
            )
            .ok();
    }

    fn num_subscribers(&self) -> usize {
        1
    }

    fn topic(&self) -> &str {
        "world/trajectory"
    }
}

impl Publisher<PoseGraph> for RerunSink {
    fn publish(&self, graph: &PoseGraph) {
        self.set_time(graph.header.stamp);

        let mut positions = self.node_positions.lock();
        for node in &graph.nodes {
            let p = &node.pose.position;
            positions.insert(node.key, [p.x as f32, p.y as f32, p.z as f32]);
        }

        let mut odometry = Vec::new();
        let mut loop_closures = Vec::new();
        for edge in &graph.edges {
            let (Some(from), Some(to)) = (positions.get(&edge.key_from), positions.get(&edge.key_to))
            else {
                continue;
            };
            match edge.edge_type {
                EdgeType::Odometry => odometry.push(vec![*from, *to]),
                EdgeType::LoopClosure => loop_closures.push(vec![*from, *to]),
                EdgeType::RejectedLoopClosure => {}
            }
        }

        let nodes: Vec<[f32; 3]> = positions.values().copied().collect();
        drop(positions);

        if !nodes.is_empty() {
            self.rec
                .log(
                    "world/pose_graph/nodes",
                    &rerun::Points3D::new(nodes)
                        .with_colors([[0u8, 100, 255]])
                        .with_radii([0.03f32]),
                )
                .ok();
        }
        self.log_edges("world/pose_graph/odometry", odometry, [128, 128, 128]);
        self.log_edges("world/pose_graph/loop_closures", loop_closures, [255, 140, 0]);
    }

    fn num_subscribers(&self) -> usize {
        1
    }

    fn topic(&self) -> &str {
        "world/pose_graph"
    }
}

impl TransformBroadcaster for RerunSink {
    fn send_transform(&self, tf: &TransformStamped) {
        self.set_time(tf.header.stamp);
        let (translation, rotation) = to_glam(&tf.transform);
        let entity = format!("world/tf/{}", tf.child_frame_id);
        self.rec
            .log(
                entity.as_str(),
                &rerun::Transform3D::from_translation_rotation(translation, rotation),
            )
            .ok();
    }
}

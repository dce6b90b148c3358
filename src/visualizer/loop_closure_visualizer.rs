//! LoopClosureVisualizer - publishes detector output on the bus.
//!
//! Per output, in order:
//! 1. Record keyframe timestamps
//! 2. Broadcast world -> map (and world -> body) transforms
//! 3. Publish the optimized trajectory and latest odometry
//! 4. Update the pose-graph bookkeeping, publish full and incremental graphs
//! 5. Append the frame to the history and publish pending BoW queries

use tracing::{debug, info};

use crate::lcd::{LcdOutput, Symbol};
use crate::msgs::geometry_msgs::{PoseWithCovariance, TwistWithCovariance};
use crate::msgs::{
    BowQuery, Header, Odometry, Path, Pose, PoseGraph, PoseStamped, Time, Transform,
    TransformStamped, VlcFrameQueryRequest, VlcFrameQueryResponse,
};

use super::config::VisualizerConfig;
use super::convert::bow_vector_msg;
use super::frame_history::{
    FrameHistory, FrameQueryError, FrameQueryHandler, LcdFrame, SharedFrameHistory,
};
use super::pose_graph::PoseGraphBook;
use super::publishers::LcdPublishers;

pub struct LoopClosureVisualizer {
    config: VisualizerConfig,
    publishers: LcdPublishers,

    /// Nodes, edges and key timestamps.
    graph: PoseGraphBook,

    /// Shared with the frame query service.
    frames: SharedFrameHistory,

    /// Pose id of the next frame whose BoW query is published.
    next_pose_id: u32,

    outputs_processed: usize,
}

impl LoopClosureVisualizer {
    pub fn new(config: VisualizerConfig, publishers: LcdPublishers) -> Self {
        Self::with_frame_history(config, publishers, FrameHistory::shared())
    }

    /// Use an existing frame history, e.g. one already handed to a query server.
    pub fn with_frame_history(
        config: VisualizerConfig,
        publishers: LcdPublishers,
        frames: SharedFrameHistory,
    ) -> Self {
        let graph = PoseGraphBook::new(config.robot_id, config.odom_frame_id.as_str());
        Self {
            config,
            publishers,
            graph,
            frames,
            next_pose_id: 0,
            outputs_processed: 0,
        }
    }

    /// Publish everything derived from one detector output.
    pub fn publish_lcd_output(&mut self, output: &LcdOutput) {
        self.outputs_processed += 1;
        if output.is_loop_closure {
            info!(
                "Loop closure: frame {} matched frame {}",
                output.id_recent, output.id_match
            );
        }

        self.graph.record_timestamps(&output.timestamp_map);

        self.publish_tf(output);
        self.publish_optimized_trajectory(output);
        self.publish_pose_graph(output);

        self.frames.write().push(LcdFrame::from_output(output));
        self.publish_bow_query();
    }

    fn publish_tf(&self, output: &LcdOutput) {
        let stamp = Time::from_nsec(output.timestamp);

        let mut transforms = vec![TransformStamped {
            header: Header::new(stamp, self.config.odom_frame_id.as_str()),
            child_frame_id: self.config.map_frame_id.clone(),
            transform: Transform::from(&output.w_pose_map),
        }];

        if self.config.broadcast_body_tf {
            if let Some((_, pose)) = output.states.latest() {
                transforms.push(TransformStamped {
                    header: Header::new(stamp, self.config.odom_frame_id.as_str()),
                    child_frame_id: self.config.base_link_frame_id.clone(),
                    transform: Transform::from(pose),
                });
            }
        }

        self.publishers.tf.send_transforms(&transforms);
    }

    fn publish_optimized_trajectory(&self, output: &LcdOutput) {
        let stamp = Time::from_nsec(output.timestamp);
        let frame_id = self.config.odom_frame_id.as_str();

        if self.publishers.trajectory.num_subscribers() > 0 {
            let poses = output
                .states
                .iter()
                .map(|(key, pose)| {
                    let index = Symbol::from_key(key).index;
                    PoseStamped {
                        header: Header::new(self.graph.stamp_of(index).unwrap_or(stamp), frame_id),
                        pose: Pose::from(pose),
                    }
                })
                .collect();

            self.publishers.trajectory.publish(&Path {
                header: Header::new(stamp, frame_id),
                poses,
            });
        }

        if let Some((_, latest)) = output.states.latest() {
            self.publishers.odometry.publish(&Odometry {
                header: Header::new(stamp, frame_id),
                child_frame_id: self.config.base_link_frame_id.clone(),
                pose: PoseWithCovariance {
                    pose: Pose::from(latest),
                    ..Default::default()
                },
                twist: TwistWithCovariance::default(),
            });
        }
    }

    fn publish_pose_graph(&mut self, output: &LcdOutput) {
        let stamp = Time::from_nsec(output.timestamp);

        let stats = self.graph.update_nodes_and_edges(
            &output.timestamp_map,
            &output.nfg,
            &output.states,
            stamp,
        );
        if stats.edges_rejected > 0 || stats.edges_reinstated > 0 {
            info!(
                "Pose graph: {} edges rejected, {} reinstated",
                stats.edges_rejected, stats.edges_reinstated
            );
        }

        if self.publishers.pose_graph.num_subscribers() > 0 {
            self.publishers
                .pose_graph
                .publish(&self.graph.pose_graph_msg(stamp));
        }

        let incremental = self.graph.take_incremental(stamp);
        debug!(
            "Incremental pose graph: {} nodes, {} edges",
            incremental.nodes.len(),
            incremental.edges.len()
        );
        self.publishers.pose_graph_incremental.publish(&incremental);
    }

    /// Publish the BoW vector of every recorded frame not queried yet.
    fn publish_bow_query(&mut self) {
        let frames = self.frames.read();
        while let Some(frame) = frames.get(self.next_pose_id as i64) {
            self.publishers.bow_query.publish(&BowQuery {
                robot_id: self.config.robot_id,
                pose_id: self.next_pose_id,
                bow_vector: bow_vector_msg(&frame.bow_vec),
            });
            self.next_pose_id += 1;
        }
    }

    /// Answer a frame lookup from the recorded history.
    pub fn handle_frame_query(
        &self,
        request: &VlcFrameQueryRequest,
    ) -> Result<VlcFrameQueryResponse, FrameQueryError> {
        self.frame_query_handler().handle(request)
    }

    /// Handler sharing this visualizer's history, for serving on another thread.
    pub fn frame_query_handler(&self) -> FrameQueryHandler {
        FrameQueryHandler::new(
            self.config.robot_id,
            self.config.base_link_frame_id.as_str(),
            self.frames.clone(),
        )
    }

    /// Full pose graph as it would be published now.
    pub fn pose_graph_msg(&self) -> PoseGraph {
        self.graph.pose_graph_msg(Time::default())
    }

    pub fn pose_graph(&self) -> &PoseGraphBook {
        &self.graph
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }

    pub fn num_odometry_edges(&self) -> usize {
        self.graph.num_odometry_edges()
    }

    pub fn num_loop_closure_edges(&self) -> usize {
        self.graph.num_loop_closure_edges()
    }

    pub fn num_rejected_edges(&self) -> usize {
        self.graph.num_rejected_edges()
    }

    pub fn frame_history(&self) -> &SharedFrameHistory {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.read().len()
    }

    pub fn next_pose_id(&self) -> u32 {
        self.next_pose_id
    }

    pub fn outputs_processed(&self) -> usize {
        self.outputs_processed
    }

    pub fn config(&self) -> &VisualizerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::lcd::{Factor, NoiseModel, OrbDescriptor};
    use crate::msgs::EdgeType;
    use crate::transport::{ChannelBus, Subscription};
    use nalgebra::Vector3;

    struct Harness {
        viz: LoopClosureVisualizer,
        trajectory: Subscription<Path>,
        pose_graph: Subscription<PoseGraph>,
        incremental: Subscription<PoseGraph>,
        odometry: Subscription<Odometry>,
        bow: Subscription<BowQuery>,
        tf: Subscription<TransformStamped>,
    }

    fn harness(config: VisualizerConfig) -> Harness {
        let bus = ChannelBus::new();
        let publishers = LcdPublishers::advertise(&bus, &config);
        let t = &config.topics;
        Harness {
            trajectory: bus.subscribe(&t.optimized_trajectory).unwrap(),
            pose_graph: bus.subscribe(&t.pose_graph).unwrap(),
            incremental: bus.subscribe(&t.pose_graph_incremental).unwrap(),
            odometry: bus.subscribe(&t.optimized_odometry).unwrap(),
            bow: bus.subscribe(&t.bow_query).unwrap(),
            tf: bus.subscribe(&t.tf).unwrap(),
            viz: LoopClosureVisualizer::new(config, publishers),
        }
    }

    fn key(index: u64) -> u64 {
        Symbol::for_robot(0, index).key()
    }

    /// Output of keyframe `n` on a straight line, with optional loop closures.
    fn output(n: u64, loops: &[(u64, u64)]) -> LcdOutput {
        let mut out = LcdOutput::new((n as i64 + 1) * 100_000_000);
        for i in 0..=n {
            out.timestamp_map.insert(i, (i as i64 + 1) * 100_000_000);
            out.states
                .insert(key(i), SE3::from_yaw(0.0, Vector3::new(i as f64, 0.0, 0.0)));
            if i > 0 {
                out.nfg.push(Factor::between(
                    key(i - 1),
                    key(i),
                    SE3::from_yaw(0.0, Vector3::new(1.0, 0.0, 0.0)),
                    NoiseModel::Isotropic(0.1),
                ));
            }
        }
        for (from, to) in loops {
            out.nfg.push(Factor::between(
                key(*from),
                key(*to),
                SE3::identity(),
                NoiseModel::Isotropic(0.3),
            ));
        }
        out.is_loop_closure = !loops.is_empty();
        out.keypoints_3d = vec![Vector3::new(n as f64, 1.0, 2.0); 3];
        out.descriptors_mat = OrbDescriptor::from_fn(3, 32, |r, c| (r * 32 + c) as u8 ^ n as u8);
        out.bow_vec = [(n as u32, 1.0), (1000, 0.5)].into_iter().collect();
        out
    }

    fn query(pose_id: i64) -> VlcFrameQueryRequest {
        VlcFrameQueryRequest {
            robot_id: 0,
            pose_id,
        }
    }

    #[test]
    fn test_publishes_every_channel() {
        let mut h = harness(VisualizerConfig::default());
        h.viz.publish_lcd_output(&output(2, &[]));

        let path = h.trajectory.try_recv().unwrap();
        assert_eq!(path.poses.len(), 3);
        assert_eq!(path.header.frame_id, "world");
        assert_eq!(path.poses[1].header.stamp, Time::from_nsec(200_000_000));

        let graph = h.pose_graph.try_recv().unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);

        assert_eq!(h.incremental.try_recv().unwrap().nodes.len(), 3);

        let odom = h.odometry.try_recv().unwrap();
        assert_eq!(odom.child_frame_id, "base_link");
        assert_eq!(odom.pose.pose.position.x, 2.0);

        let bow = h.bow.try_recv().unwrap();
        assert_eq!(bow.pose_id, 0);
        assert_eq!(bow.bow_vector.word_ids, vec![2, 1000]);
    }

    #[test]
    fn test_tf_world_to_map_and_body() {
        let mut h = harness(VisualizerConfig::default());
        let mut out = output(1, &[]);
        out.w_pose_map = SE3::from_yaw(0.0, Vector3::new(0.0, 0.5, 0.0));
        h.viz.publish_lcd_output(&out);

        let map_tf = h.tf.try_recv().unwrap();
        assert_eq!(map_tf.header.frame_id, "world");
        assert_eq!(map_tf.child_frame_id, "map");
        assert_eq!(map_tf.transform.translation.y, 0.5);

        let body_tf = h.tf.try_recv().unwrap();
        assert_eq!(body_tf.child_frame_id, "base_link");
        assert_eq!(body_tf.transform.translation.x, 1.0);
        assert!(h.tf.try_recv().is_err());
    }

    #[test]
    fn test_body_tf_can_be_disabled() {
        let config = VisualizerConfig {
            broadcast_body_tf: false,
            ..Default::default()
        };
        let mut h = harness(config);
        h.viz.publish_lcd_output(&output(1, &[]));

        assert_eq!(h.tf.try_recv().unwrap().child_frame_id, "map");
        assert!(h.tf.try_recv().is_err());
    }

    #[test]
    fn test_empty_output_still_publishes() {
        let mut h = harness(VisualizerConfig::default());
        h.viz.publish_lcd_output(&LcdOutput::new(42));

        assert!(h.trajectory.try_recv().unwrap().poses.is_empty());
        assert!(h.pose_graph.try_recv().unwrap().is_empty());
        assert!(h.incremental.try_recv().unwrap().is_empty());
        assert!(h.odometry.try_recv().is_err());
        assert_eq!(h.bow.try_recv().unwrap().pose_id, 0);
        assert_eq!(h.viz.frame_count(), 1);
    }

    #[test]
    fn test_history_grows_in_append_order() {
        let mut h = harness(VisualizerConfig::default());
        for n in 0..5 {
            h.viz.publish_lcd_output(&output(n, &[]));
        }

        assert_eq!(h.viz.frame_count(), 5);
        let frames = h.viz.frame_history().read();
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.keypoints_3d[0].x, i as f64);
        }
    }

    #[test]
    fn test_bow_pose_ids_increase_across_gaps() {
        let mut h = harness(VisualizerConfig::default());
        // Upstream skipped keyframes 1, 2 and 4
        for n in [0, 3, 5] {
            h.viz.publish_lcd_output(&output(n, &[]));
        }

        let ids: Vec<u32> = h.bow.try_iter().map(|q| q.pose_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(h.viz.next_pose_id(), 3);
    }

    #[test]
    fn test_frame_query_roundtrip() {
        let mut h = harness(VisualizerConfig::default());
        let outputs: Vec<LcdOutput> = (0..4).map(|n| output(n, &[])).collect();
        for out in &outputs {
            h.viz.publish_lcd_output(out);
        }

        for (pose_id, out) in outputs.iter().enumerate() {
            let resp = h.viz.handle_frame_query(&query(pose_id as i64)).unwrap();
            let frame = resp.frame;
            assert_eq!(frame.pose_id, pose_id as u32);
            assert_eq!(frame.keypoints.points.len(), out.keypoints_3d.len());
            assert_eq!(frame.keypoints.points[0].x, out.keypoints_3d[0].x as f32);
            assert_eq!(
                crate::visualizer::convert::image_to_descriptors(&frame.descriptors_mat),
                Some(out.descriptors_mat.clone())
            );
        }
    }

    #[test]
    fn test_frame_query_unknown_ids_fail() {
        let mut h = harness(VisualizerConfig::default());
        assert!(h.viz.handle_frame_query(&query(0)).is_err());

        h.viz.publish_lcd_output(&output(0, &[]));
        assert!(h.viz.handle_frame_query(&query(0)).is_ok());
        assert!(h.viz.handle_frame_query(&query(-1)).is_err());
        assert!(h.viz.handle_frame_query(&query(1)).is_err());
    }

    #[test]
    fn test_rejected_loop_closure_leaves_published_graph() {
        let mut h = harness(VisualizerConfig::default());
        h.viz.publish_lcd_output(&output(5, &[(5, 1)]));
        let first = h.pose_graph.try_recv().unwrap();
        assert!(first
            .edges
            .iter()
            .any(|e| e.endpoints() == (5, 1) && e.edge_type == EdgeType::LoopClosure));

        h.viz.publish_lcd_output(&output(6, &[]));
        let second = h.pose_graph.try_recv().unwrap();
        assert!(!second.edges.iter().any(|e| e.endpoints() == (5, 1)));
        assert_eq!(h.viz.num_rejected_edges(), 1);
        assert_eq!(second.nodes.len(), 7);
    }

    #[test]
    fn test_rejected_loop_closure_not_resent_incrementally() {
        let mut h = harness(VisualizerConfig::default());
        let with_extras = |n, loops: &[(u64, u64)]| {
            let mut out = output(n, loops);
            out.nfg
                .push(Factor::prior(key(0), SE3::identity(), NoiseModel::Isotropic(1e-3)));
            out.nfg.push(Factor::Other {
                keys: vec![key(1), key(2), key(3)],
            });
            out
        };

        h.viz.publish_lcd_output(&with_extras(5, &[(5, 1), (4, 0)]));
        let first = h.incremental.try_recv().unwrap();
        assert_eq!(first.nodes.len(), 6);
        assert_eq!(first.edges.len(), 7);
        assert!(first
            .edges
            .iter()
            .any(|e| e.endpoints() == (5, 1) && e.edge_type == EdgeType::LoopClosure));

        // The optimizer dropped 5 -> 1 in the next output
        h.viz.publish_lcd_output(&with_extras(6, &[(4, 0)]));
        let second = h.incremental.try_recv().unwrap();
        let keys: Vec<u64> = second.nodes.iter().map(|n| n.key).collect();
        let edges: Vec<_> = second.edges.iter().map(|e| e.endpoints()).collect();
        assert_eq!(keys, vec![6]);
        assert_eq!(edges, vec![(5, 6)]);
        assert_eq!(h.viz.num_rejected_edges(), 1);
        assert_eq!(h.viz.num_loop_closure_edges(), 1);
    }

    #[test]
    fn test_reprocessing_same_output_does_not_double_graph() {
        let mut h = harness(VisualizerConfig::default());
        let out = output(3, &[(3, 0)]);
        h.viz.publish_lcd_output(&out);
        h.viz.publish_lcd_output(&out);

        let graph = h.viz.pose_graph_msg();
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.edges.len(), 4);

        // Second incremental graph has nothing new
        let _ = h.incremental.try_recv().unwrap();
        assert!(h.incremental.try_recv().unwrap().is_empty());
    }

    #[test]
    fn test_no_trajectory_without_subscribers() {
        let config = VisualizerConfig::default();
        let bus = ChannelBus::new();
        let publishers = LcdPublishers::advertise(&bus, &config);
        let mut viz = LoopClosureVisualizer::new(config, publishers);

        viz.publish_lcd_output(&output(2, &[]));

        // Bookkeeping happens even when nobody listens
        assert_eq!(viz.pose_graph().num_nodes(), 3);
        assert_eq!(viz.outputs_processed(), 1);
    }
}

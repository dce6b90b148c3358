//! Outgoing channels of the visualizer.

use std::sync::Arc;

use crate::msgs::{BowQuery, Odometry, Path, PoseGraph, TransformStamped};
use crate::transport::{ChannelBus, Publisher, TransformBroadcaster};

use super::config::VisualizerConfig;

/// One handle per outgoing topic plus the transform broadcaster.
#[derive(Clone)]
pub struct LcdPublishers {
    pub trajectory: Arc<dyn Publisher<Path>>,
    pub pose_graph: Arc<dyn Publisher<PoseGraph>>,
    pub pose_graph_incremental: Arc<dyn Publisher<PoseGraph>>,
    pub odometry: Arc<dyn Publisher<Odometry>>,
    pub bow_query: Arc<dyn Publisher<BowQuery>>,
    pub tf: Arc<dyn TransformBroadcaster>,
}

impl LcdPublishers {
    /// Advertise every topic named in `config` on `bus`.
    pub fn advertise(bus: &ChannelBus, config: &VisualizerConfig) -> Self {
        let topics = &config.topics;
        let queues = &config.queues;

        Self {
            trajectory: bus.advertise::<Path>(
                &topics.optimized_trajectory,
                queues.optimized_trajectory,
            ),
            pose_graph: bus.advertise::<PoseGraph>(&topics.pose_graph, queues.pose_graph),
            pose_graph_incremental: bus.advertise::<PoseGraph>(
                &topics.pose_graph_incremental,
                queues.pose_graph_incremental,
            ),
            odometry: bus.advertise::<Odometry>(
                &topics.optimized_odometry,
                queues.optimized_odometry,
            ),
            bow_query: bus.advertise::<BowQuery>(&topics.bow_query, queues.bow_query),
            tf: bus.advertise::<TransformStamped>(&topics.tf, queues.tf),
        }
    }
}

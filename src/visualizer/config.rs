//! Publisher configuration: robot identity, frame ids, topics and queue depths.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Topic and service names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub optimized_trajectory: String,
    pub pose_graph: String,
    pub pose_graph_incremental: String,
    pub optimized_odometry: String,
    pub bow_query: String,
    pub tf: String,
    pub vlc_frame_query: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            optimized_trajectory: "optimized_trajectory".to_string(),
            pose_graph: "pose_graph".to_string(),
            pose_graph_incremental: "pose_graph_incremental".to_string(),
            optimized_odometry: "optimized_odometry".to_string(),
            bow_query: "bow_query".to_string(),
            tf: "tf".to_string(),
            vlc_frame_query: "vlc_frame_query".to_string(),
        }
    }
}

impl TopicConfig {
    fn named(&self) -> [(&'static str, &str); 7] {
        [
            ("optimized_trajectory", self.optimized_trajectory.as_str()),
            ("pose_graph", self.pose_graph.as_str()),
            ("pose_graph_incremental", self.pose_graph_incremental.as_str()),
            ("optimized_odometry", self.optimized_odometry.as_str()),
            ("bow_query", self.bow_query.as_str()),
            ("tf", self.tf.as_str()),
            ("vlc_frame_query", self.vlc_frame_query.as_str()),
        ]
    }
}

/// Per-subscriber queue depth of each topic.
///
/// Latest-state topics keep one message; streams that must not lose
/// elements (incremental graph, BoW queries) buffer more.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub optimized_trajectory: usize,
    pub pose_graph: usize,
    pub pose_graph_incremental: usize,
    pub optimized_odometry: usize,
    pub bow_query: usize,
    pub tf: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            optimized_trajectory: 1,
            pose_graph: 1,
            pose_graph_incremental: 1000,
            optimized_odometry: 1,
            bow_query: 1000,
            tf: 100,
        }
    }
}

/// Configuration of the [`LoopClosureVisualizer`](super::LoopClosureVisualizer).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    /// Unique id of this robot, stamped on every node, edge and query.
    pub robot_id: u16,

    /// Fixed world frame all poses are expressed in.
    pub odom_frame_id: String,

    /// Body (IMU) frame of the robot.
    pub base_link_frame_id: String,

    /// Drift-corrected map frame.
    pub map_frame_id: String,

    /// Also broadcast world -> body from the latest optimized pose.
    pub broadcast_body_tf: bool,

    pub topics: TopicConfig,
    pub queues: QueueConfig,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            robot_id: 0,
            odom_frame_id: "world".to_string(),
            base_link_frame_id: "base_link".to_string(),
            map_frame_id: "map".to_string(),
            broadcast_body_tf: true,
            topics: TopicConfig::default(),
            queues: QueueConfig::default(),
        }
    }
}

impl VisualizerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("Invalid visualizer config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml_str(&yaml).with_context(|| format!("In config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, frame) in [
            ("odom_frame_id", &self.odom_frame_id),
            ("base_link_frame_id", &self.base_link_frame_id),
            ("map_frame_id", &self.map_frame_id),
        ] {
            if frame.trim().is_empty() {
                bail!("{} must not be empty", name);
            }
        }
        if self.odom_frame_id == self.map_frame_id || self.odom_frame_id == self.base_link_frame_id
        {
            bail!(
                "odom_frame_id '{}' must differ from map and base_link frames",
                self.odom_frame_id
            );
        }
        for (name, topic) in self.topics.named() {
            if topic.trim().is_empty() {
                bail!("topic '{}' must not be empty", name);
            }
        }
        let q = &self.queues;
        if [
            q.optimized_trajectory,
            q.pose_graph,
            q.pose_graph_incremental,
            q.optimized_odometry,
            q.bow_query,
            q.tf,
        ]
        .contains(&0)
        {
            bail!("queue sizes must be at least 1");
        }
        Ok(())
    }
}

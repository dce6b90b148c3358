//! Republishing of loop-closure detector output.
//!
//! [`LoopClosureVisualizer`] turns each [`LcdOutput`](crate::lcd::LcdOutput)
//! into transforms, an optimized trajectory, full and incremental pose
//! graphs and a bag-of-words query, and keeps the frame history that
//! [`FrameQueryHandler`] answers lookups from.

pub mod config;
pub mod convert;
pub mod frame_history;
mod loop_closure_visualizer;
pub mod pose_graph;
pub mod publishers;

pub use config::{QueueConfig, TopicConfig, VisualizerConfig};
pub use frame_history::{
    FrameHistory, FrameQueryError, FrameQueryHandler, LcdFrame, SharedFrameHistory,
};
pub use loop_closure_visualizer::LoopClosureVisualizer;
pub use pose_graph::{PoseGraphBook, UpdateStats};
pub use publishers::LcdPublishers;

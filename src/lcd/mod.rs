//! Output types of the external loop-closure detector.
//!
//! The detector (place recognition, geometric verification and pose-graph
//! optimization) lives outside this crate. These types mirror what it hands
//! over per keyframe so the publisher can flatten them into messages.

pub mod factor_graph;
pub mod output;
pub mod symbol;

pub use factor_graph::{Factor, NoiseModel, NonlinearFactorGraph, Values};
pub use output::{BowVector, FrameId, FrameIdTimestampMap, Landmarks, LcdOutput, OrbDescriptor};
pub use symbol::{Key, Symbol, Timestamp, robot_prefix};

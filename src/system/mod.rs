//! Host runtime for the publisher.
//!
//! [`LcdBridge`] owns a [`LoopClosureVisualizer`](crate::visualizer::LoopClosureVisualizer)
//! on a publish thread fed by a bounded output queue, and answers frame
//! queries on a second thread. Both share [`SharedState`].

mod bridge;
pub mod shared_state;

pub use bridge::{FrameQueryServer, LcdBridge};
pub use shared_state::SharedState;

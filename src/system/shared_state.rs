//! State shared between the publish thread and the query service thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::visualizer::{FrameHistory, SharedFrameHistory};

pub struct SharedState {
    /// Frames recorded by the publish thread, read by the query service.
    pub frames: SharedFrameHistory,

    /// Number of detector outputs fully published.
    pub outputs_published: AtomicUsize,

    /// Request both worker threads to exit.
    pub shutdown_requested: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn mark_published(&self) {
        self.outputs_published.fetch_add(1, Ordering::SeqCst);
    }

    pub fn outputs_published(&self) -> usize {
        self.outputs_published.load(Ordering::SeqCst)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            frames: FrameHistory::shared(),
            outputs_published: AtomicUsize::new(0),
            shutdown_requested: AtomicBool::new(false),
        }
    }
}

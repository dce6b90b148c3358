//! LcdBridge - threads around the visualizer.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{debug, info};

use crate::lcd::LcdOutput;
use crate::msgs::{VlcFrameQueryRequest, VlcFrameQueryResponse};
use crate::transport::{ChannelBus, ServeOutcome, ServiceServer};
use crate::visualizer::{FrameQueryHandler, LcdPublishers, LoopClosureVisualizer, VisualizerConfig};

use super::shared_state::SharedState;

/// Detector outputs that may be queued before `submit` blocks.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Poll interval of both worker threads for the shutdown flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

pub type FrameQueryServer = ServiceServer<VlcFrameQueryRequest, VlcFrameQueryResponse>;

pub struct LcdBridge {
    shared: Arc<SharedState>,
    output_sender: Sender<LcdOutput>,
    publish_handle: Option<JoinHandle<()>>,
    service_handle: Option<JoinHandle<()>>,
}

impl LcdBridge {
    /// Advertise every topic and the frame query service on `bus`, then start.
    pub fn on_bus(config: VisualizerConfig, bus: &ChannelBus) -> Result<Self> {
        config.validate()?;
        let publishers = LcdPublishers::advertise(bus, &config);
        let server = bus.advertise_service(&config.topics.vlc_frame_query);
        Self::spawn(config, publishers, server)
    }

    /// Start the publish and query threads with explicit endpoints.
    pub fn spawn(
        config: VisualizerConfig,
        publishers: LcdPublishers,
        server: FrameQueryServer,
    ) -> Result<Self> {
        config.validate()?;
        let shared = SharedState::new();

        let visualizer =
            LoopClosureVisualizer::with_frame_history(config, publishers, shared.frames.clone());
        let handler = visualizer.frame_query_handler();

        let (output_sender, output_receiver) = bounded::<LcdOutput>(OUTPUT_CHANNEL_CAPACITY);

        let publish_handle =
            Self::spawn_publisher(shared.clone(), visualizer, output_receiver)?;
        let service_handle = Self::spawn_query_service(shared.clone(), handler, server)?;

        info!("LcdBridge started");
        Ok(Self {
            shared,
            output_sender,
            publish_handle: Some(publish_handle),
            service_handle: Some(service_handle),
        })
    }

    fn spawn_publisher(
        shared: Arc<SharedState>,
        mut visualizer: LoopClosureVisualizer,
        outputs: Receiver<LcdOutput>,
    ) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("lcd-publish".into())
            .spawn(move || {
                loop {
                    if shared.is_shutdown_requested() {
                        // Publish whatever was queued before shutdown
                        for output in outputs.try_iter() {
                            visualizer.publish_lcd_output(&output);
                            shared.mark_published();
                        }
                        break;
                    }

                    match outputs.recv_timeout(RECV_TIMEOUT) {
                        Ok(output) => {
                            visualizer.publish_lcd_output(&output);
                            shared.mark_published();
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            debug!("Output channel disconnected");
                            break;
                        }
                    }
                }

                info!(
                    "Publish thread exiting. Stats: outputs={}, frames={}, nodes={}, loop_closures={}, rejected={}",
                    visualizer.outputs_processed(),
                    visualizer.frame_count(),
                    visualizer.num_nodes(),
                    visualizer.num_loop_closure_edges(),
                    visualizer.num_rejected_edges()
                );
            })
            .context("Failed to spawn publish thread")
    }

    fn spawn_query_service(
        shared: Arc<SharedState>,
        handler: FrameQueryHandler,
        server: FrameQueryServer,
    ) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("lcd-frame-query".into())
            .spawn(move || {
                let mut served = 0usize;
                let mut rejected = 0usize;

                while !shared.is_shutdown_requested() {
                    match server.serve_one(RECV_TIMEOUT, |req| handler.handle(req)) {
                        ServeOutcome::Responded => served += 1,
                        ServeOutcome::Rejected => rejected += 1,
                        ServeOutcome::Idle => {}
                        ServeOutcome::Disconnected => break,
                    }
                }

                info!(
                    "Frame query service '{}' exiting. Stats: served={}, rejected={}",
                    server.name(),
                    served,
                    rejected
                );
            })
            .context("Failed to spawn frame query thread")
    }

    /// Queue a detector output for publishing. Blocks while the queue is full.
    pub fn submit(&self, output: LcdOutput) -> Result<()> {
        if self.shared.is_shutdown_requested() {
            bail!("LcdBridge is shut down");
        }
        self.output_sender
            .send(output)
            .context("Publish thread is gone")
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Block until `count` outputs were published or `timeout` passes.
    /// Returns whether the count was reached.
    pub fn wait_for_published(&self, count: usize, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.shared.outputs_published() < count {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Publish everything still queued, then stop both threads.
    ///
    /// Outputs only enter the queue through [`submit`](Self::submit), which
    /// borrows the bridge shared while this borrows it exclusively, so no
    /// output can be queued after the final drain.
    pub fn shutdown(&mut self) {
        self.shared.request_shutdown();

        if let Some(handle) = self.publish_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.service_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LcdBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::lcd::{Factor, NoiseModel, OrbDescriptor, Symbol};
    use crate::msgs::{BowQuery, PoseGraph};
    use crate::transport::ServiceError;
    use nalgebra::Vector3;

    const WAIT: Duration = Duration::from_secs(2);

    fn output(n: u64) -> LcdOutput {
        let key = |i: u64| Symbol::for_robot(0, i).key();
        let mut out = LcdOutput::new(n as i64 * 1_000_000);
        for i in 0..=n {
            out.timestamp_map.insert(i, i as i64 * 1_000_000);
            out.states
                .insert(key(i), SE3::from_yaw(0.0, Vector3::new(i as f64, 0.0, 0.0)));
            if i > 0 {
                out.nfg.push(Factor::between(
                    key(i - 1),
                    key(i),
                    SE3::from_yaw(0.0, Vector3::new(1.0, 0.0, 0.0)),
                    NoiseModel::default(),
                ));
            }
        }
        out.keypoints_3d = vec![Vector3::new(n as f64, 0.0, 0.0)];
        out.descriptors_mat = OrbDescriptor::from_element(1, 32, n as u8);
        out.bow_vec = [(n as u32, 1.0)].into_iter().collect();
        out
    }

    fn request(pose_id: i64) -> VlcFrameQueryRequest {
        VlcFrameQueryRequest {
            robot_id: 0,
            pose_id,
        }
    }

    #[test]
    fn test_bridge_publishes_submitted_outputs() {
        let bus = ChannelBus::new();
        let config = VisualizerConfig::default();
        let bow = bus.subscribe::<BowQuery>(&config.topics.bow_query).unwrap();
        let incremental = bus
            .subscribe::<PoseGraph>(&config.topics.pose_graph_incremental)
            .unwrap();

        let mut bridge = LcdBridge::on_bus(config, &bus).unwrap();
        for n in 0..4 {
            bridge.submit(output(n)).unwrap();
        }
        bridge.shutdown();

        let ids: Vec<u32> = bow.try_iter().map(|q| q.pose_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        let nodes: usize = incremental.try_iter().map(|g| g.nodes.len()).sum();
        assert_eq!(nodes, 4);
        assert_eq!(bridge.shared_state().outputs_published(), 4);
        assert_eq!(bridge.shared_state().frames.read().len(), 4);
    }

    #[test]
    fn test_shutdown_publishes_whole_backlog() {
        let bus = ChannelBus::new();
        let config = VisualizerConfig::default();
        let bow = bus.subscribe::<BowQuery>(&config.topics.bow_query).unwrap();

        let mut bridge = LcdBridge::on_bus(config, &bus).unwrap();
        for n in 0..50 {
            bridge.submit(output(n)).unwrap();
        }
        bridge.shutdown();

        assert_eq!(bridge.shared_state().outputs_published(), 50);
        assert_eq!(bow.try_iter().count(), 50);
    }

    #[test]
    fn test_bridge_serves_frame_queries() {
        let bus = ChannelBus::new();
        let config = VisualizerConfig::default();
        let service = config.topics.vlc_frame_query.clone();

        let bridge = LcdBridge::on_bus(config, &bus).unwrap();
        let client = bus
            .service_client::<VlcFrameQueryRequest, VlcFrameQueryResponse>(&service)
            .unwrap();

        for n in 0..3 {
            bridge.submit(output(n)).unwrap();
        }
        assert!(bridge.wait_for_published(3, WAIT));

        let resp = client.call_timeout(request(2), WAIT).unwrap();
        assert_eq!(resp.frame.pose_id, 2);
        assert_eq!(resp.frame.keypoints.points[0].x, 2.0);

        let err = client.call_timeout(request(7), WAIT).unwrap_err();
        assert!(matches!(err, ServiceError::Failed(_)));
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let bus = ChannelBus::new();
        let mut bridge = LcdBridge::on_bus(VisualizerConfig::default(), &bus).unwrap();
        bridge.shutdown();
        assert!(bridge.submit(output(0)).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bus = ChannelBus::new();
        let mut config = VisualizerConfig::default();
        config.odom_frame_id.clear();
        assert!(LcdBridge::on_bus(config, &bus).is_err());
    }
}

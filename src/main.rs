use std::time::Duration;

use anyhow::{Result, bail};
use nalgebra::Vector3;
use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lcd_bridge::geometry::SE3;
use lcd_bridge::io::write_trajectory_csv;
use lcd_bridge::lcd::{Factor, LcdOutput, NoiseModel, OrbDescriptor, Symbol};
use lcd_bridge::msgs::{Path, VlcFrameQueryRequest, VlcFrameQueryResponse};
use lcd_bridge::system::LcdBridge;
use lcd_bridge::transport::ChannelBus;
use lcd_bridge::visualizer::{LcdPublishers, VisualizerConfig};

/// Keyframes per side of the simulated square.
const KEYFRAMES_PER_SIDE: u64 = 10;
const SIDE_LENGTH_M: f64 = 10.0;
/// One and a half laps, so the second half revisits the first.
const NUM_KEYFRAMES: u64 = 6 * KEYFRAMES_PER_SIDE;
const LAP: u64 = 4 * KEYFRAMES_PER_SIDE;
const KEYFRAME_PERIOD_NS: i64 = 200_000_000;
/// Loop closure the optimizer later discards as an outlier.
const LATE_REJECTED_LOOP: (u64, u64) = (45, 5);

const WAIT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => {
            info!("Loading config from: {}", path);
            VisualizerConfig::from_yaml_file(&path)?
        }
        None => VisualizerConfig::default(),
    };
    let csv_path = args.next().unwrap_or_else(|| "trajectory.csv".to_string());

    let bus = ChannelBus::new();
    #[allow(unused_mut)]
    let mut publishers = LcdPublishers::advertise(&bus, &config);
    let trajectory_rx = match bus.subscribe::<Path>(&config.topics.optimized_trajectory) {
        Some(rx) => rx,
        None => bail!("Topic '{}' has an unexpected type", config.topics.optimized_trajectory),
    };
    #[cfg(feature = "rerun")]
    let sink = {
        let sink = std::sync::Arc::new(lcd_bridge::viz::RerunSink::spawn("lcd-bridge")?);
        publishers.pose_graph = sink.clone();
        publishers.tf = sink.clone();
        sink
    };
    let server = bus.advertise_service(&config.topics.vlc_frame_query);
    let mut bridge = LcdBridge::spawn(config.clone(), publishers, server)?;

    let client = match bus
        .service_client::<VlcFrameQueryRequest, VlcFrameQueryResponse>(&config.topics.vlc_frame_query)
    {
        Some(client) => client,
        None => bail!("Service '{}' not advertised", config.topics.vlc_frame_query),
    };

    let ground_truth: Vec<SE3> = (0..NUM_KEYFRAMES).map(square_pose).collect();
    let odometry = noisy_odometry(&ground_truth);
    let mut loop_closures: Vec<(u64, u64)> = Vec::new();
    let mut last_path = None;

    for k in 0..NUM_KEYFRAMES {
        if k >= LAP && k % 5 == 0 {
            loop_closures.push((k, k - LAP));
        }
        if k == LATE_REJECTED_LOOP.0 + 5 {
            loop_closures.retain(|lc| *lc != LATE_REJECTED_LOOP);
        }

        let output = simulate_output(
            config.robot_id,
            k,
            &ground_truth,
            &odometry,
            &loop_closures,
        );
        bridge.submit(output)?;
        if !bridge.wait_for_published(k as usize + 1, WAIT) {
            warn!("Keyframe {} not published within {:?}", k, WAIT);
        }

        if let Ok(path) = trajectory_rx.try_recv() {
            #[cfg(feature = "rerun")]
            lcd_bridge::transport::Publisher::<Path>::publish(sink.as_ref(), &path);
            last_path = Some(path);
        }
    }

    for pose_id in [0, NUM_KEYFRAMES as i64 / 2, NUM_KEYFRAMES as i64 - 1, NUM_KEYFRAMES as i64] {
        let request = VlcFrameQueryRequest {
            robot_id: config.robot_id,
            pose_id,
        };
        match client.call_timeout(request, WAIT) {
            Ok(resp) => info!(
                "Frame {}: {} keypoints, {}x{} descriptors",
                pose_id,
                resp.frame.keypoints.points.len(),
                resp.frame.descriptors_mat.height,
                resp.frame.descriptors_mat.width
            ),
            Err(e) => warn!("Frame {} query failed: {}", pose_id, e),
        }
    }

    bridge.shutdown();

    match last_path {
        Some(path) => {
            write_trajectory_csv(&csv_path, &path)?;
            info!("Wrote {} poses to {}", path.poses.len(), csv_path);
        }
        None => warn!("No trajectory received, nothing written"),
    }

    Ok(())
}

/// Ground-truth pose of keyframe `k` walking the square counter-clockwise.
fn square_pose(k: u64) -> SE3 {
    let step = SIDE_LENGTH_M / KEYFRAMES_PER_SIDE as f64;
    let side = (k / KEYFRAMES_PER_SIDE) % 4;
    let along = (k % KEYFRAMES_PER_SIDE) as f64 * step;
    let (x, y) = match side {
        0 => (along, 0.0),
        1 => (SIDE_LENGTH_M, along),
        2 => (SIDE_LENGTH_M - along, SIDE_LENGTH_M),
        _ => (0.0, SIDE_LENGTH_M - along),
    };
    SE3::from_yaw(side as f64 * std::f64::consts::FRAC_PI_2, Vector3::new(x, y, 0.0))
}

/// Relative motions between consecutive keyframes with small drift.
fn noisy_odometry(ground_truth: &[SE3]) -> Vec<SE3> {
    let mut rng = rand::thread_rng();
    ground_truth
        .windows(2)
        .map(|w| {
            let rel = w[0].between(&w[1]);
            let noise = SE3::from_yaw(
                rng.gen_range(-0.01..0.01),
                Vector3::new(rng.gen_range(-0.02..0.02), rng.gen_range(-0.02..0.02), 0.0),
            );
            rel.compose(&noise)
        })
        .collect()
}

/// Detector output after keyframe `k`: chained odometry until the first loop
/// closure, the ground truth once the graph is closed.
fn simulate_output(
    robot_id: u16,
    k: u64,
    ground_truth: &[SE3],
    odometry: &[SE3],
    loop_closures: &[(u64, u64)],
) -> LcdOutput {
    let key = |i: u64| Symbol::for_robot(robot_id, i).key();
    let mut rng = rand::thread_rng();

    let timestamp = (k as i64 + 1) * KEYFRAME_PERIOD_NS;
    let mut output = LcdOutput::new(timestamp);
    output.id_recent = k;

    let closed = !loop_closures.is_empty();
    let mut estimate = ground_truth[0];
    output
        .nfg
        .push(Factor::prior(key(0), estimate, NoiseModel::Isotropic(1e-3)));
    for i in 0..=k {
        output.timestamp_map.insert(i, (i as i64 + 1) * KEYFRAME_PERIOD_NS);
        if i > 0 {
            let rel = odometry[i as usize - 1];
            estimate = estimate.compose(&rel);
            output.nfg.push(Factor::between(
                key(i - 1),
                key(i),
                rel,
                NoiseModel::Diagonal(nalgebra::Vector6::new(0.01, 0.01, 0.01, 0.05, 0.05, 0.05)),
            ));
        }
        let pose = if closed { ground_truth[i as usize] } else { estimate };
        output.states.insert(key(i), pose);
    }

    for &(from, to) in loop_closures {
        let measured = ground_truth[from as usize].between(&ground_truth[to as usize]);
        output
            .nfg
            .push(Factor::between(key(from), key(to), measured, NoiseModel::Isotropic(0.1)));
        if from == k {
            output.is_loop_closure = true;
            output.id_match = to;
        }
    }

    let body = ground_truth[k as usize];
    output.keypoints_3d = (0..20)
        .map(|_| {
            body.transform_point(&Vector3::new(
                rng.gen_range(1.0..5.0),
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.0..1.0),
            ))
        })
        .collect();
    output.descriptors_mat = OrbDescriptor::from_fn(20, 32, |_, _| rng.gen());
    // Revisits of the same place share words
    let place = k % LAP;
    output.bow_vec = [(place as u32, 0.6), (place as u32 + 100, 0.3), (999, 0.1)]
        .into_iter()
        .collect();

    output
}

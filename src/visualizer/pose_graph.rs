//! Node/edge bookkeeping behind the outgoing pose-graph messages.
//!
//! Every update replays the full optimized factor graph and values:
//! - `Between` factors become edges. Consecutive keys are odometry, any
//!   other pair is a loop closure.
//! - Values become nodes, updated in place when the key is already known.
//! - An active edge missing from the latest graph was dropped by the
//!   optimizer (outlier rejection) and moves to the rejected bucket. It is
//!   reinstated if a later graph contains it again.
//!
//! Edges are keyed by `(key_from, key_to)` so replaying the same graph twice
//! leaves every collection unchanged.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::lcd::{Factor, FrameIdTimestampMap, NonlinearFactorGraph, Symbol, Values};
use crate::msgs::{EdgeType, Header, Pose, PoseGraph, PoseGraphEdge, PoseGraphNode, Time};

use super::convert::covariance_row_major;

type EdgeKey = (u64, u64);

/// Counters describing one [`PoseGraphBook::update_nodes_and_edges`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStats {
    pub nodes_added: usize,
    pub loop_closures_added: usize,
    pub edges_rejected: usize,
    pub edges_reinstated: usize,
    /// Factors without an edge representation (priors, non-pose factors).
    pub factors_skipped: usize,
}

pub struct PoseGraphBook {
    robot_id: u16,
    frame_id: String,
    nodes: BTreeMap<u64, PoseGraphNode>,
    odometry_edges: BTreeMap<EdgeKey, PoseGraphEdge>,
    loop_closure_edges: BTreeMap<EdgeKey, PoseGraphEdge>,
    rejected_edges: BTreeMap<EdgeKey, PoseGraphEdge>,
    key_stamped: BTreeMap<u64, Time>,

    // Already sent in an incremental graph
    sent_nodes: BTreeSet<u64>,
    sent_edges: BTreeSet<EdgeKey>,
}

impl PoseGraphBook {
    /// `frame_id` is the world frame stamped on every node and edge.
    pub fn new(robot_id: u16, frame_id: impl Into<String>) -> Self {
        Self {
            robot_id,
            frame_id: frame_id.into(),
            nodes: BTreeMap::new(),
            odometry_edges: BTreeMap::new(),
            loop_closure_edges: BTreeMap::new(),
            rejected_edges: BTreeMap::new(),
            key_stamped: BTreeMap::new(),
            sent_nodes: BTreeSet::new(),
            sent_edges: BTreeSet::new(),
        }
    }

    /// Remember the timestamp of every keyframe in `times`.
    pub fn record_timestamps(&mut self, times: &FrameIdTimestampMap) {
        for (frame_id, ts) in times {
            self.key_stamped.insert(*frame_id, Time::from_nsec(*ts));
        }
    }

    /// Stamp of keyframe `index`, if it was ever reported.
    pub fn stamp_of(&self, index: u64) -> Option<Time> {
        self.key_stamped.get(&index).copied()
    }

    /// Stamp of `index`, pinning `fallback` for it when none is known yet.
    fn stamp_or_pin(&mut self, index: u64, fallback: Time) -> Time {
        *self.key_stamped.entry(index).or_insert(fallback)
    }

    /// Replay `nfg` and `values` into the node/edge collections.
    ///
    /// `fallback` stamps keys that `times` has no entry for.
    pub fn update_nodes_and_edges(
        &mut self,
        times: &FrameIdTimestampMap,
        nfg: &NonlinearFactorGraph,
        values: &Values,
        fallback: Time,
    ) -> UpdateStats {
        let mut stats = UpdateStats::default();
        self.record_timestamps(times);

        let mut odometry = BTreeMap::new();
        let mut loop_closures = BTreeMap::new();

        for factor in nfg.iter() {
            let Factor::Between {
                from,
                to,
                measured,
                noise,
            } = factor
            else {
                stats.factors_skipped += 1;
                continue;
            };

            let key_from = Symbol::from_key(*from).index;
            let key_to = Symbol::from_key(*to).index;
            let edge_type = if key_to == key_from + 1 {
                EdgeType::Odometry
            } else {
                EdgeType::LoopClosure
            };

            let stamp = self.stamp_or_pin(key_to, fallback);
            let edge = PoseGraphEdge {
                header: Header::new(stamp, self.frame_id.as_str()),
                key_from,
                key_to,
                robot_from: self.robot_id,
                robot_to: self.robot_id,
                edge_type,
                pose: Pose::from(measured),
                covariance: covariance_row_major(&noise.covariance()),
            };

            match edge_type {
                EdgeType::Odometry => odometry.insert(edge.endpoints(), edge),
                _ => loop_closures.insert(edge.endpoints(), edge),
            };
        }

        stats.loop_closures_added = loop_closures
            .keys()
            .filter(|k| !self.loop_closure_edges.contains_key(*k))
            .count();

        let (rejected, reinstated) = self.update_rejected_edges(odometry, loop_closures);
        stats.edges_rejected = rejected;
        stats.edges_reinstated = reinstated;

        for (key, pose) in values.iter() {
            let index = Symbol::from_key(key).index;
            let stamp = self.stamp_or_pin(index, fallback);
            let header = Header::new(stamp, self.frame_id.as_str());
            let pose = Pose::from(pose);

            match self.nodes.get_mut(&index) {
                Some(node) => {
                    node.header = header;
                    node.pose = pose;
                }
                None => {
                    self.nodes.insert(
                        index,
                        PoseGraphNode {
                            header,
                            robot_id: self.robot_id,
                            key: index,
                            pose,
                        },
                    );
                    stats.nodes_added += 1;
                }
            }
        }

        debug!(
            "Pose graph update: {} nodes, {} odometry, {} loop closures, {} rejected, {} factors skipped",
            self.nodes.len(),
            self.odometry_edges.len(),
            self.loop_closure_edges.len(),
            self.rejected_edges.len(),
            stats.factors_skipped
        );

        stats
    }

    /// Swap in the current edge sets, moving vanished edges to the rejected
    /// bucket and reviving rejected edges that came back.
    ///
    /// Returns `(rejected, reinstated)` counts.
    fn update_rejected_edges(
        &mut self,
        odometry: BTreeMap<EdgeKey, PoseGraphEdge>,
        loop_closures: BTreeMap<EdgeKey, PoseGraphEdge>,
    ) -> (usize, usize) {
        let mut rejected = 0;

        let previous_loops = std::mem::replace(&mut self.loop_closure_edges, loop_closures);
        for (key, mut edge) in previous_loops {
            if !self.loop_closure_edges.contains_key(&key) {
                info!(
                    "Loop closure {} -> {} rejected by the optimizer",
                    edge.key_from, edge.key_to
                );
                edge.edge_type = EdgeType::RejectedLoopClosure;
                self.rejected_edges.insert(key, edge);
                rejected += 1;
            }
        }

        let previous_odometry = std::mem::replace(&mut self.odometry_edges, odometry);
        for (key, edge) in previous_odometry {
            if !self.odometry_edges.contains_key(&key) {
                debug!("Odometry edge {} -> {} dropped", edge.key_from, edge.key_to);
                self.rejected_edges.insert(key, edge);
                rejected += 1;
            }
        }

        let active: Vec<EdgeKey> = self
            .odometry_edges
            .keys()
            .chain(self.loop_closure_edges.keys())
            .copied()
            .collect();
        let mut reinstated = 0;
        for key in active {
            if self.rejected_edges.remove(&key).is_some() {
                reinstated += 1;
            }
        }

        (rejected, reinstated)
    }

    /// Full graph: odometry edges, then loop closures, then nodes.
    pub fn pose_graph_msg(&self, stamp: Time) -> PoseGraph {
        PoseGraph {
            header: Header::new(stamp, self.frame_id.as_str()),
            nodes: self.nodes.values().cloned().collect(),
            edges: self.active_edges().cloned().collect(),
        }
    }

    /// Nodes and active edges not contained in any earlier incremental graph.
    pub fn take_incremental(&mut self, stamp: Time) -> PoseGraph {
        let nodes: Vec<PoseGraphNode> = self
            .nodes
            .values()
            .filter(|n| !self.sent_nodes.contains(&n.key))
            .cloned()
            .collect();
        let edges: Vec<PoseGraphEdge> = self
            .active_edges()
            .filter(|e| !self.sent_edges.contains(&e.endpoints()))
            .cloned()
            .collect();

        self.sent_nodes.extend(nodes.iter().map(|n| n.key));
        self.sent_edges.extend(edges.iter().map(|e| e.endpoints()));

        PoseGraph {
            header: Header::new(stamp, self.frame_id.as_str()),
            nodes,
            edges,
        }
    }

    fn active_edges(&self) -> impl Iterator<Item = &PoseGraphEdge> {
        self.odometry_edges
            .values()
            .chain(self.loop_closure_edges.values())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PoseGraphNode> {
        self.nodes.values()
    }

    pub fn odometry_edges(&self) -> impl Iterator<Item = &PoseGraphEdge> {
        self.odometry_edges.values()
    }

    pub fn loop_closure_edges(&self) -> impl Iterator<Item = &PoseGraphEdge> {
        self.loop_closure_edges.values()
    }

    pub fn rejected_edges(&self) -> impl Iterator<Item = &PoseGraphEdge> {
        self.rejected_edges.values()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_odometry_edges(&self) -> usize {
        self.odometry_edges.len()
    }

    pub fn num_loop_closure_edges(&self) -> usize {
        self.loop_closure_edges.len()
    }

    pub fn num_rejected_edges(&self) -> usize {
        self.rejected_edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::lcd::NoiseModel;
    use nalgebra::Vector3;

    fn key(index: u64) -> u64 {
        Symbol::for_robot(0, index).key()
    }

    fn pose_at(x: f64) -> SE3 {
        SE3::from_yaw(0.0, Vector3::new(x, 0.0, 0.0))
    }

    /// Chain 0..n with unit odometry plus the given loop closures.
    fn chain(n: u64, loops: &[(u64, u64)]) -> (NonlinearFactorGraph, Values, FrameIdTimestampMap) {
        let mut nfg = NonlinearFactorGraph::new();
        nfg.push(Factor::prior(key(0), SE3::identity(), NoiseModel::Isotropic(0.01)));
        for i in 1..n {
            nfg.push(Factor::between(key(i - 1), key(i), pose_at(1.0), NoiseModel::Isotropic(0.1)));
        }
        for (from, to) in loops {
            nfg.push(Factor::between(key(*from), key(*to), SE3::identity(), NoiseModel::Isotropic(0.2)));
        }
        let values = (0..n).map(|i| (key(i), pose_at(i as f64))).collect();
        let times = (0..n).map(|i| (i, (i as i64 + 1) * 1_000_000_000)).collect();
        (nfg, values, times)
    }

    #[test]
    fn test_edges_classified_by_adjacency() {
        let mut book = PoseGraphBook::new(0, "world");
        let (nfg, values, times) = chain(5, &[(4, 0)]);

        let stats = book.update_nodes_and_edges(&times, &nfg, &values, Time::default());

        assert_eq!(book.num_nodes(), 5);
        assert_eq!(book.num_odometry_edges(), 4);
        assert_eq!(book.num_loop_closure_edges(), 1);
        assert_eq!(stats.nodes_added, 5);
        assert_eq!(stats.loop_closures_added, 1);
        assert_eq!(stats.factors_skipped, 1);

        let lc = book.loop_closure_edges().next().unwrap();
        assert_eq!((lc.key_from, lc.key_to), (4, 0));
        assert_eq!(lc.edge_type, EdgeType::LoopClosure);
        assert_eq!(lc.header.stamp.sec, 1);
        assert!((lc.covariance[0] - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_replaying_same_graph_is_idempotent() {
        let mut book = PoseGraphBook::new(0, "world");
        let (nfg, values, times) = chain(4, &[(3, 1)]);

        book.update_nodes_and_edges(&times, &nfg, &values, Time::default());
        let first = book.pose_graph_msg(Time::default());
        let stats = book.update_nodes_and_edges(&times, &nfg, &values, Time::default());
        let second = book.pose_graph_msg(Time::default());

        assert_eq!(first, second);
        assert_eq!(stats.nodes_added, 0);
        assert_eq!(stats.loop_closures_added, 0);
        assert_eq!(book.num_rejected_edges(), 0);
    }

    #[test]
    fn test_nodes_updated_in_place() {
        let mut book = PoseGraphBook::new(0, "world");
        let (nfg, mut values, times) = chain(3, &[]);
        book.update_nodes_and_edges(&times, &nfg, &values, Time::default());

        values.insert(key(2), pose_at(10.0));
        book.update_nodes_and_edges(&times, &nfg, &values, Time::default());

        assert_eq!(book.num_nodes(), 3);
        let node = book.nodes().find(|n| n.key == 2).unwrap();
        assert_eq!(node.pose.position.x, 10.0);
    }

    #[test]
    fn test_vanished_loop_closure_is_rejected() {
        let mut book = PoseGraphBook::new(0, "world");
        let (nfg, values, times) = chain(6, &[(5, 0), (4, 1)]);
        book.update_nodes_and_edges(&times, &nfg, &values, Time::default());
        assert_eq!(book.num_loop_closure_edges(), 2);

        let (nfg, values, times) = chain(6, &[(5, 0)]);
        let stats = book.update_nodes_and_edges(&times, &nfg, &values, Time::default());

        assert_eq!(stats.edges_rejected, 1);
        assert_eq!(book.num_loop_closure_edges(), 1);
        let rejected = book.rejected_edges().next().unwrap();
        assert_eq!((rejected.key_from, rejected.key_to), (4, 1));
        assert_eq!(rejected.edge_type, EdgeType::RejectedLoopClosure);

        let msg = book.pose_graph_msg(Time::default());
        assert!(!msg.edges.iter().any(|e| e.endpoints() == (4, 1)));
        assert!(msg.edges.iter().any(|e| e.endpoints() == (5, 0)));
    }

    #[test]
    fn test_rejected_edge_reinstated_when_back() {
        let mut book = PoseGraphBook::new(0, "world");
        let (nfg, values, times) = chain(4, &[(3, 0)]);
        book.update_nodes_and_edges(&times, &nfg, &values, Time::default());

        let (nfg_without, _, _) = chain(4, &[]);
        book.update_nodes_and_edges(&times, &nfg_without, &values, Time::default());
        assert_eq!(book.num_rejected_edges(), 1);

        let stats = book.update_nodes_and_edges(&times, &nfg, &values, Time::default());
        assert_eq!(stats.edges_reinstated, 1);
        assert_eq!(book.num_rejected_edges(), 0);
        assert_eq!(book.num_loop_closure_edges(), 1);
    }

    #[test]
    fn test_empty_graph_gives_empty_message() {
        let mut book = PoseGraphBook::new(0, "world");
        book.update_nodes_and_edges(
            &FrameIdTimestampMap::new(),
            &NonlinearFactorGraph::new(),
            &Values::new(),
            Time::default(),
        );
        let msg = book.pose_graph_msg(Time::from_nsec(5));
        assert!(msg.is_empty());
        assert_eq!(msg.header.frame_id, "world");
    }

    #[test]
    fn test_missing_timestamp_uses_fallback_and_sticks() {
        let mut book = PoseGraphBook::new(0, "world");
        let (nfg, values, _) = chain(2, &[]);
        let fallback = Time { sec: 9, nsec: 0 };

        book.update_nodes_and_edges(&FrameIdTimestampMap::new(), &nfg, &values, fallback);
        assert_eq!(book.stamp_of(1), Some(fallback));

        book.update_nodes_and_edges(&FrameIdTimestampMap::new(), &nfg, &values, Time::default());
        assert_eq!(book.stamp_of(1), Some(fallback));
    }

    #[test]
    fn test_incremental_graph_sends_each_element_once() {
        let mut book = PoseGraphBook::new(0, "world");
        let (nfg, values, times) = chain(3, &[]);
        book.update_nodes_and_edges(&times, &nfg, &values, Time::default());

        let first = book.take_incremental(Time::default());
        assert_eq!(first.nodes.len(), 3);
        assert_eq!(first.edges.len(), 2);

        let (nfg, values, times) = chain(4, &[(3, 0)]);
        book.update_nodes_and_edges(&times, &nfg, &values, Time::default());
        let second = book.take_incremental(Time::default());

        assert_eq!(second.nodes.iter().map(|n| n.key).collect::<Vec<_>>(), vec![3]);
        let mut edges: Vec<_> = second.edges.iter().map(|e| e.endpoints()).collect();
        edges.sort();
        assert_eq!(edges, vec![(2, 3), (3, 0)]);

        assert!(book.take_incremental(Time::default()).is_empty());
    }
}

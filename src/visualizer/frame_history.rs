//! Retained per-frame descriptors and keypoints, and the lookup service on top.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::lcd::{BowVector, Landmarks, LcdOutput, OrbDescriptor, Timestamp};
use crate::msgs::{Header, Time, VlcFrameMsg, VlcFrameQueryRequest, VlcFrameQueryResponse};

use super::convert::{descriptors_to_image, landmarks_to_cloud};

/// Copy of the data needed to answer a later frame query.
#[derive(Debug, Clone, PartialEq)]
pub struct LcdFrame {
    pub timestamp: Timestamp,
    pub keypoints_3d: Landmarks,
    pub bow_vec: BowVector,
    pub descriptors_mat: OrbDescriptor,
}

impl LcdFrame {
    pub fn from_output(output: &LcdOutput) -> Self {
        Self {
            timestamp: output.timestamp,
            keypoints_3d: output.keypoints_3d.clone(),
            bow_vec: output.bow_vec.clone(),
            descriptors_mat: output.descriptors_mat.clone(),
        }
    }
}

/// Append-only list of frames; the position is the frame's pose id.
#[derive(Debug, Default)]
pub struct FrameHistory {
    frames: Vec<LcdFrame>,
}

pub type SharedFrameHistory = Arc<RwLock<FrameHistory>>;

impl FrameHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedFrameHistory {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Append a frame and return its pose id.
    pub fn push(&mut self, frame: LcdFrame) -> usize {
        self.frames.push(frame);
        self.frames.len() - 1
    }

    /// Frame with pose id `pose_id`; `None` for negative or unknown ids.
    pub fn get(&self, pose_id: i64) -> Option<&LcdFrame> {
        usize::try_from(pose_id)
            .ok()
            .and_then(|idx| self.frames.get(idx))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LcdFrame> {
        self.frames.iter()
    }
}

/// Why a frame query failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameQueryError {
    /// The pose id was never recorded.
    NotFound { pose_id: i64, available: usize },
    /// The request addressed another robot.
    RobotMismatch { expected: u16, requested: u16 },
}

impl std::fmt::Display for FrameQueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameQueryError::NotFound { pose_id, available } => write!(
                f,
                "Frame {} not found ({} frames recorded)",
                pose_id, available
            ),
            FrameQueryError::RobotMismatch {
                expected,
                requested,
            } => write!(
                f,
                "Query for robot {} sent to robot {}",
                requested, expected
            ),
        }
    }
}

impl std::error::Error for FrameQueryError {}

/// Answers frame queries from a shared history. Cheap to clone.
#[derive(Clone)]
pub struct FrameQueryHandler {
    robot_id: u16,
    frame_id: String,
    frames: SharedFrameHistory,
}

impl FrameQueryHandler {
    /// `frame_id` is the frame the keypoints are expressed in.
    pub fn new(robot_id: u16, frame_id: impl Into<String>, frames: SharedFrameHistory) -> Self {
        Self {
            robot_id,
            frame_id: frame_id.into(),
            frames,
        }
    }

    /// Look up the frame stored under `request.pose_id`.
    ///
    /// Keypoints are returned as a `PointCloud`, whose coordinates are `f32`,
    /// so each stored `f64` coordinate comes back narrowed to `f32`.
    pub fn handle(
        &self,
        request: &VlcFrameQueryRequest,
    ) -> Result<VlcFrameQueryResponse, FrameQueryError> {
        if request.robot_id != self.robot_id {
            return Err(FrameQueryError::RobotMismatch {
                expected: self.robot_id,
                requested: request.robot_id,
            });
        }

        let frames = self.frames.read();
        let frame = frames
            .get(request.pose_id)
            .ok_or(FrameQueryError::NotFound {
                pose_id: request.pose_id,
                available: frames.len(),
            })?;

        let header = Header::new(Time::from_nsec(frame.timestamp), self.frame_id.as_str());
        Ok(VlcFrameQueryResponse {
            frame: VlcFrameMsg {
                robot_id: self.robot_id,
                pose_id: request.pose_id as u32,
                keypoints: landmarks_to_cloud(&frame.keypoints_3d, header.clone()),
                descriptors_mat: descriptors_to_image(&frame.descriptors_mat, header),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visualizer::convert::image_to_descriptors;
    use nalgebra::Vector3;

    fn frame(n: u8) -> LcdFrame {
        LcdFrame {
            timestamp: n as i64 * 1_000_000,
            keypoints_3d: vec![Vector3::new(n as f64, 0.0, 1.0)],
            bow_vec: [(n as u32, 1.0)].into_iter().collect(),
            descriptors_mat: OrbDescriptor::from_element(1, 32, n),
        }
    }

    fn handler_with(n: u8) -> FrameQueryHandler {
        let frames = FrameHistory::shared();
        for i in 0..n {
            frames.write().push(frame(i));
        }
        FrameQueryHandler::new(0, "base_link", frames)
    }

    #[test]
    fn test_push_returns_sequential_ids() {
        let mut history = FrameHistory::new();
        assert_eq!(history.push(frame(0)), 0);
        assert_eq!(history.push(frame(1)), 1);
        assert_eq!(history.len(), 2);
        assert_eq!(history.get(1).unwrap().timestamp, 1_000_000);
    }

    #[test]
    fn test_get_rejects_negative_and_out_of_range() {
        let mut history = FrameHistory::new();
        history.push(frame(0));
        assert!(history.get(-1).is_none());
        assert!(history.get(1).is_none());
    }

    #[test]
    fn test_query_returns_stored_frame() {
        let handler = handler_with(3);
        let resp = handler
            .handle(&VlcFrameQueryRequest {
                robot_id: 0,
                pose_id: 2,
            })
            .unwrap();

        assert_eq!(resp.frame.pose_id, 2);
        assert_eq!(resp.frame.keypoints.points.len(), 1);
        assert_eq!(resp.frame.keypoints.points[0].x, 2.0);
        assert_eq!(resp.frame.keypoints.header.frame_id, "base_link");
        assert_eq!(
            image_to_descriptors(&resp.frame.descriptors_mat),
            Some(OrbDescriptor::from_element(1, 32, 2))
        );
    }

    #[test]
    fn test_query_narrows_keypoints_to_f32() {
        let frames = FrameHistory::shared();
        let mut stored = frame(0);
        stored.keypoints_3d = vec![Vector3::new(0.1, -2.3, 1e-7)];
        frames.write().push(stored);
        let handler = FrameQueryHandler::new(0, "base_link", frames);

        let resp = handler
            .handle(&VlcFrameQueryRequest {
                robot_id: 0,
                pose_id: 0,
            })
            .unwrap();

        let p = resp.frame.keypoints.points[0];
        assert_eq!(p.x, 0.1f64 as f32);
        assert_eq!(p.y, -2.3f64 as f32);
        assert_eq!(p.z, 1e-7f64 as f32);
        assert_ne!(p.x as f64, 0.1);
    }

    #[test]
    fn test_query_unknown_id_fails() {
        let handler = handler_with(2);
        for pose_id in [-3, 2, 1000] {
            let err = handler
                .handle(&VlcFrameQueryRequest {
                    robot_id: 0,
                    pose_id,
                })
                .unwrap_err();
            assert_eq!(
                err,
                FrameQueryError::NotFound {
                    pose_id,
                    available: 2
                }
            );
        }
    }

    #[test]
    fn test_query_other_robot_fails() {
        let handler = handler_with(1);
        let err = handler
            .handle(&VlcFrameQueryRequest {
                robot_id: 4,
                pose_id: 0,
            })
            .unwrap_err();
        assert!(matches!(err, FrameQueryError::RobotMismatch { requested: 4, .. }));
    }
}

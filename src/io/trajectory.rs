//! CSV export/import of an optimized trajectory.
//!
//! One pose per row, EuRoC ground-truth column order:
//! `timestamp_ns, p_x, p_y, p_z, q_w, q_x, q_y, q_z`.

use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use nalgebra::Vector3;

use crate::geometry::SE3;
use crate::msgs::{Header, Path as PathMsg, Pose, PoseStamped, Time};

const HEADER: [&str; 8] = ["#timestamp_ns", "p_x", "p_y", "p_z", "q_w", "q_x", "q_y", "q_z"];

/// Write every pose of `path` to `csv_path`, overwriting the file.
pub fn write_trajectory_csv<P: AsRef<Path>>(csv_path: P, path: &PathMsg) -> Result<()> {
    let csv_path = csv_path.as_ref();
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .from_path(csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;

    wtr.write_record(HEADER)?;
    for stamped in &path.poses {
        let p = &stamped.pose.position;
        let q = &stamped.pose.orientation;
        wtr.write_record(&[
            stamped.header.stamp.to_nsec().to_string(),
            p.x.to_string(),
            p.y.to_string(),
            p.z.to_string(),
            q.w.to_string(),
            q.x.to_string(),
            q.y.to_string(),
            q.z.to_string(),
        ])?;
    }
    wtr.flush()
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;
    Ok(())
}

/// Read a trajectory written by [`write_trajectory_csv`] (or any file in the
/// same column order). Rows with fewer than 8 fields are skipped.
pub fn read_trajectory_csv<P: AsRef<Path>>(csv_path: P, frame_id: &str) -> Result<PathMsg> {
    let csv_path = csv_path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;

    let mut poses = Vec::new();
    for (line, rec) in rdr.records().enumerate() {
        let rec = rec?;
        if rec.len() < 8 {
            continue;
        }
        let parse = |i: usize| -> Result<f64> {
            rec[i]
                .trim()
                .parse()
                .with_context(|| format!("Bad value '{}' in row {}", &rec[i], line + 1))
        };

        let ts: i64 = rec[0]
            .trim()
            .parse()
            .with_context(|| format!("Bad timestamp '{}' in row {}", &rec[0], line + 1))?;
        let position = Vector3::new(parse(1)?, parse(2)?, parse(3)?);
        let pose = SE3::from_quaternion(parse(4)?, parse(5)?, parse(6)?, parse(7)?, position);

        poses.push(PoseStamped {
            header: Header::new(Time::from_nsec(ts), frame_id),
            pose: Pose::from(&pose),
        });
    }

    let stamp = poses.last().map(|p| p.header.stamp).unwrap_or_default();
    Ok(PathMsg {
        header: Header::new(stamp, frame_id),
        poses,
    })
}

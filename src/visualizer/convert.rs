//! Flattening of detector output into message fields.

use nalgebra::Matrix6;

use crate::lcd::{BowVector, Landmarks, OrbDescriptor};
use crate::msgs::geometry_msgs::{COVARIANCE_LEN, Covariance, Point32};
use crate::msgs::sensor_msgs::MONO8;
use crate::msgs::{BowVectorMsg, Header, Image, PointCloud};

/// 6x6 matrix -> 36 values, row by row.
pub fn covariance_row_major(cov: &Matrix6<f64>) -> Covariance {
    let mut out = Vec::with_capacity(COVARIANCE_LEN);
    for row in 0..6 {
        for col in 0..6 {
            out.push(cov[(row, col)]);
        }
    }
    out
}

pub fn bow_vector_msg(bow: &BowVector) -> BowVectorMsg {
    let mut msg = BowVectorMsg {
        word_ids: Vec::with_capacity(bow.len()),
        word_values: Vec::with_capacity(bow.len()),
    };
    for (word_id, value) in bow {
        msg.word_ids.push(*word_id);
        msg.word_values.push(*value as f32);
    }
    msg
}

pub fn landmarks_to_cloud(landmarks: &Landmarks, header: Header) -> PointCloud {
    PointCloud {
        header,
        points: landmarks.iter().map(Point32::from).collect(),
    }
}

/// Descriptor matrix as a single-channel image, one descriptor per row.
pub fn descriptors_to_image(descriptors: &OrbDescriptor, header: Header) -> Image {
    let (rows, cols) = descriptors.shape();
    // DMatrix storage is column-major, images are row-major.
    let data = descriptors.transpose().as_slice().to_vec();
    Image {
        header,
        height: rows as u32,
        width: cols as u32,
        encoding: MONO8.to_string(),
        is_bigendian: false,
        step: cols as u32,
        data,
    }
}

/// Inverse of [`descriptors_to_image`]. `None` if the image is not a
/// well-formed mono8 buffer.
pub fn image_to_descriptors(image: &Image) -> Option<OrbDescriptor> {
    if image.encoding != MONO8 || image.step < image.width {
        return None;
    }
    let (rows, cols, step) = (
        image.height as usize,
        image.width as usize,
        image.step as usize,
    );
    if image.data.len() < rows * step {
        return None;
    }
    Some(OrbDescriptor::from_fn(rows, cols, |r, c| {
        image.data[r * step + c]
    }))
}

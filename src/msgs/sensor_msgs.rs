//! Point clouds and raw images.

use serde::{Deserialize, Serialize};

use super::geometry_msgs::Point32;
use super::std_msgs::Header;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub header: Header,
    pub points: Vec<Point32>,
}

pub const MONO8: &str = "mono8";

/// Raw image, `data` is row-major with `step` bytes per row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub encoding: String,
    pub is_bigendian: bool,
    pub step: u32,
    pub data: Vec<u8>,
}

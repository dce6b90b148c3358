use serde::{Deserialize, Serialize};

use crate::lcd::Timestamp;

const NSEC_PER_SEC: i64 = 1_000_000_000;

/// Wall/sensor time split into seconds and nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Time {
    pub sec: u32,
    pub nsec: u32,
}

impl Time {
    /// Negative timestamps clamp to zero, values past `u32::MAX` seconds saturate.
    pub fn from_nsec(ns: Timestamp) -> Self {
        let ns = ns.max(0);
        let sec = (ns / NSEC_PER_SEC).min(u32::MAX as i64) as u32;
        Self {
            sec,
            nsec: (ns % NSEC_PER_SEC) as u32,
        }
    }

    pub fn to_nsec(&self) -> Timestamp {
        self.sec as i64 * NSEC_PER_SEC + self.nsec as i64
    }

    pub fn to_sec(&self) -> f64 {
        self.sec as f64 + self.nsec as f64 * 1e-9
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub stamp: Time,
    pub frame_id: String,
}

impl Header {
    pub fn new(stamp: Time, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

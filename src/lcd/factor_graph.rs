//! Factor graph and optimized values as produced by the pose-graph optimizer.
//!
//! Only the parts the publisher reads are modelled: relative-pose factors
//! with their noise, unary priors, and a catch-all for any other factor type.

use std::collections::BTreeMap;

use nalgebra::{Matrix6, Vector6};

use crate::geometry::SE3;

use super::symbol::Key;

/// Noise model attached to a factor.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseModel {
    /// Full 6x6 covariance (rotation first, then translation).
    Gaussian(Matrix6<f64>),
    /// Per-axis standard deviations.
    Diagonal(Vector6<f64>),
    /// Single standard deviation for all axes.
    Isotropic(f64),
}

impl NoiseModel {
    pub fn covariance(&self) -> Matrix6<f64> {
        match self {
            NoiseModel::Gaussian(cov) => *cov,
            NoiseModel::Diagonal(sigmas) => Matrix6::from_diagonal(&sigmas.component_mul(sigmas)),
            NoiseModel::Isotropic(sigma) => Matrix6::identity() * (sigma * sigma),
        }
    }
}

impl Default for NoiseModel {
    fn default() -> Self {
        NoiseModel::Isotropic(1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Factor {
    /// Relative pose measurement `measured = T_from⁻¹ · T_to`.
    Between {
        from: Key,
        to: Key,
        measured: SE3,
        noise: NoiseModel,
    },
    Prior {
        key: Key,
        prior: SE3,
        noise: NoiseModel,
    },
    /// Any factor the publisher has no message representation for.
    Other { keys: Vec<Key> },
}

impl Factor {
    pub fn between(from: Key, to: Key, measured: SE3, noise: NoiseModel) -> Self {
        Factor::Between {
            from,
            to,
            measured,
            noise,
        }
    }

    pub fn prior(key: Key, prior: SE3, noise: NoiseModel) -> Self {
        Factor::Prior { key, prior, noise }
    }
}

/// Ordered collection of factors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NonlinearFactorGraph {
    factors: Vec<Factor>,
}

impl NonlinearFactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, factor: Factor) {
        self.factors.push(factor);
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Factor> {
        self.factors.iter()
    }
}

impl FromIterator<Factor> for NonlinearFactorGraph {
    fn from_iter<I: IntoIterator<Item = Factor>>(iter: I) -> Self {
        Self {
            factors: iter.into_iter().collect(),
        }
    }
}

/// Optimized pose estimates, ordered by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    poses: BTreeMap<Key, SE3>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the estimate for `key`.
    pub fn insert(&mut self, key: Key, pose: SE3) {
        self.poses.insert(key, pose);
    }

    pub fn get(&self, key: Key) -> Option<&SE3> {
        self.poses.get(&key)
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.poses.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &SE3)> {
        self.poses.iter().map(|(k, v)| (*k, v))
    }

    /// Estimate with the largest key, i.e. the most recent keyframe.
    pub fn latest(&self) -> Option<(Key, &SE3)> {
        self.poses.iter().next_back().map(|(k, v)| (*k, v))
    }
}

impl FromIterator<(Key, SE3)> for Values {
    fn from_iter<I: IntoIterator<Item = (Key, SE3)>>(iter: I) -> Self {
        Self {
            poses: iter.into_iter().collect(),
        }
    }
}

//! Radially symmetric P-wave velocity models.
//!
//! A model is a list of `(depth, vp)` nodes with linear interpolation in
//! between. A discontinuity is two consecutive nodes at the same depth. The
//! deepest node marks the core-mantle boundary; the core itself is not
//! modelled.

use crate::error::GeoError;

/// Mean earth radius in km.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// One node of a velocity profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityNode {
    /// Depth below the surface in km.
    pub depth: f64,
    /// P velocity in km/s.
    pub vp: f64,
}

/// A named 1-D P velocity profile down to the core-mantle boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityModel {
    name: String,
    nodes: Vec<VelocityNode>,
}

const fn node(depth: f64, vp: f64) -> VelocityNode {
    VelocityNode { depth, vp }
}

const IASP91_NODES: [VelocityNode; 19] = [
    node(0.0, 5.80),
    node(20.0, 5.80),
    node(20.0, 6.50),
    node(35.0, 6.50),
    node(35.0, 8.04),
    node(77.5, 8.045),
    node(120.0, 8.05),
    node(210.0, 8.30),
    node(410.0, 9.03),
    node(410.0, 9.36),
    node(660.0, 10.20),
    node(660.0, 10.79),
    node(760.0, 11.07),
    node(1000.0, 11.46),
    node(1500.0, 12.18),
    node(2000.0, 12.79),
    node(2500.0, 13.38),
    node(2740.0, 13.68),
    node(2889.0, 13.69),
];

const AK135_NODES: [VelocityNode; 19] = [
    node(0.0, 5.80),
    node(20.0, 5.80),
    node(20.0, 6.50),
    node(35.0, 6.50),
    node(35.0, 8.04),
    node(77.5, 8.045),
    node(120.0, 8.05),
    node(210.0, 8.30),
    node(410.0, 9.03),
    node(410.0, 9.36),
    node(660.0, 10.20),
    node(660.0, 10.79),
    node(760.0, 11.06),
    node(1000.0, 11.43),
    node(1500.0, 12.16),
    node(2000.0, 12.77),
    node(2500.0, 13.35),
    node(2740.0, 13.65),
    node(2891.5, 13.66),
];

impl VelocityModel {
    /// Build a model from nodes sorted by depth.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::InvalidModel`] when fewer than two nodes are
    /// given, the first node is not at the surface, depths decrease, or a
    /// velocity is not positive.
    pub fn new(name: &str, nodes: Vec<VelocityNode>) -> Result<Self, GeoError> {
        let invalid = |reason: &str| GeoError::InvalidModel {
            name: name.to_owned(),
            reason: reason.to_owned(),
        };
        let first = nodes.first().ok_or_else(|| invalid("no nodes"))?;
        if nodes.len() < 2 {
            return Err(invalid("at least two nodes required"));
        }
        if first.depth.abs() > f64::EPSILON {
            return Err(invalid("first node must be at the surface"));
        }
        if nodes.windows(2).any(|w| match w {
            [a, b] => b.depth < a.depth,
            _ => false,
        }) {
            return Err(invalid("node depths must not decrease"));
        }
        if nodes.iter().any(|n| n.vp <= 0.0) {
            return Err(invalid("velocities must be positive"));
        }
        Ok(Self {
            name: name.to_owned(),
            nodes,
        })
    }

    /// Approximation of the IASP91 P profile.
    pub fn iasp91() -> Self {
        Self {
            name: "iasp91".to_owned(),
            nodes: IASP91_NODES.to_vec(),
        }
    }

    /// Approximation of the AK135 P profile.
    pub fn ak135() -> Self {
        Self {
            name: "ak135".to_owned(),
            nodes: AK135_NODES.to_vec(),
        }
    }

    /// Look up a built-in model by name, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::UnknownModel`] for names other than `iasp91`
    /// and `ak135`.
    pub fn by_name(name: &str) -> Result<Self, GeoError> {
        match name.to_ascii_lowercase().as_str() {
            "iasp91" => Ok(Self::iasp91()),
            "ak135" => Ok(Self::ak135()),
            _ => Err(GeoError::UnknownModel {
                name: name.to_owned(),
            }),
        }
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Profile nodes.
    pub fn nodes(&self) -> &[VelocityNode] {
        &self.nodes
    }

    /// Depth of the deepest node (the core-mantle boundary), in km.
    pub fn bottom_depth(&self) -> f64 {
        self.nodes.last().map_or(0.0, |n| n.depth)
    }

    /// P velocity at `depth` km. At a discontinuity the velocity of the
    /// layer above is returned; below the deepest node the deepest velocity.
    pub fn vp_at(&self, depth: f64) -> f64 {
        for pair in self.nodes.windows(2) {
            if let [a, b] = pair {
                if depth >= a.depth && depth <= b.depth && b.depth > a.depth {
                    let fraction = (depth - a.depth) / (b.depth - a.depth);
                    return a.vp + fraction * (b.vp - a.vp);
                }
            }
        }
        if depth <= 0.0 {
            return self.nodes.first().map_or(0.0, |n| n.vp);
        }
        self.nodes.last().map_or(0.0, |n| n.vp)
    }
}

//! # Core Type Definitions
//!
//! Fundamental identifiers and geometry shared by every part of the zone system.
//!
//! ## Key Types
//!
//! - [`ParticipantId`] - Stable, ordered identifier of a connected participant
//! - [`ObjectId`] - Identifier of a replicated object (every zone is one)
//! - [`Vec3`] - 3D vector used for head positions and zone centers
//! - [`ParticipantKind`] - Distinguishes real users from bots
//!
//! Participant ids are totally ordered on purpose: both authority election and
//! pairing initiator selection pick the minimum id among the candidates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// Identifier of a participant connected to the shared session.
///
/// # Examples
///
/// ```rust
/// use horizon_zones::ParticipantId;
///
/// let a = ParticipantId(3);
/// let b = ParticipantId(7);
/// assert!(a < b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant-{}", self.0)
    }
}

/// Identifier of a replicated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object-{}", self.0)
    }
}

/// Zones are replicated objects; their id is the object id.
pub type ZoneId = ObjectId;

/// Whether a participant is a real user or a bot.
///
/// Bots never initiate pairing, never hold pool source slots and, unless
/// configured otherwise, are never placed into zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    #[default]
    User,
    Bot,
}

impl ParticipantKind {
    pub fn is_bot(&self) -> bool {
        matches!(self, ParticipantKind::Bot)
    }
}

/// Represents a 3D vector with double-precision components.
///
/// # Examples
///
/// ```rust
/// use horizon_zones::Vec3;
///
/// let a = Vec3::new(0.0, 1.7, 0.0);
/// let b = Vec3::new(3.0, 1.7, 4.0);
/// assert_eq!(a.distance_squared(b), 25.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// X coordinate (typically east-west axis)
    pub x: f64,
    /// Y coordinate (typically vertical axis)
    pub y: f64,
    /// Z coordinate (typically north-south axis)
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Creates a zero vector (0, 0, 0).
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Creates a unit vector along the Y axis (0, 1, 0), the default up axis.
    pub const fn unit_y() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }

    pub fn dot(&self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length_squared(&self) -> f64 {
        self.dot(*self)
    }

    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Squared Euclidean distance. Containment and proximity tests compare
    /// squared values so no square root is taken on the hot path.
    pub fn distance_squared(&self, other: Vec3) -> f64 {
        (*self - other).length_squared()
    }

    pub fn distance(&self, other: Vec3) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Returns the unit vector in the same direction, or `None` for a
    /// (near) zero-length vector.
    pub fn normalized(&self) -> Option<Vec3> {
        let length = self.length();
        if length <= f64::EPSILON {
            None
        } else {
            Some(*self / length)
        }
    }

    pub fn midpoint(&self, other: Vec3) -> Vec3 {
        (*self + other) / 2.0
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f64> for Vec3 {
    type Output = Vec3;

    fn div(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

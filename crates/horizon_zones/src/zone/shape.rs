//! Containment tests for zone shapes.

use crate::types::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// External geometry collaborator for arbitrary zone bounds.
pub trait BoundsQuery: Send + Sync + fmt::Debug {
    /// Whether `point` (world space) lies inside the bounds.
    fn contains(&self, point: Vec3) -> bool;
}

/// Axis-aligned box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }
}

impl BoundsQuery for Aabb {
    fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }
}

/// Runtime shape of a zone.
#[derive(Debug, Clone)]
pub enum ZoneShape {
    Sphere { radius: f64 },
    /// Infinite vertical cylinder along the zone's up axis.
    Circle { radius: f64 },
    Bounds(Arc<dyn BoundsQuery>),
}

impl ZoneShape {
    pub fn contains(&self, center: Vec3, up: Vec3, point: Vec3) -> bool {
        match self {
            ZoneShape::Sphere { radius } => center.distance_squared(point) <= radius * radius,
            ZoneShape::Circle { radius } => {
                let axis = up.normalized().unwrap_or_else(Vec3::unit_y);
                let offset = point - center;
                let planar = offset - axis * offset.dot(axis);
                planar.length_squared() <= radius * radius
            }
            ZoneShape::Bounds(bounds) => bounds.contains(point),
        }
    }
}

/// Serializable shape description used in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapeSpec {
    Sphere { radius: f64 },
    Circle { radius: f64 },
    Box { half_extents: Vec3 },
}

impl ShapeSpec {
    /// Radius for round shapes, `None` for boxes.
    pub fn radius(&self) -> Option<f64> {
        match self {
            ShapeSpec::Sphere { radius } | ShapeSpec::Circle { radius } => Some(*radius),
            ShapeSpec::Box { .. } => None,
        }
    }

    pub fn build(&self, center: Vec3) -> ZoneShape {
        match self {
            ShapeSpec::Sphere { radius } => ZoneShape::Sphere { radius: *radius },
            ShapeSpec::Circle { radius } => ZoneShape::Circle { radius: *radius },
            ShapeSpec::Box { half_extents } => {
                ZoneShape::Bounds(Arc::new(Aabb::from_center(center, *half_extents)))
            }
        }
    }
}

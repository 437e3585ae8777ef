//! Configuration for the zone system.
//!
//! Every field carries a serde default so a partial `[zones]` table (or none at
//! all) deserializes to a working configuration.

use crate::types::Vec3;
use crate::zone::ShapeSpec;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

fn default_proximity_radius() -> f64 {
    4.0
}
fn default_proximity_debounce_ms() -> u64 {
    200
}
fn default_release_grace_ms() -> u64 {
    1000
}
fn default_authority_timeout_ms() -> u64 {
    8000
}
fn default_authority_poll_interval_ms() -> u64 {
    10
}
fn default_spawn_poll_interval_ms() -> u64 {
    10
}
fn default_spawn_timeout_ms() -> u64 {
    8000
}
fn default_channel_range_start() -> u8 {
    11
}
fn default_channel_range_end() -> u8 {
    254
}
fn default_true() -> bool {
    true
}
fn default_template_shape() -> ShapeSpec {
    ShapeSpec::Sphere { radius: 3.0 }
}
fn default_template_capacity() -> usize {
    10
}

/// Tunables for membership resolution, pairing, pooling and authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSystemConfig {
    /// Two un-zoned users closer than this are candidates for pairing
    #[serde(default = "default_proximity_radius")]
    pub proximity_radius: f64,
    /// How long proximity must hold before a zone is allocated
    #[serde(default = "default_proximity_debounce_ms")]
    pub proximity_debounce_ms: u64,
    /// How long a dynamic zone may sit with at most one occupant before release
    #[serde(default = "default_release_grace_ms")]
    pub release_grace_ms: u64,
    /// Shared deadline for acquiring state and control authority
    #[serde(default = "default_authority_timeout_ms")]
    pub authority_timeout_ms: u64,
    #[serde(default = "default_authority_poll_interval_ms")]
    pub authority_poll_interval_ms: u64,
    #[serde(default = "default_spawn_poll_interval_ms")]
    pub spawn_poll_interval_ms: u64,
    #[serde(default = "default_spawn_timeout_ms")]
    pub spawn_timeout_ms: u64,
    /// First channel id handed to dynamic zones (inclusive)
    #[serde(default = "default_channel_range_start")]
    pub channel_range_start: u8,
    /// Last channel id handed to dynamic zones (inclusive)
    #[serde(default = "default_channel_range_end")]
    pub channel_range_end: u8,
    /// Shape and policy applied to every pooled zone
    #[serde(default)]
    pub dynamic_template: DynamicZoneTemplate,
    /// Keep bots out of every zone
    #[serde(default = "default_true")]
    pub forbid_zones_to_bots: bool,
    /// Only current members may toggle a zone's lock
    #[serde(default = "default_true")]
    pub only_members_can_toggle_lock: bool,
}

/// Template for zones spawned by the dynamic pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicZoneTemplate {
    #[serde(default = "default_template_shape")]
    pub shape: ShapeSpec,
    #[serde(default = "default_template_capacity")]
    pub max_capacity: usize,
    #[serde(default)]
    pub allow_empty_zone_locking: bool,
    #[serde(default = "Vec3::unit_y")]
    pub up: Vec3,
}

impl Default for DynamicZoneTemplate {
    fn default() -> Self {
        Self {
            shape: default_template_shape(),
            max_capacity: default_template_capacity(),
            allow_empty_zone_locking: false,
            up: Vec3::unit_y(),
        }
    }
}

impl Default for ZoneSystemConfig {
    fn default() -> Self {
        Self {
            proximity_radius: default_proximity_radius(),
            proximity_debounce_ms: default_proximity_debounce_ms(),
            release_grace_ms: default_release_grace_ms(),
            authority_timeout_ms: default_authority_timeout_ms(),
            authority_poll_interval_ms: default_authority_poll_interval_ms(),
            spawn_poll_interval_ms: default_spawn_poll_interval_ms(),
            spawn_timeout_ms: default_spawn_timeout_ms(),
            channel_range_start: default_channel_range_start(),
            channel_range_end: default_channel_range_end(),
            dynamic_template: DynamicZoneTemplate::default(),
            forbid_zones_to_bots: true,
            only_members_can_toggle_lock: true,
        }
    }
}

impl ZoneSystemConfig {
    pub fn proximity_debounce(&self) -> Duration {
        Duration::from_millis(self.proximity_debounce_ms)
    }

    pub fn release_grace(&self) -> Duration {
        Duration::from_millis(self.release_grace_ms)
    }

    pub fn authority_timeout(&self) -> Duration {
        Duration::from_millis(self.authority_timeout_ms)
    }

    pub fn authority_poll_interval(&self) -> Duration {
        Duration::from_millis(self.authority_poll_interval_ms)
    }

    pub fn spawn_poll_interval(&self) -> Duration {
        Duration::from_millis(self.spawn_poll_interval_ms)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }

    pub fn channel_range(&self) -> RangeInclusive<u8> {
        self.channel_range_start..=self.channel_range_end
    }

    /// Validates the configuration for consistency.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.proximity_radius.is_nan() || self.proximity_radius <= 0.0 {
            return Err("zones.proximity_radius must be greater than 0".to_string());
        }

        if self.channel_range_start > self.channel_range_end {
            return Err(format!(
                "zones.channel_range_start ({}) must not exceed channel_range_end ({})",
                self.channel_range_start, self.channel_range_end
            ));
        }

        if self.authority_poll_interval_ms == 0 || self.spawn_poll_interval_ms == 0 {
            return Err("zones poll intervals must be greater than 0".to_string());
        }

        let template = &self.dynamic_template;
        if template.max_capacity < 2 {
            return Err("zones.dynamic_template.max_capacity must hold at least a pair".to_string());
        }

        // A pair placed at its midpoint must still be inside the zone.
        match template.shape.radius() {
            Some(radius) if radius >= self.proximity_radius / 2.0 => {}
            Some(radius) => {
                return Err(format!(
                    "zones.dynamic_template radius {radius} is smaller than half the proximity radius ({})",
                    self.proximity_radius
                ));
            }
            None => {
                return Err("zones.dynamic_template must be a sphere or a circle".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ZoneSystemConfig::default();
        assert_eq!(config.proximity_radius, 4.0);
        assert_eq!(config.proximity_debounce(), Duration::from_millis(200));
        assert_eq!(config.release_grace(), Duration::from_secs(1));
        assert_eq!(config.authority_timeout(), Duration::from_secs(8));
        assert_eq!(config.channel_range(), 11..=254);
        assert_eq!(config.dynamic_template.max_capacity, 10);
        assert!(config.forbid_zones_to_bots);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: ZoneSystemConfig =
            serde_json::from_str(r#"{ "proximity_radius": 6.0 }"#).unwrap();
        assert_eq!(config.proximity_radius, 6.0);
        assert_eq!(config.release_grace_ms, 1000);
        assert_eq!(config.dynamic_template.shape, ShapeSpec::Sphere { radius: 3.0 });
    }

    #[test]
    fn test_validate_rejects_inverted_channel_range() {
        let config = ZoneSystemConfig {
            channel_range_start: 200,
            channel_range_end: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_small_template() {
        let mut config = ZoneSystemConfig::default();
        config.dynamic_template.shape = ShapeSpec::Sphere { radius: 1.0 };
        assert!(config.validate().is_err());

        config.dynamic_template.shape = ShapeSpec::Box {
            half_extents: Vec3::new(2.0, 2.0, 2.0),
        };
        assert!(config.validate().is_err());
    }
}

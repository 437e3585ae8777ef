//! Configuration management for the session simulator.
//!
//! This module handles loading and validation of the simulator configuration
//! from TOML files. The `[zones]` table is handed to every replica unchanged.

use horizon_zones::{ShapeSpec, Vec3, ZoneDescriptor, ZoneSystemConfig, SPAWNED_OBJECT_ID_BASE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

fn default_duration_secs() -> u64 {
    60
}

fn default_users() -> u32 {
    6
}

fn default_world_half_extent() -> f64 {
    20.0
}

fn default_walk_speed() -> f64 {
    1.4
}

fn default_gather_bias() -> f64 {
    0.6
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionSettings,
    /// Passed to every replica's zone system
    #[serde(default)]
    pub zones: ZoneSystemConfig,
    #[serde(default)]
    pub fixed_zones: Vec<ZoneDescriptor>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Shape of the simulated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Fixed simulation step in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Run length in seconds; 0 runs until a shutdown signal
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_users")]
    pub users: u32,
    #[serde(default)]
    pub bots: u32,
    /// Agents wander inside `[-extent, extent]` on both ground axes
    #[serde(default = "default_world_half_extent")]
    pub world_half_extent: f64,
    /// Meters per second
    #[serde(default = "default_walk_speed")]
    pub walk_speed: f64,
    /// Chance a new wander target is picked next to another agent
    #[serde(default = "default_gather_bias")]
    pub gather_bias: f64,
    /// Carried in logs only
    #[serde(default)]
    pub social_group: Option<String>,
    /// Fixed seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            duration_secs: default_duration_secs(),
            users: default_users(),
            bots: 0,
            world_half_extent: default_world_half_extent(),
            walk_speed: default_walk_speed(),
            gather_bias: default_gather_bias(),
            social_group: None,
            seed: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            zones: ZoneSystemConfig::default(),
            fixed_zones: vec![
                ZoneDescriptor {
                    id: 1,
                    name: "fireplace".to_string(),
                    shape: ShapeSpec::Sphere { radius: 3.0 },
                    center: Vec3::new(-10.0, 0.0, -10.0),
                    up: Vec3::unit_y(),
                    max_capacity: 4,
                    allow_empty_zone_locking: false,
                    channel: Some(1),
                    register_automatically: true,
                },
                ZoneDescriptor {
                    id: 2,
                    name: "stage".to_string(),
                    shape: ShapeSpec::Circle { radius: 5.0 },
                    center: Vec3::new(10.0, 0.0, 10.0),
                    up: Vec3::unit_y(),
                    max_capacity: 8,
                    allow_empty_zone_locking: false,
                    channel: Some(2),
                    register_automatically: true,
                },
            ],
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.session.tick_interval_ms)
    }

    /// Validates the configuration settings.
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.session.tick_interval_ms == 0 {
            return Err("session.tick_interval_ms must be greater than 0".to_string());
        }

        if self.session.world_half_extent.is_nan() || self.session.world_half_extent <= 0.0 {
            return Err("session.world_half_extent must be positive".to_string());
        }

        if self.session.walk_speed.is_nan() || self.session.walk_speed < 0.0 {
            return Err("session.walk_speed cannot be negative".to_string());
        }

        if !(0.0..=1.0).contains(&self.session.gather_bias) {
            return Err("session.gather_bias must be within 0.0..=1.0".to_string());
        }

        match self.session.users.checked_add(self.session.bots) {
            None => return Err("session.users + session.bots does not fit a participant id".to_string()),
            Some(0) => return Err("session needs at least one user or bot".to_string()),
            Some(_) => {}
        }

        self.zones.validate()?;

        let mut ids = HashSet::new();
        for zone in &self.fixed_zones {
            if !ids.insert(zone.id) {
                return Err(format!("Duplicate fixed zone id: {}", zone.id));
            }
            if zone.id >= SPAWNED_OBJECT_ID_BASE {
                return Err(format!(
                    "Fixed zone id {} collides with spawned object ids (>= {SPAWNED_OBJECT_ID_BASE})",
                    zone.id
                ));
            }
            if zone.max_capacity == 0 {
                return Err(format!("Fixed zone {} must admit at least one participant", zone.name));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.tick_interval_ms, 50);
        assert_eq!(config.session.users, 6);
        assert_eq!(config.fixed_zones.len(), 2);
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("horizon-sim.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.session.tick_interval_ms, 50);
        assert!(path.exists());

        // The generated file must load back to the same settings.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.fixed_zones.len(), 2);
        assert_eq!(reloaded.fixed_zones[1].shape, ShapeSpec::Circle { radius: 5.0 });
        assert!(reloaded.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[session]
tick_interval_ms = 20
duration_secs = 0
users = 10
bots = 2
social_group = "book-club"
seed = 7

[zones]
proximity_radius = 5.0
release_grace_ms = 2500

[zones.dynamic_template]
max_capacity = 6

[[fixed_zones]]
id = 3
name = "bar"
center = { x = 0.0, y = 0.0, z = 4.0 }
shape = { kind = "box", half_extents = { x = 2.0, y = 2.0, z = 1.0 } }
max_capacity = 3
channel = 9

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&temp_file.path().to_path_buf())
            .await
            .unwrap();

        assert_eq!(config.session.tick_interval_ms, 20);
        assert_eq!(config.session.duration_secs, 0);
        assert_eq!(config.session.users, 10);
        assert_eq!(config.session.bots, 2);
        assert_eq!(config.session.social_group.as_deref(), Some("book-club"));
        assert_eq!(config.session.seed, Some(7));
        assert_eq!(config.session.walk_speed, 1.4);

        assert_eq!(config.zones.proximity_radius, 5.0);
        assert_eq!(config.zones.release_grace_ms, 2500);
        assert_eq!(config.zones.proximity_debounce_ms, 200);
        assert_eq!(config.zones.dynamic_template.max_capacity, 6);

        let bar = &config.fixed_zones[0];
        assert_eq!(bar.name, "bar");
        assert_eq!(bar.channel, Some(9));
        assert_eq!(bar.up, Vec3::unit_y());
        assert!(bar.register_automatically);
        assert_eq!(
            bar.shape,
            ShapeSpec::Box {
                half_extents: Vec3::new(2.0, 2.0, 1.0)
            }
        );

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.fixed_zones[1].id = 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.fixed_zones[0].id = SPAWNED_OBJECT_ID_BASE;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.gather_bias = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.zones.channel_range_start = 200;
        config.zones.channel_range_end = 100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_participant_count_bounds() {
        let mut config = AppConfig::default();
        config.session.users = 0;
        config.session.bots = 0;
        assert!(config.validate().is_err());

        config.session.users = u32::MAX;
        config.session.bots = 1;
        let err = config.validate().unwrap_err();
        assert!(err.contains("participant id"));

        config.session.users = 0;
        config.session.bots = 1;
        assert!(config.validate().is_ok());
    }
}

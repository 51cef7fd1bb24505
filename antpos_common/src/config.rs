//! TOML configuration for the control core.
//!
//! Numeric parameters have serde defaults and a `validate()` pass with
//! bounds checks. The move-profile tables and axis travel limits are pure
//! configuration data; the core hard-codes none of them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::axis::Axis;
use crate::state::ParamsMode;

/// Cycle period bounds [µs].
pub const CYCLE_TIME_US_MIN: u32 = 100;
pub const CYCLE_TIME_US_MAX: u32 = 100_000;

/// Default cycle period [µs].
pub const CYCLE_TIME_US_DEFAULT: u32 = 1000;

// ─── Error Type ─────────────────────────────────────────────────────

/// Configuration loading or validation failure. Always fatal at bring-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O: {0}")]
    Io(String),

    #[error("config parse: {0}")]
    Parse(String),

    #[error("config validation: {0}")]
    Validation(String),
}

// ─── Top-Level Config ───────────────────────────────────────────────

/// Top-level control core configuration, immutable after bring-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Cycle period [µs] (default: 1000 = 1 ms).
    #[serde(default = "default_cycle_time_us")]
    pub cycle_time_us: u32,

    /// Consecutive working-counter misses before the link is declared lost.
    #[serde(default = "default_wkc_miss_limit")]
    pub wkc_miss_limit: u32,

    /// Orderly shutdown budget [ms] before drives are forced off.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Real-time thread placement and priority.
    #[serde(default)]
    pub rt: RtConfig,

    /// Azimuth axis parameters.
    pub azimuth: AxisConfig,

    /// Elevation axis parameters.
    pub elevation: AxisConfig,

    /// Object dictionary writes applied to both drives at bring-up,
    /// before any state machine progression.
    #[serde(default)]
    pub init_writes: Vec<RegisterWrite>,
}

fn default_cycle_time_us() -> u32 {
    CYCLE_TIME_US_DEFAULT
}
fn default_wkc_miss_limit() -> u32 {
    3
}
fn default_shutdown_timeout_ms() -> u64 {
    2000
}

impl CoreConfig {
    /// Parse from a TOML string and validate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Cycle period [ns].
    #[inline]
    pub fn period_ns(&self) -> i64 {
        i64::from(self.cycle_time_us) * 1000
    }

    /// Per-tick time budget for deferred SDO parameter writes [ns].
    #[inline]
    pub fn param_budget_ns(&self) -> i64 {
        self.period_ns() / 4
    }

    #[inline]
    pub fn axis(&self, axis: Axis) -> &AxisConfig {
        match axis {
            Axis::Azimuth => &self.azimuth,
            Axis::Elevation => &self.elevation,
        }
    }

    /// Validate parameter bounds and cross-field rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_time_us < CYCLE_TIME_US_MIN || self.cycle_time_us > CYCLE_TIME_US_MAX {
            return Err(ConfigError::Validation(format!(
                "cycle_time_us {} out of range [{CYCLE_TIME_US_MIN}, {CYCLE_TIME_US_MAX}]",
                self.cycle_time_us
            )));
        }
        if self.wkc_miss_limit == 0 {
            return Err(ConfigError::Validation(
                "wkc_miss_limit must be at least 1".into(),
            ));
        }
        self.azimuth.validate(Axis::Azimuth)?;
        self.elevation.validate(Axis::Elevation)?;
        Ok(())
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<CoreConfig, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("failed to read {}: {e}", path.display())))?;
    CoreConfig::from_toml_str(&text)
}

// ─── RT Thread Config ───────────────────────────────────────────────

/// Real-time scheduling parameters for the cyclic thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtConfig {
    /// CPU core the cyclic thread is pinned to.
    #[serde(default)]
    pub cpu_core: usize,

    /// SCHED_FIFO priority.
    #[serde(default = "default_rt_priority")]
    pub priority: i32,
}

fn default_rt_priority() -> i32 {
    80
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            cpu_core: 0,
            priority: default_rt_priority(),
        }
    }
}

// ─── Per-Axis Config ────────────────────────────────────────────────

/// Per-axis limits, parameter ownership, and the move-profile table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Command velocity limit [pulses/s]; commands beyond ±limit are rejected.
    pub max_velocity_pps: u32,

    /// Who programs profile parameters on the drive.
    #[serde(default)]
    pub params_mode: ParamsMode,

    /// Lower travel limit [deg]. Required for elevation, absent for azimuth.
    #[serde(default)]
    pub min_position_deg: Option<f64>,

    /// Upper travel limit [deg]. Required for elevation, absent for azimuth.
    #[serde(default)]
    pub max_position_deg: Option<f64>,

    /// Move profiles: ascending travel thresholds, the final entry (without
    /// `max_travel_deg`) is the scan profile.
    pub profiles: Vec<ProfileConfig>,
}

impl AxisConfig {
    fn validate(&self, axis: Axis) -> Result<(), ConfigError> {
        if self.max_velocity_pps == 0 {
            return Err(ConfigError::Validation(format!(
                "{axis}: max_velocity_pps must be positive"
            )));
        }

        match axis {
            Axis::Azimuth => {
                if self.min_position_deg.is_some() || self.max_position_deg.is_some() {
                    return Err(ConfigError::Validation(
                        "azimuth: position limits are not applicable; azimuth wraps".into(),
                    ));
                }
            }
            Axis::Elevation => {
                let (min, max) = match (self.min_position_deg, self.max_position_deg) {
                    (Some(min), Some(max)) => (min, max),
                    _ => {
                        return Err(ConfigError::Validation(
                            "elevation: min_position_deg and max_position_deg are required"
                                .into(),
                        ))
                    }
                };
                if min >= max {
                    return Err(ConfigError::Validation(format!(
                        "elevation: min_position_deg {min} must be below max_position_deg {max}"
                    )));
                }
            }
        }

        if self.profiles.len() < 2 {
            return Err(ConfigError::Validation(format!(
                "{axis}: at least one point profile and the scan profile are required"
            )));
        }
        let (scan, points) = self.profiles.split_last().expect("len checked above");
        if scan.max_travel_deg.is_some() {
            return Err(ConfigError::Validation(format!(
                "{axis}: the last profile is the scan slot and must not set max_travel_deg"
            )));
        }
        let mut prev = f64::NEG_INFINITY;
        for (i, profile) in points.iter().enumerate() {
            let threshold = profile.max_travel_deg.ok_or_else(|| {
                ConfigError::Validation(format!(
                    "{axis}: point profile {i} is missing max_travel_deg"
                ))
            })?;
            if threshold <= prev {
                return Err(ConfigError::Validation(format!(
                    "{axis}: profile thresholds must be strictly increasing \
                     ({threshold} after {prev})"
                )));
            }
            prev = threshold;
        }
        for (i, profile) in self.profiles.iter().enumerate() {
            if profile.velocity_pps == 0 {
                return Err(ConfigError::Validation(format!(
                    "{axis}: profile {i} velocity_pps must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// One profile parameter set, programmed on the drive when selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Selection threshold [deg]: this profile serves moves up to this
    /// travel. Absent exactly for the scan slot.
    #[serde(default)]
    pub max_travel_deg: Option<f64>,

    /// Profile velocity [pulses/s].
    pub velocity_pps: u32,

    /// Profile acceleration [drive units].
    pub acceleration: u32,

    /// Profile deceleration [drive units].
    pub deceleration: u32,
}

// ─── Bring-Up Register Writes ───────────────────────────────────────

/// One object dictionary write applied at bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWrite {
    /// Object index.
    pub index: u16,
    /// Subindex (default 0).
    #[serde(default)]
    pub sub: u8,
    /// Value, encoded little-endian at `width` bytes.
    pub value: u32,
    /// Write width in bytes: 1, 2 or 4 (default 4).
    #[serde(default = "default_write_width")]
    pub width: u8,
}

fn default_write_width() -> u8 {
    4
}

/// The bring-up register map handed to the core by the configuration
/// front-end (already parsed; the core never reads the file format).
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    pub writes: Vec<RegisterWrite>,
}

impl RegisterMap {
    /// Build from `(index, value)` pairs, as produced by the external
    /// config-file parser. All writes default to 4-byte width, subindex 0.
    pub fn from_pairs<I: IntoIterator<Item = (u16, u32)>>(pairs: I) -> Self {
        Self {
            writes: pairs
                .into_iter()
                .map(|(index, value)| RegisterWrite {
                    index,
                    sub: 0,
                    value,
                    width: 4,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

impl From<&CoreConfig> for RegisterMap {
    fn from(config: &CoreConfig) -> Self {
        Self {
            writes: config.init_writes.clone(),
        }
    }
}

//! State enums for the control core.
//!
//! All enums use compact reprs with `from_u8`-style constructors so they can
//! travel through fixed-layout snapshots unchanged. `AxisState` is the
//! supervisory projection of the drive state; `SystemState` aggregates both
//! axes plus the scheduler lifecycle.

use serde::{Deserialize, Serialize};

// ─── Per-Axis State ─────────────────────────────────────────────────

/// Supervisory state of one axis, derived each cycle from the drive
/// statusword (plus a warning latch owned by the core).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AxisState {
    /// Drive not powered or switch-on disabled.
    Disabled = 0,
    /// Ready to switch on; bring-up in progress.
    Init = 1,
    /// Switched on, motion not enabled.
    Idle = 2,
    /// Operation enabled; setpoints are being tracked.
    Enabled = 3,
    /// Quick-stop active.
    Stop = 4,
    /// Degraded but operable (e.g. a profile parameter write failed).
    Warning = 5,
    /// Drive fault latched.
    Error = 6,
}

impl AxisState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Disabled),
            1 => Some(Self::Init),
            2 => Some(Self::Idle),
            3 => Some(Self::Enabled),
            4 => Some(Self::Stop),
            5 => Some(Self::Warning),
            6 => Some(Self::Error),
            _ => None,
        }
    }

    /// True for states that count as a latched failure.
    #[inline]
    pub const fn is_faulted(&self) -> bool {
        matches!(self, Self::Stop | Self::Error)
    }
}

impl Default for AxisState {
    fn default() -> Self {
        Self::Disabled
    }
}

impl std::fmt::Display for AxisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disabled => "DISABLED",
            Self::Init => "INIT",
            Self::Idle => "IDLE",
            Self::Enabled => "ENABLED",
            Self::Stop => "STOP",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

// ─── System State ───────────────────────────────────────────────────

/// Aggregate state of the whole positioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SystemState {
    /// Core not brought up (or released).
    Off = 0,
    /// Bring-up in progress; at least one axis not yet idle.
    Init = 1,
    /// Both axes idle and operable.
    Ready = 2,
    /// At least one axis executing a move.
    Processing = 3,
    /// At least one axis degraded, none faulted.
    Warning = 4,
    /// At least one axis stopped or faulted.
    Error = 5,
    /// Unrecoverable runtime failure (bus link lost).
    FatalError = 6,
}

impl SystemState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::Init),
            2 => Some(Self::Ready),
            3 => Some(Self::Processing),
            4 => Some(Self::Warning),
            5 => Some(Self::Error),
            6 => Some(Self::FatalError),
            _ => None,
        }
    }

    /// Aggregate two axis states into the system state.
    ///
    /// Precedence: ERROR (any axis stopped/faulted) > WARNING > PROCESSING
    /// (any axis enabled) > INIT (any axis still coming up) > READY.
    /// OFF and FATAL_ERROR are lifecycle states owned by the scheduler and
    /// never produced by this rule.
    pub fn aggregate(axes: &[AxisState]) -> Self {
        if axes.iter().any(|s| s.is_faulted()) {
            Self::Error
        } else if axes.iter().any(|s| *s == AxisState::Warning) {
            Self::Warning
        } else if axes.iter().any(|s| *s == AxisState::Enabled) {
            Self::Processing
        } else if axes
            .iter()
            .any(|s| matches!(s, AxisState::Disabled | AxisState::Init))
        {
            Self::Init
        } else {
            Self::Ready
        }
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::Off
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Off => "OFF",
            Self::Init => "INIT",
            Self::Ready => "READY",
            Self::Processing => "PROCESSING",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::FatalError => "FATAL_ERROR",
        };
        f.write_str(name)
    }
}

// ─── Operation Mode ─────────────────────────────────────────────────

/// Drive operation mode, using the raw CiA-402 mode-of-operation values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum OperationMode {
    /// No mode commanded.
    NotSet = 0,
    /// Profile position: move to a target and hold it.
    Point = 1,
    /// Profile velocity: rotate at constant speed.
    Scan = 3,
}

impl OperationMode {
    /// Raw value written to the mode-of-operation object.
    #[inline]
    pub const fn raw(self) -> i8 {
        self as i8
    }

    /// Decode a mode-of-operation-display value. Only the three modes the
    /// core commands are recognized.
    #[inline]
    pub const fn from_raw(value: i8) -> Option<Self> {
        match value {
            0 => Some(Self::NotSet),
            1 => Some(Self::Point),
            3 => Some(Self::Scan),
            _ => None,
        }
    }
}

impl Default for OperationMode {
    fn default() -> Self {
        Self::NotSet
    }
}

// ─── Move Profile Selector ──────────────────────────────────────────

/// Index of the profile parameter set currently programmed on a drive.
///
/// Point profiles occupy the low indices, ordered by ascending travel
/// threshold; the highest index is reserved for scan.
pub type MoveMode = u8;

/// Sentinel: no profile has been programmed since bring-up.
pub const MOVE_MODE_UNSET: MoveMode = u8::MAX;

// ─── Parameter Ownership ────────────────────────────────────────────

/// Who programs the drive profile parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ParamsMode {
    /// The core reprograms profile parameters before each commanded move.
    Automatic = 0,
    /// The user owns drive parameters; the core never writes them.
    Manual = 1,
}

impl Default for ParamsMode {
    fn default() -> Self {
        Self::Automatic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_state_roundtrip() {
        for v in 0..=6u8 {
            let state = AxisState::from_u8(v).unwrap();
            assert_eq!(state as u8, v);
        }
        assert!(AxisState::from_u8(7).is_none());
    }

    #[test]
    fn operation_mode_raw_values() {
        assert_eq!(OperationMode::NotSet.raw(), 0);
        assert_eq!(OperationMode::Point.raw(), 1);
        assert_eq!(OperationMode::Scan.raw(), 3);
        assert_eq!(OperationMode::from_raw(3), Some(OperationMode::Scan));
        assert_eq!(OperationMode::from_raw(2), None);
    }

    #[test]
    fn aggregate_precedence() {
        use AxisState::*;
        assert_eq!(SystemState::aggregate(&[Idle, Idle]), SystemState::Ready);
        assert_eq!(SystemState::aggregate(&[Enabled, Idle]), SystemState::Processing);
        assert_eq!(SystemState::aggregate(&[Disabled, Idle]), SystemState::Init);
        assert_eq!(SystemState::aggregate(&[Init, Enabled]), SystemState::Processing);
        assert_eq!(SystemState::aggregate(&[Warning, Enabled]), SystemState::Warning);
        assert_eq!(SystemState::aggregate(&[Error, Idle]), SystemState::Error);
        assert_eq!(SystemState::aggregate(&[Stop, Warning]), SystemState::Error);
        assert_eq!(SystemState::aggregate(&[Error, Warning]), SystemState::Error);
    }
}

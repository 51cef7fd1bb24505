//! CiA-402 drive state machine driver.
//!
//! Decodes the statusword into the observed drive state and emits the
//! controlword for the single next transition toward a commanded target
//! state, never skipping intermediate states. Fault reset is edge
//! triggered: the reset bit must rise from zero, so the driver emits a
//! two-tick pulse (bit high, then low) before resuming the normal walk.

use antpos::axis::Axis;
use antpos::state::AxisState;
use bitflags::bitflags;

bitflags! {
    /// Statusword bits relevant to the core.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusBits: u16 {
        const READY_TO_SWITCH_ON = 0x0001;
        const SWITCHED_ON        = 0x0002;
        const OPERATION_ENABLED  = 0x0004;
        const FAULT              = 0x0008;
        const VOLTAGE_ENABLED    = 0x0010;
        const QUICK_STOP         = 0x0020;
        const SWITCH_ON_DISABLED = 0x0040;
        const WARNING            = 0x0080;
        const REMOTE             = 0x0200;
        const TARGET_REACHED     = 0x0400;
    }
}

/// Statusword mask isolating the state pattern (bits 0..3, 5, 6).
pub const STATE_MASK: u16 = 0x6F;

/// Controlword command patterns.
pub mod ctrl {
    /// Enable voltage + quick stop: transition toward ready-to-switch-on.
    pub const SHUTDOWN: u16 = 0x0006;
    /// Shutdown + switch-on: transition toward switched-on.
    pub const SWITCH_ON: u16 = 0x0007;
    /// Switch-on + enable-operation.
    pub const ENABLE_OPERATION: u16 = 0x000F;
    /// Drop main voltage: transition toward switch-on-disabled.
    pub const DISABLE_VOLTAGE: u16 = 0x0000;
    /// Quick stop request.
    pub const QUICK_STOP: u16 = 0x0002;
    /// Fault reset bit; acts on the rising edge only.
    pub const FAULT_RESET: u16 = 0x0080;
    /// New-setpoint bit (profile position mode).
    pub const NEW_SETPOINT: u16 = 0x0010;
}

// ─── Observed State ─────────────────────────────────────────────────

/// The CiA-402 drive state as observed in the statusword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cia402State {
    NotReadyToSwitchOn,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
    FaultReactionActive,
    Fault,
}

impl Cia402State {
    /// Decode from a statusword via the masked pattern table.
    ///
    /// Patterns outside the table decode as not-ready: some drives show
    /// transient patterns during power-board precharge, and treating them
    /// as a fault would latch spurious errors.
    pub fn decode(statusword: u16) -> Self {
        match statusword & STATE_MASK {
            0x00 => Self::NotReadyToSwitchOn,
            0x40 => Self::SwitchOnDisabled,
            0x21 => Self::ReadyToSwitchOn,
            0x23 => Self::SwitchedOn,
            0x27 => Self::OperationEnabled,
            0x07 => Self::QuickStopActive,
            0x0F => Self::FaultReactionActive,
            0x08 => Self::Fault,
            _ => Self::NotReadyToSwitchOn,
        }
    }

    /// Supervisory projection of the drive state.
    pub const fn axis_state(self) -> AxisState {
        match self {
            Self::NotReadyToSwitchOn | Self::SwitchOnDisabled => AxisState::Disabled,
            Self::ReadyToSwitchOn => AxisState::Init,
            Self::SwitchedOn => AxisState::Idle,
            Self::OperationEnabled => AxisState::Enabled,
            Self::QuickStopActive => AxisState::Stop,
            Self::FaultReactionActive | Self::Fault => AxisState::Error,
        }
    }

    /// True while a fault is latched or being reacted to.
    #[inline]
    pub const fn is_fault(self) -> bool {
        matches!(self, Self::Fault | Self::FaultReactionActive)
    }
}

// ─── Target State ───────────────────────────────────────────────────

/// The state the mode controller wants an axis in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Switch-on-disabled: voltage off.
    Disabled,
    /// Switched-on: powered, not tracking setpoints.
    Idle,
    /// Operation-enabled: tracking setpoints.
    Enabled,
}

/// Controlword for the single next transition from `observed` toward
/// `target`. Fault states are handled by the caller (the edge-triggered
/// reset); here they fall through to disable-voltage.
pub const fn next_controlword(observed: Cia402State, target: TargetState) -> u16 {
    use Cia402State::*;
    use TargetState::*;

    match (observed, target) {
        // Toward Disabled: walk down one state at a time.
        (OperationEnabled, Disabled) => ctrl::SWITCH_ON,
        (SwitchedOn, Disabled) => ctrl::SHUTDOWN,
        (ReadyToSwitchOn, Disabled)
        | (QuickStopActive, Disabled)
        | (SwitchOnDisabled, Disabled)
        | (NotReadyToSwitchOn, Disabled)
        | (Fault, Disabled)
        | (FaultReactionActive, Disabled) => ctrl::DISABLE_VOLTAGE,

        // Toward Idle (switched-on).
        (NotReadyToSwitchOn, Idle) | (SwitchOnDisabled, Idle) => ctrl::SHUTDOWN,
        (ReadyToSwitchOn, Idle) | (SwitchedOn, Idle) | (OperationEnabled, Idle) => {
            ctrl::SWITCH_ON
        }
        (QuickStopActive, Idle) => ctrl::DISABLE_VOLTAGE,
        (Fault, Idle) | (FaultReactionActive, Idle) => ctrl::DISABLE_VOLTAGE,

        // Toward Enabled (operation-enabled).
        (NotReadyToSwitchOn, Enabled) | (SwitchOnDisabled, Enabled) => ctrl::SHUTDOWN,
        (ReadyToSwitchOn, Enabled) => ctrl::SWITCH_ON,
        (SwitchedOn, Enabled)
        | (OperationEnabled, Enabled)
        | (QuickStopActive, Enabled) => ctrl::ENABLE_OPERATION,
        (Fault, Enabled) | (FaultReactionActive, Enabled) => ctrl::DISABLE_VOLTAGE,
    }
}

// ─── Per-Axis Driver ────────────────────────────────────────────────

/// Phase of the two-tick new-setpoint pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetpointPulse {
    Inactive,
    /// Bit held low this tick so the next tick's high edge is seen.
    Low,
    /// Bit raised this tick.
    High,
}

/// Walks one drive's state machine toward the commanded target state.
#[derive(Debug)]
pub struct AxisDriver {
    axis: Axis,
    target: TargetState,
    observed: Cia402State,
    last_statusword: u16,
    last_controlword: u16,
    pulse: SetpointPulse,
}

impl AxisDriver {
    pub fn new(axis: Axis) -> Self {
        Self {
            axis,
            target: TargetState::Idle,
            observed: Cia402State::NotReadyToSwitchOn,
            last_statusword: 0,
            last_controlword: ctrl::DISABLE_VOLTAGE,
            pulse: SetpointPulse::Inactive,
        }
    }

    #[inline]
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Update the observed state from a fresh statusword. Runs before the
    /// mode controller each tick.
    pub fn observe(&mut self, statusword: u16) {
        self.last_statusword = statusword;
        self.observed = Cia402State::decode(statusword);
    }

    /// Target-reached as asserted by the drive (statusword bit 10).
    #[inline]
    pub fn target_reached(&self) -> bool {
        StatusBits::from_bits_truncate(self.last_statusword).contains(StatusBits::TARGET_REACHED)
    }

    #[inline]
    pub fn observed(&self) -> Cia402State {
        self.observed
    }

    #[inline]
    pub fn target(&self) -> TargetState {
        self.target
    }

    pub fn set_target(&mut self, target: TargetState) {
        self.target = target;
    }

    /// Last controlword emitted.
    #[inline]
    pub fn last_controlword(&self) -> u16 {
        self.last_controlword
    }

    /// Schedule the new-setpoint pulse: bit 4 low on the next emitted
    /// controlword, high on the one after.
    pub fn request_setpoint_pulse(&mut self) {
        self.pulse = SetpointPulse::Low;
    }

    /// Produce the controlword for this tick. Runs after the mode
    /// controller each tick.
    pub fn emit(&mut self) -> u16 {
        let mut word = if self.last_controlword & ctrl::FAULT_RESET != 0 {
            // Finish the reset pulse: the bit must fall before it can rise
            // again.
            ctrl::DISABLE_VOLTAGE
        } else if self.observed.is_fault() && self.target != TargetState::Disabled {
            ctrl::FAULT_RESET
        } else {
            next_controlword(self.observed, self.target)
        };

        // The new-setpoint bit rides the enable-operation word only.
        if word == ctrl::ENABLE_OPERATION
            && self.observed == Cia402State::OperationEnabled
            && self.target == TargetState::Enabled
        {
            match self.pulse {
                SetpointPulse::Inactive => {}
                SetpointPulse::Low => self.pulse = SetpointPulse::High,
                SetpointPulse::High => {
                    word |= ctrl::NEW_SETPOINT;
                    self.pulse = SetpointPulse::Inactive;
                }
            }
        } else {
            self.pulse = SetpointPulse::Inactive;
        }

        self.last_controlword = word;
        word
    }
}

//! Simulated fieldbus and drives.
//!
//! A behavioral model of the two-drive bus: statuswords answer
//! controlwords per the CiA-402 transition rules (one state per cycle),
//! profile-position moves integrate toward the latched target at the
//! programmed profile velocity, and profile-velocity mode tracks the
//! commanded speed. Fault injection and working-counter drops drive the
//! failure paths in tests; the binary runs against it when no hardware is
//! present.

use std::collections::HashMap;

use antpos::axis::{Axis, AXIS_COUNT};
use antpos::error::BusError;
use antpos::od;

use crate::bus::FieldbusPort;
use crate::pdo::{AxisRx, AxisTx, AXIS_RX_LEN, AXIS_TX_LEN};

/// Default simulated encoder: 20-bit absolute, 2^20 pulses per revolution.
pub const SIM_ENCODER_PPR: u32 = 1 << 20;

/// Nominal torque reported while enabled [0.1 %].
const SIM_TORQUE: i16 = 150;

// ─── Drive Model ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveState {
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
    Fault,
}

/// One simulated CiA-402 servo drive.
#[derive(Debug)]
pub struct SimDrive {
    state: DriveState,
    prev_controlword: u16,
    mode: i8,
    /// Position [pulses], integrated as f64 to keep sub-pulse progress.
    position: f64,
    velocity: f64,
    target_position: i32,
    target_velocity: i32,
    latched_target: Option<i32>,
    target_reached: bool,
    profile_velocity: u32,
    error_code: u16,
    object_store: HashMap<(u16, u8), u32>,
}

impl SimDrive {
    fn new() -> Self {
        Self {
            state: DriveState::SwitchOnDisabled,
            prev_controlword: 0,
            mode: 0,
            position: 0.0,
            velocity: 0.0,
            target_position: 0,
            target_velocity: 0,
            latched_target: None,
            target_reached: false,
            profile_velocity: 100_000,
            error_code: 0,
            object_store: HashMap::new(),
        }
    }

    /// Latch a drive fault, as if tripped by the power stage.
    pub fn inject_fault(&mut self, code: u16) {
        self.state = DriveState::Fault;
        self.error_code = code;
        self.velocity = 0.0;
        self.latched_target = None;
    }

    /// Current position [pulses].
    pub fn position(&self) -> i32 {
        self.position as i32
    }

    /// Teleport the axis (test setup).
    pub fn set_position(&mut self, pulses: i32) {
        self.position = f64::from(pulses);
    }

    fn apply(&mut self, tx: &AxisTx, dt_ns: u64) {
        self.mode = tx.mode_of_operation;
        self.target_position = tx.target_position;
        self.target_velocity = tx.target_velocity;
        self.step_state(tx.controlword);
        self.prev_controlword = tx.controlword;
        self.integrate(dt_ns);
    }

    /// One state machine step per cycle; never skips intermediate states.
    fn step_state(&mut self, cw: u16) {
        if self.state == DriveState::Fault {
            // Only a rising fault-reset edge leaves the fault state.
            if cw & 0x0080 != 0 && self.prev_controlword & 0x0080 == 0 {
                self.state = DriveState::SwitchOnDisabled;
                self.error_code = 0;
            }
            return;
        }

        let enable_voltage = cw & 0x0002 != 0;
        let quick_stop_inactive = cw & 0x0004 != 0;
        let switch_on = cw & 0x0001 != 0;
        let enable_op = cw & 0x0008 != 0;

        use DriveState::*;
        self.state = if !enable_voltage {
            SwitchOnDisabled
        } else if !quick_stop_inactive {
            match self.state {
                OperationEnabled => QuickStopActive,
                other => other,
            }
        } else if !switch_on {
            // Shutdown command.
            match self.state {
                SwitchOnDisabled | SwitchedOn | OperationEnabled | QuickStopActive => {
                    ReadyToSwitchOn
                }
                other => other,
            }
        } else if !enable_op {
            // Switch-on command.
            match self.state {
                ReadyToSwitchOn | OperationEnabled => SwitchedOn,
                other => other,
            }
        } else {
            // Enable-operation command.
            match self.state {
                ReadyToSwitchOn => SwitchedOn,
                SwitchedOn | QuickStopActive => OperationEnabled,
                other => other,
            }
        };

        // Profile position: the new-setpoint rising edge latches the target.
        if self.state == DriveState::OperationEnabled
            && self.mode == 1
            && cw & 0x0010 != 0
            && self.prev_controlword & 0x0010 == 0
        {
            self.latched_target = Some(self.target_position);
            self.target_reached = false;
        }
    }

    fn integrate(&mut self, dt_ns: u64) {
        if self.state != DriveState::OperationEnabled {
            self.velocity = 0.0;
            return;
        }
        let dt = dt_ns as f64 / 1e9;
        match self.mode {
            1 => {
                if let Some(target) = self.latched_target {
                    let remaining = f64::from(target) - self.position;
                    let step = f64::from(self.profile_velocity) * dt;
                    if remaining.abs() <= step {
                        self.position = f64::from(target);
                        self.velocity = 0.0;
                        self.target_reached = true;
                    } else {
                        self.velocity = step.copysign(remaining) / dt;
                        self.position += step.copysign(remaining);
                    }
                }
            }
            3 => {
                self.velocity = f64::from(self.target_velocity);
                self.position += self.velocity * dt;
            }
            _ => self.velocity = 0.0,
        }
    }

    fn statusword(&self) -> u16 {
        // Voltage-enabled, remote and quick-stop-inactive bits composed the
        // way the real drives report them.
        let base = match self.state {
            DriveState::SwitchOnDisabled => 0x0250,
            DriveState::ReadyToSwitchOn => 0x0231,
            DriveState::SwitchedOn => 0x0233,
            DriveState::OperationEnabled => 0x0237,
            DriveState::QuickStopActive => 0x0217,
            DriveState::Fault => 0x0218,
        };
        if self.target_reached {
            base | 0x0400
        } else {
            base
        }
    }

    fn rx(&self) -> AxisRx {
        AxisRx {
            statusword: self.statusword(),
            mode_display: self.mode,
            position_actual: self.position as i32,
            velocity_actual: self.velocity as i32,
            torque_actual: if self.state == DriveState::OperationEnabled {
                SIM_TORQUE
            } else {
                0
            },
            error_code: self.error_code,
            temperatures: [41, 38, 35],
            digital_inputs: 0,
        }
    }
}

// ─── Bus Model ──────────────────────────────────────────────────────

/// Simulated two-drive fieldbus with deterministic distributed clock.
pub struct SimBus {
    drives: [SimDrive; AXIS_COUNT],
    period_ns: u64,
    dc_ns: u64,
    exchange_count: u64,
    wkc_drop: u32,
    stalls: Vec<(u64, std::time::Duration)>,
    sdo_fail_index: Option<u16>,
}

impl SimBus {
    /// A bus advancing its distributed clock by `period_ns` per exchange.
    pub fn new(period_ns: u64) -> Self {
        Self {
            drives: [SimDrive::new(), SimDrive::new()],
            period_ns,
            // Arbitrary non-zero epoch so clock correlation has an offset
            // to find.
            dc_ns: 737_000_000,
            exchange_count: 0,
            wkc_drop: 0,
            stalls: Vec::new(),
            sdo_fail_index: None,
        }
    }

    pub fn drive_mut(&mut self, axis: Axis) -> &mut SimDrive {
        &mut self.drives[axis.index()]
    }

    /// Corrupt the working counter for the next `cycles` exchanges.
    pub fn drop_working_counter(&mut self, cycles: u32) {
        self.wkc_drop = cycles;
    }

    /// Block inside exchange number `index` (0-based) for `stall`, as if
    /// the bus turnaround suddenly took that long. One-shot.
    pub fn stall_exchange(&mut self, index: u64, stall: std::time::Duration) {
        self.stalls.push((index, stall));
    }

    /// Make every SDO write to `index` fail.
    pub fn fail_sdo_writes_to(&mut self, index: u16) {
        self.sdo_fail_index = Some(index);
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

impl FieldbusPort for SimBus {
    fn slave_count(&self) -> usize {
        AXIS_COUNT
    }

    fn expected_wkc(&self) -> u16 {
        3 * AXIS_COUNT as u16
    }

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<u16, BusError> {
        let index = self.exchange_count;
        self.exchange_count += 1;
        if let Some(at) = self.stalls.iter().position(|&(when, _)| when == index) {
            let (_, stall) = self.stalls.swap_remove(at);
            std::thread::sleep(stall);
        }

        self.dc_ns += self.period_ns;

        if self.wkc_drop > 0 {
            self.wkc_drop -= 1;
            return Ok(0);
        }

        for axis in Axis::ALL {
            let i = axis.index();
            let tx_at = i * AXIS_TX_LEN;
            let frame = AxisTx::unpack(&tx[tx_at..tx_at + AXIS_TX_LEN]);
            self.drives[i].apply(&frame, self.period_ns);

            let rx_at = i * AXIS_RX_LEN;
            self.drives[i].rx().pack(&mut rx[rx_at..rx_at + AXIS_RX_LEN]);
        }
        Ok(self.expected_wkc())
    }

    fn sdo_read(&mut self, axis: Axis, index: u16, sub: u8) -> Result<Vec<u8>, BusError> {
        let drive = &self.drives[axis.index()];
        let data = match (index, sub) {
            (od::POSITION_ENCODER_RESOLUTION, 1) => SIM_ENCODER_PPR.to_le_bytes().to_vec(),
            (od::DEVICE_NAME, 0) => match axis {
                Axis::Azimuth => b"SIM-DRIVE-AZ".to_vec(),
                Axis::Elevation => b"SIM-DRIVE-EL".to_vec(),
            },
            (od::HARDWARE_VERSION, 0) => b"1.00".to_vec(),
            (od::SOFTWARE_VERSION, 0) => b"0.4.0-sim".to_vec(),
            (od::ERROR_CODE, 0) => drive.error_code.to_le_bytes().to_vec(),
            _ => drive
                .object_store
                .get(&(index, sub))
                .copied()
                .unwrap_or(0)
                .to_le_bytes()
                .to_vec(),
        };
        Ok(data)
    }

    fn sdo_write(
        &mut self,
        axis: Axis,
        index: u16,
        sub: u8,
        data: &[u8],
    ) -> Result<(), BusError> {
        if self.sdo_fail_index == Some(index) {
            return Err(BusError::Sdo {
                axis,
                index,
                sub,
                dir: "write",
                reason: "abort 0x06010002".into(),
            });
        }
        let mut bytes = [0u8; 4];
        bytes[..data.len().min(4)].copy_from_slice(&data[..data.len().min(4)]);
        let value = u32::from_le_bytes(bytes);

        let drive = &mut self.drives[axis.index()];
        if index == od::PROFILE_VELOCITY {
            drive.profile_velocity = value;
        }
        drive.object_store.insert((index, sub), value);
        Ok(())
    }

    fn dc_time_ns(&mut self) -> u64 {
        self.dc_ns
    }
}

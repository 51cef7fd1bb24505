//! Status snapshot types published by the control core.
//!
//! `SystemStatus` is `Copy` and fixed-size so the publisher can memcpy it
//! into the lock-free status cell; readers always observe a whole snapshot,
//! never a mix of two cycles. Strings that ride the snapshot use the
//! fixed-capacity [`FaultText`].

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

use crate::axis::{Axis, AXIS_COUNT};
use crate::state::{AxisState, MoveMode, OperationMode, ParamsMode, SystemState, MOVE_MODE_UNSET};

// ─── Fixed-Capacity Fault Text ──────────────────────────────────────

/// Capacity of the inline fault description, bytes.
pub const FAULT_TEXT_CAP: usize = 63;

/// A short human-readable fault description stored inline, so snapshots
/// stay `Copy` and the publisher never allocates.
#[derive(Clone, Copy)]
pub struct FaultText {
    len: u8,
    buf: [u8; FAULT_TEXT_CAP],
}

const_assert!(std::mem::size_of::<FaultText>() == FAULT_TEXT_CAP + 1);

impl FaultText {
    /// The empty text.
    pub const EMPTY: Self = Self {
        len: 0,
        buf: [0; FAULT_TEXT_CAP],
    };

    /// Build from a string, truncating at a UTF-8 boundary if needed.
    pub fn new(text: &str) -> Self {
        let mut out = Self::EMPTY;
        out.set(text);
        out
    }

    /// Replace the contents, truncating at a UTF-8 boundary if needed.
    pub fn set(&mut self, text: &str) {
        let mut end = text.len().min(FAULT_TEXT_CAP);
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        self.buf[..end].copy_from_slice(&text.as_bytes()[..end]);
        self.len = end as u8;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_str(&self) -> &str {
        // Only ever filled from &str at a char boundary.
        std::str::from_utf8(&self.buf[..self.len as usize]).unwrap_or("")
    }
}

impl Default for FaultText {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl PartialEq for FaultText {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for FaultText {}

impl std::fmt::Debug for FaultText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl std::fmt::Display for FaultText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Write for FaultText {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        let mut end = s.len().min(FAULT_TEXT_CAP - self.len as usize);
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        let start = self.len as usize;
        self.buf[start..start + end].copy_from_slice(&s.as_bytes()[..end]);
        self.len += end as u8;
        Ok(())
    }
}

// ─── Per-Axis Status ────────────────────────────────────────────────

/// Everything observable about one axis, sampled in a single cycle.
///
/// Positions and velocities are carried both raw (encoder pulses) and
/// derived (degrees). Torque is in 0.1 % of rated units, as reported by
/// the drive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisStatus {
    /// Supervisory axis state.
    pub state: AxisState,
    /// Commanded operation mode.
    pub op_mode: OperationMode,
    /// Profile set currently programmed on the drive.
    pub move_mode: MoveMode,
    /// Who owns the drive profile parameters.
    pub params_mode: ParamsMode,

    /// Target position [pulses] (point mode).
    pub tgt_pos: i32,
    /// Actual position [pulses].
    pub cur_pos: i32,
    /// Demand position [pulses]: the setpoint most recently handed to the
    /// drive interpolator.
    pub dmd_pos: i32,
    /// Actual position [degrees].
    pub cur_pos_deg: f64,

    /// Target velocity [pulses/s].
    pub tgt_vel: i32,
    /// Actual velocity [pulses/s].
    pub cur_vel: i32,
    /// Demand velocity [pulses/s].
    pub dmd_vel: i32,
    /// Actual velocity [degrees/s].
    pub cur_vel_deg: f64,

    /// Actual torque [0.1 % of rated].
    pub cur_torque: i16,
    /// Drive temperature sensors [°C].
    pub temperatures: [i16; 3],

    /// Last controlword sent to the drive.
    pub ctrlword: u16,
    /// Last statusword received from the drive.
    pub statusword: u16,
    /// Raw CiA-402 error code (0 when healthy).
    pub error_code: u16,
}

impl Default for AxisStatus {
    fn default() -> Self {
        Self {
            state: AxisState::Disabled,
            op_mode: OperationMode::NotSet,
            move_mode: MOVE_MODE_UNSET,
            params_mode: ParamsMode::Automatic,
            tgt_pos: 0,
            cur_pos: 0,
            dmd_pos: 0,
            cur_pos_deg: 0.0,
            tgt_vel: 0,
            cur_vel: 0,
            dmd_vel: 0,
            cur_vel_deg: 0.0,
            cur_torque: 0,
            temperatures: [0; 3],
            ctrlword: 0,
            statusword: 0,
            error_code: 0,
        }
    }
}

// ─── Cycle Timing ───────────────────────────────────────────────────

/// Running min/max/current cycle timing, all in nanoseconds.
///
/// Minimum fields start at `i64::MAX` so the first sample always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTimeInfo {
    /// Wake-to-wake period of the last cycle.
    pub period_ns: i64,
    pub period_min_ns: i64,
    pub period_max_ns: i64,

    /// Execution time of the last cycle body.
    pub exec_ns: i64,
    pub exec_min_ns: i64,
    pub exec_max_ns: i64,

    /// Wake latency (actual wake - scheduled instant) of the last cycle.
    pub latency_ns: i64,
    pub latency_min_ns: i64,
    pub latency_max_ns: i64,

    /// Cycles skipped because the loop fell more than half a period behind.
    pub overruns: u64,
    /// Total cycles executed.
    pub cycles: u64,
}

impl CycleTimeInfo {
    pub const fn new() -> Self {
        Self {
            period_ns: 0,
            period_min_ns: i64::MAX,
            period_max_ns: 0,
            exec_ns: 0,
            exec_min_ns: i64::MAX,
            exec_max_ns: 0,
            latency_ns: 0,
            latency_min_ns: i64::MAX,
            latency_max_ns: 0,
            overruns: 0,
            cycles: 0,
        }
    }

    /// Record one cycle. O(1), no allocation.
    pub fn record(&mut self, period_ns: i64, exec_ns: i64, latency_ns: i64) {
        self.cycles += 1;

        self.period_ns = period_ns;
        self.period_min_ns = self.period_min_ns.min(period_ns);
        self.period_max_ns = self.period_max_ns.max(period_ns);

        self.exec_ns = exec_ns;
        self.exec_min_ns = self.exec_min_ns.min(exec_ns);
        self.exec_max_ns = self.exec_max_ns.max(exec_ns);

        self.latency_ns = latency_ns;
        self.latency_min_ns = self.latency_min_ns.min(latency_ns);
        self.latency_max_ns = self.latency_max_ns.max(latency_ns);
    }
}

impl Default for CycleTimeInfo {
    fn default() -> Self {
        Self::new()
    }
}

// ─── System Status ──────────────────────────────────────────────────

/// One coherent snapshot of the whole positioner, produced once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SystemStatus {
    /// Per-axis status, indexed by [`Axis::index`].
    pub axes: [AxisStatus; AXIS_COUNT],
    /// Aggregate system state.
    pub state: SystemState,
    /// Distributed-clock time of the cycle that produced this snapshot [ns].
    pub reftime_ns: u64,
    /// Host monotonic time of the same cycle [ns].
    pub apptime_ns: u64,
    /// Upper bound on |host clock - bus clock| after offset removal [ns].
    pub dcsync_ns: u64,
    /// Cycle timing statistics as of this snapshot.
    pub timing: CycleTimeInfo,
    /// Description of the latest system-level fault, empty when healthy.
    pub error_str: FaultText,
}

impl SystemStatus {
    #[inline]
    pub fn axis(&self, axis: Axis) -> &AxisStatus {
        &self.axes[axis.index()]
    }

    #[inline]
    pub fn axis_mut(&mut self, axis: Axis) -> &mut AxisStatus {
        &mut self.axes[axis.index()]
    }
}

// ─── Static Device Info ─────────────────────────────────────────────

/// Static information about one drive, read once at bring-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AxisInfo {
    /// Encoder pulses per mechanical revolution.
    pub encoder_ppr: u32,
    /// Device name string from the object dictionary.
    pub dev_name: String,
    /// Hardware version string.
    pub hw_version: String,
    /// Software version string.
    pub sw_version: String,
}

/// Static information about the whole system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    pub axes: [AxisInfo; AXIS_COUNT],
}

impl SystemInfo {
    #[inline]
    pub fn axis(&self, axis: Axis) -> &AxisInfo {
        &self.axes[axis.index()]
    }
}

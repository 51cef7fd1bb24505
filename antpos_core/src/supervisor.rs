//! The supervisory API.
//!
//! [`Control`] is the narrow public surface over the privately-held cyclic
//! runner: construction performs bring-up and spawns the cyclic thread;
//! commands are validated here and deposited into the lock-free per-axis
//! mailboxes; status comes back through the snapshot cell. The handle is
//! `Sync` - any number of threads may command and observe concurrently
//! without ever blocking the cyclic thread.
//!
//! Commands submitted before a tick starts are visible to that tick;
//! commands submitted during a tick are picked up by the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use antpos::axis::{deg_to_pulses, wrap_pulses, Axis, AXIS_COUNT};
use antpos::command::NormalizedCommand;
use antpos::config::{CoreConfig, RegisterMap};
use antpos::error::{BringUpError, CommandError};
use antpos::status::{CycleTimeInfo, SystemInfo, SystemStatus};
use tracing::info;

use crate::bus::FieldbusPort;
use crate::cycle::{CycleRunner, Mailboxes};
use crate::status::StatusCell;

// ─── Validation Limits ──────────────────────────────────────────────

/// Pre-computed validation data for one axis.
#[derive(Debug, Clone, Copy)]
struct AxisLimits {
    max_velocity_pps: i32,
    /// Travel bounds [pulses]; `None` for the wrapping azimuth.
    bounds_pulses: Option<(i32, i32)>,
    encoder_ppr: u32,
}

/// Validate and normalize one raw command.
fn normalize(
    axis: Axis,
    limits: &AxisLimits,
    position_pulses: i32,
    velocity_pps: i32,
) -> Result<NormalizedCommand, CommandError> {
    if velocity_pps.unsigned_abs() > limits.max_velocity_pps.unsigned_abs() {
        return Err(CommandError::VelocityOutOfRange {
            axis,
            vel: velocity_pps,
            max: limits.max_velocity_pps,
        });
    }

    if velocity_pps == 0 {
        let pos = match limits.bounds_pulses {
            // Azimuth is periodic: any angle maps into one revolution.
            None => wrap_pulses(position_pulses, limits.encoder_ppr),
            // Elevation is travel-limited: clamp into the allowed range.
            Some((min, max)) => position_pulses.clamp(min, max),
        };
        Ok(NormalizedCommand::Point { pos })
    } else {
        Ok(NormalizedCommand::Scan { vel: velocity_pps })
    }
}

// ─── Control Handle ─────────────────────────────────────────────────

/// Thread-safe handle to a running control core.
///
/// Dropping the handle performs the orderly shutdown: both drives are
/// walked to switch-on-disabled (with a forced voltage-off after the
/// configured timeout) before the cyclic thread exits.
pub struct Control {
    mailboxes: Arc<Mailboxes>,
    cell: Arc<StatusCell<SystemStatus>>,
    stop: Arc<AtomicBool>,
    info: Arc<SystemInfo>,
    limits: [AxisLimits; AXIS_COUNT],
    thread: Option<JoinHandle<()>>,
}

impl Control {
    /// Bring the system up on `port` and start the cyclic thread.
    pub fn new<P: FieldbusPort + 'static>(
        config: &CoreConfig,
        registers: &RegisterMap,
        port: P,
    ) -> Result<Self, BringUpError> {
        let runner = CycleRunner::bring_up(config, registers, port)?;

        let mailboxes = runner.mailboxes();
        let cell = runner.status_cell();
        let stop = runner.stop_flag();
        let info = runner.system_info();

        let limits = [Axis::Azimuth, Axis::Elevation].map(|axis| {
            let axis_config = config.axis(axis);
            let ppr = info.axis(axis).encoder_ppr;
            let bounds = axis_config
                .min_position_deg
                .zip(axis_config.max_position_deg)
                .map(|(min, max)| (deg_to_pulses(min, ppr), deg_to_pulses(max, ppr)));
            AxisLimits {
                max_velocity_pps: axis_config.max_velocity_pps as i32,
                bounds_pulses: bounds,
                encoder_ppr: ppr,
            }
        });

        let thread = std::thread::Builder::new()
            .name("antpos-cycle".into())
            .spawn(move || runner.run())
            .map_err(|e| BringUpError::Thread(e.to_string()))?;

        info!("control core up, cyclic thread started");
        Ok(Self {
            mailboxes,
            cell,
            stop,
            info,
            limits,
            thread: Some(thread),
        })
    }

    /// Command a move: point positioning when `velocity_pps` is zero,
    /// constant-velocity scan otherwise. Azimuth positions wrap into one
    /// revolution; elevation positions clamp to the configured travel.
    pub fn set_mode_run(
        &self,
        axis: Axis,
        position_pulses: i32,
        velocity_pps: i32,
    ) -> Result<(), CommandError> {
        self.ensure_running()?;
        let cmd = normalize(
            axis,
            &self.limits[axis.index()],
            position_pulses,
            velocity_pps,
        )?;
        self.mailboxes.post(axis, cmd);
        Ok(())
    }

    /// Return an axis to idle. Also acknowledges a latched drive fault.
    pub fn set_mode_idle(&self, axis: Axis) -> Result<(), CommandError> {
        self.ensure_running()?;
        self.mailboxes.post(axis, NormalizedCommand::Idle);
        Ok(())
    }

    /// The latest coherent status snapshot.
    pub fn status(&self) -> SystemStatus {
        self.cell.read()
    }

    /// Static device information gathered at bring-up.
    pub fn system_info(&self) -> Arc<SystemInfo> {
        Arc::clone(&self.info)
    }

    /// Cycle timing statistics as of the latest snapshot.
    pub fn cycle_time_info(&self) -> CycleTimeInfo {
        self.cell.read().timing
    }

    /// Stop the cyclic thread after an orderly drive bring-down.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn ensure_running(&self) -> Result<(), CommandError> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(CommandError::NotRunning);
        }
        Ok(())
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Control {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

//! The cyclic scheduler.
//!
//! One real-time thread owns the bus and all per-axis state. Every period
//! it exchanges the process image, updates the drive state machines, runs
//! the mode controllers, pumps deferred parameter writes and publishes one
//! coherent status snapshot. Pacing uses an absolute schedule: tick `k`
//! runs at `base + k * period`, so execution jitter never accumulates into
//! drift. Falling more than half a period behind skips ticks (counted as
//! overruns) instead of bunching them.
//!
//! ## RT setup
//!
//! With the `rt` feature the thread locks memory, prefaults its stack,
//! pins itself to the configured core and switches to SCHED_FIFO before
//! entering the loop, and paces with `clock_nanosleep(TIMER_ABSTIME)`.
//! Without it, std timers pace the same absolute schedule; tests and the
//! simulated bus use that mode.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use antpos::axis::{pulses_to_deg, Axis, AXIS_COUNT};
use antpos::command::{CommandSlot, NormalizedCommand};
use antpos::config::{CoreConfig, RegisterMap, RtConfig};
use antpos::error::{BringUpError, BusError};
use antpos::od;
use antpos::state::{AxisState, SystemState};
use antpos::status::{AxisStatus, CycleTimeInfo, FaultText, SystemInfo, SystemStatus};
use tracing::{error, info, warn};

use crate::bus::{BusAdapter, FieldbusPort, RX_IMAGE_LEN, TX_IMAGE_LEN};
use crate::cia402::{ctrl, AxisDriver, Cia402State};
use crate::motion::ModeController;
use crate::params::{ParamApplier, PARAM_WRITE_FAULT_CODE};
use crate::pdo::{AxisRx, AxisTx, AXIS_RX_LEN, AXIS_TX_LEN};
use crate::status::StatusCell;

// ─── Command Mailboxes ──────────────────────────────────────────────

/// One lock-free command slot per axis.
#[derive(Debug, Default)]
pub struct Mailboxes {
    slots: [CommandSlot; AXIS_COUNT],
}

impl Mailboxes {
    pub const fn new() -> Self {
        Self {
            slots: [CommandSlot::new(), CommandSlot::new()],
        }
    }

    #[inline]
    pub fn post(&self, axis: Axis, cmd: NormalizedCommand) {
        self.slots[axis.index()].post(cmd);
    }

    #[inline]
    pub fn take(&self, axis: Axis) -> Option<NormalizedCommand> {
        self.slots[axis.index()].take()
    }
}

// ─── Distributed-Clock Correlation ──────────────────────────────────

/// Tracks the host-to-bus clock offset with an EMA (alpha = 1/64) and
/// reports the residual as the sync bound.
#[derive(Debug, Default)]
struct DcCorrelator {
    offset_ns: i64,
    primed: bool,
}

impl DcCorrelator {
    /// Feed one (host, bus) sample; returns |residual| in ns.
    fn update(&mut self, host_ns: i64, dc_ns: u64) -> u64 {
        let sample = host_ns.wrapping_sub(dc_ns as i64);
        if !self.primed {
            self.offset_ns = sample;
            self.primed = true;
        } else {
            self.offset_ns += (sample - self.offset_ns) / 64;
        }
        (sample - self.offset_ns).unsigned_abs()
    }
}

// ─── Schedule Advance ───────────────────────────────────────────────

/// Decide the next tick index given where the clock actually is.
///
/// Tick `k` is scheduled at `k * period` past base. Overshoot below half a
/// period keeps the schedule (the next sleep absorbs it); at or beyond
/// half a period the tick is skipped and counted.
pub fn advance_schedule(mut next_tick: u64, period_ns: i64, now_ns: i64) -> (u64, u32) {
    let mut skipped = 0;
    loop {
        let scheduled = next_tick as i64 * period_ns;
        if now_ns - scheduled < period_ns / 2 {
            return (next_tick, skipped);
        }
        next_tick += 1;
        skipped += 1;
    }
}

/// Why the cyclic loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    /// Cooperative stop flag observed.
    Stop,
    /// The bus link was declared lost.
    Fatal,
}

// ─── Cycle Runner ───────────────────────────────────────────────────

/// Owns everything the cyclic thread touches. Constructed by [`bring_up`],
/// then either driven tick-by-tick (tests) or handed to [`CycleRunner::run`]
/// on a dedicated thread.
///
/// [`bring_up`]: CycleRunner::bring_up
pub struct CycleRunner<P: FieldbusPort> {
    bus: BusAdapter<P>,
    drivers: [AxisDriver; AXIS_COUNT],
    controllers: [ModeController; AXIS_COUNT],
    applier: ParamApplier,

    mailboxes: Arc<Mailboxes>,
    cell: Arc<StatusCell<SystemStatus>>,
    stop: Arc<AtomicBool>,
    info: Arc<SystemInfo>,

    period_ns: i64,
    shutdown_timeout: Duration,
    rt: RtConfig,
    epoch: Instant,

    tx_image: [u8; TX_IMAGE_LEN],
    rx_image: [u8; RX_IMAGE_LEN],
    rx: [AxisRx; AXIS_COUNT],

    timing: CycleTimeInfo,
    dc: DcCorrelator,
    dcsync_ns: u64,
    last_reftime_ns: u64,
}

impl<P: FieldbusPort> CycleRunner<P> {
    /// Bring the bus and both drives to a known state and build the runner.
    ///
    /// Verifies the slave count, applies the bring-up register map to both
    /// drives, and reads each drive's identity and encoder resolution.
    /// Runs before any real-time constraints apply.
    pub fn bring_up(
        config: &CoreConfig,
        registers: &RegisterMap,
        port: P,
    ) -> Result<Self, BringUpError> {
        let mut bus = BusAdapter::bring_up(port, config.wkc_miss_limit)?;

        for axis in Axis::ALL {
            for write in &registers.writes {
                bus.sdo_write_value(axis, write.index, write.sub, write.value, write.width)?;
            }
        }

        let mut info = SystemInfo::default();
        for axis in Axis::ALL {
            let entry = &mut info.axes[axis.index()];
            entry.encoder_ppr = bus.sdo_read_u32(axis, od::POSITION_ENCODER_RESOLUTION, 1)?;
            if entry.encoder_ppr == 0 {
                return Err(BringUpError::BadEncoderResolution { axis });
            }
            entry.dev_name = bus.sdo_read_string(axis, od::DEVICE_NAME, 0)?;
            entry.hw_version = bus.sdo_read_string(axis, od::HARDWARE_VERSION, 0)?;
            entry.sw_version = bus.sdo_read_string(axis, od::SOFTWARE_VERSION, 0)?;
            info!(
                %axis,
                dev = entry.dev_name,
                encoder_ppr = entry.encoder_ppr,
                "drive identified"
            );
        }

        let controllers = [
            ModeController::new(Axis::Azimuth, &config.azimuth, info.axes[0].encoder_ppr),
            ModeController::new(
                Axis::Elevation,
                &config.elevation,
                info.axes[1].encoder_ppr,
            ),
        ];

        Ok(Self {
            bus,
            drivers: [AxisDriver::new(Axis::Azimuth), AxisDriver::new(Axis::Elevation)],
            controllers,
            applier: ParamApplier::new(config.param_budget_ns()),
            mailboxes: Arc::new(Mailboxes::new()),
            cell: Arc::new(StatusCell::new(SystemStatus::default())),
            stop: Arc::new(AtomicBool::new(false)),
            info: Arc::new(info),
            period_ns: config.period_ns(),
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
            rt: config.rt.clone(),
            epoch: Instant::now(),
            tx_image: [0; TX_IMAGE_LEN],
            rx_image: [0; RX_IMAGE_LEN],
            rx: [AxisRx::default(); AXIS_COUNT],
            timing: CycleTimeInfo::new(),
            dc: DcCorrelator::default(),
            dcsync_ns: 0,
            last_reftime_ns: 0,
        })
    }

    // ── Shared handles (cloned by the supervisor before the thread spawn) ──

    pub fn mailboxes(&self) -> Arc<Mailboxes> {
        Arc::clone(&self.mailboxes)
    }

    pub fn status_cell(&self) -> Arc<StatusCell<SystemStatus>> {
        Arc::clone(&self.cell)
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn system_info(&self) -> Arc<SystemInfo> {
        Arc::clone(&self.info)
    }

    /// Direct bus access for tests and diagnostics.
    pub fn bus_mut(&mut self) -> &mut BusAdapter<P> {
        &mut self.bus
    }

    #[inline]
    pub fn period_ns(&self) -> i64 {
        self.period_ns
    }

    // ── The tick ──

    /// Execute one cycle: exchange, decode, state machines, setpoints,
    /// deferred parameters, snapshot. Returns `Err` only on a fatal bus
    /// failure (the fatal snapshot is already published).
    pub fn tick(&mut self) -> Result<(), BusError> {
        let host_ns = self.host_now_ns();

        if let Err(err) = self.bus.cyclic_exchange(&self.tx_image, &mut self.rx_image) {
            error!(%err, "cyclic exchange failed");
            self.publish(self.last_reftime_ns, host_ns, Some(&err));
            return Err(err);
        }

        let layout = *self.bus.layout();
        for axis in Axis::ALL {
            let at = layout.rx_offset(axis);
            self.rx[axis.index()] = AxisRx::unpack(&self.rx_image[at..at + AXIS_RX_LEN]);
            self.drivers[axis.index()].observe(self.rx[axis.index()].statusword);
        }

        for axis in Axis::ALL {
            let i = axis.index();
            let cmd = self.mailboxes.take(axis);
            self.controllers[i].tick(
                cmd,
                self.rx[i].position_actual,
                &mut self.drivers[i],
                &mut self.applier,
            );
        }

        for axis in Axis::ALL {
            let i = axis.index();
            let mut tx = AxisTx::default();
            self.controllers[i].fill_tx(&mut tx);
            tx.controlword = self.drivers[i].emit();
            let at = layout.tx_offset(axis);
            tx.pack(&mut self.tx_image[at..at + AXIS_TX_LEN]);
        }

        self.applier.pump(&mut self.bus);

        let dc_ns = self.bus.dc_time_ns();
        self.dcsync_ns = self.dc.update(host_ns, dc_ns);
        self.last_reftime_ns = dc_ns;

        self.publish(dc_ns, host_ns, None);
        Ok(())
    }

    /// Host monotonic nanoseconds since bring-up.
    #[inline]
    fn host_now_ns(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }

    /// Assemble and publish the snapshot for the just-completed tick.
    fn publish(&mut self, reftime_ns: u64, apptime_ns: i64, fatal: Option<&BusError>) {
        let mut status = SystemStatus::default();
        let mut states = [AxisState::Disabled; AXIS_COUNT];

        for axis in Axis::ALL {
            let i = axis.index();
            let rx = &self.rx[i];
            let controller = &self.controllers[i];
            let driver = &self.drivers[i];
            let ppr = self.info.axes[i].encoder_ppr;

            let mut state = driver.observed().axis_state();
            if controller.warning() && !state.is_faulted() {
                state = AxisState::Warning;
            }
            states[i] = state;

            status.axes[i] = AxisStatus {
                state,
                op_mode: controller.op_mode(),
                move_mode: controller.move_mode(),
                params_mode: controller.params_mode(),
                tgt_pos: controller.tgt_pos(),
                cur_pos: rx.position_actual,
                dmd_pos: controller.dmd_pos(),
                cur_pos_deg: pulses_to_deg(rx.position_actual, ppr),
                tgt_vel: controller.tgt_vel(),
                cur_vel: rx.velocity_actual,
                dmd_vel: controller.dmd_vel(),
                cur_vel_deg: pulses_to_deg(rx.velocity_actual, ppr),
                cur_torque: rx.torque_actual,
                temperatures: rx.temperatures,
                ctrlword: driver.last_controlword(),
                statusword: rx.statusword,
                error_code: if rx.error_code != 0 {
                    rx.error_code
                } else if controller.warning() {
                    PARAM_WRITE_FAULT_CODE
                } else {
                    0
                },
            };
        }

        let mut error_str = FaultText::EMPTY;
        status.state = if let Some(err) = fatal {
            let _ = write!(error_str, "{err}");
            SystemState::FatalError
        } else {
            let state = SystemState::aggregate(&states);
            match state {
                SystemState::Error => {
                    for axis in Axis::ALL {
                        let code = status.axes[axis.index()].error_code;
                        if code != 0 {
                            error_str.clear();
                            let _ = write!(error_str, "{axis} drive fault 0x{code:04X}");
                        }
                    }
                }
                SystemState::Warning => {
                    for axis in Axis::ALL {
                        if states[axis.index()] == AxisState::Warning {
                            error_str.clear();
                            let _ =
                                write!(error_str, "{axis} profile parameter write failed");
                        }
                    }
                }
                _ => {}
            }
            state
        };

        status.reftime_ns = reftime_ns;
        status.apptime_ns = apptime_ns as u64;
        status.dcsync_ns = self.dcsync_ns;
        status.timing = self.timing;
        status.error_str = error_str;

        self.cell.publish(status);
    }

    // ── The loop ──

    /// Enter the cyclic loop until stopped or fatal. Performs RT setup
    /// first (a no-op without the `rt` feature), runs the orderly
    /// bring-down on a cooperative stop, and publishes the final OFF
    /// snapshot before returning.
    pub fn run(mut self) {
        if let Err(err) = rt_setup(&self.rt) {
            warn!(%err, "real-time setup incomplete, continuing best-effort");
        }

        let exit = self.run_loop();
        match exit {
            LoopExit::Stop => {
                self.shutdown_sequence();
                self.publish_off();
                info!("cyclic loop stopped");
            }
            LoopExit::Fatal => {
                error!("cyclic loop terminated on fatal bus failure");
            }
        }
    }

    /// Absolute-schedule pacing with `clock_nanosleep(TIMER_ABSTIME)` on
    /// `CLOCK_MONOTONIC`.
    #[cfg(feature = "rt")]
    fn run_loop(&mut self) -> LoopExit {
        use nix::time::{clock_gettime, clock_nanosleep, ClockId, ClockNanosleepFlags};

        let clock = ClockId::CLOCK_MONOTONIC;
        let base = clock_gettime(clock).expect("CLOCK_MONOTONIC unavailable");
        let base_ns = timespec_ns(&base);
        let mut next_tick: u64 = 0;
        let mut last_wake_ns: Option<i64> = None;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                return LoopExit::Stop;
            }

            let scheduled_ns = next_tick as i64 * self.period_ns;
            let target = ns_to_timespec(base_ns + scheduled_ns);
            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &target);

            let wake_ns =
                timespec_ns(&clock_gettime(clock).expect("CLOCK_MONOTONIC unavailable"))
                    - base_ns;
            let latency_ns = wake_ns - scheduled_ns;

            if self.tick().is_err() {
                return LoopExit::Fatal;
            }

            let end_ns = timespec_ns(&clock_gettime(clock).expect("CLOCK_MONOTONIC unavailable"))
                - base_ns;
            let period_ns = last_wake_ns
                .map(|prev| wake_ns - prev)
                .unwrap_or(self.period_ns);
            self.timing
                .record(period_ns, end_ns - wake_ns, latency_ns.max(0));
            last_wake_ns = Some(wake_ns);

            let (next, skipped) = advance_schedule(next_tick + 1, self.period_ns, end_ns);
            if skipped > 0 {
                warn!(skipped, "cycle overrun, skipping ticks to recover the schedule");
                self.timing.overruns += u64::from(skipped);
            }
            next_tick = next;
        }
    }

    /// Absolute-schedule pacing with std timers; used by tests and the
    /// simulated bus.
    #[cfg(not(feature = "rt"))]
    fn run_loop(&mut self) -> LoopExit {
        let base = Instant::now();
        let mut next_tick: u64 = 0;
        let mut last_wake: Option<Instant> = None;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                return LoopExit::Stop;
            }

            let scheduled_ns = next_tick as i64 * self.period_ns;
            sleep_until(base, scheduled_ns);

            let wake = Instant::now();
            let latency_ns = (wake - base).as_nanos() as i64 - scheduled_ns;

            if self.tick().is_err() {
                return LoopExit::Fatal;
            }

            let exec_ns = wake.elapsed().as_nanos() as i64;
            let period_ns = last_wake
                .map(|prev| (wake - prev).as_nanos() as i64)
                .unwrap_or(self.period_ns);
            self.timing.record(period_ns, exec_ns, latency_ns.max(0));
            last_wake = Some(wake);

            let now_ns = base.elapsed().as_nanos() as i64;
            let (next, skipped) = advance_schedule(next_tick + 1, self.period_ns, now_ns);
            if skipped > 0 {
                warn!(skipped, "cycle overrun, skipping ticks to recover the schedule");
                self.timing.overruns += u64::from(skipped);
            }
            next_tick = next;
        }
    }

    /// Walk both drives to switch-on-disabled, then stop exchanging.
    /// Escalates to a forced voltage-off word when the timeout elapses.
    fn shutdown_sequence(&mut self) {
        info!("orderly shutdown: disabling both drives");
        for axis in Axis::ALL {
            let i = axis.index();
            let (controller, driver) = (&mut self.controllers[i], &mut self.drivers[i]);
            controller.disable(driver);
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        let period = Duration::from_nanos(self.period_ns as u64);

        loop {
            if self.tick().is_err() {
                return;
            }
            let down = self.drivers.iter().all(|d| {
                matches!(
                    d.observed(),
                    Cia402State::SwitchOnDisabled | Cia402State::NotReadyToSwitchOn
                )
            });
            if down {
                return;
            }
            if Instant::now() >= deadline {
                warn!("shutdown timeout, forcing voltage off");
                self.force_voltage_off();
                return;
            }
            std::thread::sleep(period);
        }
    }

    /// Last-resort bring-down: one frame with disable-voltage on both axes.
    fn force_voltage_off(&mut self) {
        let layout = *self.bus.layout();
        for axis in Axis::ALL {
            let at = layout.tx_offset(axis);
            let tx = AxisTx {
                controlword: ctrl::DISABLE_VOLTAGE,
                ..AxisTx::default()
            };
            tx.pack(&mut self.tx_image[at..at + AXIS_TX_LEN]);
        }
        let _ = self
            .bus
            .cyclic_exchange(&self.tx_image, &mut self.rx_image);
    }

    fn publish_off(&mut self) {
        let mut status = self.cell.read();
        status.state = SystemState::Off;
        self.cell.publish(status);
    }
}

#[cfg(feature = "rt")]
fn timespec_ns(ts: &nix::sys::time::TimeSpec) -> i64 {
    ts.tv_sec() * 1_000_000_000 + ts.tv_nsec()
}

#[cfg(feature = "rt")]
fn ns_to_timespec(ns: i64) -> nix::sys::time::TimeSpec {
    nix::sys::time::TimeSpec::new(ns / 1_000_000_000, ns % 1_000_000_000)
}

/// Sleep until `offset_ns` past `base` on the absolute schedule.
#[cfg(not(feature = "rt"))]
fn sleep_until(base: Instant, offset_ns: i64) {
    let target = base + Duration::from_nanos(offset_ns.max(0) as u64);
    let now = Instant::now();
    if target > now {
        std::thread::sleep(target - now);
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Why the cyclic thread could not be given its real-time guarantees.
///
/// Any of these leaves the loop running best-effort: the positioner still
/// moves, but the microsecond-class jitter bound no longer holds.
#[derive(Debug, thiserror::Error)]
pub enum RtSetupError {
    /// `mlockall` refused; page faults may land inside the cycle.
    #[error("cannot lock process memory: {0}")]
    MemoryLock(String),

    /// The thread could not be pinned to the configured core.
    #[error("cannot pin cyclic thread to core {core}: {reason}")]
    Pinning { core: usize, reason: String },

    /// SCHED_FIFO was refused (usually missing CAP_SYS_NICE).
    #[error("cannot enter SCHED_FIFO at priority {priority}: {reason}")]
    Priority { priority: i32, reason: String },
}

/// Give the calling thread its real-time guarantees: resident memory, a
/// fixed core and a SCHED_FIFO slot above everything non-critical.
///
/// A 1 ms frame exchange leaves no room for a major page fault or a
/// cross-core migration, so all three are arranged before the first
/// deadline exists.
#[cfg(feature = "rt")]
pub fn rt_setup(config: &RtConfig) -> Result<(), RtSetupError> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::sys::mman::{mlockall, MlockAllFlags};
    use nix::unistd::Pid;

    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
        .map_err(|e| RtSetupError::MemoryLock(e.to_string()))?;
    prefault_tick_stack();

    let mut cpus = CpuSet::new();
    cpus.set(config.cpu_core).map_err(|e| RtSetupError::Pinning {
        core: config.cpu_core,
        reason: e.to_string(),
    })?;
    sched_setaffinity(Pid::this(), &cpus).map_err(|e| RtSetupError::Pinning {
        core: config.cpu_core,
        reason: e.to_string(),
    })?;

    let param = libc::sched_param {
        sched_priority: config.priority,
    };
    if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
        return Err(RtSetupError::Priority {
            priority: config.priority,
            reason: std::io::Error::last_os_error().to_string(),
        });
    }

    info!(
        core = config.cpu_core,
        priority = config.priority,
        "cyclic thread locked, pinned and scheduled SCHED_FIFO"
    );
    Ok(())
}

/// Without the `rt` feature the loop paces with std timers (simulation
/// and tests); there are no guarantees to arrange.
#[cfg(not(feature = "rt"))]
pub fn rt_setup(_config: &RtConfig) -> Result<(), RtSetupError> {
    Ok(())
}

/// Fault in the stack the tick path will use, one write per page, so the
/// first cycles do not pay for lazy allocation. 128 KiB covers the
/// deepest path through exchange, codec and controllers many times over.
#[cfg(feature = "rt")]
fn prefault_tick_stack() {
    const TICK_STACK: usize = 128 * 1024;
    const PAGE: usize = 4096;

    let mut guard = [0u8; TICK_STACK];
    for page in guard.chunks_mut(PAGE) {
        unsafe { std::ptr::write_volatile(&mut page[0], 1) };
    }
    std::hint::black_box(&guard);
}

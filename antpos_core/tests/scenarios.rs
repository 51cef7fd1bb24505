//! End-to-end scenarios over the simulated bus.
//!
//! Each test builds a runner from TOML-string configuration and drives the
//! cycle tick-by-tick, so nothing here depends on wall-clock pacing.

use std::sync::atomic::Ordering;
use std::time::Duration;

use antpos::axis::Axis;
use antpos::command::NormalizedCommand;
use antpos::config::{CoreConfig, RegisterMap};
use antpos::error::BusError;
use antpos::state::{AxisState, OperationMode, SystemState};
use antpos_core::cycle::CycleRunner;
use antpos_core::sim::SimBus;

const PERIOD_NS: u64 = 1_000_000;

// Fast profile velocities keep the simulated moves short.
const CONFIG: &str = r#"
cycle_time_us = 1000
wkc_miss_limit = 3

[azimuth]
max_velocity_pps = 100000000
[[azimuth.profiles]]
max_travel_deg = 5.0
velocity_pps = 1000000
acceleration = 20000
deceleration = 20000
[[azimuth.profiles]]
max_travel_deg = 360.0
velocity_pps = 10000000
acceleration = 50000
deceleration = 50000
[[azimuth.profiles]]
velocity_pps = 5000000
acceleration = 10000
deceleration = 10000

[elevation]
max_velocity_pps = 100000000
min_position_deg = -2.0
max_position_deg = 92.0
[[elevation.profiles]]
max_travel_deg = 94.0
velocity_pps = 10000000
acceleration = 15000
deceleration = 15000
[[elevation.profiles]]
velocity_pps = 5000000
acceleration = 8000
deceleration = 8000

[[init_writes]]
index = 0x60F7
value = 35
"#;

fn runner() -> CycleRunner<SimBus> {
    let config = CoreConfig::from_toml_str(CONFIG).unwrap();
    let registers = RegisterMap::from(&config);
    CycleRunner::bring_up(&config, &registers, SimBus::new(PERIOD_NS)).unwrap()
}

/// Tick until `predicate` holds, at most `limit` ticks.
fn tick_until<F>(runner: &mut CycleRunner<SimBus>, limit: usize, mut predicate: F) -> usize
where
    F: FnMut(&antpos::status::SystemStatus) -> bool,
{
    let cell = runner.status_cell();
    for n in 0..limit {
        runner.tick().expect("unexpected fatal tick");
        if predicate(&cell.read()) {
            return n + 1;
        }
    }
    panic!("condition not reached within {limit} ticks");
}

fn bring_both_to_idle(runner: &mut CycleRunner<SimBus>) {
    tick_until(runner, 10, |s| s.state == SystemState::Ready);
}

// ─── Scenario: bring-up ─────────────────────────────────────────────

#[test]
fn bring_up_walks_both_drives_to_idle() {
    let mut runner = runner();
    let cell = runner.status_cell();

    // Before the first tick the snapshot is the OFF default.
    assert_eq!(cell.read().state, SystemState::Off);

    let mut ctrlwords = Vec::new();
    let mut statuswords = Vec::new();
    let mut states = Vec::new();
    for _ in 0..10 {
        runner.tick().unwrap();
        let snap = cell.read();
        ctrlwords.push(snap.axes[0].ctrlword);
        statuswords.push(snap.axes[0].statusword);
        states.push(snap.state);
    }

    // Controlword walk per axis: shutdown, switch-on, then held.
    assert_eq!(&ctrlwords[..4], &[0x0006, 0x0007, 0x0007, 0x0007]);
    // Statusword answers one state behind each command.
    assert_eq!(&statuswords[..3], &[0x0250, 0x0231, 0x0233]);
    // System level: INIT while converging, READY once both axes idle,
    // nothing else along the way.
    assert_eq!(states[0], SystemState::Init);
    assert_eq!(*states.last().unwrap(), SystemState::Ready);
    assert!(states
        .iter()
        .all(|s| matches!(s, SystemState::Init | SystemState::Ready)));

    // Both axes idle, elevation included.
    let snap = cell.read();
    assert_eq!(snap.axes[0].state, AxisState::Idle);
    assert_eq!(snap.axes[1].state, AxisState::Idle);
}

// ─── Scenario: point move ───────────────────────────────────────────

#[test]
fn point_move_half_revolution() {
    let mut runner = runner();
    let cell = runner.status_cell();
    let mailboxes = runner.mailboxes();
    bring_both_to_idle(&mut runner);

    // Half a revolution: 524288 pulses = 180 deg with a 2^20 encoder.
    mailboxes.post(Axis::Azimuth, NormalizedCommand::Point { pos: 524_288 });

    // 180 deg travel selects the second profile (5 < 180 <= 360).
    tick_until(&mut runner, 10, |s| s.axes[0].move_mode == 1);

    // The axis re-enables and the setpoint bit toggles low then high.
    let mut ctrlwords = Vec::new();
    for _ in 0..6 {
        runner.tick().unwrap();
        ctrlwords.push(cell.read().axes[0].ctrlword);
    }
    assert!(
        ctrlwords
            .windows(2)
            .any(|w| w[0] == 0x000F && w[1] == 0x001F),
        "setpoint pulse not seen in {ctrlwords:04X?}"
    );

    let snap = cell.read();
    assert_eq!(snap.axes[0].op_mode, OperationMode::Point);
    assert_eq!(snap.axes[0].tgt_pos, 524_288);
    assert_eq!(snap.state, SystemState::Processing);

    // The drive reports target-reached and the commanded position.
    tick_until(&mut runner, 200, |s| {
        s.axes[0].statusword & 0x0400 != 0 && s.axes[0].cur_pos == 524_288
    });
}

// ─── Scenario: scan ─────────────────────────────────────────────────

#[test]
fn scan_at_constant_velocity() {
    let mut runner = runner();
    let cell = runner.status_cell();
    let mailboxes = runner.mailboxes();
    bring_both_to_idle(&mut runner);

    mailboxes.post(Axis::Azimuth, NormalizedCommand::Scan { vel: 100_000 });

    tick_until(&mut runner, 20, |s| {
        s.axes[0].state == AxisState::Enabled && s.axes[0].cur_vel == 100_000
    });

    let snap = cell.read();
    assert_eq!(snap.axes[0].op_mode, OperationMode::Scan);
    assert_eq!(snap.axes[0].move_mode, 2); // the reserved scan slot
    assert_eq!(snap.axes[0].ctrlword, 0x000F);
    assert_eq!(snap.axes[0].tgt_vel, 100_000);
    assert_eq!(snap.state, SystemState::Processing);

    // Position advances while scanning.
    let before = snap.axes[0].cur_pos;
    for _ in 0..5 {
        runner.tick().unwrap();
    }
    assert!(cell.read().axes[0].cur_pos > before);
}

// ─── Scenario: fault and recovery ───────────────────────────────────

#[test]
fn drive_fault_freezes_then_idle_recovers() {
    let mut runner = runner();
    let cell = runner.status_cell();
    let mailboxes = runner.mailboxes();
    bring_both_to_idle(&mut runner);

    mailboxes.post(Axis::Azimuth, NormalizedCommand::Scan { vel: 100_000 });
    tick_until(&mut runner, 20, |s| s.axes[0].cur_vel == 100_000);

    // Fault trips mid-scan: ERROR within one tick, setpoint dropped.
    runner
        .bus_mut()
        .port_mut()
        .drive_mut(Axis::Azimuth)
        .inject_fault(0x7500);
    runner.tick().unwrap();
    let snap = cell.read();
    assert_eq!(snap.axes[0].state, AxisState::Error);
    assert_eq!(snap.axes[0].error_code, 0x7500);
    assert_eq!(snap.state, SystemState::Error);
    assert_eq!(snap.error_str.as_str(), "azimuth drive fault 0x7500");
    assert_eq!(snap.axes[0].dmd_vel, 0);

    // The fault stays latched until acknowledged.
    for _ in 0..5 {
        runner.tick().unwrap();
    }
    assert_eq!(cell.read().axes[0].state, AxisState::Error);

    // Idle acknowledges: reset edge fires (bit high, then low), then the
    // normal walk back to idle.
    mailboxes.post(Axis::Azimuth, NormalizedCommand::Idle);
    let mut ctrlwords = Vec::new();
    for _ in 0..8 {
        runner.tick().unwrap();
        ctrlwords.push(cell.read().axes[0].ctrlword);
    }
    assert_eq!(&ctrlwords[..2], &[0x0080, 0x0000]);
    assert!(ctrlwords.contains(&0x0006));

    tick_until(&mut runner, 10, |s| {
        s.axes[0].state == AxisState::Idle && s.state == SystemState::Ready
    });
    assert_eq!(cell.read().axes[0].error_code, 0);
}

// ─── Scenario: link lost ────────────────────────────────────────────

#[test]
fn working_counter_loss_goes_fatal() {
    let mut runner = runner();
    let cell = runner.status_cell();
    bring_both_to_idle(&mut runner);

    runner.bus_mut().port_mut().drop_working_counter(3);

    // Two misses are tolerated on stale inputs.
    runner.tick().unwrap();
    runner.tick().unwrap();
    assert_ne!(cell.read().state, SystemState::FatalError);

    // The third consecutive miss is fatal.
    match runner.tick() {
        Err(BusError::LinkLost { misses: 3 }) => {}
        other => panic!("expected link lost, got {other:?}"),
    }
    let snap = cell.read();
    assert_eq!(snap.state, SystemState::FatalError);
    assert!(snap.error_str.as_str().contains("link lost"));
}

#[test]
fn transient_working_counter_loss_recovers() {
    let mut runner = runner();
    let cell = runner.status_cell();
    bring_both_to_idle(&mut runner);

    // Two misses, then healthy again: never fatal.
    runner.bus_mut().port_mut().drop_working_counter(2);
    for _ in 0..5 {
        runner.tick().unwrap();
    }
    assert_eq!(cell.read().state, SystemState::Ready);
}

// ─── Scenario: overrun tolerance ────────────────────────────────────

/// Run the paced loop on its own thread for roughly `run_for`, stalling
/// one exchange by `stall`, and return the final timing statistics.
fn timed_run_with_stall(stall: Duration, run_for: Duration) -> antpos::status::CycleTimeInfo {
    let mut runner = runner();
    let cell = runner.status_cell();
    let stop = runner.stop_flag();
    // Stall a mid-run tick, well past bring-up and well before the stop.
    runner.bus_mut().port_mut().stall_exchange(10, stall);

    let thread = std::thread::spawn(move || runner.run());
    std::thread::sleep(run_for);
    stop.store(true, Ordering::Release);
    thread.join().unwrap();

    cell.read().timing
}

#[test]
fn long_tick_within_half_period_skips_nothing() {
    // A 600 us stall inside a 1000 us cycle: the absolute schedule
    // absorbs it, no tick is skipped, and the execution maximum records
    // the stall.
    let timing = timed_run_with_stall(Duration::from_micros(600), Duration::from_millis(40));
    assert!(timing.cycles >= 15, "only {} cycles ran", timing.cycles);
    assert!(
        timing.exec_max_ns >= 600_000,
        "exec_max_ns {} below the injected stall",
        timing.exec_max_ns
    );
    assert_eq!(timing.overruns, 0);
}

#[test]
fn tick_beyond_half_period_skips_exactly_one() {
    // A 1600 us stall leaves the next tick 600 us late, beyond half a
    // period: exactly one tick is skipped and counted.
    let timing = timed_run_with_stall(Duration::from_micros(1600), Duration::from_millis(40));
    assert!(timing.cycles >= 15, "only {} cycles ran", timing.cycles);
    assert!(
        timing.exec_max_ns >= 1_600_000,
        "exec_max_ns {} below the injected stall",
        timing.exec_max_ns
    );
    assert_eq!(timing.overruns, 1);
}

// ─── Snapshot invariants ────────────────────────────────────────────

#[test]
fn snapshot_times_are_coherent_and_monotonic() {
    let mut runner = runner();
    let cell = runner.status_cell();

    let mut last_app = 0u64;
    let mut last_ref = 0u64;
    for n in 0..50 {
        runner.tick().unwrap();
        let snap = cell.read();
        assert!(snap.apptime_ns >= last_app, "apptime went backwards");
        if n > 0 {
            // The simulated distributed clock advances exactly one period
            // per tick, and reftime/apptime always come from the same tick.
            assert_eq!(snap.reftime_ns - last_ref, PERIOD_NS);
        }
        last_app = snap.apptime_ns;
        last_ref = snap.reftime_ns;
    }
}

#[test]
fn bring_up_register_map_reaches_both_drives() {
    let config = CoreConfig::from_toml_str(CONFIG).unwrap();
    let registers = RegisterMap::from(&config);
    let mut runner =
        CycleRunner::bring_up(&config, &registers, SimBus::new(PERIOD_NS)).unwrap();

    // The init write from the config landed in both drives' dictionaries
    // before the first cycle.
    for axis in Axis::ALL {
        let data = runner
            .bus_mut()
            .sdo_read(axis, 0x60F7, 0)
            .unwrap();
        assert_eq!(u32::from_le_bytes(data[..4].try_into().unwrap()), 35);
    }
}

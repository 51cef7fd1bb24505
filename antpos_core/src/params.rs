//! Budgeted drive parameter programming.
//!
//! Profile changes need a handful of object dictionary writes. SDO
//! transfers are slow relative to the cycle, so the applier issues them
//! between the cyclic work under a fixed time budget (a quarter period by
//! default) and resumes where it left off next tick; the cyclic loop is
//! never starved by a parameter change.
//!
//! A failed write aborts the remainder of the list and degrades the axis
//! to WARNING, not ERROR: the drive keeps its previous consistent
//! parameter set and stays operable.

use std::time::Instant;

use antpos::axis::{Axis, AXIS_COUNT};
use tracing::{debug, warn};

use crate::bus::{BusAdapter, FieldbusPort};

/// Capacity of one profile's write list.
pub const MAX_PROFILE_WRITES: usize = 8;

/// Error code surfaced in `AxisStatus` when a parameter write fails.
/// Chosen from the manufacturer-specific block so it cannot collide with a
/// drive-reported CiA-402 code.
pub const PARAM_WRITE_FAULT_CODE: u16 = 0xFF01;

/// One pending object dictionary write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdoWrite {
    pub index: u16,
    pub sub: u8,
    pub value: u32,
    /// Encoded width in bytes: 1, 2 or 4.
    pub width: u8,
}

/// A profile's ordered write list.
pub type WriteList = heapless::Vec<SdoWrite, MAX_PROFILE_WRITES>;

/// Progress of the per-axis write job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    /// No job pending.
    Idle,
    /// Writes remain; the pump will continue next tick.
    InProgress,
    /// All writes landed; waiting for the controller to acknowledge.
    Done,
    /// A write failed; the rest of the list was abandoned.
    Failed,
}

#[derive(Debug)]
struct AxisJob {
    writes: WriteList,
    cursor: usize,
    state: ApplyState,
}

impl AxisJob {
    const fn empty() -> Self {
        Self {
            writes: WriteList::new(),
            cursor: 0,
            state: ApplyState::Idle,
        }
    }
}

/// Issues queued SDO writes under a per-tick time budget.
#[derive(Debug)]
pub struct ParamApplier {
    budget_ns: i64,
    jobs: [AxisJob; AXIS_COUNT],
}

impl ParamApplier {
    pub fn new(budget_ns: i64) -> Self {
        Self {
            budget_ns,
            jobs: [AxisJob::empty(), AxisJob::empty()],
        }
    }

    /// Queue a write list for `axis`, replacing any unfinished job.
    pub fn begin(&mut self, axis: Axis, writes: WriteList) {
        let job = &mut self.jobs[axis.index()];
        job.writes = writes;
        job.cursor = 0;
        job.state = if job.writes.is_empty() {
            ApplyState::Done
        } else {
            ApplyState::InProgress
        };
    }

    #[inline]
    pub fn state(&self, axis: Axis) -> ApplyState {
        self.jobs[axis.index()].state
    }

    /// Consume a terminal state (Done or Failed), returning the slot to Idle.
    pub fn acknowledge(&mut self, axis: Axis) {
        let job = &mut self.jobs[axis.index()];
        debug_assert!(matches!(job.state, ApplyState::Done | ApplyState::Failed));
        job.state = ApplyState::Idle;
        job.cursor = 0;
        job.writes.clear();
    }

    /// Issue pending writes until the time budget for this tick runs out.
    /// Called once per cycle, after the process-data work.
    pub fn pump<P: FieldbusPort>(&mut self, bus: &mut BusAdapter<P>) {
        let started = Instant::now();
        for axis in Axis::ALL {
            let job = &mut self.jobs[axis.index()];
            while job.state == ApplyState::InProgress {
                if started.elapsed().as_nanos() as i64 >= self.budget_ns {
                    return;
                }
                let write = job.writes[job.cursor];
                match bus.sdo_write_value(axis, write.index, write.sub, write.value, write.width)
                {
                    Ok(()) => {
                        job.cursor += 1;
                        if job.cursor == job.writes.len() {
                            job.state = ApplyState::Done;
                            debug!(%axis, writes = job.writes.len(), "profile parameters applied");
                        }
                    }
                    Err(err) => {
                        job.state = ApplyState::Failed;
                        warn!(
                            %axis,
                            index = write.index,
                            sub = write.sub,
                            %err,
                            "parameter write failed, abandoning profile change"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use antpos::error::BusError;

    /// Port recording SDO writes, optionally failing a given index.
    struct RecordingPort {
        written: Vec<(Axis, u16, u8, Vec<u8>)>,
        fail_index: Option<u16>,
    }

    impl FieldbusPort for RecordingPort {
        fn slave_count(&self) -> usize {
            2
        }
        fn expected_wkc(&self) -> u16 {
            6
        }
        fn exchange(&mut self, _: &[u8], _: &mut [u8]) -> Result<u16, BusError> {
            Ok(6)
        }
        fn sdo_read(&mut self, _: Axis, _: u16, _: u8) -> Result<Vec<u8>, BusError> {
            Ok(vec![])
        }
        fn sdo_write(
            &mut self,
            axis: Axis,
            index: u16,
            sub: u8,
            data: &[u8],
        ) -> Result<(), BusError> {
            if self.fail_index == Some(index) {
                return Err(BusError::Sdo {
                    axis,
                    index,
                    sub,
                    dir: "write",
                    reason: "abort".into(),
                });
            }
            self.written.push((axis, index, sub, data.to_vec()));
            Ok(())
        }
        fn dc_time_ns(&mut self) -> u64 {
            0
        }
    }

    fn adapter(fail_index: Option<u16>) -> BusAdapter<RecordingPort> {
        BusAdapter::bring_up(
            RecordingPort {
                written: vec![],
                fail_index,
            },
            3,
        )
        .unwrap()
    }

    fn list() -> WriteList {
        let mut writes = WriteList::new();
        writes
            .push(SdoWrite {
                index: 0x6081,
                sub: 0,
                value: 100_000,
                width: 4,
            })
            .unwrap();
        writes
            .push(SdoWrite {
                index: 0x6083,
                sub: 0,
                value: 20_000,
                width: 4,
            })
            .unwrap();
        writes
            .push(SdoWrite {
                index: 0x6084,
                sub: 0,
                value: 20_000,
                width: 4,
            })
            .unwrap();
        writes
    }

    #[test]
    fn applies_in_list_order() {
        let mut bus = adapter(None);
        let mut applier = ParamApplier::new(1_000_000_000);
        applier.begin(Axis::Azimuth, list());
        assert_eq!(applier.state(Axis::Azimuth), ApplyState::InProgress);

        applier.pump(&mut bus);
        assert_eq!(applier.state(Axis::Azimuth), ApplyState::Done);

        let written: Vec<u16> = bus.port_mut().written.iter().map(|w| w.1).collect();
        assert_eq!(written, vec![0x6081, 0x6083, 0x6084]);
        assert_eq!(bus.port_mut().written[0].3, 100_000u32.to_le_bytes());

        applier.acknowledge(Axis::Azimuth);
        assert_eq!(applier.state(Axis::Azimuth), ApplyState::Idle);
    }

    #[test]
    fn aborts_on_first_failure() {
        let mut bus = adapter(Some(0x6083));
        let mut applier = ParamApplier::new(1_000_000_000);
        applier.begin(Axis::Elevation, list());

        applier.pump(&mut bus);
        assert_eq!(applier.state(Axis::Elevation), ApplyState::Failed);
        // Only the write before the failing one landed.
        assert_eq!(bus.port_mut().written.len(), 1);
        assert_eq!(bus.port_mut().written[0].1, 0x6081);
    }

    #[test]
    fn zero_budget_defers_all_writes() {
        let mut bus = adapter(None);
        let mut applier = ParamApplier::new(0);
        applier.begin(Axis::Azimuth, list());
        applier.pump(&mut bus);
        assert_eq!(applier.state(Axis::Azimuth), ApplyState::InProgress);
        assert!(bus.port_mut().written.is_empty());
    }

    #[test]
    fn empty_list_is_immediately_done() {
        let mut applier = ParamApplier::new(1_000_000);
        applier.begin(Axis::Azimuth, WriteList::new());
        assert_eq!(applier.state(Axis::Azimuth), ApplyState::Done);
    }
}

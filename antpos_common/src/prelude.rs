//! Common re-exports.
//!
//! `use antpos::prelude::*;` pulls in the types nearly every consumer needs.

pub use crate::axis::{Axis, AXIS_COUNT};
pub use crate::command::{CommandSlot, NormalizedCommand};
pub use crate::config::{CoreConfig, RegisterMap};
pub use crate::error::{BringUpError, BusError, CommandError};
pub use crate::state::{AxisState, MoveMode, OperationMode, ParamsMode, SystemState};
pub use crate::status::{AxisInfo, AxisStatus, CycleTimeInfo, SystemInfo, SystemStatus};

//! CiA-402 object dictionary addresses used by the core.
//!
//! Standard motion objects live in the 0x6000 block; drive identity in the
//! 0x1000 block; the temperature sensor block is vendor-specific.

/// Controlword, u16.
pub const CONTROLWORD: u16 = 0x6040;
/// Statusword, u16.
pub const STATUSWORD: u16 = 0x6041;
/// Error code, u16.
pub const ERROR_CODE: u16 = 0x603F;
/// Modes of operation, i8.
pub const MODES_OF_OPERATION: u16 = 0x6060;
/// Modes of operation display, i8.
pub const MODES_OF_OPERATION_DISPLAY: u16 = 0x6061;
/// Position actual value, i32.
pub const POSITION_ACTUAL: u16 = 0x6064;
/// Velocity actual value, i32.
pub const VELOCITY_ACTUAL: u16 = 0x606C;
/// Torque actual value, i16, 0.1 % of rated.
pub const TORQUE_ACTUAL: u16 = 0x6077;
/// Target position, i32 (profile position mode).
pub const TARGET_POSITION: u16 = 0x607A;
/// Target velocity, i32 (profile velocity mode).
pub const TARGET_VELOCITY: u16 = 0x60FF;
/// Profile velocity, u32.
pub const PROFILE_VELOCITY: u16 = 0x6081;
/// Profile acceleration, u32.
pub const PROFILE_ACCELERATION: u16 = 0x6083;
/// Profile deceleration, u32.
pub const PROFILE_DECELERATION: u16 = 0x6084;
/// Quick stop deceleration, u32.
pub const QUICK_STOP_DECELERATION: u16 = 0x6085;
/// Position encoder resolution; sub 1 = encoder increments, u32.
pub const POSITION_ENCODER_RESOLUTION: u16 = 0x608F;
/// Digital inputs, u32.
pub const DIGITAL_INPUTS: u16 = 0x60FD;

/// Manufacturer device name, visible string.
pub const DEVICE_NAME: u16 = 0x1008;
/// Manufacturer hardware version, visible string.
pub const HARDWARE_VERSION: u16 = 0x1009;
/// Manufacturer software version, visible string.
pub const SOFTWARE_VERSION: u16 = 0x100A;

/// Vendor temperature sensor block; subs 1..=3 are i16 °C readings.
pub const DRIVE_TEMPERATURES: u16 = 0x2610;

//! Process-data codec.
//!
//! Packs and unpacks the fixed-layout per-axis PDO blocks. All fields are
//! little-endian; signed fields sign-extend on decode. The codec is pure:
//! no I/O, no state, trivially testable against golden byte buffers.
//!
//! Per-axis layout (offsets frozen when the bus adapter maps the PDOs):
//!
//! | direction | field | type | offset |
//! |---|---|---|---|
//! | to drive | controlword | u16 | 0 |
//! | to drive | mode_of_operation | i8 | 2 |
//! | to drive | target_position | i32 | 3 |
//! | to drive | target_velocity | i32 | 7 |
//! | from drive | statusword | u16 | 0 |
//! | from drive | mode_display | i8 | 2 |
//! | from drive | position_actual | i32 | 3 |
//! | from drive | velocity_actual | i32 | 7 |
//! | from drive | torque_actual | i16 | 11 |
//! | from drive | error_code | u16 | 13 |
//! | from drive | temperatures[0..3] | i16 | 15, 17, 19 |
//! | from drive | digital_inputs | u32 | 21 |

/// Byte length of one axis' block in the to-drive image.
pub const AXIS_TX_LEN: usize = 11;
/// Byte length of one axis' block in the from-drive image.
pub const AXIS_RX_LEN: usize = 25;

// ─── To-Drive Block ─────────────────────────────────────────────────

/// Cyclic outputs for one drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisTx {
    pub controlword: u16,
    pub mode_of_operation: i8,
    pub target_position: i32,
    pub target_velocity: i32,
}

impl AxisTx {
    /// Pack into `buf[..AXIS_TX_LEN]`.
    ///
    /// # Panics
    /// If `buf` is shorter than [`AXIS_TX_LEN`].
    pub fn pack(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.controlword.to_le_bytes());
        buf[2] = self.mode_of_operation as u8;
        buf[3..7].copy_from_slice(&self.target_position.to_le_bytes());
        buf[7..11].copy_from_slice(&self.target_velocity.to_le_bytes());
    }

    /// Decode from `buf[..AXIS_TX_LEN]`.
    pub fn unpack(buf: &[u8]) -> Self {
        Self {
            controlword: u16::from_le_bytes([buf[0], buf[1]]),
            mode_of_operation: buf[2] as i8,
            target_position: i32::from_le_bytes([buf[3], buf[4], buf[5], buf[6]]),
            target_velocity: i32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]),
        }
    }
}

// ─── From-Drive Block ───────────────────────────────────────────────

/// Cyclic inputs from one drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisRx {
    pub statusword: u16,
    pub mode_display: i8,
    pub position_actual: i32,
    pub velocity_actual: i32,
    /// 0.1 % of rated torque.
    pub torque_actual: i16,
    pub error_code: u16,
    pub temperatures: [i16; 3],
    pub digital_inputs: u32,
}

impl AxisRx {
    /// Pack into `buf[..AXIS_RX_LEN]` (used by the simulated drive).
    ///
    /// # Panics
    /// If `buf` is shorter than [`AXIS_RX_LEN`].
    pub fn pack(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.statusword.to_le_bytes());
        buf[2] = self.mode_display as u8;
        buf[3..7].copy_from_slice(&self.position_actual.to_le_bytes());
        buf[7..11].copy_from_slice(&self.velocity_actual.to_le_bytes());
        buf[11..13].copy_from_slice(&self.torque_actual.to_le_bytes());
        buf[13..15].copy_from_slice(&self.error_code.to_le_bytes());
        for (i, temp) in self.temperatures.iter().enumerate() {
            let at = 15 + 2 * i;
            buf[at..at + 2].copy_from_slice(&temp.to_le_bytes());
        }
        buf[21..25].copy_from_slice(&self.digital_inputs.to_le_bytes());
    }

    /// Decode from `buf[..AXIS_RX_LEN]`.
    pub fn unpack(buf: &[u8]) -> Self {
        Self {
            statusword: u16::from_le_bytes([buf[0], buf[1]]),
            mode_display: buf[2] as i8,
            position_actual: i32::from_le_bytes([buf[3], buf[4], buf[5], buf[6]]),
            velocity_actual: i32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]),
            torque_actual: i16::from_le_bytes([buf[11], buf[12]]),
            error_code: u16::from_le_bytes([buf[13], buf[14]]),
            temperatures: [
                i16::from_le_bytes([buf[15], buf[16]]),
                i16::from_le_bytes([buf[17], buf[18]]),
                i16::from_le_bytes([buf[19], buf[20]]),
            ],
            digital_inputs: u32::from_le_bytes([buf[21], buf[22], buf[23], buf[24]]),
        }
    }
}

//! Fieldbus I/O adapter.
//!
//! [`FieldbusPort`] is the seam to the transport: one atomic process-data
//! exchange per cycle, on-demand object dictionary access, and the
//! distributed-clock time. The port is not thread-safe; after bring-up only
//! the cyclic thread touches it.
//!
//! [`BusAdapter`] wraps a port with the frozen PDO layout and link
//! supervision: a working-counter mismatch is tolerated for a configured
//! number of consecutive cycles (the stale input image is reused), after
//! which the link is declared lost and the system goes fatal.

use antpos::axis::{Axis, AXIS_COUNT};
use antpos::error::BusError;
use tracing::warn;

use crate::pdo::{AXIS_RX_LEN, AXIS_TX_LEN};

/// Total to-drive process image length.
pub const TX_IMAGE_LEN: usize = AXIS_COUNT * AXIS_TX_LEN;
/// Total from-drive process image length.
pub const RX_IMAGE_LEN: usize = AXIS_COUNT * AXIS_RX_LEN;

/// Number of drives expected on the bus.
pub const EXPECTED_SLAVES: usize = AXIS_COUNT;

// ─── Port Trait ─────────────────────────────────────────────────────

/// Raw access to the fieldbus transport.
///
/// `exchange` performs one atomic Tx-then-Rx of the whole process image and
/// returns the observed working counter; the caller judges it against
/// [`FieldbusPort::expected_wkc`]. SDO access is only used at bring-up and
/// from the budgeted parameter applier, never concurrently with itself.
pub trait FieldbusPort: Send {
    /// Number of slaves found on the bus.
    fn slave_count(&self) -> usize;

    /// Working counter value of a fully healthy exchange.
    fn expected_wkc(&self) -> u16;

    /// One atomic process-data exchange. `tx` and `rx` are the full images.
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<u16, BusError>;

    /// Read an object dictionary entry from one drive.
    fn sdo_read(&mut self, axis: Axis, index: u16, sub: u8) -> Result<Vec<u8>, BusError>;

    /// Write an object dictionary entry on one drive.
    fn sdo_write(&mut self, axis: Axis, index: u16, sub: u8, data: &[u8])
        -> Result<(), BusError>;

    /// Current distributed-clock time [ns].
    fn dc_time_ns(&mut self) -> u64;
}

// ─── PDO Layout ─────────────────────────────────────────────────────

/// Byte offsets of each axis' block inside the process images.
///
/// Established at map time and frozen; the codec indexes through this and
/// nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdoLayout {
    tx_base: [usize; AXIS_COUNT],
    rx_base: [usize; AXIS_COUNT],
}

impl PdoLayout {
    /// The contiguous layout: azimuth block first, then elevation.
    pub const fn contiguous() -> Self {
        Self {
            tx_base: [0, AXIS_TX_LEN],
            rx_base: [0, AXIS_RX_LEN],
        }
    }

    /// Offset of `axis`' block in the to-drive image.
    #[inline]
    pub const fn tx_offset(&self, axis: Axis) -> usize {
        self.tx_base[axis.index()]
    }

    /// Offset of `axis`' block in the from-drive image.
    #[inline]
    pub const fn rx_offset(&self, axis: Axis) -> usize {
        self.rx_base[axis.index()]
    }
}

// ─── Adapter ────────────────────────────────────────────────────────

/// Cyclic-side wrapper around a [`FieldbusPort`]: frozen layout plus
/// working-counter supervision.
#[derive(Debug)]
pub struct BusAdapter<P> {
    port: P,
    layout: PdoLayout,
    miss_limit: u32,
    misses: u32,
}

impl<P: FieldbusPort> BusAdapter<P> {
    /// Scan the bus and freeze the PDO layout.
    ///
    /// Fails unless exactly [`EXPECTED_SLAVES`] drives are present.
    pub fn bring_up(port: P, miss_limit: u32) -> Result<Self, BusError> {
        let found = port.slave_count();
        if found != EXPECTED_SLAVES {
            return Err(BusError::SlaveCount {
                found,
                expected: EXPECTED_SLAVES,
            });
        }
        Ok(Self {
            port,
            layout: PdoLayout::contiguous(),
            miss_limit,
            misses: 0,
        })
    }

    #[inline]
    pub fn layout(&self) -> &PdoLayout {
        &self.layout
    }

    /// Direct access to the underlying port (bring-up and tests).
    #[inline]
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// One cyclic exchange with link supervision.
    ///
    /// A healthy exchange resets the miss counter. A working-counter
    /// mismatch or transport error leaves `rx` stale and counts one miss;
    /// reaching the miss limit returns [`BusError::LinkLost`], which the
    /// scheduler treats as fatal.
    pub fn cyclic_exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        let healthy = match self.port.exchange(tx, rx) {
            Ok(wkc) => wkc == self.port.expected_wkc(),
            Err(_) => false,
        };

        if healthy {
            self.misses = 0;
            return Ok(());
        }

        self.misses += 1;
        if self.misses >= self.miss_limit {
            return Err(BusError::LinkLost {
                misses: self.misses,
            });
        }
        warn!(misses = self.misses, "working counter mismatch, reusing stale inputs");
        Ok(())
    }

    /// Read an object dictionary entry.
    pub fn sdo_read(&mut self, axis: Axis, index: u16, sub: u8) -> Result<Vec<u8>, BusError> {
        self.port.sdo_read(axis, index, sub)
    }

    /// Write an object dictionary entry, value encoded little-endian at
    /// `width` bytes (1, 2 or 4).
    pub fn sdo_write_value(
        &mut self,
        axis: Axis,
        index: u16,
        sub: u8,
        value: u32,
        width: u8,
    ) -> Result<(), BusError> {
        let bytes = value.to_le_bytes();
        let width = usize::from(width).clamp(1, 4);
        self.port.sdo_write(axis, index, sub, &bytes[..width])
    }

    /// Read an object dictionary entry as a little-endian u32 (shorter
    /// entries zero-extend).
    pub fn sdo_read_u32(&mut self, axis: Axis, index: u16, sub: u8) -> Result<u32, BusError> {
        let data = self.port.sdo_read(axis, index, sub)?;
        let mut bytes = [0u8; 4];
        let len = data.len().min(4);
        bytes[..len].copy_from_slice(&data[..len]);
        Ok(u32::from_le_bytes(bytes))
    }

    /// Read a visible-string object dictionary entry.
    pub fn sdo_read_string(
        &mut self,
        axis: Axis,
        index: u16,
        sub: u8,
    ) -> Result<String, BusError> {
        let data = self.port.sdo_read(axis, index, sub)?;
        Ok(String::from_utf8_lossy(&data)
            .trim_end_matches('\0')
            .to_string())
    }

    /// Current distributed-clock time [ns].
    #[inline]
    pub fn dc_time_ns(&mut self) -> u64 {
        self.port.dc_time_ns()
    }
}

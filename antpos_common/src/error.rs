//! Error taxonomy shared across the workspace.
//!
//! Recovery scope differs per variant: `BusError::LinkLost` and
//! `ConfigError` are fatal (process-level); `CommandError` is surfaced
//! synchronously to the caller; drive faults and parameter-write failures
//! are axis-local and travel through the status snapshot instead.

use thiserror::Error;

use crate::axis::Axis;

// ─── Fieldbus Errors ────────────────────────────────────────────────

/// Errors raised by the fieldbus adapter.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Working counter mismatched for too many consecutive cycles; the
    /// link is considered dead and the system goes fatal.
    #[error("fieldbus link lost: {misses} consecutive working-counter mismatches")]
    LinkLost { misses: u32 },

    /// The bus scan did not find the expected drive count.
    #[error("bus has {found} slaves, expected {expected}")]
    SlaveCount { found: usize, expected: usize },

    /// An SDO transfer was rejected or timed out.
    #[error("sdo {dir} 0x{index:04X}:{sub} on {axis}: {reason}")]
    Sdo {
        axis: Axis,
        index: u16,
        sub: u8,
        /// "read" or "write".
        dir: &'static str,
        reason: String,
    },

    /// Transport-level failure outside the working-counter protocol.
    #[error("fieldbus transport: {0}")]
    Transport(String),
}

// ─── Command Rejections ─────────────────────────────────────────────

/// Synchronous rejection of a supervisory command.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CommandError {
    #[error("{axis} velocity {vel} exceeds limit ±{max} pulses/s")]
    VelocityOutOfRange { axis: Axis, vel: i32, max: i32 },

    #[error("control core is shut down")]
    NotRunning,
}

// ─── Bring-Up Errors ────────────────────────────────────────────────

/// Failure to bring the control core up.
#[derive(Debug, Error)]
pub enum BringUpError {
    #[error("configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("fieldbus: {0}")]
    Bus(#[from] BusError),

    #[error("{axis} drive reports zero encoder resolution")]
    BadEncoderResolution { axis: Axis },

    #[error("failed to spawn the cyclic thread: {0}")]
    Thread(String),
}

//! Normalized supervisory commands and the per-axis mailbox slot.
//!
//! The supervisor validates raw `(position, velocity, idle)` requests and
//! normalizes them to one of three commands before deposit. A normalized
//! command fits in 40 bits, so the mailbox is a single `AtomicU64` with
//! overwrite-newest stores from any number of commander threads and a
//! swap-to-empty consume by the cyclic thread. No locks anywhere.

use std::sync::atomic::{AtomicU64, Ordering};

// ─── Normalized Command ─────────────────────────────────────────────

/// A validated, normalized command for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedCommand {
    /// Stop tracking and return to switched-on. Also acknowledges a latched
    /// drive fault.
    Idle,
    /// Move to an absolute position [pulses] and hold it.
    Point { pos: i32 },
    /// Rotate at constant velocity [pulses/s]; sign selects direction.
    Scan { vel: i32 },
}

const TAG_IDLE: u64 = 1;
const TAG_POINT: u64 = 2;
const TAG_SCAN: u64 = 3;

impl NormalizedCommand {
    /// Pack into a non-zero word: tag in the high half, payload in the low.
    pub fn pack(self) -> u64 {
        match self {
            Self::Idle => TAG_IDLE << 32,
            Self::Point { pos } => (TAG_POINT << 32) | u64::from(pos as u32),
            Self::Scan { vel } => (TAG_SCAN << 32) | u64::from(vel as u32),
        }
    }

    /// Unpack; `None` for the empty-slot word (0) or a corrupt tag.
    pub fn unpack(word: u64) -> Option<Self> {
        let payload = word as u32 as i32;
        match word >> 32 {
            TAG_IDLE => Some(Self::Idle),
            TAG_POINT => Some(Self::Point { pos: payload }),
            TAG_SCAN => Some(Self::Scan { vel: payload }),
            _ => None,
        }
    }
}

// ─── Mailbox Slot ───────────────────────────────────────────────────

/// Single-slot command mailbox: many producers, one consumer,
/// overwrite-newest semantics.
#[derive(Debug, Default)]
pub struct CommandSlot(AtomicU64);

const EMPTY: u64 = 0;

impl CommandSlot {
    pub const fn new() -> Self {
        Self(AtomicU64::new(EMPTY))
    }

    /// Deposit a command, replacing whatever was pending.
    pub fn post(&self, cmd: NormalizedCommand) {
        self.0.store(cmd.pack(), Ordering::Release);
    }

    /// Remove and return the pending command, if any.
    pub fn take(&self) -> Option<NormalizedCommand> {
        NormalizedCommand::unpack(self.0.swap(EMPTY, Ordering::AcqRel))
    }
}

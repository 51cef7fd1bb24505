//! # antpos control core
//!
//! Real-time motion control for a two-axis weather-radar antenna. A single
//! cyclic thread exchanges a fixed-layout process-data frame with two
//! CiA-402 servo drives every millisecond, walks their state machines,
//! converts supervisory commands into per-cycle setpoints, and publishes an
//! untearable status snapshot for any number of observer threads.
//!
//! ## Architecture
//!
//! - [`bus`] - fieldbus port trait and the cyclic adapter (frame exchange,
//!   SDO access, distributed clock, link supervision)
//! - [`pdo`] - pure codec for the per-axis process-data blocks
//! - [`cia402`] - drive state decoding and controlword sequencing
//! - [`motion`] - supervisory command handling and move-profile selection
//! - [`params`] - budgeted deferred SDO parameter programming
//! - [`status`] - single-writer lock-free snapshot cell
//! - [`cycle`] - the cyclic scheduler itself
//! - [`supervisor`] - the thread-safe public API handle
//! - [`sim`] - simulated bus and drives for tests and bench setups
//!
//! ## Zero-allocation cyclic path
//!
//! Everything the tick touches is pre-allocated at bring-up: the process
//! images, the profile write lists, the snapshot working buffer. Mailboxes
//! and the status cell are single-word atomics and a seqlock; the cyclic
//! thread never takes a lock.

pub mod bus;
pub mod cia402;
pub mod cycle;
pub mod motion;
pub mod params;
pub mod pdo;
pub mod sim;
pub mod status;
pub mod supervisor;

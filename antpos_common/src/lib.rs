//! antpos common library
//!
//! Shared value types for the antpos antenna positioner control system.
//! Everything here is plain data: no I/O, no threads, no clocks.
//!
//! # Module structure
//!
//! - [`axis`] - axis identity and encoder-unit conversions
//! - [`state`] - axis/system state enums and the aggregation rule
//! - [`status`] - status snapshot types published by the control core
//! - [`command`] - normalized supervisory commands and the lock-free mailbox slot
//! - [`od`] - CiA-402 object dictionary addresses
//! - [`error`] - error taxonomy shared across the workspace
//! - [`config`] - TOML configuration structures with validation
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with an alias for shorter imports:
//! ```toml
//! [dependencies]
//! antpos = { package = "antpos_common", path = "../antpos_common" }
//! ```

pub mod axis;
pub mod command;
pub mod config;
pub mod error;
pub mod od;
pub mod state;
pub mod status;

pub mod prelude;

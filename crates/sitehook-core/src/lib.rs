//! Core domain types for sitehook.
//!
//! This crate contains:
//! - Deployment target configuration and path/command resolution
//! - The bounded build status log
//! - Supervised subprocess execution with process-group kill
//! - Push ref matching shared by webhook receivers
//! - Job identifiers

pub mod error;
pub mod id;
pub mod process;
pub mod push;
pub mod status;
pub mod target;

pub use error::{Error, Result};
pub use id::JobId;
pub use status::{BuildStatus, Payload, StatusLog, STATUS_LEN};
pub use target::TargetConfig;

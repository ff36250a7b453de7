//! Types shared between the lakeflow host and out-of-process plugins.
//!
//! - `errors`: the error model used across the execution core
//! - `protocol`: the line-oriented JSON protocol spoken by remote plugin launchers

pub mod errors;
pub mod protocol;

pub use errors::{LakeflowError, LakeflowResult, SubtaskError};

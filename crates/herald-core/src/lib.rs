//! # Herald Core
//!
//! Core types and error definitions shared by every Herald crate: the
//! service-wide error type, typed identifiers and tracing bootstrap.

pub mod error;
pub mod id;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use id::*;
pub use result::*;

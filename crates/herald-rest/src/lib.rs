//! # Herald REST
//!
//! HTTP control surface using Axum: schedule, list, inspect and cancel
//! posts, plus health checks.

pub mod controllers;
pub mod extractors;
pub mod middleware;
pub mod responses;
pub mod router;
pub mod state;

pub use router::*;
pub use state::*;

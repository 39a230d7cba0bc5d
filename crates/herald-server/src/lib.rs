//! # Herald Server Library
//!
//! Wires configuration, job store, publisher, scheduler, dispatcher, reaper
//! and the HTTP surface into one runnable application.

pub mod app;
pub mod publisher;
pub mod startup;

pub use app::*;

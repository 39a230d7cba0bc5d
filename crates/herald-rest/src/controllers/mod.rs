//! REST API controllers.

pub mod health_controller;
pub mod posts_controller;

pub use health_controller::*;

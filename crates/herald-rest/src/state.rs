//! Application state for Axum handlers.

use herald_jobs::Scheduler;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

//! Publisher contract.
//!
//! The scheduler never inspects a payload; it hands it to a [`Publisher`] and
//! turns the outcome into a state transition.

use crate::job::PostPayload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Proof that a post went out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Identifier assigned by the destination platform.
    pub post_id: String,
}

impl PublishReceipt {
    pub fn new(post_id: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
        }
    }
}

/// Why a publish attempt failed. Every variant is retryable; the attempt
/// budget alone decides when a job goes `Dead`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The destination answered with an error.
    #[error("Rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The request never got a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The attempt exceeded the publish timeout.
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),
}

/// Sends a post to its destination.
///
/// Implementations must tolerate being called more than once for the same
/// job: delivery is at-least-once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, payload: &PostPayload) -> Result<PublishReceipt, PublishError>;
}

//! Herald Jobs - Durable Delayed Post Scheduler
//!
//! Accepts requests to publish a post at a future time and guarantees the
//! publish is attempted at (or shortly after) that time:
//! - Jobs persisted in a pluggable store (Redis or in-memory)
//! - Exclusive, expiring leases so any number of dispatchers can share a store
//! - Bounded worker pool with lease renewal during long publishes
//! - Exponential retry backoff with a terminal `Dead` state
//! - Cron-driven reaper for old terminal jobs
//! - Transition events for logging and metrics
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                                                                  │
//! │  schedule / cancel / list                                        │
//! │     │                                                            │
//! │     ▼                                                            │
//! │  ┌───────────┐   create / update    ┌──────────────────────────┐ │
//! │  │ Scheduler │ ───────────────────▶ │        Job Store         │ │
//! │  └─────┬─────┘                      │  records · due index ·   │ │
//! │        │ wake                       │  state sets · leases     │ │
//! │        ▼                            └──────┬─────────────▲─────┘ │
//! │  ┌─────────────────────────────┐  list_due │             │       │
//! │  │         Dispatcher          │ ◀─────────┘             │       │
//! │  │  ┌────────┐    ┌────────┐   │  try_lease / update     │       │
//! │  │  │ task 1 │ …  │ task N │   │ ────────────────────────┘       │
//! │  │  └───┬────┘    └───┬────┘   │                                 │
//! │  └──────┼─────────────┼────────┘          ┌────────┐             │
//! │         └──── publish ┴──────────────────▶│Publisher│            │
//! │                                           └────────┘             │
//! │  ┌────────┐  list_by_states / delete (terminal, past retention)  │
//! │  │ Reaper │ ─────────────────────────────────────▶ Job Store     │
//! │  └────────┘                                                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use herald_jobs::prelude::*;
//!
//! let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let observer = Arc::new(ObserverChain::standard());
//!
//! let dispatcher = Arc::new(Dispatcher::new(
//!     store.clone(), publisher, clock.clone(), observer.clone(),
//!     RetryPolicy::default(), DispatcherConfig::default(),
//! ));
//! let scheduler = Scheduler::new(store, clock, observer, 3)?
//!     .with_wake(dispatcher.wake_handle());
//!
//! tokio::spawn({ let d = dispatcher.clone(); async move { d.run().await } });
//!
//! let job = scheduler
//!     .schedule(PostPayload::text("Hello!"), Utc::now() + Duration::minutes(10))
//!     .await?;
//! ```

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod publisher;
pub mod reaper;
pub mod redis;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DispatcherConfig, JobsConfig, ReaperConfig, RedisConfig, RetryConfig, StoreBackend,
    StoreConfig,
};
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use error::{JobError, JobResult};
pub use events::{
    EventLog, MetricsObserver, ObserverChain, TracingObserver, TransitionEvent,
    TransitionObserver,
};
pub use herald_core::JobId;
pub use job::{Job, JobState, PostPayload};
pub use memory::MemoryJobStore;
pub use metrics::{register_metrics, JobMetrics};
pub use publisher::{PublishError, PublishReceipt, Publisher};
pub use reaper::Reaper;
pub use self::redis::{create_pool, RedisJobStore, RedisKeys};
pub use retry::{RetryPolicy, RetryStrategy};
pub use scheduler::Scheduler;
pub use store::{JobMutation, JobStore};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::dispatcher::Dispatcher;
    pub use crate::job::{Job, JobState, PostPayload};
    pub use crate::publisher::{PublishError, PublishReceipt, Publisher};
    pub use crate::retry::RetryPolicy;
    pub use crate::scheduler::Scheduler;
    pub use crate::store::JobStore;
    pub use crate::{JobError, JobId, JobResult};
}

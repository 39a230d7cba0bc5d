//! Application assembly and lifecycle.

use axum::{routing::get, Router};
use herald_config::AppConfig;
use herald_core::{HeraldError, HeraldResult};
use herald_jobs::{
    create_pool, Clock, Dispatcher, JobStore, MemoryJobStore, ObserverChain, Publisher, Reaper,
    RedisJobStore, RetryPolicy, Scheduler, StoreBackend, StoreConfig, SystemClock,
    TransitionObserver,
};
use herald_rest::{create_router, AppState};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Creates the job store selected by `jobs.store.backend`.
///
/// A Redis store that cannot be reached fails startup.
pub async fn create_store(config: &StoreConfig) -> HeraldResult<Arc<dyn JobStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let pool = create_pool(&config.redis).await?;
            Ok(Arc::new(RedisJobStore::new(pool, &config.redis)))
        }
        StoreBackend::Memory => {
            info!("Using in-memory job store; jobs will not survive a restart");
            Ok(Arc::new(MemoryJobStore::new()))
        }
    }
}

/// Installs the global Prometheus recorder and describes the job metrics.
pub fn install_metrics_recorder() -> HeraldResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| HeraldError::Internal(format!("Failed to install metrics recorder: {}", e)))?;
    herald_jobs::register_metrics();
    Ok(handle)
}

fn metrics_router(handle: PrometheusHandle, path: &str) -> Router {
    Router::new().route(path, get(move || async move { handle.render() }))
}

/// A fully wired Herald instance bound to its listen address.
pub struct Application {
    scheduler: Scheduler,
    dispatcher: Arc<Dispatcher>,
    reaper: Option<Arc<Reaper>>,
    router: Router,
    listener: TcpListener,
}

impl Application {
    /// Builds every component and binds the HTTP listener.
    pub async fn build(
        config: &AppConfig,
        store: Arc<dyn JobStore>,
        publisher: Arc<dyn Publisher>,
        metrics: Option<PrometheusHandle>,
    ) -> HeraldResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let observer: Arc<dyn TransitionObserver> = Arc::new(ObserverChain::standard());
        let jobs = &config.jobs;

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            publisher,
            clock.clone(),
            observer.clone(),
            RetryPolicy::from(&jobs.retry),
            jobs.dispatcher.clone(),
        ));

        let scheduler = Scheduler::new(store.clone(), clock.clone(), observer, jobs.retry.max_attempts)?
            .with_wake(dispatcher.wake_handle());

        let reaper = if jobs.reaper.enabled {
            Some(Arc::new(Reaper::new(
                store,
                clock,
                &jobs.reaper.cron,
                jobs.reaper.retention(),
            )?))
        } else {
            info!("Reaper disabled");
            None
        };

        let mut router = create_router(AppState::new(scheduler.clone()), &config.server);
        if let Some(handle) = metrics.filter(|_| config.observability.metrics_enabled) {
            router = router.merge(metrics_router(handle, &config.observability.metrics_path));
        }

        let addr = config.server.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| HeraldError::Internal(format!("Failed to bind {}: {}", addr, e)))?;

        Ok(Self {
            scheduler,
            dispatcher,
            reaper,
            router,
            listener,
        })
    }

    /// Address the HTTP listener is bound to.
    pub fn local_addr(&self) -> HeraldResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| HeraldError::Internal(format!("Failed to read local address: {}", e)))
    }

    /// The scheduler behind the HTTP surface.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Serves HTTP and runs the dispatcher and reaper until `shutdown`
    /// resolves, then stops background work and waits for it to drain.
    pub async fn run_until<F>(self, shutdown: F) -> HeraldResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let dispatcher_task = {
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move { dispatcher.run().await })
        };
        let reaper_task = self.reaper.clone().map(|reaper| {
            tokio::spawn(async move { reaper.run().await })
        });

        info!("Herald is accepting requests on http://{}", self.local_addr()?);

        let served = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| HeraldError::Internal(format!("HTTP server error: {}", e)));

        info!("HTTP server stopped; stopping background workers...");
        self.dispatcher.stop();
        if let Some(reaper) = &self.reaper {
            reaper.stop();
        }

        match dispatcher_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Dispatcher exited with error"),
            Err(e) => error!(error = %e, "Dispatcher task panicked"),
        }
        if let Some(task) = reaper_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Reaper exited with error"),
                Err(e) => error!(error = %e, "Reaper task panicked"),
            }
        }

        served?;
        info!("Shutdown complete");
        Ok(())
    }
}

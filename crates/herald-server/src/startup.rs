//! Server startup utilities.

use herald_config::AppConfig;
use tracing::info;

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
    __  __                __    __
   / / / /__  _________ _/ /___/ /
  / /_/ / _ \/ ___/ __ `/ / __  /
 / __  /  __/ /  / /_/ / / /_/ /
/_/ /_/\___/_/   \__,_/_/\__,_/

        scheduled post publisher
    "#);
}

/// Prints where the server listens and how it is wired.
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    let addr = config.server.addr();
    info!("{}", separator);
    info!("REST API:   http://{}/api/v1/posts", addr);
    info!("Health:     http://{}/health", addr);
    if config.observability.metrics_enabled {
        info!("Metrics:    http://{}{}", addr, config.observability.metrics_path);
    }
    info!("Job store:  {:?}", config.jobs.store.backend);
    info!("Publisher:  {}", config.publisher.kind);
    info!(
        "Workers:    {} (max {} attempts)",
        config.jobs.dispatcher.concurrency, config.jobs.retry.max_attempts
    );
    info!("{}", separator);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_banner_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        print_banner();
    }

    #[test]
    fn test_print_startup_info_does_not_panic() {
        let _ = tracing_subscriber::fmt::try_init();
        let mut config = AppConfig::default();
        print_startup_info(&config);

        config.observability.metrics_enabled = false;
        print_startup_info(&config);
    }
}

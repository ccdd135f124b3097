use tokio::runtime::{Builder, Runtime};

/// Builds the Tokio runtime. The client is an event loop, so the default flavor is
/// `current_thread`; `TOKIO_FLAVOR=multi_thread` opts into a worker pool.
pub fn build_runtime_from_env() -> std::io::Result<Runtime> {
    let flavor =
        std::env::var("TOKIO_FLAVOR").unwrap_or_else(|_| "current_thread".to_string());

    let worker_threads: Option<usize> = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|v| v.parse().ok());

    let max_blocking_threads: usize = std::env::var("TOKIO_MAX_BLOCKING_THREADS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8);

    let mut builder = match flavor.as_str() {
        "current_thread" | "current" | "" => Builder::new_current_thread(),
        "multi_thread" | "multi" => Builder::new_multi_thread(),
        other => {
            log::warn!("invalid TOKIO_FLAVOR={other:?}; using current_thread");
            Builder::new_current_thread()
        }
    };

    if matches!(flavor.as_str(), "multi_thread" | "multi") {
        if let Some(worker_threads) = worker_threads {
            builder.worker_threads(worker_threads);
        }
    }

    builder
        .max_blocking_threads(max_blocking_threads)
        .enable_all();

    builder.build()
}

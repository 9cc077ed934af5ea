//! Worker process for the process executor.
//!
//! Speaks the framed worker protocol on stdin/stdout. Logs go to stderr, filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("palimpsest=warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = palimpsest::serve_stdio_worker().await {
        tracing::error!(error = %e, "Worker stopped");
        std::process::exit(e.exit_code().code());
    }
}

//! Bounceback Client Main Entry Point
//!
//! Runs the configured number of virtual users against a chat server and
//! prints latency statistics as replies come back.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use ws_bounceback_client::runner::VirtualUser;
use ws_bounceback_client::{Config, EventSink, HistogramSink};

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("Starting Bounceback Client");

    // Load configuration
    let config = Config::load_or_default();
    if let Err(e) = config.validate() {
        log::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    config.log_config();

    let sink = match HistogramSink::new(
        config.report_every,
        config.histogram_significant_figures,
        config.host.clone(),
        config.save_histogram,
    ) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            log::error!("Failed to create histogram: {:?}", e);
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, finishing current iterations");
            ctrl_c.cancel();
        }
    });

    let mut users = Vec::with_capacity(config.users);
    for index in 0..config.users {
        let event_sink: Arc<dyn EventSink> = sink.clone();
        let mut user = VirtualUser::new(index, &config, event_sink);
        let iterations = config.iterations;
        let shutdown = shutdown.clone();
        users.push(tokio::spawn(async move { user.run(iterations, shutdown).await }));
    }

    let mut failed = 0;
    for handle in users {
        match handle.await {
            Ok(summary) => failed += summary.errors,
            Err(e) => log::error!("Virtual user task failed: {}", e),
        }
    }

    sink.print_stats();
    log::info!("Client completed ({} failed iterations)", failed);
}

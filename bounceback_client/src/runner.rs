//! Virtual User Module
//!
//! Repeats bounceback iterations for one simulated user, pausing a uniformly
//! random think time between them.

use crate::client::{BouncebackClient, IterationOutcome};
use crate::config::Config;
use crate::events::EventSink;

use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-user tally of iteration outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSummary {
    pub matched: usize,
    pub timed_out: usize,
    pub connection_lost: usize,
    pub errors: usize,
}

impl UserSummary {
    pub fn iterations(&self) -> usize {
        self.matched + self.timed_out + self.connection_lost + self.errors
    }
}

/// One simulated user with its own client and connection
pub struct VirtualUser {
    index: usize,
    client: BouncebackClient,
    path: String,
    payload: String,
    timeout_seconds: u64,
    think_time_ms: RangeInclusive<u64>,
}

impl VirtualUser {
    pub fn new(index: usize, config: &Config, sink: Arc<dyn EventSink>) -> Self {
        Self {
            index,
            client: BouncebackClient::new(config, sink),
            path: config.path.clone(),
            payload: config.payload.clone(),
            timeout_seconds: config.timeout_seconds,
            think_time_ms: config.min_wait_ms..=config.max_wait_ms,
        }
    }

    /// Run up to `iterations` iterations, stopping early once `shutdown` fires
    pub async fn run(&mut self, iterations: usize, shutdown: CancellationToken) -> UserSummary {
        let mut summary = UserSummary::default();

        for iteration in 0..iterations {
            if shutdown.is_cancelled() {
                break;
            }

            match self
                .client
                .run_iteration(&self.path, &self.payload, self.timeout_seconds)
                .await
            {
                Ok(IterationOutcome::Matched) => summary.matched += 1,
                Ok(IterationOutcome::TimedOut) => {
                    log::warn!("User {}: no reply within {} s", self.index, self.timeout_seconds);
                    summary.timed_out += 1;
                }
                Ok(IterationOutcome::ConnectionLost) => {
                    log::warn!("User {}: connection lost while waiting", self.index);
                    summary.connection_lost += 1;
                }
                Err(e) => {
                    log::error!("User {}: iteration failed: {}", self.index, e);
                    summary.errors += 1;
                }
            }

            if iteration + 1 < iterations {
                let pause = self.think_time();
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        log::info!("User {} finished: {:?}", self.index, summary);
        summary
    }

    fn think_time(&self) -> Duration {
        let millis = rand::thread_rng().gen_range(self.think_time_ms.clone());
        Duration::from_millis(millis)
    }
}

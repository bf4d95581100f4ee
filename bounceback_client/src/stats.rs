//! Latency Statistics Module
//!
//! An [`EventSink`] that aggregates measurement events into an HdrHistogram
//! and periodically prints percentile reports. Latencies are recorded in
//! microseconds and reported in milliseconds. Reports are printed after the
//! state lock is released.

use crate::events::{EventCategory, EventSink, MeasurementEvent};

use hdrhistogram::serialization::interval_log::IntervalLogWriterBuilder;
use hdrhistogram::serialization::V2DeflateSerializer;
use hdrhistogram::{CreationError, Histogram};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

/// Upper histogram bound: one hour in microseconds
const MAX_LATENCY_US: u64 = 3_600_000_000;

/// Latency statistics structure (microseconds)
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub p99_9: u64,
    pub p99_99: u64,
    pub max: u64,
}

struct StatsState {
    histogram: Histogram<u64>,
    /// Events recorded since start, failures included
    event_count: u64,
    failure_count: u64,
    per_name: BTreeMap<String, u64>,
    interval_start: Instant,
}

/// Histogram-backed sink shared by all virtual users
pub struct HistogramSink {
    state: Mutex<StatsState>,
    /// Number of events between printed reports
    report_every: u64,
    /// Host used as directory name for histogram log files
    host: String,
    save_histogram: bool,
}

impl HistogramSink {
    /// Histogram is configured with a 1 µs .. 1 h range and the given precision.
    pub fn new(
        report_every: u64,
        significant_figures: u8,
        host: String,
        save_histogram: bool,
    ) -> Result<Self, CreationError> {
        Ok(Self {
            state: Mutex::new(StatsState {
                histogram: Histogram::new_with_bounds(1, MAX_LATENCY_US, significant_figures)?,
                event_count: 0,
                failure_count: 0,
                per_name: BTreeMap::new(),
                interval_start: Instant::now(),
            }),
            report_every: report_every.max(1),
            host,
            save_histogram,
        })
    }

    /// Get current latency statistics
    pub fn get_stats(&self) -> LatencyStats {
        Self::stats_of(&self.lock().histogram)
    }

    pub fn response_count(&self) -> u64 {
        self.lock().histogram.len()
    }

    pub fn event_count(&self) -> u64 {
        self.lock().event_count
    }

    pub fn failure_count(&self) -> u64 {
        self.lock().failure_count
    }

    /// Number of events recorded under `name`
    pub fn count_for(&self, name: &str) -> u64 {
        self.lock().per_name.get(name).copied().unwrap_or(0)
    }

    /// Print statistics, save histogram to file, and reset the interval
    pub fn print_stats(&self) {
        let report = self.take_report(&mut self.lock());
        self.publish(report);
    }

    /// Snapshot the current interval and start a new one
    fn take_report(&self, state: &mut StatsState) -> IntervalReport {
        let report = IntervalReport {
            stats: Self::stats_of(&state.histogram),
            count: state.histogram.len(),
            failures: state.failure_count,
            by_name: state.per_name.clone(),
            histogram: self.save_histogram.then(|| state.histogram.clone()),
            interval_elapsed: state.interval_start.elapsed(),
        };

        state.histogram.reset();
        state.interval_start = Instant::now();
        report
    }

    /// Print and persist a report. Runs without the state lock held.
    fn publish(&self, report: IntervalReport) {
        match serde_json::to_string_pretty(&report.to_json()) {
            Ok(text) => println!("{}", text),
            Err(e) => log::error!("Failed to render stats: {}", e),
        }

        let stats = &report.stats;
        log::info!(
            "Latency stats (ms): p50={:.3}, p90={:.3}, p95={:.3}, p99={:.3}, p99.9={:.3}, p99.99={:.3}, max={:.3}",
            us_to_ms(stats.p50),
            us_to_ms(stats.p90),
            us_to_ms(stats.p95),
            us_to_ms(stats.p99),
            us_to_ms(stats.p99_9),
            us_to_ms(stats.p99_99),
            us_to_ms(stats.max)
        );

        if let Some(histogram) = &report.histogram {
            self.save_histogram_to_file(histogram, report.interval_elapsed);
        }
    }

    /// Save an interval histogram to an HdrHistogram .hlog file.
    /// Uses the host as directory name with separators replaced by underscores.
    fn save_histogram_to_file(&self, histogram: &Histogram<u64>, interval_elapsed: Duration) {
        let folder = format!("./{}", histogram_folder(&self.host));
        if let Err(e) = fs::create_dir_all(&folder) {
            log::error!("Failed to create histogram log directory '{}': {}", folder, e);
            return;
        }

        let path = format!("{}/histogram_rust.hlog", folder);
        let mut file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                log::error!("Failed to open histogram log file '{}': {}", path, e);
                return;
            }
        };

        let start_time = SystemTime::now() - interval_elapsed;

        let mut serializer = V2DeflateSerializer::new();
        let mut builder = IntervalLogWriterBuilder::new();
        builder
            .add_comment("[Logged with Rust Bounceback Client 0.1.0]")
            .with_base_time(start_time)
            .with_start_time(start_time);

        let mut log_writer = match builder.begin_log_with(&mut file, &mut serializer) {
            Ok(w) => w,
            Err(e) => {
                log::error!("Failed to create interval log writer: {}", e);
                return;
            }
        };

        if let Err(e) = log_writer.write_histogram(
            histogram,
            Duration::ZERO,
            interval_elapsed,
            hdrhistogram::serialization::interval_log::Tag::new("bounceback"),
        ) {
            log::error!("Failed to write histogram to log: {}", e);
            return;
        }

        log::info!("Histogram saved to {}", path);
    }

    fn stats_of(histogram: &Histogram<u64>) -> LatencyStats {
        LatencyStats {
            p50: histogram.value_at_quantile(0.50),
            p90: histogram.value_at_quantile(0.90),
            p95: histogram.value_at_quantile(0.95),
            p99: histogram.value_at_quantile(0.99),
            p99_9: histogram.value_at_quantile(0.999),
            p99_99: histogram.value_at_quantile(0.9999),
            max: histogram.max(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for HistogramSink {
    fn record(&self, event: MeasurementEvent) {
        log::debug!(
            "{} {} {:.3} ms {} bytes",
            event.category, event.name, event.elapsed_ms, event.byte_length
        );

        let failed = event.is_failure() || event.category != EventCategory::ResponseReceived;

        let mut state = self.lock();
        state.event_count += 1;
        *state.per_name.entry(event.name).or_insert(0) += 1;

        if failed {
            state.failure_count += 1;
        } else {
            let micros = (event.elapsed_ms * 1000.0).round().max(0.0) as u64;
            let clamped = micros.clamp(1, MAX_LATENCY_US);
            if let Err(e) = state.histogram.record(clamped) {
                log::warn!("Failed to record latency {} us: {}", micros, e);
            }
        }

        let report = if state.event_count % self.report_every == 0 {
            Some(self.take_report(&mut state))
        } else {
            None
        };
        drop(state);

        if let Some(report) = report {
            self.publish(report);
        }
    }
}

/// One interval's worth of statistics, detached from the live histogram
struct IntervalReport {
    stats: LatencyStats,
    count: u64,
    failures: u64,
    by_name: BTreeMap<String, u64>,
    /// Present only when histogram logging is enabled
    histogram: Option<Histogram<u64>>,
    interval_elapsed: Duration,
}

impl IntervalReport {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "latency_ms": {
                "p50": us_to_ms(self.stats.p50),
                "p90": us_to_ms(self.stats.p90),
                "p95": us_to_ms(self.stats.p95),
                "p99": us_to_ms(self.stats.p99),
                "p99.9": us_to_ms(self.stats.p99_9),
                "p99.99": us_to_ms(self.stats.p99_99),
                "max": us_to_ms(self.stats.max),
            },
            "count": self.count,
            "failures": self.failures,
            "by_name": self.by_name,
        })
    }
}

fn us_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}

/// Directory name for a host such as `ws://chat.local:9999`
fn histogram_folder(host: &str) -> String {
    let bare = host.split_once("://").map(|(_, rest)| rest).unwrap_or(host);
    bare.replace(['.', ':', '/'], "_")
}

//! Metrics Collector (C4): per-connection rolling throughput and
//! matching-latency windows.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// EWMA smoothing factor.
const LATENCY_EWMA_ALPHA: f64 = 0.1;

/// Width of the rolling throughput window.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// A coherent, lock-free-consistent snapshot of one connection's metrics;
/// readers see a coherent triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub lines_per_minute: u64,
    pub matching_lines_per_minute: u64,
    pub matching_latency: Option<Duration>,
}

/// Per-connection rolling counters plus an EWMA latency estimate. Interior
/// mutability via a single mutex keeps all three fields consistent at
/// snapshot time without exposing locking to callers.
pub struct MetricsWindow {
    inner: Mutex<WindowState>,
}

struct WindowState {
    total_lines: VecDeque<Instant>,
    matched_lines: VecDeque<Instant>,
    latency_ewma: Option<Duration>,
}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsWindow {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(WindowState {
                total_lines: VecDeque::new(),
                matched_lines: VecDeque::new(),
                latency_ewma: None,
            }),
        }
    }

    /// Record one processed line: always counted toward throughput;
    /// `matched` and `latency` are populated when the parser registry
    /// produced an event for it.
    pub fn record_line(&self, matched: bool, latency: Option<Duration>) {
        let now = Instant::now();
        let mut state = self.inner.lock();

        state.total_lines.push_back(now);
        evict_older_than(&mut state.total_lines, now, THROUGHPUT_WINDOW);

        if matched {
            state.matched_lines.push_back(now);
            evict_older_than(&mut state.matched_lines, now, THROUGHPUT_WINDOW);
        }

        if let Some(sample) = latency {
            state.latency_ewma = Some(match state.latency_ewma {
                None => sample,
                Some(prev) => ewma(prev, sample),
            });
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Instant::now();
        let mut state = self.inner.lock();
        evict_older_than(&mut state.total_lines, now, THROUGHPUT_WINDOW);
        evict_older_than(&mut state.matched_lines, now, THROUGHPUT_WINDOW);

        MetricsSnapshot {
            lines_per_minute: state.total_lines.len() as u64,
            matching_lines_per_minute: state.matched_lines.len() as u64,
            matching_latency: state.latency_ewma,
        }
    }
}

fn evict_older_than(samples: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = samples.front() {
        if now.saturating_duration_since(front) > window {
            samples.pop_front();
        } else {
            break;
        }
    }
}

fn ewma(prev: Duration, sample: Duration) -> Duration {
    let prev_secs = prev.as_secs_f64();
    let sample_secs = sample.as_secs_f64();
    let next = LATENCY_EWMA_ALPHA * sample_secs + (1.0 - LATENCY_EWMA_ALPHA) * prev_secs;
    Duration::from_secs_f64(next.max(0.0))
}

/// Aggregates metrics across every connected server: sums for throughput
/// and a simple mean across connections with non-zero latency.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregateMetrics {
    pub total_lines_per_minute: u64,
    pub total_matching_lines_per_minute: u64,
    pub mean_matching_latency: Option<Duration>,
}

pub fn aggregate(snapshots: &[MetricsSnapshot]) -> AggregateMetrics {
    let total_lines_per_minute = snapshots.iter().map(|s| s.lines_per_minute).sum();
    let total_matching_lines_per_minute = snapshots.iter().map(|s| s.matching_lines_per_minute).sum();

    let latencies: Vec<Duration> = snapshots.iter().filter_map(|s| s.matching_latency).collect();
    let mean_matching_latency = if latencies.is_empty() {
        None
    } else {
        let total: Duration = latencies.iter().sum();
        Some(total / latencies.len() as u32)
    };

    AggregateMetrics {
        total_lines_per_minute,
        total_matching_lines_per_minute,
        mean_matching_latency,
    }
}

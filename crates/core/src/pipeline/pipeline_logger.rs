use std::collections::HashMap;
use std::time::Instant;

/// Cross-cutting sink for per-cycle loop events.
///
/// The scheduler and the detection cycle report here instead of writing
/// to a specific output, so a host can observe the loop (or ignore it)
/// without touching the orchestration code.
pub trait PipelineLogger: Send {
    /// Report cycle progress. `total` is 0 for an open-ended loop.
    fn progress(&mut self, current: usize, total: usize);

    /// Record how long a named stage took for one cycle.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. detections per cycle).
    fn metric(&mut self, name: &str, value: f64);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-loop summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent logger that discards all events.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _current: usize, _total: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Running count, sum and maximum of one stream of samples.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aggregate {
    pub count: u64,
    pub total: f64,
    pub max: f64,
    pub last: f64,
}

impl Aggregate {
    fn record(&mut self, value: f64) {
        if self.count == 0 || value > self.max {
            self.max = value;
        }
        self.count += 1;
        self.total += value;
        self.last = value;
    }

    pub fn mean(&self) -> f64 {
        self.total / self.count.max(1) as f64
    }
}

/// CLI-oriented logger that aggregates per-stage timings and metrics and
/// reports averages plus loop throughput when the loop exits.
///
/// Only running aggregates are kept, so memory stays flat however long the
/// loop runs. Progress lines go out every `throttle_cycles` cycles; a live
/// loop at display rate would otherwise flood the log.
pub struct StdoutPipelineLogger {
    throttle_cycles: usize,
    timings: HashMap<String, Aggregate>,
    metrics: HashMap<String, Aggregate>,
    start_time: Instant,
    cycles: usize,
    last_message: Option<String>,
}

impl StdoutPipelineLogger {
    pub fn new(throttle_cycles: usize) -> Self {
        Self {
            throttle_cycles: throttle_cycles.max(1),
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            cycles: 0,
            last_message: None,
        }
    }

    /// Returns the formatted summary string, or `None` if no data recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let cycles = self.cycles;
        let mut lines = Vec::new();

        lines.push(format!(
            "Loop summary ({cycles} cycles, {:.1}s total):",
            elapsed_ms / 1000.0
        ));

        let mut stages: Vec<_> = self.timings.iter().collect();
        stages.sort_by(|a, b| a.0.cmp(b.0));
        for (stage, agg) in stages {
            lines.push(format!(
                "  {stage:12}: avg {:6.1}ms  max {:6.1}ms  total {:7.0}ms",
                agg.mean(),
                agg.max,
                agg.total
            ));
        }

        let mut metrics: Vec<_> = self.metrics.iter().collect();
        metrics.sort_by(|a, b| a.0.cmp(b.0));
        for (name, agg) in metrics {
            lines.push(format!("  {name}: avg {:.1}", agg.mean()));
        }

        if cycles > 0 && elapsed_ms > 0.0 {
            let rate = cycles as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Throughput: {rate:.1} cycles/s"));
        }

        Some(lines.join("\n"))
    }

    pub fn timing_stats(&self, stage: &str) -> Option<Aggregate> {
        self.timings.get(stage).copied()
    }

    pub fn metric_stats(&self, name: &str) -> Option<Aggregate> {
        self.metrics.get(name).copied()
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(60)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, current: usize, total: usize) {
        self.cycles = current;
        if current % self.throttle_cycles != 0 && current != total {
            return;
        }
        if total > 0 {
            let pct = current as f64 / total as f64 * 100.0;
            log::info!("Cycle {current}/{total} ({pct:.1}%)");
        } else {
            let detections = self
                .metrics
                .get("detections")
                .map(|agg| agg.last)
                .unwrap_or(0.0);
            log::info!("Cycle {current}: {detections} face(s)");
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        match self.timings.get_mut(stage) {
            Some(agg) => agg.record(duration_ms),
            None => {
                let mut agg = Aggregate::default();
                agg.record(duration_ms);
                self.timings.insert(stage.to_string(), agg);
            }
        }
    }

    fn metric(&mut self, name: &str, value: f64) {
        match self.metrics.get_mut(name) {
            Some(agg) => agg.record(value),
            None => {
                let mut agg = Aggregate::default();
                agg.record(value);
                self.metrics.insert(name.to_string(), agg);
            }
        }
    }

    fn info(&mut self, message: &str) {
        self.last_message = Some(message.to_string());
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}

use std::collections::BTreeMap;
use std::time::Instant;

/// Observer for the capture loop's per-frame events.
///
/// Lets the CLI report throughput and stage timings while tests plug in a
/// silent logger, without the loop knowing where the output goes.
pub trait PipelineLogger: Send {
    /// Called after every frame read; the stream has no known length.
    fn progress(&mut self, frames_read: usize);

    /// Record how long a named stage took for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. queue depth, face count).
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// Emit an end-of-capture summary. Default: no-op.
    fn summary(&self) {}
}

pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _frames_read: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Running aggregate of one stage or metric. A camera stream has no end, so
/// samples are folded in rather than kept.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunningStats {
    pub count: u64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
}

impl RunningStats {
    fn first(value: f64) -> Self {
        Self {
            count: 1,
            total: value,
            min: value,
            max: value,
            last: value,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
    }

    pub fn mean(&self) -> f64 {
        self.total / self.count as f64
    }
}

fn record(table: &mut BTreeMap<String, RunningStats>, key: &str, value: f64) {
    match table.get_mut(key) {
        Some(stats) => stats.add(value),
        None => {
            table.insert(key.to_string(), RunningStats::first(value));
        }
    }
}

/// Logger for the CLI: reports the capture rate through `log` every
/// `report_every` frames and a per-stage breakdown when capture stops.
pub struct LogPipelineLogger {
    report_every: usize,
    started: Instant,
    last_report: (Instant, usize),
    frames_read: usize,
    timings: BTreeMap<String, RunningStats>,
    metrics: BTreeMap<String, RunningStats>,
}

impl LogPipelineLogger {
    pub fn new(report_every: usize) -> Self {
        let now = Instant::now();
        Self {
            report_every: report_every.max(1),
            started: now,
            last_report: (now, 0),
            frames_read: 0,
            timings: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn stage(&self, stage: &str) -> Option<&RunningStats> {
        self.timings.get(stage)
    }

    pub fn gauge(&self, name: &str) -> Option<&RunningStats> {
        self.metrics.get(name)
    }

    /// The end-of-capture report, or `None` before anything was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let secs = self.started.elapsed().as_secs_f64();
        let mut out = format!("Capture summary ({} frames, {secs:.1}s total):", self.frames_read);

        for (stage, s) in &self.timings {
            out.push_str(&format!(
                "\n  {stage:8} mean {:6.1}ms  min {:6.1}ms  max {:6.1}ms  over {} frames",
                s.mean(),
                s.min,
                s.max,
                s.count
            ));
        }
        for (name, s) in &self.metrics {
            out.push_str(&format!("\n  {name}: mean {:.1}, peak {:.0}", s.mean(), s.max));
        }
        if self.frames_read > 0 && secs > 0.0 {
            out.push_str(&format!("\n  Capture rate: {:.1} fps", self.frames_read as f64 / secs));
        }
        Some(out)
    }
}

impl Default for LogPipelineLogger {
    fn default() -> Self {
        Self::new(300)
    }
}

impl PipelineLogger for LogPipelineLogger {
    fn progress(&mut self, frames_read: usize) {
        self.frames_read = frames_read;
        if frames_read == 0 || frames_read % self.report_every != 0 {
            return;
        }
        let (since, frames_then) = self.last_report;
        let secs = since.elapsed().as_secs_f64();
        if secs > 0.0 {
            let fps = (frames_read - frames_then) as f64 / secs;
            log::info!("Captured {frames_read} frames ({fps:.1} fps)");
        } else {
            log::info!("Captured {frames_read} frames");
        }
        self.last_report = (Instant::now(), frames_read);
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        record(&mut self.timings, stage, duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        record(&mut self.metrics, name, value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("{text}");
        }
    }
}

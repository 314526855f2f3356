use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub gates: BTreeMap<String, GateMetrics>,
    pub total_duration_ms: f64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Default, Serialize, Clone, PartialEq, Eq)]
pub struct GateMetrics {
    pub passes: u64,
    pub failures: u64,
}

/// Cheap to clone; clones share the same counters.
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_stage(&self, stage_name: &str) -> StageTimer {
        StageTimer {
            stage: stage_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            failed: false,
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn record_gate(&self, gate: &str, passed: bool) {
        if let Ok(mut guard) = self.inner.lock() {
            let entry = guard.gates.entry(gate.to_string()).or_default();
            if passed {
                entry.passes += 1;
            } else {
                entry.failures += 1;
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

/// Records the stage duration when dropped.
pub struct StageTimer {
    stage: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    failed: bool,
}

impl StageTimer {
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.stages.entry(self.stage.clone()).or_default();
            metrics.calls += 1;
            if self.failed {
                metrics.failures += 1;
            }
            metrics.total_duration_ms += duration_ms;
            metrics.max_duration_ms = metrics.max_duration_ms.max(duration_ms);
        }
        debug!(
            stage = self.stage.as_str(),
            duration_ms,
            failed = self.failed,
            "Stage duration recorded"
        );
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        stage_count = snapshot.stages.len(),
        "Pipeline metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            failures = metrics.failures,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Stage metrics"
        );
    }
    for (gate, metrics) in &snapshot.gates {
        info!(
            gate = gate.as_str(),
            passes = metrics.passes,
            failures = metrics.failures,
            "Gate metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "# HELP forge_gate_passes_total Gate evaluations that passed");
        let _ = writeln!(output, "# TYPE forge_gate_passes_total counter");
        for (gate, metrics) in &self.gates {
            let _ = writeln!(
                output,
                "forge_gate_passes_total{{gate=\"{gate}\"}} {}",
                metrics.passes
            );
        }
        let _ = writeln!(output, "# HELP forge_gate_failures_total Gate evaluations that failed");
        let _ = writeln!(output, "# TYPE forge_gate_failures_total counter");
        for (gate, metrics) in &self.gates {
            let _ = writeln!(
                output,
                "forge_gate_failures_total{{gate=\"{gate}\"}} {}",
                metrics.failures
            );
        }

        let _ = writeln!(output, "# HELP forge_stage_calls_total Stage invocation count");
        let _ = writeln!(output, "# TYPE forge_stage_calls_total counter");
        let _ = writeln!(output, "# HELP forge_stage_failures_total Stage failure count");
        let _ = writeln!(output, "# TYPE forge_stage_failures_total counter");
        let _ = writeln!(
            output,
            "# HELP forge_stage_duration_seconds_total Accumulated stage duration in seconds"
        );
        let _ = writeln!(output, "# TYPE forge_stage_duration_seconds_total counter");
        let _ = writeln!(
            output,
            "# HELP forge_stage_duration_seconds_max Maximum stage duration in seconds"
        );
        let _ = writeln!(output, "# TYPE forge_stage_duration_seconds_max gauge");
        for (stage, metrics) in &self.stages {
            let _ = writeln!(
                output,
                "forge_stage_calls_total{{stage=\"{stage}\"}} {}",
                metrics.calls
            );
            let _ = writeln!(
                output,
                "forge_stage_failures_total{{stage=\"{stage}\"}} {}",
                metrics.failures
            );
            let _ = writeln!(
                output,
                "forge_stage_duration_seconds_total{{stage=\"{stage}\"}} {:.6}",
                metrics.total_duration_ms / 1_000.0
            );
            let _ = writeln!(
                output,
                "forge_stage_duration_seconds_max{{stage=\"{stage}\"}} {:.6}",
                metrics.max_duration_ms / 1_000.0
            );
        }

        let _ = writeln!(output, "# HELP forge_pipeline_duration_seconds Total run duration");
        let _ = writeln!(output, "# TYPE forge_pipeline_duration_seconds gauge");
        let _ = writeln!(
            output,
            "forge_pipeline_duration_seconds {:.6}",
            self.total_duration_ms / 1_000.0
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_records_on_drop() {
        let metrics = MetricsCollector::new();
        {
            let _timer = metrics.start_stage("train");
        }
        {
            let mut timer = metrics.start_stage("train");
            timer.mark_failed();
        }
        let snapshot = metrics.snapshot();
        let train = &snapshot.stages["train"];
        assert_eq!(train.calls, 2);
        assert_eq!(train.failures, 1);
    }

    #[test]
    fn prometheus_output_labels_gates_and_stages() {
        let metrics = MetricsCollector::new();
        metrics.record_gate("training_accuracy", true);
        metrics.record_gate("validation", false);
        drop(metrics.start_stage("ingest"));

        let text = metrics.snapshot().to_prometheus();
        assert!(text.contains("forge_gate_passes_total{gate=\"training_accuracy\"} 1"));
        assert!(text.contains("forge_gate_failures_total{gate=\"validation\"} 1"));
        assert!(text.contains("forge_stage_calls_total{stage=\"ingest\"} 1"));
    }
}

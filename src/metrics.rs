//! Aggregation of a finished case's samples into a [`MetricSet`].
//!
//! Every figure is per operation (already divided by N). Metrics are
//! registered on a [`Reporter`] and evaluated in registration order, so a
//! derived metric such as [`CompressionRatio`] can read the ones before it.

use std::cmp::Ordering;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::harness::{CaseRun, WireSize};

pub const NS_PER_OP: &str = "ns/op";
pub const DECODED_BYTES_PER_OP: &str = "decoded_bytes/op";
pub const WIRE_BYTES_PER_OP: &str = "wire_bytes/op";
pub const COMPRESSION_RATIO: &str = "compression_ratio";
pub const OPS_PER_SEC: &str = "ops/s";

/// A computed figure, or an explicit marker saying why it could not be computed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Value(f64),
    Undefined { undefined: String },
}

impl MetricValue {
    pub fn undefined(reason: impl Into<String>) -> Self {
        MetricValue::Undefined {
            undefined: reason.into(),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Value(v) => Some(*v),
            MetricValue::Undefined { .. } => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, MetricValue::Undefined { .. })
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Value(v) => write!(f, "{v:.2}"),
            MetricValue::Undefined { undefined } => write!(f, "undefined ({undefined})"),
        }
    }
}

/// Metric name to value, in the order the metrics were computed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricSet {
    entries: Vec<(String, MetricValue)>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: MetricValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Shorthand for a defined value.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(MetricValue::value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for MetricSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MetricSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SetVisitor;

        impl<'de> Visitor<'de> for SetVisitor {
            type Value = MetricSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of metric name to value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<MetricSet, A::Error> {
                let mut set = MetricSet::new();
                while let Some((name, value)) = access.next_entry::<String, MetricValue>()? {
                    set.insert(name, value);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_map(SetVisitor)
    }
}

/// A named aggregation over a finished run.
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;

    /// `so_far` holds every metric registered before this one.
    fn compute(&self, run: &CaseRun, so_far: &MetricSet) -> MetricValue;
}

fn per_op(total: f64, run: &CaseRun) -> MetricValue {
    if run.samples.is_empty() {
        return MetricValue::undefined("no samples");
    }
    MetricValue::Value(total / run.samples.len() as f64)
}

fn wire_total(run: &CaseRun) -> Result<u64, String> {
    run.samples.iter().try_fold(0u64, |acc, s| match s.wire {
        WireSize::Identity => Ok(acc + s.decoded_bytes),
        WireSize::Reported(n) => Ok(acc + n),
        WireSize::Unreported => Err(format!(
            "iteration {} carried no wire-size metadata",
            s.iteration
        )),
    })
}

/// Mean latency per operation in nanoseconds.
pub struct NsPerOp;

impl Metric for NsPerOp {
    fn name(&self) -> &str {
        NS_PER_OP
    }

    fn compute(&self, run: &CaseRun, _so_far: &MetricSet) -> MetricValue {
        per_op(run.total_ns() as f64, run)
    }
}

pub struct DecodedBytesPerOp;

impl Metric for DecodedBytesPerOp {
    fn name(&self) -> &str {
        DECODED_BYTES_PER_OP
    }

    fn compute(&self, run: &CaseRun, _so_far: &MetricSet) -> MetricValue {
        let total: u64 = run.samples.iter().map(|s| s.decoded_bytes).sum();
        per_op(total as f64, run)
    }
}

/// Identity samples count their decoded size; any unreported sample makes
/// the whole figure undefined rather than silently low.
pub struct WireBytesPerOp;

impl Metric for WireBytesPerOp {
    fn name(&self) -> &str {
        WIRE_BYTES_PER_OP
    }

    fn compute(&self, run: &CaseRun, _so_far: &MetricSet) -> MetricValue {
        match wire_total(run) {
            Ok(total) => per_op(total as f64, run),
            Err(reason) => MetricValue::undefined(reason),
        }
    }
}

/// `decoded_bytes/op ÷ wire_bytes/op`, read from metrics computed earlier.
pub struct CompressionRatio;

impl Metric for CompressionRatio {
    fn name(&self) -> &str {
        COMPRESSION_RATIO
    }

    fn compute(&self, _run: &CaseRun, so_far: &MetricSet) -> MetricValue {
        let decoded = match so_far.get(DECODED_BYTES_PER_OP) {
            Some(MetricValue::Value(v)) => *v,
            Some(MetricValue::Undefined { .. }) => {
                return MetricValue::undefined("decoded_bytes/op is undefined")
            }
            None => return MetricValue::undefined("decoded_bytes/op was not computed"),
        };
        let wire = match so_far.get(WIRE_BYTES_PER_OP) {
            Some(MetricValue::Value(v)) => *v,
            Some(MetricValue::Undefined { .. }) => {
                return MetricValue::undefined("wire_bytes/op is undefined")
            }
            None => return MetricValue::undefined("wire_bytes/op was not computed"),
        };

        if wire == 0.0 {
            return MetricValue::undefined("wire_bytes/op is zero");
        }
        MetricValue::Value(decoded / wire)
    }
}

/// Completed operations per second over the measured window.
pub struct OpsPerSec;

impl Metric for OpsPerSec {
    fn name(&self) -> &str {
        OPS_PER_SEC
    }

    fn compute(&self, run: &CaseRun, _so_far: &MetricSet) -> MetricValue {
        let secs = run.wall.as_secs_f64();
        if secs <= 0.0 {
            return MetricValue::undefined("measured window is empty");
        }
        MetricValue::Value(run.samples.len() as f64 / secs)
    }
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Per-sample latency quantile in nanoseconds.
pub struct LatencyQuantile {
    name: String,
    q: f64,
}

impl LatencyQuantile {
    pub fn new(name: impl Into<String>, q: f64) -> Self {
        Self {
            name: name.into(),
            q: q.clamp(0.0, 1.0),
        }
    }
}

impl Metric for LatencyQuantile {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, run: &CaseRun, _so_far: &MetricSet) -> MetricValue {
        if run.samples.is_empty() {
            return MetricValue::undefined("no samples");
        }
        let mut latencies: Vec<f64> = run
            .samples
            .iter()
            .map(|s| s.elapsed.as_nanos() as f64)
            .collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        MetricValue::Value(quantile(&latencies, self.q))
    }
}

/// Caller-supplied metric from a closure.
pub struct FnMetric<F> {
    name: String,
    f: F,
}

impl<F> FnMetric<F>
where
    F: Fn(&CaseRun, &MetricSet) -> MetricValue + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Metric for FnMetric<F>
where
    F: Fn(&CaseRun, &MetricSet) -> MetricValue + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, run: &CaseRun, so_far: &MetricSet) -> MetricValue {
        (self.f)(run, so_far)
    }
}

/// Ordered list of metrics applied to every finished case.
pub struct Reporter {
    metrics: Vec<Box<dyn Metric>>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::standard()
    }
}

impl Reporter {
    pub fn empty() -> Self {
        Self {
            metrics: Vec::new(),
        }
    }

    /// `ns/op`, `decoded_bytes/op`, `wire_bytes/op`, `compression_ratio`.
    pub fn standard() -> Self {
        Self::empty()
            .with_metric(NsPerOp)
            .with_metric(DecodedBytesPerOp)
            .with_metric(WireBytesPerOp)
            .with_metric(CompressionRatio)
    }

    /// The standard set plus throughput and tail latency.
    pub fn extended() -> Self {
        Self::standard()
            .with_metric(OpsPerSec)
            .with_metric(LatencyQuantile::new("p50_ns", 0.50))
            .with_metric(LatencyQuantile::new("p99_ns", 0.99))
    }

    pub fn with_metric(mut self, metric: impl Metric + 'static) -> Self {
        self.register(Box::new(metric));
        self
    }

    pub fn register(&mut self, metric: Box<dyn Metric>) {
        self.metrics.push(metric);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|m| m.name())
    }

    pub fn summarize(&self, run: &CaseRun) -> MetricSet {
        let mut set = MetricSet::new();
        for metric in &self.metrics {
            let value = metric.compute(run, &set);
            set.insert(metric.name(), value);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{ExecutionMode, Sample};
    use crate::payload::SizeClass;
    use std::time::Duration;

    fn run_of(samples: Vec<Sample>) -> CaseRun {
        CaseRun {
            case: "test".to_string(),
            size: SizeClass::Small,
            mode: ExecutionMode::Sequential,
            warmup_iters: 0,
            samples,
            wall: Duration::from_millis(10),
        }
    }

    fn sample(iteration: u64, elapsed_ns: u64, decoded: u64, wire: WireSize) -> Sample {
        Sample {
            iteration,
            worker: 0,
            elapsed: Duration::from_nanos(elapsed_ns),
            decoded_bytes: decoded,
            wire,
        }
    }

    #[test]
    fn test_ns_per_op_is_total_divided_by_n() {
        let run = run_of(vec![
            sample(0, 100, 1, WireSize::Identity),
            sample(1, 300, 1, WireSize::Identity),
            sample(2, 200, 1, WireSize::Identity),
        ]);
        let set = Reporter::standard().summarize(&run);
        assert_eq!(set.value(NS_PER_OP), Some(200.0));
    }

    #[test]
    fn test_identity_payloads_have_ratio_exactly_one() {
        for decoded in [32u64, 1_500, 12_000] {
            let run = run_of(
                (0..10)
                    .map(|i| sample(i, 50, decoded, WireSize::Identity))
                    .collect(),
            );
            let set = Reporter::standard().summarize(&run);
            assert_eq!(set.value(DECODED_BYTES_PER_OP), Some(decoded as f64));
            assert_eq!(set.value(WIRE_BYTES_PER_OP), Some(decoded as f64));
            assert_eq!(set.value(COMPRESSION_RATIO), Some(1.0));
        }
    }

    #[test]
    fn test_compressed_payloads_have_ratio_above_one() {
        let run = run_of(
            (0..4)
                .map(|i| sample(i, 50, 1_000, WireSize::Reported(200)))
                .collect(),
        );
        let set = Reporter::standard().summarize(&run);
        assert_eq!(set.value(WIRE_BYTES_PER_OP), Some(200.0));
        assert_eq!(set.value(COMPRESSION_RATIO), Some(5.0));
    }

    #[test]
    fn test_unreported_wire_size_is_flagged_not_zeroed() {
        let run = run_of(vec![
            sample(0, 50, 900, WireSize::Reported(300)),
            sample(1, 50, 900, WireSize::Unreported),
        ]);
        let set = Reporter::standard().summarize(&run);

        assert_eq!(set.value(DECODED_BYTES_PER_OP), Some(900.0));
        assert!(set.get(WIRE_BYTES_PER_OP).unwrap().is_undefined());
        assert!(set.get(COMPRESSION_RATIO).unwrap().is_undefined());
    }

    #[test]
    fn test_zero_wire_bytes_never_divides() {
        let run = run_of(vec![sample(0, 50, 0, WireSize::Identity)]);
        let set = Reporter::standard().summarize(&run);

        assert_eq!(set.value(WIRE_BYTES_PER_OP), Some(0.0));
        assert_eq!(
            set.get(COMPRESSION_RATIO),
            Some(&MetricValue::undefined("wire_bytes/op is zero"))
        );
    }

    #[test]
    fn test_ratio_without_its_inputs_is_undefined() {
        let run = run_of(vec![sample(0, 50, 10, WireSize::Identity)]);
        let set = Reporter::empty()
            .with_metric(CompressionRatio)
            .summarize(&run);
        assert!(set.get(COMPRESSION_RATIO).unwrap().is_undefined());
    }

    #[test]
    fn test_custom_metrics_see_earlier_results() {
        let run = run_of(
            (0..5)
                .map(|i| sample(i, 1_000, 64, WireSize::Identity))
                .collect(),
        );
        let reporter = Reporter::standard().with_metric(FnMetric::new(
            "bytes/us",
            |_run: &CaseRun, so_far: &MetricSet| {
                match (so_far.value(DECODED_BYTES_PER_OP), so_far.value(NS_PER_OP)) {
                    (Some(bytes), Some(ns)) if ns > 0.0 => MetricValue::Value(bytes / (ns / 1_000.0)),
                    _ => MetricValue::undefined("missing inputs"),
                }
            },
        ));

        let names: Vec<&str> = reporter.names().collect();
        assert_eq!(names.last(), Some(&"bytes/us"));

        let set = reporter.summarize(&run);
        assert_eq!(set.value("bytes/us"), Some(64.0));
    }

    #[test]
    fn test_extended_reporter_adds_throughput_and_quantiles() {
        let run = run_of(
            (0..100)
                .map(|i| sample(i, (i + 1) * 10, 1, WireSize::Identity))
                .collect(),
        );
        let set = Reporter::extended().summarize(&run);

        let ops = set.value(OPS_PER_SEC).unwrap();
        assert!((ops - 10_000.0).abs() < 1e-6);
        assert_eq!(set.value("p50_ns"), Some(510.0));
        assert_eq!(set.value("p99_ns"), Some(990.0));
    }

    #[test]
    fn test_metric_set_serializes_in_order_with_undefined_marker() {
        let mut set = MetricSet::new();
        set.insert(NS_PER_OP, MetricValue::Value(12.5));
        set.insert(COMPRESSION_RATIO, MetricValue::undefined("wire_bytes/op is zero"));
        set.insert(NS_PER_OP, MetricValue::Value(13.0));

        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(
            json,
            r#"{"ns/op":13.0,"compression_ratio":{"undefined":"wire_bytes/op is zero"}}"#
        );

        let back: MetricSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}

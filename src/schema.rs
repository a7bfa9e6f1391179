use std::fmt::Write as _;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::harness::CaseRun;
use crate::metrics::MetricSet;
use crate::payload::SizeClass;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Json,
    /// Aligned table for terminals.
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub schema_version: u32,
    pub bench_version: String,
    pub profile: String,
    pub seed: u64,
    pub timestamp_utc: String,
    pub git_sha: Option<String>,
}

/// One case and its metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    pub family: String,
    pub size: SizeClass,
    pub mode: String,
    pub workers: usize,

    pub iters: u64,
    pub warmup_iters: u64,

    pub total_ns: u128,
    pub wall_ns: u128,

    pub metrics: MetricSet,

    pub extra: serde_json::Value,
}

impl CaseReport {
    pub fn new(
        family: impl Into<String>,
        run: &CaseRun,
        metrics: MetricSet,
        extra: serde_json::Value,
    ) -> Self {
        Self {
            name: run.case.clone(),
            family: family.into(),
            size: run.size,
            mode: run.mode.as_str().to_string(),
            workers: run.mode.workers(),
            iters: run.iters(),
            warmup_iters: run.warmup_iters,
            total_ns: run.total_ns(),
            wall_ns: run.wall.as_nanos(),
            metrics,
            extra,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchReport {
    pub run: RunMeta,
    pub cases: Vec<CaseReport>,
}

impl BenchReport {
    pub fn render(&self, format: ReportFormat) -> serde_json::Result<String> {
        match format {
            ReportFormat::Json => serde_json::to_string_pretty(self),
            ReportFormat::Text => Ok(self.to_text()),
        }
    }

    /// Case name column followed by one column per metric name, in first-seen order.
    pub fn to_text(&self) -> String {
        let mut columns: Vec<&str> = Vec::new();
        for case in &self.cases {
            for (name, _) in case.metrics.iter() {
                if !columns.contains(&name) {
                    columns.push(name);
                }
            }
        }

        let mut rows: Vec<Vec<String>> = Vec::with_capacity(self.cases.len() + 1);
        let mut header = vec!["case".to_string()];
        header.extend(columns.iter().map(|c| c.to_string()));
        rows.push(header);

        for case in &self.cases {
            let mut row = vec![case.name.clone()];
            for column in &columns {
                row.push(match case.metrics.get(column) {
                    Some(value) if value.is_undefined() => "undefined".to_string(),
                    Some(value) => value.to_string(),
                    None => "-".to_string(),
                });
            }
            rows.push(row);
        }

        let widths: Vec<usize> = (0..=columns.len())
            .map(|i| rows.iter().map(|r| r[i].len()).max().unwrap_or(0))
            .collect();

        let mut out = String::new();
        let _ = writeln!(
            out,
            "# wirebench {} profile={} seed={} {}",
            self.run.bench_version, self.run.profile, self.run.seed, self.run.timestamp_utc
        );
        for row in &rows {
            let mut line = String::new();
            for (i, cell) in row.iter().enumerate() {
                if i == 0 {
                    let _ = write!(line, "{cell:<width$}", width = widths[i]);
                } else {
                    let _ = write!(line, "  {cell:>width$}", width = widths[i]);
                }
            }
            let _ = writeln!(out, "{}", line.trim_end());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricValue, COMPRESSION_RATIO, NS_PER_OP};

    fn report() -> BenchReport {
        let mut metrics = MetricSet::new();
        metrics.insert(NS_PER_OP, MetricValue::Value(1234.5));
        metrics.insert(COMPRESSION_RATIO, MetricValue::undefined("no wire size"));

        BenchReport {
            run: RunMeta {
                schema_version: SCHEMA_VERSION,
                bench_version: "0.0.0".to_string(),
                profile: "quick".to_string(),
                seed: 1,
                timestamp_utc: "unix:0".to_string(),
                git_sha: None,
            },
            cases: vec![CaseReport {
                name: "http.fast.get.small.gzip".to_string(),
                family: "http".to_string(),
                size: SizeClass::Small,
                mode: "sequential".to_string(),
                workers: 1,
                iters: 10,
                warmup_iters: 2,
                total_ns: 12_345,
                wall_ns: 20_000,
                metrics,
                extra: serde_json::json!({}),
            }],
        }
    }

    #[test]
    fn test_json_round_trip_keeps_metric_names() {
        let json = report().render(ReportFormat::Json).unwrap();
        assert!(json.contains("\"ns/op\": 1234.5"));
        assert!(json.contains("\"undefined\": \"no wire size\""));

        let back: BenchReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cases[0].metrics, report().cases[0].metrics);
    }

    #[test]
    fn test_text_table_marks_undefined() {
        let text = report().to_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("case"));
        assert!(lines[1].contains("compression_ratio"));
        assert!(lines[2].contains("1234.50"));
        assert!(lines[2].ends_with("undefined"));
    }
}

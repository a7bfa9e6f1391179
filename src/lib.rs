use clap::ValueEnum;

pub mod adapters;
pub mod benches;
pub mod error;
pub mod fixture;
pub mod harness;
pub mod metrics;
pub mod payload;
pub mod schema;

pub use error::{BenchError, OperationError, Result};
pub use harness::{
    run_case, BenchCase, BenchConfig, Budget, CaseRun, ExecutionMode, InvocationContext,
    Operation, Outcome, Profile, Sample, WireSize,
};
pub use metrics::{Metric, MetricSet, MetricValue, Reporter};
pub use payload::{PayloadFamily, PayloadGenerator, SizeClass};

/// Execution mode(s) to run each case in.
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    /// Single loop on the calling thread.
    #[default]
    Sequential,
    /// Worker pool sharing one invocation budget.
    Parallel,
    /// Every case twice: sequential, then parallel.
    Both,
}

impl ModeArg {
    pub fn modes(&self, workers: usize) -> Vec<ExecutionMode> {
        match self {
            ModeArg::Sequential => vec![ExecutionMode::Sequential],
            ModeArg::Parallel => vec![ExecutionMode::Parallel { workers }],
            ModeArg::Both => vec![
                ExecutionMode::Sequential,
                ExecutionMode::Parallel { workers },
            ],
        }
    }
}

use std::fmt;
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::{BenchError, OperationError, Result};
use crate::payload::SizeClass;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    Quick,
    Full,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Quick => "quick",
            Profile::Full => "full",
        }
    }
}

/// Run-wide knobs. Explicit overrides win over the profile defaults.
#[derive(Clone, Debug)]
pub struct BenchConfig {
    pub profile: Profile,
    pub seed: u64,
    pub iters: Option<u64>,
    pub warmup_iters: Option<u64>,
    /// Run each case for a fixed wall-clock window instead of a fixed count.
    pub duration: Option<Duration>,
    pub workers: Option<usize>,
    /// Per-invocation timeout handed to adapters.
    pub timeout: Duration,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::new(Profile::Quick, 0)
    }
}

impl BenchConfig {
    pub fn new(profile: Profile, seed: u64) -> Self {
        Self {
            profile,
            seed,
            iters: None,
            warmup_iters: None,
            duration: None,
            workers: None,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn warmup_iters(&self) -> u64 {
        self.warmup_iters.unwrap_or(match self.profile {
            Profile::Quick => 32,
            Profile::Full => 200,
        })
    }

    pub fn iters(&self) -> u64 {
        self.iters.unwrap_or(match self.profile {
            Profile::Quick => 300,
            Profile::Full => 3_000,
        })
    }

    pub fn budget(&self) -> Budget {
        match self.duration {
            Some(window) => Budget::Duration(window),
            None => Budget::Iterations(self.iters()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Build a case carrying this config's budget and warm-up count.
    pub fn case(
        &self,
        name: impl Into<String>,
        size: SizeClass,
        mode: ExecutionMode,
        operation: Arc<dyn Operation>,
    ) -> Result<BenchCase> {
        BenchCase::builder(name, operation)
            .size(size)
            .budget(self.budget())
            .mode(mode)
            .warmup(self.warmup_iters())
            .build()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    /// Fixed-size pool sharing one invocation budget.
    Parallel { workers: usize },
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel { .. } => "parallel",
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Parallel { workers } => *workers,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Budget {
    /// Exactly this many measured invocations across all workers.
    Iterations(u64),
    /// Keep claiming invocations until the window closes (at least one runs).
    Duration(Duration),
}

impl Budget {
    fn admits(&self, iteration: u64, start: Instant) -> bool {
        match self {
            Budget::Iterations(n) => iteration < *n,
            Budget::Duration(window) => iteration == 0 || start.elapsed() < *window,
        }
    }

    fn capacity_hint(&self) -> usize {
        match self {
            Budget::Iterations(n) => (*n).min(1 << 20) as usize,
            Budget::Duration(_) => 1024,
        }
    }
}

/// Identifies the invocation being made; adapters may ignore it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvocationContext {
    pub iteration: u64,
    pub worker: usize,
}

/// How many bytes crossed the transport for one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireSize {
    /// Body was not transformed in transit: wire size equals decoded size.
    Identity,
    /// Transport reported (or the adapter measured) this many bytes.
    Reported(u64),
    /// Body was transformed but no size metadata was obtainable.
    Unreported,
}

/// What an adapter hands back for one successful invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// Adapter-measured latency; the runner's own measurement is used when absent.
    pub elapsed: Option<Duration>,
    pub decoded_bytes: u64,
    pub wire: WireSize,
}

impl Outcome {
    pub fn identity(decoded_bytes: u64) -> Self {
        Self {
            elapsed: None,
            decoded_bytes,
            wire: WireSize::Identity,
        }
    }

    pub fn encoded(decoded_bytes: u64, wire: WireSize) -> Self {
        Self {
            elapsed: None,
            decoded_bytes,
            wire,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

/// A unit of work the runner can time without knowing what it does.
///
/// Implementations must not retry: a failure is reported as-is and voids the case.
pub trait Operation: Send + Sync {
    fn invoke(&self, ctx: &InvocationContext) -> std::result::Result<Outcome, OperationError>;
}

impl<F> Operation for F
where
    F: Fn(&InvocationContext) -> std::result::Result<Outcome, OperationError> + Send + Sync,
{
    fn invoke(&self, ctx: &InvocationContext) -> std::result::Result<Outcome, OperationError> {
        self(ctx)
    }
}

/// One measured, successful invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    pub iteration: u64,
    pub worker: usize,
    pub elapsed: Duration,
    pub decoded_bytes: u64,
    pub wire: WireSize,
}

/// One configuration to run. Immutable once built.
#[derive(Clone)]
pub struct BenchCase {
    name: String,
    size: SizeClass,
    operation: Arc<dyn Operation>,
    budget: Budget,
    mode: ExecutionMode,
    warmup_iters: u64,
}

impl fmt::Debug for BenchCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BenchCase")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("budget", &self.budget)
            .field("mode", &self.mode)
            .field("warmup_iters", &self.warmup_iters)
            .finish_non_exhaustive()
    }
}

impl BenchCase {
    pub fn builder(name: impl Into<String>, operation: Arc<dyn Operation>) -> BenchCaseBuilder {
        BenchCaseBuilder {
            name: name.into(),
            size: SizeClass::Small,
            operation,
            budget: Budget::Iterations(1),
            mode: ExecutionMode::Sequential,
            warmup_iters: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> SizeClass {
        self.size
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn warmup_iters(&self) -> u64 {
        self.warmup_iters
    }

    fn invocation_error(
        &self,
        iteration: u64,
        worker: usize,
        completed: usize,
        source: OperationError,
    ) -> BenchError {
        error!(
            case = %self.name,
            iteration,
            worker,
            completed,
            error = %source,
            "invocation failed, aborting case"
        );
        BenchError::Invocation {
            case: self.name.clone(),
            iteration,
            worker,
            completed,
            source,
        }
    }
}

pub struct BenchCaseBuilder {
    name: String,
    size: SizeClass,
    operation: Arc<dyn Operation>,
    budget: Budget,
    mode: ExecutionMode,
    warmup_iters: u64,
}

impl BenchCaseBuilder {
    pub fn size(mut self, size: SizeClass) -> Self {
        self.size = size;
        self
    }

    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn iterations(self, n: u64) -> Self {
        self.budget(Budget::Iterations(n))
    }

    pub fn duration(self, window: Duration) -> Self {
        self.budget(Budget::Duration(window))
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn parallel(self, workers: usize) -> Self {
        self.mode(ExecutionMode::Parallel { workers })
    }

    pub fn warmup(mut self, iters: u64) -> Self {
        self.warmup_iters = iters;
        self
    }

    pub fn build(self) -> Result<BenchCase> {
        if self.name.trim().is_empty() {
            return Err(BenchError::Config("case name must not be empty".into()));
        }
        match self.budget {
            Budget::Iterations(0) => {
                return Err(BenchError::Config(format!(
                    "case '{}': iteration count must be >= 1",
                    self.name
                )))
            }
            Budget::Duration(window) if window.is_zero() => {
                return Err(BenchError::Config(format!(
                    "case '{}': duration must be > 0",
                    self.name
                )))
            }
            _ => {}
        }
        if let ExecutionMode::Parallel { workers: 0 } = self.mode {
            return Err(BenchError::Config(format!(
                "case '{}': parallel mode needs at least one worker",
                self.name
            )));
        }

        Ok(BenchCase {
            name: self.name,
            size: self.size,
            operation: self.operation,
            budget: self.budget,
            mode: self.mode,
            warmup_iters: self.warmup_iters,
        })
    }
}

/// Every sample of one finished case. Only `run_case` produces it, so
/// aggregation can never observe a partial collection.
#[derive(Clone, Debug)]
pub struct CaseRun {
    pub case: String,
    pub size: SizeClass,
    pub mode: ExecutionMode,
    pub warmup_iters: u64,
    pub samples: Vec<Sample>,
    /// Wall-clock span of the measured window.
    pub wall: Duration,
}

impl CaseRun {
    pub fn iters(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn total_ns(&self) -> u128 {
        self.samples.iter().map(|s| s.elapsed.as_nanos()).sum()
    }
}

/// Execute a case: warm-up, reset boundary, measured loop.
pub fn run_case(case: &BenchCase) -> Result<CaseRun> {
    info!(
        case = %case.name,
        mode = case.mode.as_str(),
        workers = case.mode.workers(),
        budget = ?case.budget,
        "running case"
    );

    warm_up(case)?;

    let (samples, wall) = match case.mode {
        ExecutionMode::Sequential => run_sequential(case)?,
        ExecutionMode::Parallel { workers } => run_parallel(case, workers)?,
    };

    if let Budget::Iterations(n) = case.budget {
        debug_assert_eq!(samples.len() as u64, n);
    }

    info!(
        case = %case.name,
        samples = samples.len(),
        wall_ms = wall.as_secs_f64() * 1000.0,
        "case finished"
    );

    Ok(CaseRun {
        case: case.name.clone(),
        size: case.size,
        mode: case.mode,
        warmup_iters: case.warmup_iters,
        samples,
        wall,
    })
}

fn warm_up(case: &BenchCase) -> Result<()> {
    for iteration in 0..case.warmup_iters {
        let ctx = InvocationContext {
            iteration,
            worker: 0,
        };
        if let Err(source) = case.operation.invoke(&ctx).map(black_box) {
            warn!(case = %case.name, iteration, error = %source, "warm-up invocation failed");
            return Err(BenchError::Warmup {
                case: case.name.clone(),
                iteration,
                source,
            });
        }
    }
    Ok(())
}

fn measure(
    operation: &dyn Operation,
    ctx: &InvocationContext,
) -> std::result::Result<Sample, OperationError> {
    let start = Instant::now();
    let outcome = operation.invoke(ctx);
    let measured = start.elapsed();
    let outcome = black_box(outcome)?;

    Ok(Sample {
        iteration: ctx.iteration,
        worker: ctx.worker,
        elapsed: outcome.elapsed.unwrap_or(measured),
        decoded_bytes: outcome.decoded_bytes,
        wire: outcome.wire,
    })
}

fn run_sequential(case: &BenchCase) -> Result<(Vec<Sample>, Duration)> {
    let operation = case.operation.as_ref();
    let mut samples = Vec::with_capacity(case.budget.capacity_hint());

    // Reset boundary: nothing before this instant counts.
    let start = Instant::now();
    let mut iteration = 0u64;
    while case.budget.admits(iteration, start) {
        let ctx = InvocationContext {
            iteration,
            worker: 0,
        };
        match measure(operation, &ctx) {
            Ok(sample) => samples.push(sample),
            Err(source) => return Err(case.invocation_error(iteration, 0, samples.len(), source)),
        }
        iteration += 1;
    }

    Ok((samples, start.elapsed()))
}

struct WorkerRun {
    worker: usize,
    samples: Vec<Sample>,
    failure: Option<(u64, OperationError)>,
}

fn run_parallel(case: &BenchCase, workers: usize) -> Result<(Vec<Sample>, Duration)> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("wirebench-worker-{i}"))
        .build()
        .map_err(|e| BenchError::Config(format!("cannot build worker pool: {e}")))?;

    let next = AtomicU64::new(0);
    let abort = AtomicBool::new(false);
    let operation = case.operation.as_ref();
    let budget = case.budget;

    let start = Instant::now();
    let runs = pool.broadcast(|ctx| {
        worker_loop(operation, budget, ctx.index(), start, &next, &abort)
    });
    let wall = start.elapsed();

    merge(case, runs).map(|samples| (samples, wall))
}

fn worker_loop(
    operation: &dyn Operation,
    budget: Budget,
    worker: usize,
    start: Instant,
    next: &AtomicU64,
    abort: &AtomicBool,
) -> WorkerRun {
    let mut samples = Vec::new();

    while !abort.load(Ordering::Relaxed) {
        let iteration = next.fetch_add(1, Ordering::Relaxed);
        if !budget.admits(iteration, start) {
            break;
        }

        let ctx = InvocationContext { iteration, worker };
        match measure(operation, &ctx) {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                abort.store(true, Ordering::Relaxed);
                return WorkerRun {
                    worker,
                    samples,
                    failure: Some((iteration, e)),
                };
            }
        }
    }

    WorkerRun {
        worker,
        samples,
        failure: None,
    }
}

fn merge(case: &BenchCase, runs: Vec<WorkerRun>) -> Result<Vec<Sample>> {
    let completed: usize = runs.iter().map(|r| r.samples.len()).sum();
    let mut samples = Vec::with_capacity(completed);
    let mut failure: Option<(usize, u64, OperationError)> = None;

    for run in runs {
        debug!(
            case = %case.name,
            worker = run.worker,
            samples = run.samples.len(),
            failed = run.failure.is_some(),
            "worker finished"
        );
        samples.extend(run.samples);

        if let Some((iteration, e)) = run.failure {
            let earliest = failure.as_ref().map_or(true, |(_, first, _)| iteration < *first);
            if earliest {
                failure = Some((run.worker, iteration, e));
            }
        }
    }

    if let Some((worker, iteration, source)) = failure {
        return Err(case.invocation_error(iteration, worker, completed, source));
    }

    Ok(samples)
}

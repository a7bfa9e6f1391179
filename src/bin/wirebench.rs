use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wirebench::adapters::{DecoderKind, HttpClientKind, Method, WireAccounting};
use wirebench::benches;
use wirebench::benches::http::HttpArgs;
use wirebench::benches::json::JsonArgs;
use wirebench::harness::{BenchConfig, Profile};
use wirebench::payload::{self, PayloadGenerator, SizeClass};
use wirebench::schema::{BenchReport, ReportFormat, RunMeta, SCHEMA_VERSION};
use wirebench::ModeArg;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProfileArg {
    Quick,
    Full,
}

impl From<ProfileArg> for Profile {
    fn from(v: ProfileArg) -> Self {
        match v {
            ProfileArg::Quick => Profile::Quick,
            ProfileArg::Full => Profile::Full,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum EncodingArg {
    Identity,
    Gzip,
    #[default]
    Both,
}

impl EncodingArg {
    fn variants(&self) -> Vec<bool> {
        match self {
            EncodingArg::Identity => vec![false],
            EncodingArg::Gzip => vec![true],
            EncodingArg::Both => vec![false, true],
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// HTTP client round trips against a local fixture server.
    Http {
        /// Client families to run (default: all).
        #[arg(long, value_enum, num_args = 1.., action = clap::ArgAction::Append)]
        client: Vec<HttpClientKind>,

        /// Request methods to run (default: all).
        #[arg(long, value_enum, num_args = 1.., action = clap::ArgAction::Append)]
        method: Vec<Method>,

        /// Payload sizes to serve (default: all).
        #[arg(long, value_enum, num_args = 1.., action = clap::ArgAction::Append)]
        size: Vec<SizeClass>,

        #[arg(long, value_enum, default_value_t = EncodingArg::Both)]
        encoding: EncodingArg,

        /// Source of the wire size for encoded responses.
        #[arg(long, value_enum, default_value_t = WireAccounting::ContentLength)]
        accounting: WireAccounting,
    },

    /// JSON decoders over generated sample files.
    Json {
        /// Decoders to run (default: all).
        #[arg(long, value_enum, num_args = 1.., action = clap::ArgAction::Append)]
        decoder: Vec<DecoderKind>,

        /// Sample sizes to decode (default: all).
        #[arg(long, value_enum, num_args = 1.., action = clap::ArgAction::Append)]
        size: Vec<SizeClass>,
    },

    /// Run both families with every variant.
    Suite,

    /// Write small.json, medium.json and large.json for the JSON suite.
    Generate {
        /// Output directory (created if missing).
        #[arg(long, short = 'o', value_name = "DIR")]
        output: PathBuf,
    },
}

#[derive(Parser, Debug)]
#[command(name = "wirebench")]
#[command(about = "HTTP client and JSON decoder micro-benchmarks")]
struct Args {
    #[arg(long, value_enum, default_value_t = ProfileArg::Quick, global = true)]
    profile: ProfileArg,

    #[arg(long, default_value_t = 0, global = true)]
    seed: u64,

    /// Where to write the report. If omitted, prints to stdout.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ReportFormat::Json, global = true)]
    format: ReportFormat,

    /// Measured invocations per case (overrides the profile).
    #[arg(long, global = true)]
    iters: Option<u64>,

    /// Warm-up invocations per case (overrides the profile).
    #[arg(long, global = true)]
    warmup: Option<u64>,

    /// Run each case for this long instead of a fixed count.
    #[arg(long, global = true, conflicts_with = "iters")]
    duration_ms: Option<u64>,

    /// Worker pool size for parallel mode (default: available parallelism).
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Per-request timeout.
    #[arg(long, default_value_t = 5_000, global = true)]
    timeout_ms: u64,

    #[arg(long, value_enum, default_value_t = ModeArg::Sequential, global = true)]
    mode: ModeArg,

    #[command(subcommand)]
    cmd: Command,
}

fn now_utc_rfc3339() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("unix:{secs}")
}

fn git_sha_short() -> Option<String> {
    // Best-effort: read from environment set by CI/build scripts.
    std::env::var("GIT_SHA")
        .ok()
        .or_else(|| std::env::var("GITHUB_SHA").ok())
        .map(|s| s.chars().take(12).collect())
}

fn or_all<T: Clone>(chosen: &[T], all: &[T]) -> Vec<T> {
    if chosen.is_empty() {
        all.to_vec()
    } else {
        chosen.to_vec()
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wirebench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let cfg = BenchConfig {
        profile: args.profile.into(),
        seed: args.seed,
        iters: args.iters,
        warmup_iters: args.warmup,
        duration: args.duration_ms.map(Duration::from_millis),
        workers: args.workers,
        timeout: Duration::from_millis(args.timeout_ms),
    };
    let modes = args.mode.modes(cfg.workers());

    let mut cases = Vec::new();

    match &args.cmd {
        Command::Http {
            client,
            method,
            size,
            encoding,
            accounting,
        } => {
            let http = HttpArgs {
                clients: or_all(client, &HttpClientKind::ALL),
                methods: or_all(method, &Method::ALL),
                sizes: or_all(size, &SizeClass::ALL),
                compression: encoding.variants(),
                accounting: *accounting,
                ..HttpArgs::all(modes)
            };
            cases.extend(benches::http::run(&cfg, &http).context("http suite failed")?);
        }
        Command::Json { decoder, size } => {
            let json = JsonArgs {
                decoders: or_all(decoder, &DecoderKind::ALL),
                sizes: or_all(size, &SizeClass::ALL),
                modes,
            };
            cases.extend(benches::json::run(&cfg, &json).context("json suite failed")?);
        }
        Command::Suite => {
            cases.extend(
                benches::http::run(&cfg, &HttpArgs::all(modes.clone()))
                    .context("http suite failed")?,
            );
            cases.extend(
                benches::json::run(&cfg, &JsonArgs::all(modes)).context("json suite failed")?,
            );
        }
        Command::Generate { output } => {
            let written = payload::write_sample_files(output, &PayloadGenerator::new(cfg.seed))
                .with_context(|| format!("cannot write samples to {}", output.display()))?;
            for path in written {
                let bytes = fs::metadata(&path)?.len();
                info!(path = %path.display(), bytes, seed = cfg.seed, "sample written");
            }

            // Skip the report for generate.
            return Ok(());
        }
    }

    let report = BenchReport {
        run: RunMeta {
            schema_version: SCHEMA_VERSION,
            bench_version: env!("CARGO_PKG_VERSION").to_string(),
            profile: cfg.profile.as_str().to_string(),
            seed: cfg.seed,
            timestamp_utc: now_utc_rfc3339(),
            git_sha: git_sha_short(),
        },
        cases,
    };

    let rendered = report.render(args.format)?;
    if let Some(out) = args.out {
        fs::write(&out, rendered).with_context(|| format!("cannot write {}", out.display()))?;
    } else {
        println!("{rendered}");
    }

    Ok(())
}

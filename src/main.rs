use std::fs::File;
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use lookback::config::{DEFAULT_WORKERS_PER_GROUP, DEFAULT_WORK_PER_WORKER};
use lookback::{device, text, Discovery, Engine, ScanConfig, TeamShape};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lookback", about = "Inclusive prefix sum with a single-pass decoupled look-back scan.")]
struct Args {
    /// Rank of the compute resource to use, 0 being the most desirable.
    rank: usize,

    /// Input file: a count n followed by n numbers.
    input: PathBuf,

    /// Output file for the n prefix sums.
    output: PathBuf,

    /// Cooperating workers per execution group.
    #[arg(long, default_value_t = DEFAULT_WORKERS_PER_GROUP)]
    workers_per_group: u32,

    /// Elements scanned sequentially by each worker.
    #[arg(long, default_value_t = DEFAULT_WORK_PER_WORKER)]
    work_per_worker: u32,

    /// Concurrent groups on the host worker pool.
    #[arg(long, value_name = "N")]
    host_groups: Option<NonZeroUsize>,

    /// Only consider the host worker pool.
    #[arg(long)]
    no_gpu: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOOKBACK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() { ExitCode::from(1) } else { ExitCode::SUCCESS };
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // Host time covers device acquisition and program build too.
    let started = Instant::now();

    let input_text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Can't open input file {}", args.input.display()))?;
    let output = File::create(&args.output)
        .with_context(|| format!("Can't open output file {}", args.output.display()))?;

    let values = text::parse_sequence(&input_text)
        .with_context(|| format!("Failed to parse {}", args.input.display()))?;

    let mut config = ScanConfig::default().with_team(TeamShape::new(args.workers_per_group, args.work_per_worker));
    if let Some(groups) = args.host_groups {
        config = config.with_host_groups(groups);
    }

    let resources = device::enumerate(Discovery {
        include_gpu: !args.no_gpu,
        host_groups: args.host_groups,
    });
    let resource = device::select(resources, args.rank).context("Device selection failed")?;
    println!("Device: {}", resource.name());

    let engine = Engine::new(resource, config)
        .await
        .context("Device initialization failed")?;
    let report = engine.prefix_sum_since(&values, started).await.context("Scan failed")?;

    let timing = report.timing();
    match timing.device_ms() {
        Some(device_ms) => println!("Time: {device_ms:.3}\t{:.3}", timing.host_ms()),
        None => println!("Time: n/a\t{:.3}", timing.host_ms()),
    }
    if let Some(layout) = report.layout() {
        println!("Groups: {layout}");
    }
    if let Some(hops) = report.lookback_hops() {
        println!("Look-back hops: {hops}");
    }

    let mut writer = BufWriter::new(output);
    writer
        .write_all(text::format_sequence(&report.into_values()).as_bytes())
        .and_then(|()| writer.flush())
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    Ok(())
}

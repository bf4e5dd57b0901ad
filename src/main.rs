use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use pdf_outline::{extract_outline, write_outline, Config};
use rayon::prelude::*;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "pdf-outline", version, about = "Extract a title and H1-H3 outline from PDF files")]
struct Args {
    /// PDF file or directory of PDF files
    #[arg(short, long, default_value = "/app/input")]
    input: PathBuf,
    /// Output directory, or a .json file when the input is a single PDF
    #[arg(short, long, default_value = "/app/output")]
    output: PathBuf,
    /// YAML configuration file; defaults apply when it is missing or invalid
    #[arg(short, long, default_value = "/app/config/config.yaml")]
    config: PathBuf,
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Wall-clock budget for the whole batch, in seconds
    #[arg(long, default_value_t = 10.0)]
    time_budget: f64,
    /// Process documents in parallel
    #[arg(long)]
    parallel: bool,
}

#[derive(Debug)]
struct Job {
    input: PathBuf,
    output: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Status {
    Processed(Duration),
    Skipped,
    Failed,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let start = Instant::now();
    let config = Config::load(&args.config);
    info!("Configuration loaded: {:?}", config);

    let jobs = plan_jobs(&args.input, &args.output)?;
    if jobs.is_empty() {
        warn!("No PDF files found in {}", args.input.display());
        return Ok(());
    }
    info!("Found {} PDF files to process", jobs.len());

    let budget = Duration::from_secs_f64(args.time_budget.max(0.0));
    let run = |job: &Job| run_job(job, &config, start, budget);
    let statuses: Vec<Status> = if args.parallel {
        jobs.par_iter().map(run).collect()
    } else {
        jobs.iter().map(run).collect()
    };

    let failed = report(&statuses, start.elapsed(), budget);
    if failed > 0 {
        bail!("{} of {} documents failed", failed, statuses.len());
    }
    Ok(())
}

fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .filter_module("pdf_extract", LevelFilter::Warn)
        .filter_module("lopdf", LevelFilter::Warn)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                buf.timestamp(),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .init();
}

/// Pair every input PDF with its output path, creating output directories.
fn plan_jobs(input: &Path, output: &Path) -> Result<Vec<Job>> {
    if input.is_file() {
        let output = if has_extension(output, "json") {
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            output.to_path_buf()
        } else {
            fs::create_dir_all(output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            output.join(json_name(input))
        };
        return Ok(vec![Job {
            input: input.to_path_buf(),
            output,
        }]);
    }

    if !input.is_dir() {
        bail!("Input path {} does not exist", input.display());
    }

    fs::create_dir_all(output).with_context(|| format!("Failed to create {}", output.display()))?;

    let mut inputs: Vec<PathBuf> = fs::read_dir(input)
        .with_context(|| format!("Failed to read {}", input.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_extension(path, "pdf"))
        .collect();
    inputs.sort();

    Ok(inputs
        .into_iter()
        .map(|input| Job {
            output: output.join(json_name(&input)),
            input,
        })
        .collect())
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn json_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    format!("{}.json", stem)
}

fn run_job(job: &Job, config: &Config, start: Instant, budget: Duration) -> Status {
    let name = job.input.display();

    if start.elapsed() > budget {
        warn!("Time budget exhausted, skipping {}", name);
        return Status::Skipped;
    }

    let file_start = Instant::now();
    info!("Processing: {}", name);

    match process(job, config) {
        Ok(()) => {
            let elapsed = file_start.elapsed();
            info!("Completed {} in {:.2}s", name, elapsed.as_secs_f64());
            Status::Processed(elapsed)
        }
        Err(e) => {
            error!("Failed to process {}: {:#}", name, e);
            Status::Failed
        }
    }
}

fn process(job: &Job, config: &Config) -> Result<()> {
    let outline = extract_outline(&job.input, config)
        .with_context(|| format!("Failed to process {}", job.input.display()))?;

    if !outline.is_well_formed(config) {
        warn!("Outline for {} does not meet the output contract", job.input.display());
    }

    write_outline(&outline, &job.output)?;
    Ok(())
}

/// Log the batch summary and return the number of failed documents.
fn report(statuses: &[Status], total: Duration, budget: Duration) -> usize {
    let durations: Vec<Duration> = statuses
        .iter()
        .filter_map(|status| match status {
            Status::Processed(elapsed) => Some(*elapsed),
            _ => None,
        })
        .collect();
    let processed = durations.len();
    let skipped = statuses.iter().filter(|s| **s == Status::Skipped).count();
    let failed = statuses.iter().filter(|s| **s == Status::Failed).count();
    let busy: Duration = durations.iter().sum();

    info!("{}", "=".repeat(50));
    info!("PROCESSING SUMMARY");
    info!("{}", "=".repeat(50));
    info!("Files processed: {}/{}", processed, statuses.len());
    if skipped > 0 {
        info!("Files skipped: {}", skipped);
    }
    if failed > 0 {
        info!("Files failed: {}", failed);
    }
    info!("Total execution time: {:.2}s", total.as_secs_f64());
    info!(
        "Average time per file: {:.2}s",
        busy.as_secs_f64() / processed.max(1) as f64
    );

    if total <= budget {
        info!("Time budget compliance: PASS");
    } else {
        warn!(
            "Time budget compliance: FAIL ({:.2}s > {:.2}s)",
            total.as_secs_f64(),
            budget.as_secs_f64()
        );
    }

    failed
}

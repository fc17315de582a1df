//! BatchResize CLI - batch image resizing from the command line
//!
//! Drives the same upload / resize / download / cleanup cycle a service
//! front end would, against files on the local disk.

use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use batchresize::config::MAX_DIMENSION;
use batchresize::processing::{has_image_extension, is_image_content_type, sniff_content_type};
use batchresize::{
    init_with_config, CleanupReport, Config, FileId, FillColor, IncomingFile, ResizePolicy,
    ResizeRequest, ResizeService, TaskId, TaskOutcome, TaskStatus,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// BatchResize - asynchronous batch image resizer
#[derive(Parser)]
#[command(
    name = "batchresize",
    version,
    about = "Resize batches of images to a fixed size",
    long_about = "BatchResize uploads a batch of images into local task storage, resizes \
                  them in parallel waves under a stretch, fit or fill policy, and writes the \
                  result as a single PNG or a ZIP archive."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'Q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resize files and directories of images
    Resize(ResizeArgs),
    /// Validate configuration file
    Config {
        /// Configuration file to validate
        file: PathBuf,
    },
    /// Generate example configuration file
    ExampleConfig {
        /// Output file path
        #[arg(short, long, default_value = "batchresize.toml")]
        output: PathBuf,
        /// Use YAML format instead of TOML
        #[arg(long)]
        yaml: bool,
    },
    /// Show system information and capabilities
    Info,
}

#[derive(clap::Args)]
struct ResizeArgs {
    /// Input files or directories
    #[arg(required = true, value_name = "INPUTS")]
    inputs: Vec<PathBuf>,

    /// Target width in pixels
    #[arg(short, long, value_name = "PIXELS", value_parser = parse_dimension)]
    width: u32,

    /// Target height in pixels
    #[arg(short = 'H', long, value_name = "PIXELS", value_parser = parse_dimension)]
    height: u32,

    /// How to map the source onto the target size
    #[arg(short, long, value_enum, default_value_t = CliPolicy::Fit)]
    policy: CliPolicy,

    /// Background for fit padding and fill, as #RRGGBB
    #[arg(long, value_name = "COLOR", value_parser = parse_fill_color)]
    fill_color: Option<FillColor>,

    /// Output file, or directory receiving the derived filename
    #[arg(short, long, value_name = "PATH", default_value = ".")]
    output: PathBuf,

    /// Number of worker threads (default: auto-detect)
    #[arg(short, long, value_name = "COUNT")]
    threads: Option<usize>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Keep uploads and outputs in task storage after the run
    #[arg(long)]
    keep: bool,

    /// Output progress as JSON lines
    #[arg(long)]
    json: bool,

    /// Walk directories recursively
    #[arg(short = 'R', long)]
    recursive: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliPolicy {
    Stretch,
    Fit,
    Fill,
}

impl From<CliPolicy> for ResizePolicy {
    fn from(policy: CliPolicy) -> Self {
        match policy {
            CliPolicy::Stretch => ResizePolicy::Stretch,
            CliPolicy::Fit => ResizePolicy::Fit,
            CliPolicy::Fill => ResizePolicy::Fill,
        }
    }
}

fn parse_dimension(s: &str) -> Result<u32, String> {
    let value: u32 = s.trim().parse().map_err(|_| format!("'{}' is not a number", s))?;
    if value == 0 || value > MAX_DIMENSION {
        return Err(format!("must be between 1 and {}", MAX_DIMENSION));
    }
    Ok(value)
}

fn parse_fill_color(s: &str) -> Result<FillColor, String> {
    s.parse::<FillColor>().map_err(|e| e.to_string())
}

/// Final line of a `--json` run
#[derive(Serialize)]
struct RunSummary<'a> {
    #[serde(flatten)]
    outcome: &'a TaskOutcome,
    output: Option<&'a Path>,
    elapsed_seconds: f64,
    cleanup: Option<CleanupReport>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        Some("error")
    } else if cli.verbose {
        Some("debug")
    } else {
        None
    };

    let result = match cli.command {
        Commands::Resize(args) => run_resize(args, log_level).await,
        Commands::Config { file } => validate_config_file(&file),
        Commands::ExampleConfig { output, yaml } => generate_example_config(&output, yaml),
        Commands::Info => {
            show_system_info();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}: {:#}", style("Error").red().bold(), e);
        process::exit(1);
    }
}

async fn run_resize(args: ResizeArgs, log_level: Option<&str>) -> anyhow::Result<()> {
    let mut config = Config::load(args.config.as_deref())
        .with_context(|| match &args.config {
            Some(path) => format!("Failed to load configuration from {}", path.display()),
            None => "Invalid configuration environment".to_string(),
        })?;
    if let Some(threads) = args.threads {
        config.processing.workers = Some(threads);
    }
    if let Some(level) = log_level {
        config.logging.level = level.to_string();
    }
    config.validate()?;
    init_with_config(&config)?;

    let files = discover_files(&args.inputs, args.recursive)?;
    if files.is_empty() {
        bail!("No image files found in the given inputs");
    }
    info!("Discovered {} input files", files.len());

    let start_time = Instant::now();
    let max_files = config.storage.max_files;
    let service = ResizeService::new(config)?;

    let file_ids = upload_files(&service, &files, max_files).await?;
    if file_ids.is_empty() {
        bail!("None of the inputs could be read as images");
    }

    let mut request = ResizeRequest::new(file_ids.clone(), args.width, args.height)
        .policy(args.policy.into());
    if let Some(color) = args.fill_color {
        request = request.fill_color(color);
    }

    let handle = service.start_resize(request)?;
    let task_id = handle.id();
    let show_bar = !args.json && log_level != Some("error");
    track_progress(&service, task_id, file_ids.len(), args.json, show_bar).await?;
    let outcome = handle.wait().await?;

    let written = if outcome.status == TaskStatus::Completed && outcome.succeeded > 0 {
        let download = service.download(&task_id).await?;
        if args.output.extension().is_none() {
            tokio::fs::create_dir_all(&args.output)
                .await
                .with_context(|| format!("Failed to create {}", args.output.display()))?;
        }
        let path = download.write_to(&args.output).await?;
        debug!("Wrote {} bytes to {:?}", download.bytes().len(), path);
        Some(path)
    } else {
        None
    };

    let cleanup = if args.keep {
        None
    } else {
        let mut report = service.cleanup(&task_id).await?;
        report.uploads.merge(service.remove_uploads(&file_ids).await);
        Some(report)
    };

    print_summary(&outcome, written.as_deref(), start_time.elapsed(), cleanup, args.json)?;

    match (outcome.status, written) {
        (TaskStatus::Error, _) => bail!(
            "Task failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        ),
        (_, None) => bail!("No images were resized"),
        _ => Ok(()),
    }
}

/// Expand inputs into a sorted, de-duplicated list of image files
fn discover_files(inputs: &[PathBuf], recursive: bool) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
        } else if input.is_dir() {
            let walker = WalkDir::new(input)
                .follow_links(true)
                .max_depth(if recursive { usize::MAX } else { 1 });
            for entry in walker {
                let entry = entry.with_context(|| format!("Failed to walk {}", input.display()))?;
                if entry.file_type().is_file() && has_image_extension(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else {
            bail!("Input path does not exist: {}", input.display());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Read, sniff and ingest files in batches the upload limits accept
async fn upload_files(
    service: &ResizeService,
    files: &[PathBuf],
    max_files: usize,
) -> anyhow::Result<Vec<FileId>> {
    let mut ids = Vec::with_capacity(files.len());

    for chunk in files.chunks(max_files) {
        let mut batch = Vec::with_capacity(chunk.len());
        for path in chunk {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let content_type = sniff_content_type(&bytes, path);
            if !is_image_content_type(&content_type) {
                warn!("Skipping {:?}: not an image ({})", path, content_type);
                continue;
            }

            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            batch.push(IncomingFile::new(filename, content_type, bytes));
        }

        if batch.is_empty() {
            continue;
        }
        let stored = service.upload(batch).await?;
        ids.extend(stored.into_iter().map(|file| file.id));
    }

    Ok(ids)
}

/// Poll task progress until it is terminal
async fn track_progress(
    service: &ResizeService,
    task_id: TaskId,
    total: usize,
    json: bool,
    show_bar: bool,
) -> anyhow::Result<()> {
    let progress = if show_bar {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec}, {eta}) {msg}")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut last_reported = None;
    loop {
        let report = service.progress(&task_id)?;
        let done = (report.completed + report.failed) as u64;

        if let Some(pb) = &progress {
            pb.set_position(done);
            if report.failed > 0 {
                pb.set_message(format!("{} failed", report.failed));
            }
        }
        if json && last_reported != Some(done) {
            println!("{}", serde_json::to_string(&report)?);
            last_reported = Some(done);
        }

        if report.status.is_terminal() {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }
    Ok(())
}

fn validate_config_file(path: &Path) -> anyhow::Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config.validate()?;

    println!("{}: Configuration file is valid", style("Success").green().bold());
    println!("  Upload dir: {}", config.storage.upload_dir.display());
    println!("  Output dir: {}", config.storage.output_dir.display());
    match config.processing.workers {
        Some(workers) => println!("  Workers: {}", workers),
        None => println!("  Workers: auto"),
    }
    Ok(())
}

fn generate_example_config(output: &Path, yaml: bool) -> anyhow::Result<()> {
    let is_yaml_path = matches!(
        output.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    let target = if yaml && !is_yaml_path {
        output.with_extension("yaml")
    } else {
        output.to_path_buf()
    };

    Config::default().to_file(&target)?;
    println!(
        "{}: Example configuration written to {}",
        style("Success").green().bold(),
        target.display()
    );
    Ok(())
}

fn show_system_info() {
    use sysinfo::{CpuExt, System, SystemExt};

    println!("{}", style("BatchResize System Information").bold());
    println!();
    println!("{}: {}", style("Version").bold(), batchresize::VERSION);
    println!();

    let mut system = System::new_all();
    system.refresh_all();

    println!("{}", style("System:").bold());
    if let Some(name) = system.name() {
        println!("  OS: {}", name);
    }
    if let Some(version) = system.os_version() {
        println!("  Version: {}", version);
    }
    println!("  CPUs: {}", system.cpus().len());
    if let Some(cpu) = system.cpus().first() {
        println!("  CPU: {} ({:.2} GHz)", cpu.brand(), cpu.frequency() as f64 / 1000.0);
    }
    println!(
        "  Memory: {:.2} GB total, {:.2} GB available",
        system.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0,
        system.available_memory() as f64 / 1024.0 / 1024.0 / 1024.0
    );
    println!("  Worker slots: {}", batchresize::parallel::default_capacity());
    println!();

    println!("{}", style("Formats:").bold());
    println!("  Input: JPEG, PNG, WebP, GIF, TIFF, BMP");
    println!("  Output: PNG (ZIP archive for multiple images)");
    println!();

    println!("{}", style("Policies:").bold());
    for policy in ResizePolicy::all() {
        println!("  {}", policy);
    }
}

fn print_summary(
    outcome: &TaskOutcome,
    output: Option<&Path>,
    duration: Duration,
    cleanup: Option<CleanupReport>,
    json_output: bool,
) -> anyhow::Result<()> {
    if json_output {
        let summary = RunSummary {
            outcome,
            output,
            elapsed_seconds: duration.as_secs_f64(),
            cleanup,
        };
        println!("{}", serde_json::to_string(&summary)?);
        return Ok(());
    }

    println!();
    println!("{}", style("Resize Summary:").bold());
    println!("  {}: {}", style("Task").dim(), outcome.task_id);
    println!("  {}: {}", style("Resized").green(), outcome.succeeded);
    if outcome.failed > 0 {
        println!("  {}: {}", style("Failed").red(), outcome.failed);
    }
    println!("  {}: {:.2}s", style("Duration").blue(), duration.as_secs_f64());
    if let Some(path) = output {
        println!("  {}: {}", style("Output").cyan(), path.display());
    }
    if duration.as_secs_f64() > 0.0 {
        let per_second = outcome.succeeded as f64 / duration.as_secs_f64();
        println!("  {}: {:.1} images/sec", style("Speed").cyan(), per_second);
    }
    if let Some(report) = cleanup {
        debug!(
            "Cleanup removed {} outputs and {} uploads",
            report.outputs.removed, report.uploads.removed
        );
    }
    Ok(())
}

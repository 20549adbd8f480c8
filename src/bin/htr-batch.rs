//! CLI binary for htr-batch.
//!
//! A thin shim over the library crate: maps flags to `ServiceConfig` /
//! `BatchConfig`, runs one phase and prints a summary.

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use htr_batch::manifest::timestamped_path;
use htr_batch::models::{
    DEFAULT_HTR_MODEL, DEFAULT_LINE_DETECTION_MODEL, HTR_MODELS, LINE_DETECTION_MODELS,
};
use htr_batch::{
    resolve_sources, retrieve_batch, submit_batch, BatchConfig, BatchProgressCallback,
    Credentials, Manifest, MetagraphoClient, NoLayout, ProgressCallback, ServiceConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per job.
struct CliProgressCallback {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failures: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize, prefix: &'static str) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} jobs  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix);
        self.bar.reset_eta();
    }

    fn line(&self, mark: String, index: usize, total: usize, text: String) {
        self.bar
            .println(format!("  {} {:>4}/{:<4}  {}", mark, index + 1, total, text));
        self.bar.inc(1);
    }

    fn finish(&self, total: usize, ok: usize, verb: &str) {
        self.bar.finish_and_clear();
        let failed = self.failures.load(Ordering::SeqCst);
        let mark = if failed == 0 {
            green("✔")
        } else if ok == 0 {
            red("✘")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{} {}/{} jobs {}  ({} failed)",
            mark,
            bold(&ok.to_string()),
            total,
            verb,
            if failed == 0 {
                failed.to_string()
            } else {
                red(&failed.to_string())
            },
        );
    }
}

/// Shorten long error messages to one terminal line.
fn truncate(msg: &str) -> String {
    match msg.char_indices().nth(79) {
        Some((i, _)) => format!("{}\u{2026}", &msg[..i]),
        None => msg.to_string(),
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.activate_bar(total, "Submitting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Submitting {total} images…"))
        ));
    }

    fn on_job_start(&self, _index: usize, _total: usize, source: &str) {
        self.bar.set_message(source.to_string());
    }

    fn on_job_submitted(&self, index: usize, total: usize, job_id: &str, status: &str) {
        self.line(
            green("✓"),
            index,
            total,
            format!("job {}  {}", bold(job_id), dim(status)),
        );
    }

    fn on_job_failed(&self, index: usize, total: usize, error: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.line(red("✗"), index, total, red(&truncate(error)));
    }

    fn on_batch_complete(&self, total: usize, submitted: usize) {
        self.finish(total, submitted, "submitted");
    }

    fn on_retrieval_start(&self, total: usize) {
        self.activate_bar(total, "Retrieving");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Checking {total} jobs…"))
        ));
    }

    fn on_job_retrieved(&self, index: usize, total: usize, job_id: &str, path: &Path) {
        self.line(
            green("✓"),
            index,
            total,
            format!("job {}  →  {}", bold(job_id), dim(&path.display().to_string())),
        );
    }

    fn on_job_skipped(&self, index: usize, total: usize, job_id: &str, status: &str) {
        self.line(
            yellow("…"),
            index,
            total,
            format!("job {}  {}", job_id, dim(status)),
        );
    }

    fn on_retrieval_complete(&self, total: usize, retrieved: usize) {
        self.finish(total, retrieved, "retrieved");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Submit every image below a directory (layouts from images/xml/ if present)
  htr-batch submit images/ --job-name bullinger

  # Submit a single image by URL with a public model
  htr-batch submit https://example.org/scans/0001.jpg --htr-model "Text Titan"

  # Collect finished results later, with the source images of URL jobs
  htr-batch retrieve jobs/bullinger_20240307_090501.json --save-images

  # Machine-readable output
  htr-batch retrieve jobs/run.json --json > report.json

MODELS:
  HTR:             Text Titan, Bullinger (default), German Giant
  Line detection:  default

ENVIRONMENT VARIABLES:
  HTR_USERNAME    Account name for the processing API
  HTR_PASSWORD    Account password
  HTR_API_URL     Override the processing API base URL
  HTR_AUTH_URL    Override the OpenID Connect endpoint base
  RUST_LOG        Log filter (overrides --verbose / --quiet)
"#;

/// Submit handwritten-text-recognition jobs and collect their results.
#[derive(Parser, Debug)]
#[command(
    name = "htr-batch",
    version,
    about = "Batch HTR jobs against the Transkribus processing API",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    service: ServiceArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "HTR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "HTR_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "HTR_NO_PROGRESS")]
    no_progress: bool,

    /// Print stats / report as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Args, Debug)]
struct ServiceArgs {
    /// Account name.
    #[arg(long, global = true, env = "HTR_USERNAME")]
    username: Option<String>,

    /// Account password.
    #[arg(long, global = true, env = "HTR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Processing API base URL.
    #[arg(long, global = true, env = "HTR_API_URL")]
    api_url: Option<String>,

    /// OpenID Connect endpoint base (token / logout).
    #[arg(long, global = true, env = "HTR_AUTH_URL")]
    auth_url: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, global = true, env = "HTR_TIMEOUT", default_value_t = 120)]
    timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit an image, a directory of images, or an image URL.
    Submit(SubmitArgs),
    /// Re-poll the jobs of a manifest and download finished results.
    Retrieve(RetrieveArgs),
}

#[derive(Args, Debug)]
struct SubmitArgs {
    /// Image file, directory (scanned recursively) or HTTP/HTTPS URL.
    input: String,

    /// Recognition model name.
    #[arg(long, default_value = DEFAULT_HTR_MODEL)]
    htr_model: String,

    /// Line-detection model name, used for images without a layout.
    #[arg(long, default_value = DEFAULT_LINE_DETECTION_MODEL)]
    line_detection_model: String,

    /// Manifest base name; defaults to the input directory's name.
    #[arg(long)]
    job_name: Option<String>,

    /// Directory receiving the manifest.
    #[arg(long, default_value = "jobs")]
    jobs_dir: PathBuf,

    /// Ignore `xml/` layouts next to the images.
    #[arg(long)]
    no_layout: bool,
}

#[derive(Args, Debug)]
struct RetrieveArgs {
    /// Manifest written by `submit`.
    manifest: PathBuf,

    /// Directory receiving `<job id>.xml` results.
    #[arg(short, long, default_value = "results")]
    output_dir: PathBuf,

    /// Also download the source images of URL-submitted jobs.
    #[arg(long)]
    save_images: bool,

    /// Image download timeout in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose asks for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let client = MetagraphoClient::new(service_config(&cli.service)?)
        .context("Invalid service configuration")?;

    match cli.command {
        Command::Submit(ref args) => run_submit(&cli, args, &client, progress).await,
        Command::Retrieve(ref args) => run_retrieve(&cli, args, &client, progress).await,
    }
}

fn service_config(args: &ServiceArgs) -> Result<ServiceConfig> {
    let username = args
        .username
        .clone()
        .context("No username: pass --username or set HTR_USERNAME")?;
    let password = args
        .password
        .clone()
        .context("No password: pass --password or set HTR_PASSWORD")?;

    let mut config = ServiceConfig::new(Credentials::new(username, password));
    if let Some(ref url) = args.api_url {
        config.api_url = url.clone();
    }
    if let Some(ref url) = args.auth_url {
        config.auth_url = url.clone();
    }
    config.request_timeout_secs = args.timeout;
    Ok(config)
}

async fn run_submit(
    cli: &Cli,
    args: &SubmitArgs,
    client: &MetagraphoClient,
    progress: Option<ProgressCallback>,
) -> Result<()> {
    let sources = resolve_sources(&args.input).context("Cannot resolve input")?;
    if sources.is_empty() {
        anyhow::bail!("No images (jpg, jpeg, png) found in '{}'", args.input);
    }

    let job_name = args
        .job_name
        .clone()
        .unwrap_or_else(|| default_job_name(&args.input));
    let manifest_path = timestamped_path(&args.jobs_dir, &job_name, &Local::now());

    let mut builder = BatchConfig::builder()
        .htr_model(&args.htr_model)
        .line_detection_model(&args.line_detection_model)
        .checkpoint_path(&manifest_path);
    if args.no_layout {
        builder = builder.layout_resolver(Arc::new(NoLayout));
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().with_context(|| {
        format!(
            "Invalid configuration (HTR models: {}; line detection: {})",
            model_names(HTR_MODELS),
            model_names(LINE_DETECTION_MODELS)
        )
    })?;

    let output = submit_batch(client, &sources, &config)
        .await
        .context("Submission failed")?;
    output
        .manifest
        .persist(&manifest_path)
        .context("Failed to write manifest")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output.stats)
            .context("Failed to serialise stats")?;
        println!("{json}");
    } else if !cli.quiet {
        let s = &output.stats;
        eprintln!(
            "{}  {}/{} submitted  {} with layout  {}ms  →  {}",
            if s.failed == 0 { green("✔") } else { cyan("⚠") },
            s.submitted,
            s.total,
            s.with_layout,
            s.duration_ms,
            bold(&manifest_path.display().to_string()),
        );
        if s.status_unknown > 0 {
            eprintln!(
                "   {} jobs submitted without a status; retrieval will re-check them",
                yellow(&s.status_unknown.to_string())
            );
        }
    }
    Ok(())
}

async fn run_retrieve(
    cli: &Cli,
    args: &RetrieveArgs,
    client: &MetagraphoClient,
    progress: Option<ProgressCallback>,
) -> Result<()> {
    let manifest = Manifest::load(&args.manifest).context("Cannot load manifest")?;

    let mut builder = BatchConfig::builder()
        .save_images(args.save_images)
        .download_timeout_secs(args.download_timeout);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let report = retrieve_batch(client, &manifest, &args.output_dir, &config)
        .await
        .context("Retrieval failed")?;

    if cli.json {
        let json =
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        eprintln!(
            "{}  {} retrieved  {} pending  {} failed  {}ms  →  {}",
            if report.failed() == 0 { green("✔") } else { cyan("⚠") },
            report.retrieved(),
            report.skipped(),
            report.failed(),
            report.duration_ms,
            bold(&args.output_dir.display().to_string()),
        );
    }
    Ok(())
}

/// Directory inputs name the job after the directory; files and URLs get `job`.
fn default_job_name(input: &str) -> String {
    let path = Path::new(input);
    if path.is_dir() {
        if let Some(name) = path.canonicalize().ok().and_then(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
        }) {
            return name;
        }
    }
    "job".to_string()
}

fn model_names<T>(table: &[(&str, T)]) -> String {
    table
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

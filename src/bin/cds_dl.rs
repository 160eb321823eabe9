use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cds_downloader::app::App;
use cds_downloader::config::{ConfigLoader, JobOverrides, ResolvedJob};
use cds_downloader::error::CdsError;
use cds_downloader::metadata::MetadataHttpClient;
use cds_downloader::output::JsonOutput;
use cds_downloader::transfer::CommandTransferClient;
use cds_downloader::update::{UpdateOptions, parse_until};

#[derive(Parser)]
#[command(name = "cds-dl")]
#[command(about = "Split, download and update Climate Data Store requests")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, default_value = "warn", help = "Log level when RUST_LOG is unset")]
    log_level: String,

    #[arg(long, global = true, help = "Append logs to this file instead of stderr")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download every sub-request of the job")]
    Download(JobArgs),
    #[command(about = "Fetch what is missing from an existing collection")]
    Update(UpdateArgs),
    #[command(about = "Download the most recent day the store has published")]
    Latest(LatestArgs),
    #[command(about = "Show split keys and artifact names without downloading")]
    Plan(JobArgs),
}

#[derive(Args, Clone)]
struct JobArgs {
    #[arg(short, long, help = "Job file (default: cds-job.json)")]
    config: Option<String>,

    #[arg(short, long, default_value = ".")]
    path: PathBuf,

    #[arg(short = 'k', long = "split-key")]
    split_keys: Vec<String>,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Args, Clone)]
struct UpdateArgs {
    #[command(flatten)]
    job: JobArgs,

    #[arg(long, help = "Cutoff date or timestamp (default: now, UTC)")]
    until: Option<String>,

    #[arg(long, help = "Moves the cutoff back, e.g. 5D or 2D 8h")]
    latency: Option<String>,

    #[arg(long)]
    start_from_files: bool,
}

#[derive(Args, Clone)]
struct LatestArgs {
    #[command(flatten)]
    job: JobArgs,

    #[arg(long, default_value = "5", help = "Days (or a duration like 36h) behind now")]
    latency: String,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(cds) = report.downcast_ref::<CdsError>() {
                return ExitCode::from(map_exit_code(cds));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &CdsError) -> u8 {
    match error {
        CdsError::InvalidDimension(_)
        | CdsError::InvalidFilter(_)
        | CdsError::SelectionLimitExceeded { .. }
        | CdsError::CutoffNotFound { .. }
        | CdsError::InvalidDuration(_)
        | CdsError::InvalidDate(_)
        | CdsError::MissingConfig
        | CdsError::ConfigRead(_)
        | CdsError::ConfigParse(_) => 2,
        CdsError::MetadataUnavailable(_)
        | CdsError::MetadataStatus { .. }
        | CdsError::DownloadFailed(_)
        | CdsError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn init_logging(cli: &Cli) -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .into_diagnostic()?;
    match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}

fn load_job(args: &JobArgs) -> miette::Result<ResolvedJob> {
    let job = ConfigLoader::resolve(args.config.as_deref())?;
    Ok(JobOverrides {
        split_keys: args.split_keys.clone(),
        overwrite: args.overwrite,
        concurrency: args.concurrency,
        task_timeout_secs: args.timeout_secs,
    }
    .apply(job))
}

fn build_app() -> miette::Result<App<MetadataHttpClient, CommandTransferClient>> {
    let metadata = MetadataHttpClient::new()?;
    Ok(App::new(metadata, CommandTransferClient::new()))
}

fn exit_for(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(4)
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli)?;
    let app = build_app()?;
    let sink = JsonOutput;

    match cli.command {
        Commands::Plan(args) => {
            let job = load_job(&args)?;
            let result = app.plan(&job, Some(args.path.as_path()), &sink)?;
            JsonOutput::print_plan(&result).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Download(args) => {
            let job = load_job(&args)?;
            let result = app.download(&job, &args.path, &sink)?;
            JsonOutput::print_download(&result).into_diagnostic()?;
            Ok(exit_for(result.report.is_success()))
        }
        Commands::Update(args) => {
            let job = load_job(&args.job)?;
            let until = match &args.until {
                Some(text) => parse_until(text)?,
                None => chrono::Utc::now().naive_utc(),
            };
            let options = UpdateOptions {
                until,
                latency: args.latency,
                start_from_files: args.start_from_files,
            };
            let report = app.update(&job, &args.job.path, &options, &sink)?;
            JsonOutput::print_update(&report).into_diagnostic()?;
            Ok(exit_for(report.is_success()))
        }
        Commands::Latest(args) => {
            let job = load_job(&args.job)?;
            let now = chrono::Utc::now().naive_utc();
            let result = app.update_latest(&job, &args.job.path, &args.latency, now, &sink)?;
            JsonOutput::print_download(&result).into_diagnostic()?;
            Ok(exit_for(result.report.is_success()))
        }
    }
}

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "promptsmith",
    version,
    about = "Staged prompt optimization: generate, filter, refine, report"
)]
pub struct Cli {
    /// log output format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "PROMPTSMITH_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a sample promptsmith.yaml
    Init(InitArgs),
    /// Start a new optimization run
    Run(RunArgs),
    /// Continue a failed or interrupted run
    Resume(ResumeArgs),
    /// Show stage and track markers of a run
    Status(StatusArgs),
    /// List stored runs
    Runs(DbArgs),
    /// Rebuild and write the report of a stored run
    Report(ReportArgs),
    Version,
}

#[derive(Parser, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "promptsmith.yaml")]
    pub config: PathBuf,
}

#[derive(clap::Args, Clone)]
pub struct DbArgs {
    #[arg(long, default_value = ".promptsmith/promptsmith.db")]
    pub db: PathBuf,
}

#[derive(clap::Args, Clone)]
pub struct ServiceArgs {
    /// language-model provider (openai|fake)
    #[arg(long, default_value = "openai", env = "PROMPTSMITH_PROVIDER")]
    pub provider: String,

    /// OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub base_url: Option<String>,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "promptsmith.yaml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub db: DbArgs,

    /// directory for report artifacts (run-NNNN/ is created inside)
    #[arg(long)]
    pub out: Option<PathBuf>,

    #[command(flatten)]
    pub service: ServiceArgs,

    /// reject unknown config keys
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Clone)]
pub struct ResumeArgs {
    #[arg(long, default_value = "promptsmith.yaml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub db: DbArgs,

    /// defaults to the most recent run
    #[arg(long)]
    pub run_id: Option<i64>,

    /// re-run completed stages and failed tracks
    #[arg(long)]
    pub force: bool,

    #[arg(long)]
    pub out: Option<PathBuf>,

    #[command(flatten)]
    pub service: ServiceArgs,

    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub run_id: Option<i64>,
}

#[derive(Parser, Clone)]
pub struct ReportArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long)]
    pub run_id: Option<i64>,

    #[arg(long, default_value = "out")]
    pub out: PathBuf,

    /// config whose tie-break setting applies; defaults are used when absent
    #[arg(long, default_value = "promptsmith.yaml")]
    pub config: PathBuf,
}

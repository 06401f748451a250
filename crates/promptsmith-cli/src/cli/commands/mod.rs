use crate::cli::args::{
    Cli, Command, DbArgs, InitArgs, ReportArgs, ResumeArgs, RunArgs, ServiceArgs, StatusArgs,
};
use promptsmith_core::config::{load_config, write_sample_config, OptimizerConfig};
use promptsmith_core::model::OptimizationResult;
use promptsmith_core::providers::fake::FakeService;
use promptsmith_core::providers::llm::openai::OpenAIClient;
use promptsmith_core::providers::service::LlmService;
use promptsmith_core::providers::LanguageModelService;
use promptsmith_core::report::{self, JsonDirSink, NullSink, ReportSink};
use promptsmith_core::scoring::TieBreakPolicy;
use promptsmith_core::storage::Store;
use promptsmith_core::{ConfigError, OptimizeError, Orchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const RUN_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

/// Exit code for an error that escaped a command handler.
pub fn error_code(e: &anyhow::Error) -> i32 {
    let is_config = e.chain().any(|cause| {
        cause.is::<ConfigError>()
            || cause
                .downcast_ref::<OptimizeError>()
                .is_some_and(OptimizeError::is_config)
    });
    if is_config {
        exit_codes::CONFIG_ERROR
    } else {
        exit_codes::RUN_FAILED
    }
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => cmd_init(args),
        Command::Run(args) => cmd_run(args).await,
        Command::Resume(args) => cmd_resume(args).await,
        Command::Status(args) => cmd_status(args),
        Command::Runs(args) => cmd_runs(args),
        Command::Report(args) => cmd_report(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    if args.config.exists() {
        eprintln!("note: {} already exists", args.config.display());
        return Ok(exit_codes::OK);
    }
    ensure_parent_dir(&args.config)?;
    write_sample_config(&args.config)?;
    eprintln!("created {}", args.config.display());
    Ok(exit_codes::OK)
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let service = build_service(&args.service, &cfg)?;
    let store = open_store(&args.db.db)?;
    let (sink, out_dir) = build_sink(args.out.as_deref());

    let orch = match Orchestrator::new(cfg, store, service, sink) {
        Ok(orch) => orch,
        Err(e) => return Ok(failure_code(&e)),
    };
    let outcome = with_interrupt(&orch, orch.optimize()).await;
    Ok(finish(outcome, out_dir.as_ref()))
}

async fn cmd_resume(args: ResumeArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let service = build_service(&args.service, &cfg)?;
    let store = open_store(&args.db.db)?;
    let run_id = resolve_run_id(&store, args.run_id)?;
    let (sink, out_dir) = build_sink(args.out.as_deref());

    let orch = match Orchestrator::new(cfg, store, service, sink) {
        Ok(orch) => orch,
        Err(e) => return Ok(failure_code(&e)),
    };
    eprintln!("resuming run {run_id}{}", if args.force { " (forced)" } else { "" });
    let outcome = with_interrupt(&orch, orch.resume(run_id, args.force)).await;
    Ok(finish(outcome, out_dir.as_ref()))
}

fn cmd_status(args: StatusArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db.db)?;
    let run_id = resolve_run_id(&store, args.run_id)?;
    let run = store.runs().get(run_id)?;

    println!(
        "run {}: status={} started={} completed={}",
        run.id,
        run.status,
        run.started_at,
        run.completed_at.as_deref().unwrap_or("-")
    );
    if let Some(err) = &run.error {
        println!("  error: {err}");
    }
    for marker in store.stage_results().list(run_id)? {
        match &marker.error {
            Some(err) => println!("  stage {}: {} ({})", marker.stage_name, marker.status, err),
            None => println!("  stage {}: {}", marker.stage_name, marker.status),
        }
    }
    for track in store.tracks().list(run_id)? {
        println!(
            "  track {}: {} seed={} reason={}",
            track.track_id,
            track.status,
            track.seed_prompt_id,
            track.reason.map(|r| r.as_str()).unwrap_or("-")
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_runs(args: DbArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    let runs = store.runs().list()?;
    if runs.is_empty() {
        eprintln!("no runs in {}", args.db.display());
    }
    for run in runs {
        println!(
            "{}\t{}\t{}\tchampion={}\t{}",
            run.id,
            run.status,
            run.started_at,
            run.champion_prompt_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".into()),
            run.task.task_description
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_report(args: ReportArgs) -> anyhow::Result<i32> {
    let policy = if args.config.exists() {
        match load_config(&args.config, false) {
            Ok(cfg) => TieBreakPolicy {
                baseline_wins_ties: cfg.selection.baseline_wins_ties,
            },
            Err(e) => {
                eprintln!("{e}");
                return Ok(exit_codes::CONFIG_ERROR);
            }
        }
    } else {
        TieBreakPolicy::default()
    };

    let store = open_store(&args.db.db)?;
    let run_id = resolve_run_id(&store, args.run_id)?;
    let result = report::assemble(&store, run_id, policy)?;

    let sink = JsonDirSink::new(&args.out);
    for path in sink.persist(&result)? {
        eprintln!("wrote {}", path.display());
    }
    report::console::print_summary(&result);
    Ok(exit_codes::OK)
}

fn build_service(
    args: &ServiceArgs,
    cfg: &OptimizerConfig,
) -> anyhow::Result<Arc<dyn LanguageModelService>> {
    match args.provider.as_str() {
        "fake" => Ok(Arc::new(FakeService::new())),
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                ConfigError("provider openai requires OPENAI_API_KEY".into())
            })?;
            let mut client =
                OpenAIClient::new(key, cfg.service.temperature, cfg.service.max_tokens);
            if let Some(url) = &args.base_url {
                client = client.with_base_url(url.as_str());
            }
            Ok(Arc::new(LlmService::new(
                Arc::new(client),
                cfg.service.models.clone(),
            )))
        }
        other => Err(ConfigError(format!("unknown provider: {other} (expected openai|fake)")).into()),
    }
}

fn build_sink(out: Option<&Path>) -> (Arc<dyn ReportSink>, Option<PathBuf>) {
    match out {
        Some(dir) => (Arc::new(JsonDirSink::new(dir)), Some(dir.to_path_buf())),
        None => (Arc::new(NullSink), None),
    }
}

fn open_store(db: &Path) -> anyhow::Result<Store> {
    ensure_parent_dir(db)?;
    let store = Store::open(db)?;
    store.init_schema()?;
    Ok(store)
}

fn resolve_run_id(store: &Store, requested: Option<i64>) -> anyhow::Result<i64> {
    match requested {
        Some(id) => Ok(id),
        None => store
            .runs()
            .latest_id()?
            .ok_or_else(|| anyhow::anyhow!("no runs recorded yet; pass --run-id or start one with `run`")),
    }
}

/// First Ctrl-C cancels running refinement tracks; a second one exits.
async fn with_interrupt<F>(orch: &Orchestrator, work: F) -> Result<OptimizationResult, OptimizeError>
where
    F: std::future::Future<Output = Result<OptimizationResult, OptimizeError>>,
{
    let controls = orch.track_controls();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(event = "interrupt", "cancelling refinement tracks");
            controls.cancel_all();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });
    let outcome = work.await;
    watcher.abort();
    outcome
}

fn finish(outcome: Result<OptimizationResult, OptimizeError>, out_dir: Option<&PathBuf>) -> i32 {
    match outcome {
        Ok(result) => {
            report::console::print_summary(&result);
            if let Some(dir) = out_dir {
                eprintln!(
                    "report: {}",
                    JsonDirSink::new(dir).run_dir(result.run_id).display()
                );
            }
            exit_codes::OK
        }
        Err(e) => failure_code(&e),
    }
}

fn failure_code(e: &OptimizeError) -> i32 {
    if e.is_config() {
        eprintln!("{e}");
        exit_codes::CONFIG_ERROR
    } else {
        eprintln!("run failed: {e}");
        exit_codes::RUN_FAILED
    }
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

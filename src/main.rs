use anyhow::{Context, Result};
use clap::Parser;
use pbtgen::config::{Config, LogGranularity, RepairMode};
use pbtgen::discovery;
use pbtgen::llm::{CompletionClient, OpenRouterClient};
use pbtgen::pipeline::{policy_for, Pipeline};
use pbtgen::result_log::AppendOnlyLog;
use pbtgen::retrieval::{InMemoryStore, VectorStore};
use pbtgen::sandbox::{CommandChecker, PytestRunner, Sandbox};
use pbtgen::scheduler::{prepare_output, Scheduler};
use pbtgen::signals::LlmSignalSource;
use pbtgen::telemetry;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "pbtgen",
    about = "Generate and validate property-based tests for a Python project",
    version
)]
struct Args {
    /// Root of the Python project under test
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Where generated test modules and the result log are written
    #[arg(long, default_value = "generated_tests")]
    output_dir: PathBuf,

    /// Only these functions (comma-separated bare or qualified names)
    #[arg(long, value_delimiter = ',')]
    functions: Vec<String>,

    /// Related files to hand to signal extraction
    #[arg(long)]
    top_n: Option<usize>,

    /// Config file (defaults to pbtgen.toml in the project directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// static | triage
    #[arg(long)]
    repair_mode: Option<RepairMode>,

    /// Maximum target functions processed at once
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// artifact | candidate
    #[arg(long)]
    log_granularity: Option<LogGranularity>,

    /// JSONL documents (`content` + `metadata`) used as the retrieval store
    #[arg(long)]
    retrieval_docs: Option<PathBuf>,

    /// Debug-level logging (PBTGEN_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init(args.verbose)?;

    let project_dir = args
        .project_dir
        .canonicalize()
        .with_context(|| format!("Project directory not found: {}", args.project_dir.display()))?;

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_for_project(&project_dir)?,
    };
    if let Some(top_n) = args.top_n {
        config.pbt.top_n_related_files = top_n;
    }
    if let Some(mode) = args.repair_mode {
        config.pbt.repair_mode = mode;
    }
    if let Some(max_in_flight) = args.max_in_flight {
        config.pbt.max_in_flight = max_in_flight;
    }
    if let Some(granularity) = args.log_granularity {
        config.pbt.log_granularity = granularity;
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let run_span = telemetry::run_span(&run_id);

    let output_dir = if args.output_dir.is_absolute() {
        args.output_dir.clone()
    } else {
        project_dir.join(&args.output_dir)
    };

    let project_tree = discovery::render_project_tree(
        &project_dir,
        config.pbt.max_file_tree_depth,
        config.pbt.max_file_tree_entries,
        Some(output_dir.as_path()),
    )?;
    println!("Project file tree:\n{}\n", project_tree);

    let files = discovery::collect_python_files(&project_dir, Some(output_dir.as_path()))?;
    let functions = discovery::functions_in(&files);
    let discovered = functions.len();
    let targets = discovery::filter_functions(functions, &args.functions);
    tracing::info!(
        parent: &run_span,
        files = files.len(),
        functions = discovered,
        targets = targets.len(),
        project = %project_dir.display(),
        "discovered target functions"
    );
    if targets.is_empty() {
        eprintln!("No target functions found in {}", project_dir.display());
        return Ok(());
    }

    let api_key = config.api_key().with_context(|| {
        format!(
            "No API key: set {} or store one in the system keychain",
            config.llm.api_key_env
        )
    })?;
    let llm: Arc<dyn CompletionClient> = Arc::new(OpenRouterClient::new(config.llm.clone(), api_key)?);

    let store: Option<Arc<dyn VectorStore>> = match &args.retrieval_docs {
        Some(path) => {
            let store = InMemoryStore::load_jsonl(path)?;
            tracing::info!(parent: &run_span, documents = store.len(), "loaded retrieval store");
            Some(Arc::new(store))
        }
        None => None,
    };

    let log = prepare_output(&output_dir, &config.pbt)?;
    let log_path = log.path().to_path_buf();
    let log: Arc<dyn AppendOnlyLog> = Arc::new(log);

    let sandbox = Sandbox::new(
        Arc::new(CommandChecker::from_config(&config.tools, &project_dir)),
        Arc::new(PytestRunner::from_config(&config.tools, &project_dir)),
    );
    let repair = policy_for(config.pbt.repair_mode, config.pbt.max_static_repair_attempts);
    let pipeline = Pipeline::new(llm.clone(), sandbox, repair, &output_dir, run_span.clone());
    let signals = Arc::new(
        LlmSignalSource::new(
            llm,
            store,
            files,
            config.pbt.top_n_related_files,
            config.pbt.max_source_snippet_chars,
        )
        .with_project_tree(project_tree),
    );

    let scheduler = Scheduler::new(
        signals,
        pipeline,
        log,
        config.pbt.log_granularity,
        config.pbt.max_in_flight,
    );
    let summary = scheduler.run(targets).await;

    println!("{}", summary);
    println!("Test modules: {}", output_dir.display());
    println!("Result log:   {}", log_path.display());

    Ok(())
}

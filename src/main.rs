use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use fixloop::config::{Config, Settings};
use fixloop::executor::PythonExecutor;
use fixloop::llm::{self, ProviderKind};
use fixloop::logging::{self, SessionLogDir};
use fixloop::repair::{RepairSession, RepairSettings, SessionOutcome};
use fixloop::research::ResearchEscalator;
use fixloop::web::{GoogleSearch, HttpFetcher};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, info_span, Instrument};

#[derive(Parser, Debug)]
#[command(
    name = "fixloop",
    about = "Run a Python project, ask a language model for fixes, apply them, repeat until it runs clean",
    version
)]
struct Args {
    /// Directory holding the Python project
    #[arg(default_value = ".")]
    code_dir: PathBuf,

    /// Files to repair, relative to CODE_DIR (default: every .py file in it)
    #[arg(long = "files", num_args = 1..)]
    files: Vec<String>,

    /// Maximum repair attempts (default: 10)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Research stuck failures on the web, true or false (default: true)
    #[arg(long, value_name = "BOOL")]
    enable_internet_search: Option<bool>,

    /// Pages to read per web search (default: 5)
    #[arg(long)]
    num_search_urls: Option<usize>,

    /// Identical-failure streak that triggers a web search (default: 5)
    #[arg(long)]
    internet_search_threshold: Option<u32>,

    /// Language model provider (default: openai)
    #[arg(long, value_enum)]
    llm_type: Option<ProviderKind>,

    #[arg(long)]
    openai_model: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[arg(long)]
    openai_base_url: Option<String>,

    #[arg(long)]
    huggingface_model: Option<String>,

    #[arg(long)]
    gemini_model: Option<String>,

    /// Interpreter used to run target files (default: python)
    #[arg(long)]
    python: Option<String>,

    /// Seconds to wait between attempts (default: 2)
    #[arg(long)]
    pause_secs: Option<u64>,

    /// Seconds before a target run is killed (default: 120)
    #[arg(long)]
    execution_timeout_secs: Option<u64>,

    /// Seconds before an HTTP request is abandoned (default: 120)
    #[arg(long)]
    request_timeout_secs: Option<u64>,

    /// Read an API key from stdin, store it in the system keychain for the
    /// selected provider, and exit
    #[arg(long)]
    save_api_key: bool,
}

impl Args {
    fn overrides(&self) -> Config {
        Config {
            max_attempts: self.max_attempts,
            enable_internet_search: self.enable_internet_search,
            num_search_urls: self.num_search_urls,
            internet_search_threshold: self.internet_search_threshold,
            llm_type: self.llm_type,
            openai_model: self.openai_model.clone(),
            openai_base_url: self.openai_base_url.clone(),
            huggingface_model: self.huggingface_model.clone(),
            gemini_model: self.gemini_model.clone(),
            python: self.python.clone(),
            pause_secs: self.pause_secs,
            execution_timeout_secs: self.execution_timeout_secs,
            request_timeout_secs: self.request_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            if tracing::dispatcher::has_been_set() {
                error!("{:#}", err);
            } else {
                eprintln!("Error: {:#}", err);
            }
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    if args.save_api_key {
        logging::init(None)?;
        let config = args.overrides().layered_over(Config::load());
        save_api_key(config.llm_type.unwrap_or(fixloop::config::DEFAULT_PROVIDER))?;
        return Ok(ExitCode::SUCCESS);
    }

    if !args.code_dir.is_dir() {
        anyhow::bail!(
            "code directory {} does not exist or is not a directory",
            args.code_dir.display()
        );
    }

    let logs = SessionLogDir::prepare(&args.code_dir)?;
    let _lock = logs.lock()?;
    let log_file = logs.log_file_path(Local::now());
    logging::init(Some(&log_file)).context("Failed to initialize logging")?;

    let config = args.overrides().layered_over(Config::load());
    let settings = Settings::resolve(&args.code_dir, args.files.clone(), config)?;
    let targets = settings.target_set()?;

    let span = info_span!("session", id = %uuid::Uuid::new_v4());
    let outcome = repair(&settings, targets, &logs, &log_file)
        .instrument(span)
        .await?;

    info!(attempts = outcome.attempts(), "Session finished: {}", outcome);
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

async fn repair(
    settings: &Settings,
    targets: Vec<String>,
    logs: &SessionLogDir,
    log_file: &std::path::Path,
) -> Result<SessionOutcome> {
    info!("Session log: {}", log_file.display());
    if settings.files.is_empty() {
        info!("No files passed. Debugging all .py files: {}", targets.join(", "));
    }

    let model = llm::build_model(settings)?;
    let executor = PythonExecutor::new(&settings.code_dir)
        .interpreter(settings.python.as_str())
        .timeout(settings.execution_timeout);

    let research = if settings.enable_internet_search {
        Some(ResearchEscalator::new(
            Box::new(GoogleSearch::new(settings.request_timeout)?),
            Box::new(HttpFetcher::new(settings.request_timeout)?),
            settings.num_search_urls,
        ))
    } else {
        None
    };

    let repair_settings = RepairSettings::new(settings, targets).hide_from_tree(logs.name());
    let mut session = RepairSession::new(repair_settings, model.as_ref(), &executor);
    if let Some(research) = &research {
        session = session.with_research(research);
    }

    Ok(session.run().await?)
}

fn save_api_key(provider: ProviderKind) -> Result<()> {
    if io::stdin().is_terminal() {
        eprint!("Paste your {} API key: ", provider.as_str());
        io::stderr().flush()?;
    }

    let mut key = String::new();
    io::stdin()
        .read_line(&mut key)
        .context("Failed to read API key from stdin")?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("No API key provided");
    }

    fixloop::keyring::set_api_key(provider.as_str(), key).map_err(anyhow::Error::msg)?;
    eprintln!("Saved {} API key to the system keychain.", provider.as_str());
    Ok(())
}

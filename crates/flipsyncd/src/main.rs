// # flipsyncd - flipsync runner
//
// This binary is a thin integration layer:
// 1. Parse arguments (each backed by a `FLIPSYNC_*` environment variable)
// 2. Validate configuration and install logging
// 3. Build the service client, solver and store
// 4. Hand them to `SyncEngine` and wait for it to stop
//
// Fetch, solve, submit and retry logic all live in flipsync-core.
//
// ## Commands
//
// - `run` (default): the fetch → solve → submit loop
// - `fetch`: fetch the current puzzle once and record it
// - `submit --level N`: submit the stored solution for one level
// - `status`: print the store's records
//
// ## Credentials
//
// Read from `FLIPSYNC_USERNAME` and `FLIPSYNC_PASSWORD` only. There are no
// command-line flags for them.
//
// ## Example
//
// ```bash
// export FLIPSYNC_USERNAME=alice
// export FLIPSYNC_PASSWORD=...
// flipsyncd --solver ./solve --start-level 108 run
// ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flipsync_core::config::{DEFAULT_SERVICE_URL, DEFAULT_SUCCESS_MARKER};
use flipsync_core::engine::FetchStep;
use flipsync_core::traits::{FetchOutcome, SolveRequest, Solver, SubmitOutcome};
use flipsync_core::{
    Credentials, EngineConfig, EngineEvent, PuzzleService, PuzzleStore, ServiceConfig,
    SolverConfig, StoreConfig, SyncConfig, SyncEngine,
};
use flipsync_service_hackerorg::HackerOrgService;
use flipsync_solver_process::ProcessSolver;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error
#[derive(Debug, Clone, Copy)]
enum FlipsyncExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error
    RuntimeError = 2,
}

impl From<FlipsyncExitCode> for ExitCode {
    fn from(code: FlipsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "flipsyncd",
    version,
    about = "Fetch flip puzzles, solve them with an external program, submit the answers"
)]
struct Cli {
    /// Store file
    #[arg(long, env = "FLIPSYNC_STORE_PATH", default_value = "puzzle.json", global = true)]
    store_path: PathBuf,

    /// Keep records in memory only (nothing is written)
    #[arg(long, env = "FLIPSYNC_MEMORY_STORE", global = true)]
    memory_store: bool,

    /// Puzzle endpoint
    #[arg(long, env = "FLIPSYNC_SERVICE_URL", default_value = DEFAULT_SERVICE_URL, global = true)]
    service_url: String,

    /// Literal marking an accepted submission
    #[arg(long, env = "FLIPSYNC_SUCCESS_MARKER", default_value = DEFAULT_SUCCESS_MARKER, global = true)]
    success_marker: String,

    /// HTTP timeout in seconds
    #[arg(long, env = "FLIPSYNC_HTTP_TIMEOUT", default_value_t = 30, global = true)]
    http_timeout: u64,

    /// Solver program
    #[arg(long, env = "FLIPSYNC_SOLVER", global = true)]
    solver: Option<String>,

    /// Extra solver argument (repeatable)
    #[arg(long = "solver-arg", global = true, allow_hyphen_values = true)]
    solver_args: Vec<String>,

    /// Solver working directory
    #[arg(long, env = "FLIPSYNC_SOLVER_DIR", global = true)]
    solver_dir: Option<PathBuf>,

    /// Solver timeout in seconds
    #[arg(long, env = "FLIPSYNC_SOLVER_TIMEOUT", default_value_t = 300, global = true)]
    solver_timeout: u64,

    /// First level to submit for (defaults to the first fetched level)
    #[arg(long, env = "FLIPSYNC_START_LEVEL", global = true)]
    start_level: Option<u32>,

    /// Stop after this many iterations; 0 runs until interrupted
    #[arg(long, env = "FLIPSYNC_MAX_ITERATIONS", default_value_t = 0, global = true)]
    max_iterations: u64,

    /// Retry attempts for fetch, solve and submit
    #[arg(long, env = "FLIPSYNC_MAX_RETRIES", default_value_t = 3, global = true)]
    max_retries: usize,

    /// Rejections of one solution before the level is solved again; 0 never re-solves
    #[arg(long, env = "FLIPSYNC_MAX_REJECTIONS", default_value_t = 3, global = true)]
    max_rejections: u32,

    /// Base retry delay in seconds
    #[arg(long, env = "FLIPSYNC_RETRY_DELAY_SECS", default_value_t = 2, global = true)]
    retry_delay_secs: u64,

    /// Backoff ceiling in seconds
    #[arg(long, env = "FLIPSYNC_MAX_BACKOFF_SECS", default_value_t = 60, global = true)]
    max_backoff_secs: u64,

    /// Pause between successful iterations in seconds
    #[arg(long, env = "FLIPSYNC_ITERATION_DELAY_SECS", default_value_t = 0, global = true)]
    iteration_delay_secs: u64,

    /// Fetch and solve, never submit
    #[arg(long, env = "FLIPSYNC_DRY_RUN", global = true)]
    dry_run: bool,

    /// Log level
    #[arg(long, env = "FLIPSYNC_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Run the fetch → solve → submit loop (default)
    Run,
    /// Fetch the current puzzle once and record it
    Fetch,
    /// Submit the stored solution for one level
    Submit {
        /// Level to submit
        #[arg(long)]
        level: u32,
    },
    /// Print the store's records
    Status,
}

impl Command {
    fn needs_credentials(self) -> bool {
        !matches!(self, Command::Status)
    }
}

/// Application configuration
struct Config {
    command: Command,
    sync: SyncConfig,
    credentials: Option<Credentials>,
    log_level: LogLevel,
}

impl Config {
    /// Build configuration from parsed arguments and the environment
    fn from_cli(cli: Cli) -> Result<Self> {
        let command = cli.command.unwrap_or(Command::Run);

        let credentials = if command.needs_credentials() {
            let username = env::var("FLIPSYNC_USERNAME").context(
                "FLIPSYNC_USERNAME is required. Set it via: export FLIPSYNC_USERNAME=your_name",
            )?;
            let password = env::var("FLIPSYNC_PASSWORD").context(
                "FLIPSYNC_PASSWORD is required. Set it via: export FLIPSYNC_PASSWORD=...",
            )?;
            Some(Credentials::new(username, password))
        } else {
            None
        };

        Ok(Self::with_credentials(cli, credentials))
    }

    /// Map arguments onto configuration
    fn with_credentials(cli: Cli, credentials: Option<Credentials>) -> Self {
        let command = cli.command.unwrap_or(Command::Run);

        let mut solver = SolverConfig::new(cli.solver.unwrap_or_default())
            .with_args(cli.solver_args)
            .with_timeout_secs(cli.solver_timeout);
        solver.working_dir = cli.solver_dir;

        let store = if cli.memory_store {
            StoreConfig::Memory
        } else {
            StoreConfig::File {
                path: cli.store_path,
            }
        };

        let sync = SyncConfig {
            service: ServiceConfig {
                url: cli.service_url,
                success_marker: cli.success_marker,
                timeout_secs: cli.http_timeout,
            },
            solver,
            store,
            engine: EngineConfig {
                max_retries: cli.max_retries,
                retry_delay_secs: cli.retry_delay_secs,
                max_backoff_secs: cli.max_backoff_secs,
                iteration_delay_secs: cli.iteration_delay_secs,
                max_iterations: cli.max_iterations,
                start_level: cli.start_level,
                dry_run: cli.dry_run,
                max_rejections: cli.max_rejections,
                ..EngineConfig::default()
            },
        };

        Self {
            command,
            sync,
            credentials,
            log_level: cli.log_level,
        }
    }

    /// Validate the configuration
    ///
    /// The solver is only required by `run`.
    fn validate(&self) -> Result<()> {
        self.sync.service.validate()?;
        self.sync.store.validate()?;
        self.sync.engine.validate()?;

        if matches!(self.command, Command::Run) {
            if self.sync.solver.program.trim().is_empty() {
                anyhow::bail!(
                    "A solver program is required for `run`. \
                    Set it via: --solver ./solve or export FLIPSYNC_SOLVER=./solve"
                );
            }
            self.sync.solver.validate()?;
        }

        if let Some(credentials) = &self.credentials {
            credentials.validate()?;
        }

        if let StoreConfig::File { path } = &self.sync.store
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "FLIPSYNC_STORE_PATH parent directory does not exist: {}. \
                Create it first: mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        if self.sync.service.url.starts_with("http://") {
            warn!("Service URL uses HTTP (not HTTPS); credentials are sent in clear text");
        }

        Ok(())
    }
}

/// Stand-in solver for commands that never solve
struct NoSolver;

#[async_trait::async_trait]
impl Solver for NoSolver {
    async fn solve(&self, request: &SolveRequest) -> flipsync_core::Result<String> {
        Err(flipsync_core::Error::config(format!(
            "No solver configured (level {})",
            request.level
        )))
    }

    fn solver_name(&self) -> &str {
        "none"
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::from(cli.log_level))
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return FlipsyncExitCode::ConfigError.into();
    }

    let config = match Config::from_cli(cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return FlipsyncExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation error: {:#}", e);
        return FlipsyncExitCode::ConfigError.into();
    }

    debug!("Log level: {:?}", config.log_level);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return FlipsyncExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        let (engine, events) = match build_engine(&config).await {
            Ok(parts) => parts,
            Err(e) => {
                error!("Startup error: {:#}", e);
                return FlipsyncExitCode::ConfigError;
            }
        };

        match execute(config.command, engine, events).await {
            Ok(()) => FlipsyncExitCode::CleanShutdown,
            Err(e) => {
                error!("Runtime error: {:#}", e);
                FlipsyncExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Open the store and wire the engine
async fn build_engine(config: &Config) -> Result<(SyncEngine, mpsc::Receiver<EngineEvent>)> {
    let store = flipsync_core::open_store(&config.sync.store)
        .await
        .context("Failed to open puzzle store")?;

    let service: Box<dyn PuzzleService> = match &config.credentials {
        Some(credentials) => Box::new(HackerOrgService::from_config(
            &config.sync.service,
            credentials.clone(),
        )?),
        None => Box::new(OfflineService),
    };

    let solver: Box<dyn Solver> = if config.sync.solver.program.trim().is_empty() {
        Box::new(NoSolver)
    } else {
        Box::new(ProcessSolver::from_config(&config.sync.solver)?)
    };

    info!(
        "Using service {} and solver {}",
        service.service_name(),
        solver.solver_name()
    );

    Ok(SyncEngine::new(
        service,
        solver,
        store,
        config.sync.engine.clone(),
    )?)
}

/// Stand-in service for commands that never talk to the network
struct OfflineService;

#[async_trait::async_trait]
impl PuzzleService for OfflineService {
    async fn fetch_current_puzzle(&self) -> flipsync_core::Result<FetchOutcome> {
        Err(flipsync_core::Error::config("No credentials configured"))
    }

    async fn submit_solution(
        &self,
        _level: u32,
        _solution: &str,
    ) -> flipsync_core::Result<SubmitOutcome> {
        Err(flipsync_core::Error::config("No credentials configured"))
    }

    fn service_name(&self) -> &'static str {
        "offline"
    }
}

/// Run one command to completion
async fn execute(
    command: Command,
    engine: SyncEngine,
    events: mpsc::Receiver<EngineEvent>,
) -> Result<()> {
    match command {
        Command::Run => run_loop(engine, events).await,
        Command::Fetch => {
            match engine.fetch_and_record().await? {
                FetchStep::Recorded { puzzle, inserted } => {
                    println!(
                        "level {}: {} ({})",
                        puzzle.level,
                        puzzle.board_state,
                        if inserted { "new" } else { "already stored" }
                    );
                }
                FetchStep::NoPuzzle(missing) => {
                    return Err(flipsync_core::Error::fetch_malformed(missing.to_string()).into());
                }
            }
            Ok(())
        }
        Command::Submit { level } => {
            match engine.submit_stored(level).await? {
                SubmitOutcome::Accepted => println!("level {}: accepted", level),
                SubmitOutcome::Rejected => anyhow::bail!("Level {} was rejected", level),
            }
            Ok(())
        }
        Command::Status => print_status(engine.store()).await,
    }
}

/// Run the loop until a signal, the iteration limit or a fatal error
async fn run_loop(engine: SyncEngine, events: mpsc::Receiver<EngineEvent>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let signals = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling error: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    let monitor = tokio::spawn(async move {
        let mut events = ReceiverStream::new(events);
        while let Some(event) = events.next().await {
            debug!("Engine event: {:?}", event);
        }
    });

    let result = engine.run_with_shutdown(Some(shutdown_rx)).await;
    signals.abort();
    drop(engine);
    let _ = monitor.await;

    let summary = result?;
    info!(
        "Stopped ({}): {} iteration(s), {} accepted, next level {}",
        summary.stop_reason,
        summary.iterations,
        summary.accepted,
        summary
            .cursor
            .next_level()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    Ok(())
}

async fn print_status(store: &dyn PuzzleStore) -> Result<()> {
    let levels = store.levels().await?;
    if levels.is_empty() {
        println!("store is empty");
        return Ok(());
    }

    println!("{:>6}  {:<8}  {:<6}  {:>8}  board", "level", "solved", "posted", "attempts");
    for level in levels {
        let Some(record) = store.get_record(level).await? else {
            continue;
        };
        println!(
            "{:>6}  {:<8}  {:<6}  {:>8}  {}",
            level,
            if record.is_solved() { "yes" } else { "no" },
            if record.posted { "yes" } else { "no" },
            record.submit_attempts,
            record.board_state
        );
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for Ctrl-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

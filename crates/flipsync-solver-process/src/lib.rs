// # Process Solver
//
// Solver implementation that runs an external program once per board.
//
// ## Process Contract
//
// - The board is written to the program's stdin, followed by a newline
// - `FLIPSYNC_BOARD` and `FLIPSYNC_LEVEL` carry the same input in the environment
// - The last non-empty stdout line is the solution
// - A non-zero exit, a timeout or empty output is a solver failure
//
// The program runs in its own process group and is killed if it outlives
// the timeout. Retries are owned by the engine; this crate runs the program
// exactly once per call.

use async_trait::async_trait;
use flipsync_core::config::SolverConfig;
use flipsync_core::traits::{SolveRequest, Solver};
use flipsync_core::{Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Environment variable holding the board state
pub const BOARD_ENV: &str = "FLIPSYNC_BOARD";

/// Environment variable holding the level number
pub const LEVEL_ENV: &str = "FLIPSYNC_LEVEL";

/// Extract the solution from solver stdout
///
/// Takes the last non-empty line, trimmed. A line with internal whitespace
/// is not a single token and is rejected.
pub fn parse_solution(stdout: &str) -> Result<String> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .ok_or_else(|| Error::solver("solver produced no output"))?;

    if line.contains(char::is_whitespace) {
        return Err(Error::solver(format!(
            "solver output is not a single token: {:?}",
            line
        )));
    }

    Ok(line.to_string())
}

/// Runs an external solver program
#[derive(Debug, Clone)]
pub struct ProcessSolver {
    /// Program to execute
    program: String,

    /// Arguments passed verbatim
    args: Vec<String>,

    /// Working directory (inherited when unset)
    working_dir: Option<PathBuf>,

    /// Upper bound on one run
    timeout: Duration,
}

impl ProcessSolver {
    /// Create a solver for `program` with no arguments and the default timeout
    pub fn new(program: impl Into<String>) -> Self {
        let defaults = SolverConfig::new(program);
        Self {
            program: defaults.program,
            args: defaults.args,
            working_dir: defaults.working_dir,
            timeout: Duration::from_secs(defaults.timeout_secs),
        }
    }

    /// Create a solver from configuration
    pub fn from_config(config: &SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Append arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, request: &SolveRequest) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(BOARD_ENV, &request.board_state)
            .env(LEVEL_ENV, request.level.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        // Own process group: a terminal Ctrl-C reaches only the daemon, which
        // lets the current run finish before shutting down
        #[cfg(unix)]
        command.process_group(0);

        command
    }
}

#[async_trait]
impl Solver for ProcessSolver {
    async fn solve(&self, request: &SolveRequest) -> Result<String> {
        tracing::debug!(
            "Running solver {} for level {} (timeout {:?})",
            self.program,
            request.level,
            self.timeout
        );

        let mut child = self
            .command(request)
            .spawn()
            .map_err(|e| Error::solver(format!("Failed to start {}: {}", self.program, e)))?;

        let stdin = child.stdin.take();
        let board = format!("{}\n", request.board_state);

        let run = async move {
            if let Some(mut stdin) = stdin {
                // Solvers that read the environment may exit without reading stdin
                if let Err(e) = stdin.write_all(board.as_bytes()).await {
                    tracing::debug!("Solver did not read stdin: {}", e);
                }
            }
            child.wait_with_output().await
        };

        // On timeout the child is dropped, which kills it
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                Error::solver(format!(
                    "{} timed out after {:?} on level {}",
                    self.program, self.timeout, request.level
                ))
            })?
            .map_err(|e| Error::solver(format!("Failed to wait for {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .map(str::trim)
                .rfind(|line| !line.is_empty())
                .unwrap_or("no stderr output");
            return Err(Error::solver(format!(
                "{} exited with {}: {}",
                self.program, output.status, detail
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let solution = parse_solution(&stdout)?;
        tracing::trace!("Solver output for level {}: {}", request.level, solution);
        Ok(solution)
    }

    fn solver_name(&self) -> &str {
        &self.program
    }
}

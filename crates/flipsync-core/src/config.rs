//! Configuration types for the flipsync system
//!
//! This module defines all configuration structures used throughout the crate.
//! A [`SyncConfig`] is built once at startup and handed to each component;
//! [`Credentials`] are kept apart so they are never serialized or logged.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default puzzle endpoint
pub const DEFAULT_SERVICE_URL: &str = "http://www.hacker.org/cross/index.php";

/// Literal the service prints when a submission is accepted
pub const DEFAULT_SUCCESS_MARKER: &str = "Congratulations";

/// Upper bound for `EngineConfig::max_retries`
pub const MAX_RETRIES_LIMIT: usize = 100;

/// Main flipsync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote puzzle service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// External solver configuration
    pub solver: SolverConfig,

    /// Puzzle store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Loop settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl SyncConfig {
    /// Create a configuration for the given solver program with defaults elsewhere
    pub fn new(solver_program: impl Into<String>) -> Self {
        Self {
            service: ServiceConfig::default(),
            solver: SolverConfig::new(solver_program),
            store: StoreConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.service.validate()?;
        self.solver.validate()?;
        self.store.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Account used to talk to the puzzle service
///
/// The Debug implementation intentionally does NOT expose the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account name
    pub username: String,
    /// Account password
    /// ⚠️ NEVER log this value
    pub password: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Validate that both parts are present
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.username.trim().is_empty() {
            return Err(crate::Error::config("Username cannot be empty"));
        }
        if self.password.is_empty() {
            return Err(crate::Error::config("Password cannot be empty"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// Remote puzzle service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Puzzle endpoint, used for both fetch and submit
    #[serde(default = "default_service_url")]
    pub url: String,

    /// Literal that marks an accepted submission in the response body
    #[serde(default = "default_success_marker")]
    pub success_marker: String,

    /// HTTP request timeout (in seconds)
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl ServiceConfig {
    /// Validate the service configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.url.is_empty() {
            return Err(crate::Error::config("Service URL cannot be empty"));
        }
        if !self.url.starts_with("https://") && !self.url.starts_with("http://") {
            return Err(crate::Error::config(format!(
                "Service URL must use HTTP or HTTPS scheme. Got: {}",
                self.url
            )));
        }
        if self.success_marker.is_empty() {
            return Err(crate::Error::config("Success marker cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Service timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
            success_marker: default_success_marker(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// External solver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Program to execute
    pub program: String,

    /// Extra arguments passed verbatim
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process (inherits ours when unset)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Upper bound on one solver run (in seconds)
    #[serde(default = "default_solver_timeout_secs")]
    pub timeout_secs: u64,
}

impl SolverConfig {
    /// Create a solver configuration for a program with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout_secs: default_solver_timeout_secs(),
        }
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

    /// Set the timeout
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Validate the solver configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.program.trim().is_empty() {
            return Err(crate::Error::config("Solver program cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Solver timeout must be > 0"));
        }
        Ok(())
    }
}

/// Puzzle store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// JSON file store
    File {
        /// Path to the store file
        path: PathBuf,
    },

    /// In-memory store (not persistent)
    Memory,
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } if path.as_os_str().is_empty() => {
                Err(crate::Error::config("Store path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            path: PathBuf::from("puzzle.json"),
        }
    }
}

/// Loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of retry attempts for fetch, solve and submit
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Base delay before the first retry (in seconds); doubles each attempt
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Ceiling for the exponential backoff (in seconds)
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Pause between iterations that made progress (in seconds)
    #[serde(default)]
    pub iteration_delay_secs: u64,

    /// Stop after this many iterations; 0 runs until interrupted
    #[serde(default)]
    pub max_iterations: u64,

    /// First level to submit for; levels below it are never submitted
    #[serde(default)]
    pub start_level: Option<u32>,

    /// Fetch and solve, but never submit
    #[serde(default)]
    pub dry_run: bool,

    /// Rejected submissions of one solution before the level is solved
    /// again; 0 keeps resubmitting the stored solution
    #[serde(default = "default_max_rejections")]
    pub max_rejections: u32,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(crate::Error::config(format!(
                "Maximum retries ({}) exceeds {}",
                self.max_retries, MAX_RETRIES_LIMIT
            )));
        }
        if self.max_backoff_secs < self.retry_delay_secs {
            return Err(crate::Error::config(format!(
                "Maximum backoff ({}s) is smaller than the retry delay ({}s)",
                self.max_backoff_secs, self.retry_delay_secs
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            iteration_delay_secs: 0,
            max_iterations: 0,
            start_level: None,
            dry_run: false,
            max_rejections: default_max_rejections(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_service_url() -> String {
    DEFAULT_SERVICE_URL.to_string()
}

fn default_success_marker() -> String {
    DEFAULT_SUCCESS_MARKER.to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_solver_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> usize {
    3
}

fn default_max_rejections() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_max_backoff_secs() -> u64 {
    60
}

fn default_event_channel_capacity() -> usize {
    1000
}

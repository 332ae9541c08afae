//! Puzzle synchronization engine
//!
//! The SyncEngine is responsible for:
//! - Fetching the service's current puzzle
//! - Recording it in the PuzzleStore exactly once
//! - Running the Solver against the fetched board
//! - Submitting the level it just solved, or the most recently solved
//!   unposted record when the shown level cannot be submitted
//! - Advancing the session cursor on accepted submissions only
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   fetch / submit   ┌──────────────┐
//! │ PuzzleService │◄──────────────────►│  SyncEngine  │
//! └───────────────┘                    └──────────────┘
//!                                         │        │
//!                      ┌──────────────────┘        └──────────────┐
//!                      ▼                                          ▼
//!              ┌──────────────┐                           ┌──────────────┐
//!              │ PuzzleStore  │                           │    Solver    │
//!              │ (idempotency)│                           │  (opaque)    │
//!              └──────────────┘                           └──────────────┘
//! ```
//!
//! ## Iteration
//!
//! `Fetching → (Fetched | NoPuzzle) → Solving → Solved → Submitting →
//! (Accepted | Rejected)`
//!
//! 1. Fetch the current puzzle (retried with backoff)
//! 2. `upsert_if_absent`, persist if a record was created
//! 3. Solve unless the record carries a solution that has not yet been
//!    rejected `max_rejections` times, persist
//! 4. Submit the fetched level when it is unposted and at or above the
//!    cursor; otherwise the most recently solved unposted record there
//! 5. `mark_posted`, persist; advance the cursor only on `Accepted`

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::traits::{
    FetchOutcome, FetchedPuzzle, MissingField, PuzzleRecord, PuzzleService, PuzzleStore,
    SolveRequest, Solver, SubmitOutcome,
};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        start_level: Option<u32>,
    },

    /// A new loop iteration began
    IterationStarted {
        iteration: u64,
    },

    /// The service showed a puzzle
    PuzzleFetched {
        level: u32,
        inserted: bool,
    },

    /// A fetch attempt yielded no puzzle
    FetchFailed {
        reason: String,
        attempt: usize,
    },

    /// A solution was recorded
    SolveSucceeded {
        level: u32,
    },

    /// A solver attempt failed
    SolveFailed {
        level: u32,
        error: String,
        attempt: usize,
    },

    /// The service accepted a solution
    SubmitAccepted {
        level: u32,
    },

    /// The service did not acknowledge a solution
    SubmitRejected {
        level: u32,
        attempts: u32,
    },

    /// The iteration ended without a submission
    IterationSkipped {
        reason: String,
    },

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// The next level the loop is allowed to submit for
///
/// Lives only as long as one run; it is not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCursor {
    next: Option<u32>,
}

impl SessionCursor {
    /// Start at `start_level`, or at the first fetched level when `None`
    pub fn new(start_level: Option<u32>) -> Self {
        Self { next: start_level }
    }

    /// Lowest level eligible for submission
    pub fn next_level(&self) -> Option<u32> {
        self.next
    }

    /// Anchor an unset cursor on the first level seen
    pub fn observe_fetched(&mut self, level: u32) {
        if self.next.is_none() {
            self.next = Some(level);
        }
    }

    /// Move past an accepted level
    pub fn advance_past(&mut self, level: u32) {
        let candidate = level.saturating_add(1);
        if self.next.is_none_or(|next| candidate > next) {
            self.next = Some(candidate);
        }
    }
}

/// How one iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The service accepted the solution for `level`
    Accepted { level: u32 },
    /// The service did not acknowledge the solution for `level`
    Rejected { level: u32 },
    /// The page carried no puzzle after all fetch attempts
    NoPuzzle(MissingField),
    /// The solver gave up on `level`
    SolveFailed { level: u32 },
    /// No solved, unposted record at or above the cursor
    NothingToSubmit { level: u32 },
    /// Dry run: `level` would have been submitted
    DryRun { level: u32 },
}

impl IterationOutcome {
    /// Whether the iteration moved the session forward
    pub fn made_progress(&self) -> bool {
        matches!(self, IterationOutcome::Accepted { .. })
    }
}

/// Result of the fetch half of an iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStep {
    /// A puzzle was fetched and the store consulted
    Recorded {
        puzzle: FetchedPuzzle,
        /// Whether a new record was created
        inserted: bool,
    },
    /// No puzzle on the page
    NoPuzzle(MissingField),
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested
    Shutdown,
    /// `max_iterations` reached
    IterationLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Shutdown => write!(f, "Shutdown signal"),
            StopReason::IterationLimit => write!(f, "Iteration limit reached"),
        }
    }
}

/// Totals for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Iterations started
    pub iterations: u64,
    /// Submissions accepted
    pub accepted: u64,
    /// Cursor when the run ended
    pub cursor: SessionCursor,
    /// Why the run ended
    pub stop_reason: StopReason,
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`
///
/// Attempt 0 means "no failure yet" and yields no delay.
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

/// Puzzle synchronization engine
///
/// The engine runs one iteration at a time on a single task. There is no
/// parallel solving: the service expects one puzzle at a time.
///
/// ## Lifecycle
///
/// 1. Create with [`SyncEngine::new()`]
/// 2. Start with [`SyncEngine::run()`] or [`SyncEngine::run_until()`]
/// 3. The loop ends on shutdown, on `max_iterations`, or on a fatal error
/// 4. The store is persisted before returning in every case
pub struct SyncEngine {
    /// Remote puzzle game
    service: Box<dyn PuzzleService>,

    /// External solver
    solver: Box<dyn Solver>,

    /// Durable record of levels
    store: Box<dyn PuzzleStore>,

    /// Loop settings
    settings: EngineConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl SyncEngine {
    /// Create a new engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        service: Box<dyn PuzzleService>,
        solver: Box<dyn Solver>,
        store: Box<dyn PuzzleStore>,
        settings: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        settings.validate()?;

        let (tx, rx) = mpsc::channel(settings.event_channel_capacity);

        let engine = Self {
            service,
            solver,
            store,
            settings,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Read access to the store
    pub fn store(&self) -> &dyn PuzzleStore {
        self.store.as_ref()
    }

    /// Run until Ctrl-C, the iteration limit, or a fatal error
    pub async fn run(&self) -> Result<RunSummary> {
        let (tx, rx) = oneshot::channel();
        let listener = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(());
            }
        });

        let result = self.run_with_shutdown(Some(rx)).await;
        listener.abort();
        result
    }

    /// Run with a controlled shutdown channel
    ///
    /// `None` runs until the iteration limit or a fatal error. A dropped
    /// sender counts as a shutdown request.
    pub async fn run_with_shutdown(
        &self,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<RunSummary> {
        match shutdown_rx {
            Some(rx) => {
                self.run_until(async move {
                    let _ = rx.await;
                })
                .await
            }
            None => self.run_until(std::future::pending::<()>()).await,
        }
    }

    /// Run until `shutdown` resolves
    ///
    /// Shutdown is only observed between iterations: the current iteration
    /// always finishes and the store is persisted before returning.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()> + Send,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        let mut cursor = SessionCursor::new(self.settings.start_level);
        let mut iterations: u64 = 0;
        let mut accepted: u64 = 0;
        let mut idle_streak: u32 = 0;

        self.emit_event(EngineEvent::Started {
            start_level: self.settings.start_level,
        });
        info!(
            "Sync loop started (start level: {}, max iterations: {}, dry run: {})",
            self.settings
                .start_level
                .map(|l| l.to_string())
                .unwrap_or_else(|| "auto".to_string()),
            self.settings.max_iterations,
            self.settings.dry_run
        );

        let stop_reason = loop {
            if self.iteration_limit_reached(iterations) {
                break StopReason::IterationLimit;
            }

            iterations += 1;
            self.emit_event(EngineEvent::IterationStarted {
                iteration: iterations,
            });

            let delay = match self.run_iteration(&mut cursor).await {
                Ok(outcome) => {
                    debug!("Iteration {} ended: {:?}", iterations, outcome);
                    if outcome.made_progress() {
                        accepted += 1;
                        idle_streak = 0;
                        Duration::from_secs(self.settings.iteration_delay_secs)
                    } else {
                        idle_streak = idle_streak.saturating_add(1);
                        self.backoff(idle_streak)
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!("Iteration {} failed, stopping: {}", iterations, e);
                    if let Err(persist_err) = self.store.persist().await {
                        error!("Failed to persist store while stopping: {}", persist_err);
                    }
                    self.emit_event(EngineEvent::Stopped {
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
                Err(e) => {
                    warn!("Iteration {} failed, will retry: {}", iterations, e);
                    self.emit_event(EngineEvent::IterationSkipped {
                        reason: e.to_string(),
                    });
                    idle_streak = idle_streak.saturating_add(1);
                    self.backoff(idle_streak)
                }
            };

            if self.iteration_limit_reached(iterations) {
                break StopReason::IterationLimit;
            }

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break StopReason::Shutdown;
                }

                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.store.persist().await?;
        info!(
            "Store persisted, sync loop stopped after {} iteration(s): {}",
            iterations, stop_reason
        );
        self.emit_event(EngineEvent::Stopped {
            reason: stop_reason.to_string(),
        });

        Ok(RunSummary {
            iterations,
            accepted,
            cursor,
            stop_reason,
        })
    }

    /// Run one full iteration
    ///
    /// Returns `Err` only for failures the caller must handle (store I/O,
    /// transport failures after retries); everything scoped to this one
    /// puzzle is reported through [`IterationOutcome`].
    pub async fn run_iteration(&self, cursor: &mut SessionCursor) -> Result<IterationOutcome> {
        // Fetching
        let puzzle = match self.fetch_and_record().await? {
            FetchStep::Recorded { puzzle, .. } => puzzle,
            FetchStep::NoPuzzle(missing) => {
                self.emit_event(EngineEvent::IterationSkipped {
                    reason: missing.to_string(),
                });
                return Ok(IterationOutcome::NoPuzzle(missing));
            }
        };
        let level = puzzle.level;

        cursor.observe_fetched(level);
        if let Some(next) = cursor.next_level()
            && level < next
        {
            warn!(
                "Service shows level {} but the cursor is at level {}; it will not be submitted",
                level, next
            );
        }

        // Solving
        let record = self
            .store
            .get_record(level)
            .await?
            .ok_or_else(|| Error::not_found(format!("level {}", level)))?;

        if record.posted {
            warn!("Level {} is already marked as posted", level);
        } else if !self.ensure_solved(level, &puzzle.board_state, &record).await? {
            return Ok(IterationOutcome::SolveFailed { level });
        }

        // Submitting: the level on screen, unless it is posted or below the cursor
        let target = if !record.posted && cursor.next_level().is_none_or(|next| level >= next) {
            level
        } else {
            let Some((stored, pending)) = self.store.pending_submission(cursor.next_level()).await?
            else {
                self.emit_event(EngineEvent::IterationSkipped {
                    reason: format!("nothing to submit after fetching level {}", level),
                });
                return Ok(IterationOutcome::NothingToSubmit { level });
            };
            info!(
                "Submitting stored level {} (service shows level {})",
                stored, level
            );
            if !self
                .ensure_solved(stored, &pending.board_state, &pending)
                .await?
            {
                return Ok(IterationOutcome::SolveFailed { level: stored });
            }
            stored
        };

        if self.settings.dry_run {
            info!("Dry run: not submitting level {}", target);
            return Ok(IterationOutcome::DryRun { level: target });
        }

        match self.submit_stored(target).await? {
            SubmitOutcome::Accepted => {
                cursor.advance_past(target);
                Ok(IterationOutcome::Accepted { level: target })
            }
            SubmitOutcome::Rejected => Ok(IterationOutcome::Rejected { level: target }),
        }
    }

    /// Fetch the current puzzle and record it if it is new
    ///
    /// Retries pages without a puzzle and transport failures with backoff.
    /// The store is persisted only when a record was created.
    pub async fn fetch_and_record(&self) -> Result<FetchStep> {
        let puzzle = match self.fetch_with_retry().await? {
            FetchOutcome::Puzzle(puzzle) => puzzle,
            FetchOutcome::NotFound(missing) => {
                error!("No puzzle after {} attempt(s): {}", self.attempts(), missing);
                return Ok(FetchStep::NoPuzzle(missing));
            }
        };

        let inserted = self
            .store
            .upsert_if_absent(puzzle.level, &puzzle.board_state)
            .await?;

        if inserted {
            self.store.persist().await?;
            info!("Fetched level {} (new)", puzzle.level);
        } else {
            info!("Fetched level {} (already in store)", puzzle.level);
        }

        self.emit_event(EngineEvent::PuzzleFetched {
            level: puzzle.level,
            inserted,
        });

        Ok(FetchStep::Recorded { puzzle, inserted })
    }

    /// Submit the stored solution for `level` and record the outcome
    ///
    /// Fails with [`Error::NotFound`] for unknown levels and
    /// [`Error::InvalidInput`] for levels without a solution.
    pub async fn submit_stored(&self, level: u32) -> Result<SubmitOutcome> {
        let record = self
            .store
            .get_record(level)
            .await?
            .ok_or_else(|| Error::not_found(format!("level {}", level)))?;

        if !record.is_solved() {
            return Err(Error::invalid_input(format!(
                "level {} has no recorded solution",
                level
            )));
        }

        let outcome = self.submit_with_retry(level, &record.solution).await?;

        self.store.mark_posted(level, outcome.is_accepted()).await?;
        self.store.persist().await?;

        match outcome {
            SubmitOutcome::Accepted => {
                info!("Level {} accepted", level);
                self.emit_event(EngineEvent::SubmitAccepted { level });
            }
            SubmitOutcome::Rejected => {
                let attempts = record.submit_attempts.saturating_add(1);
                warn!(
                    "Level {} rejected (attempt {}); will retry on a later iteration",
                    level, attempts
                );
                self.emit_event(EngineEvent::SubmitRejected { level, attempts });
            }
        }

        Ok(outcome)
    }

    /// Make sure `level` carries a solution worth submitting
    ///
    /// Runs the solver when the record is unsolved, or when its solution has
    /// been rejected `max_rejections` times. Returns `false` when the solver
    /// gave up.
    async fn ensure_solved(
        &self,
        level: u32,
        board_state: &str,
        record: &PuzzleRecord,
    ) -> Result<bool> {
        if record.is_solved() {
            if !self.rejections_exhausted(record) {
                debug!("Level {} already solved, reusing stored solution", level);
                return Ok(true);
            }
            warn!(
                "Level {} rejected {} time(s) with its stored solution, solving again",
                level, record.submit_attempts
            );
        }

        let request = SolveRequest::new(level, board_state);
        let Some(solution) = self.solve_with_retry(&request).await else {
            self.emit_event(EngineEvent::IterationSkipped {
                reason: format!("solver gave up on level {}", level),
            });
            return Ok(false);
        };

        self.store.record_solution(level, &solution).await?;
        self.store.persist().await?;
        info!("Level {} solved", level);
        self.emit_event(EngineEvent::SolveSucceeded { level });
        Ok(true)
    }

    fn rejections_exhausted(&self, record: &PuzzleRecord) -> bool {
        self.settings.max_rejections != 0 && record.submit_attempts >= self.settings.max_rejections
    }

    async fn fetch_with_retry(&self) -> Result<FetchOutcome> {
        let mut last_outcome = FetchOutcome::NotFound(MissingField::Fragment);
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            match self.service.fetch_current_puzzle().await {
                Ok(FetchOutcome::Puzzle(puzzle)) => return Ok(FetchOutcome::Puzzle(puzzle)),
                Ok(FetchOutcome::NotFound(missing)) => {
                    warn!("Fetch attempt {} found no puzzle: {}", attempt, missing);
                    self.emit_event(EngineEvent::FetchFailed {
                        reason: missing.to_string(),
                        attempt,
                    });
                    last_outcome = FetchOutcome::NotFound(missing);
                    last_error = None;
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Fetch attempt {} from {} failed: {}",
                        attempt,
                        self.service.service_name(),
                        e
                    );
                    self.emit_event(EngineEvent::FetchFailed {
                        reason: e.to_string(),
                        attempt,
                    });
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            if attempt < self.settings.max_retries {
                tokio::time::sleep(self.retry_backoff(attempt)).await;
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(last_outcome),
        }
    }

    async fn solve_with_retry(&self, request: &SolveRequest) -> Option<String> {
        for attempt in 0..=self.settings.max_retries {
            let error = match self.solver.solve(request).await {
                Ok(solution) if !solution.trim().is_empty() => {
                    return Some(solution.trim().to_string());
                }
                Ok(_) => "solver produced an empty solution".to_string(),
                Err(e) => e.to_string(),
            };

            warn!(
                "Solve attempt {} for level {} with {} failed: {}",
                attempt,
                request.level,
                self.solver.solver_name(),
                error
            );
            self.emit_event(EngineEvent::SolveFailed {
                level: request.level,
                error,
                attempt,
            });

            if attempt < self.settings.max_retries {
                tokio::time::sleep(self.retry_backoff(attempt)).await;
            }
        }

        error!(
            "Giving up on level {} after {} solve attempt(s); skipping iteration",
            request.level,
            self.attempts()
        );
        None
    }

    async fn submit_with_retry(&self, level: u32, solution: &str) -> Result<SubmitOutcome> {
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            match self.service.submit_solution(level, solution).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() => {
                    warn!("Submit attempt {} for level {} failed: {}", attempt, level, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            if attempt < self.settings.max_retries {
                tokio::time::sleep(self.retry_backoff(attempt)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Other("Unknown submit error".to_string())))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(
            Duration::from_secs(self.settings.retry_delay_secs),
            attempt,
            Duration::from_secs(self.settings.max_backoff_secs),
        )
    }

    /// Delay after failed attempt number `attempt` (zero-based)
    fn retry_backoff(&self, attempt: usize) -> Duration {
        let attempt = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.backoff(attempt.saturating_add(1))
    }

    fn attempts(&self) -> usize {
        self.settings.max_retries.saturating_add(1)
    }

    fn iteration_limit_reached(&self, iterations: u64) -> bool {
        self.settings.max_iterations != 0 && iterations >= self.settings.max_iterations
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            // Full or closed: monitoring is best effort
            debug!("Event channel unavailable, dropping event");
        }
    }
}

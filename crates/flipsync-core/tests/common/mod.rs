//! Test doubles and common utilities for contract tests
//!
//! The doubles replay a script: each call consumes the next step and the
//! last step repeats once the script runs out. Clones share counters, so a
//! test keeps one clone and hands another to the engine.

#![allow(dead_code)]

use flipsync_core::config::EngineConfig;
use flipsync_core::error::{Error, Result};
use flipsync_core::traits::{
    FetchOutcome, FetchedPuzzle, MissingField, PuzzleService, SolveRequest, Solver, SubmitOutcome,
};
use flipsync_core::{MemoryStore, SyncEngine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One scripted fetch response
#[derive(Debug, Clone)]
pub enum FetchScript {
    Puzzle(u32, &'static str),
    NotFound(MissingField),
    Transport,
}

/// One scripted submit response
#[derive(Debug, Clone, Copy)]
pub enum SubmitScript {
    Accept,
    Reject,
    Transport,
}

/// One scripted solver response
#[derive(Debug, Clone)]
pub enum SolveScript {
    Solution(&'static str),
    Empty,
    Fail,
}

struct Script<T> {
    steps: Vec<T>,
    cursor: usize,
}

impl<T: Clone> Script<T> {
    fn new(steps: Vec<T>) -> Self {
        Self { steps, cursor: 0 }
    }

    fn next(&mut self) -> Option<T> {
        let step = self
            .steps
            .get(self.cursor)
            .or_else(|| self.steps.last())
            .cloned();
        self.cursor += 1;
        step
    }
}

/// A PuzzleService that replays scripted responses
#[derive(Clone)]
pub struct ScriptedService {
    fetches: Arc<Mutex<Script<FetchScript>>>,
    submits: Arc<Mutex<Script<SubmitScript>>>,
    fetch_calls: Arc<AtomicUsize>,
    submitted: Arc<Mutex<Vec<(u32, String)>>>,
}

impl ScriptedService {
    pub fn new(fetches: Vec<FetchScript>, submits: Vec<SubmitScript>) -> Self {
        Self {
            fetches: Arc::new(Mutex::new(Script::new(fetches))),
            submits: Arc::new(Mutex::new(Script::new(submits))),
            fetch_calls: Arc::new(AtomicUsize::new(0)),
            submitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always shows the same puzzle and accepts everything
    pub fn accepting(level: u32, board: &'static str) -> Self {
        Self::new(
            vec![FetchScript::Puzzle(level, board)],
            vec![SubmitScript::Accept],
        )
    }

    pub fn fetch_call_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Every (level, solution) pair submitted so far
    pub fn submitted(&self) -> Vec<(u32, String)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PuzzleService for ScriptedService {
    async fn fetch_current_puzzle(&self) -> Result<FetchOutcome> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.fetches.lock().unwrap().next();
        match step {
            Some(FetchScript::Puzzle(level, board)) => {
                Ok(FetchOutcome::Puzzle(FetchedPuzzle::new(level, board)))
            }
            Some(FetchScript::NotFound(missing)) => Ok(FetchOutcome::NotFound(missing)),
            Some(FetchScript::Transport) => Err(Error::transport("connection refused")),
            None => Ok(FetchOutcome::NotFound(MissingField::Fragment)),
        }
    }

    async fn submit_solution(&self, level: u32, solution: &str) -> Result<SubmitOutcome> {
        let step = self.submits.lock().unwrap().next();
        match step.unwrap_or(SubmitScript::Accept) {
            SubmitScript::Transport => Err(Error::transport("connection reset")),
            SubmitScript::Accept => {
                self.submitted
                    .lock()
                    .unwrap()
                    .push((level, solution.to_string()));
                Ok(SubmitOutcome::Accepted)
            }
            SubmitScript::Reject => {
                self.submitted
                    .lock()
                    .unwrap()
                    .push((level, solution.to_string()));
                Ok(SubmitOutcome::Rejected)
            }
        }
    }

    fn service_name(&self) -> &'static str {
        "scripted"
    }
}

/// A Solver that replays scripted answers
#[derive(Clone)]
pub struct ScriptedSolver {
    answers: Arc<Mutex<Script<SolveScript>>>,
    requests: Arc<Mutex<Vec<SolveRequest>>>,
}

impl ScriptedSolver {
    pub fn new(answers: Vec<SolveScript>) -> Self {
        Self {
            answers: Arc::new(Mutex::new(Script::new(answers))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always answers `solution`
    pub fn answering(solution: &'static str) -> Self {
        Self::new(vec![SolveScript::Solution(solution)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<SolveRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Solver for ScriptedSolver {
    async fn solve(&self, request: &SolveRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.answers.lock().unwrap().next();
        match step {
            Some(SolveScript::Solution(solution)) => Ok(solution.to_string()),
            Some(SolveScript::Empty) => Ok(String::new()),
            Some(SolveScript::Fail) | None => Err(Error::solver("exit status: 1")),
        }
    }

    fn solver_name(&self) -> &str {
        "scripted"
    }
}

/// Engine settings with no delays and a single iteration
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        max_retries: 2,
        retry_delay_secs: 0,
        max_backoff_secs: 0,
        iteration_delay_secs: 0,
        max_iterations: 1,
        start_level: None,
        dry_run: false,
        max_rejections: 3,
        event_channel_capacity: 100,
    }
}

/// Build an engine over clones of the given doubles
pub fn engine_with(
    service: &ScriptedService,
    solver: &ScriptedSolver,
    store: &MemoryStore,
    settings: EngineConfig,
) -> (SyncEngine, mpsc::Receiver<flipsync_core::EngineEvent>) {
    SyncEngine::new(
        Box::new(service.clone()),
        Box::new(solver.clone()),
        Box::new(store.clone()),
        settings,
    )
    .expect("engine construction succeeds")
}

/// Drain every event currently buffered
pub fn drain_events(
    rx: &mut mpsc::Receiver<flipsync_core::EngineEvent>,
) -> Vec<flipsync_core::EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

//! Cooperative single-threaded scheduler
//!
//! The scheduler owns every stage and a statistics handle for every pipe. It
//! drives the graph in passes: one pass calls each stage's `run` once, in
//! registration order.
//!
//! ## Run policies
//!
//! 1. **Fixpoint** ([`RunPolicy::ToFixpoint`]): passes repeat until the
//!    aggregate pipe hash stops changing, meaning no stage moved any data.
//! 2. **Single pass** ([`RunPolicy::SinglePass`]): one pass per tick, for
//!    drivers that feed a few samples at a time and call back often.
//!
//! The aggregate hash is `Σ (i + 1) · (written_i + read_i)` over all pipes.
//! Totals only grow, so an unchanged hash means a pass moved nothing.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use super::errors::{ConfigError, WorkResult};
use super::pipe::{MAX_READERS, PipeBuf, PipeReport, PipeStats};
use super::stage::Stage;

/// Default bound on pipes per scheduler
pub const MAX_PIPES: usize = 64;

/// Default bound on stages per scheduler
pub const MAX_STAGES: usize = 64;

/// How [`Scheduler::tick`] drives the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPolicy {
    /// Repeat passes until nothing moves
    #[default]
    ToFixpoint,
    /// Run exactly one pass
    SinglePass,
}

/// Scheduler limits and policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_pipes: usize,
    pub max_stages: usize,
    pub max_readers: usize,
    pub policy: RunPolicy,
    /// Stop a fixpoint run after this many passes
    pub max_passes: Option<usize>,
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self {
            max_pipes: MAX_PIPES,
            max_stages: MAX_STAGES,
            max_readers: MAX_READERS,
            policy: RunPolicy::default(),
            max_passes: None,
        }
    }

    pub fn with_max_pipes(mut self, max_pipes: usize) -> Self {
        self.max_pipes = max_pipes;
        self
    }

    pub fn with_max_stages(mut self, max_stages: usize) -> Self {
        self.max_stages = max_stages;
        self
    }

    pub fn with_max_readers(mut self, max_readers: usize) -> Self {
        self.max_readers = max_readers;
        self
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = Some(max_passes);
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime scheduler that executes a pipe-and-stage graph
pub struct Scheduler {
    config: SchedulerConfig,
    pipes: Vec<Rc<dyn PipeStats>>,
    stages: Vec<Rc<RefCell<dyn Stage>>>,
    passes: u64,
}

impl Scheduler {
    /// Create a scheduler with default limits
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            pipes: Vec::new(),
            stages: Vec::new(),
            passes: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Create a pipe and register it for quiescence detection
    pub fn pipe<T: Copy + Default + 'static>(
        &mut self,
        name: impl Into<String>,
        capacity: usize,
    ) -> Result<PipeBuf<T>, ConfigError> {
        let pipe = PipeBuf::with_max_readers(name, capacity, self.config.max_readers);
        self.register_pipe(&pipe)?;
        Ok(pipe)
    }

    /// Register a pipe created outside the scheduler
    pub fn register_pipe<T: Copy + Default + 'static>(
        &mut self,
        pipe: &PipeBuf<T>,
    ) -> Result<(), ConfigError> {
        if self.pipes.len() >= self.config.max_pipes {
            return Err(ConfigError::TooManyPipes(self.config.max_pipes));
        }
        debug!("Registering pipe '{}'", pipe.name());
        self.pipes.push(pipe.stats_handle());
        Ok(())
    }

    /// Take ownership of a stage.
    ///
    /// The returned handle gives access to the stage between ticks. It must
    /// not be borrowed while [`step`](Self::step) or [`run`](Self::run) is
    /// executing.
    pub fn add_stage<S: Stage + 'static>(&mut self, stage: S) -> Result<Rc<RefCell<S>>, ConfigError> {
        if self.stages.len() >= self.config.max_stages {
            return Err(ConfigError::TooManyStages(self.config.max_stages));
        }
        debug!("Adding stage '{}'", stage.name());
        let stage = Rc::new(RefCell::new(stage));
        self.stages.push(stage.clone());
        Ok(stage)
    }

    pub fn num_pipes(&self) -> usize {
        self.pipes.len()
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|s| s.borrow().name().to_string())
            .collect()
    }

    /// Total passes executed so far
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Run every stage once, in registration order
    pub fn step(&mut self) -> WorkResult {
        for stage in &self.stages {
            let mut stage = stage.borrow_mut();
            if let Err(e) = stage.run() {
                error!("[{}] Run error: {}", stage.name(), e);
                return Err(e);
            }
        }
        self.passes += 1;
        Ok(())
    }

    /// Run passes until no pipe changes. Returns the number of passes.
    pub fn run(&mut self) -> WorkResult<usize> {
        let mut passes = 0;
        loop {
            let before = self.hash();
            self.step()?;
            passes += 1;
            if self.hash() == before {
                return Ok(passes);
            }
            if let Some(limit) = self.config.max_passes
                && passes >= limit
            {
                warn!("Stopping after {} passes without reaching quiescence", passes);
                return Ok(passes);
            }
        }
    }

    /// Drive the graph according to the configured policy
    pub fn tick(&mut self) -> WorkResult<usize> {
        match self.config.policy {
            RunPolicy::ToFixpoint => self.run(),
            RunPolicy::SinglePass => self.step().map(|()| 1),
        }
    }

    /// Weighted sum of all pipe progress counters
    pub fn hash(&self) -> u64 {
        self.pipes
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, pipe)| {
                acc.wrapping_add((i as u64 + 1).wrapping_mul(pipe.hash()))
            })
    }

    /// Notify every stage that the pipeline is being torn down
    pub fn shutdown(&mut self) {
        for stage in &self.stages {
            let mut stage = stage.borrow_mut();
            debug!("[{}] Shutdown", stage.name());
            stage.shutdown();
        }
        info!("Scheduler shutdown after {} passes", self.passes);
    }

    /// Utilization snapshot of every registered pipe
    pub fn reports(&self) -> Vec<PipeReport> {
        self.pipes.iter().map(|p| p.report()).collect()
    }

    /// Memory held by all pipe buffers, in bytes
    pub fn total_buffer_bytes(&self) -> usize {
        self.pipes.iter().map(|p| p.report().buffer_bytes).sum()
    }

    /// Log the utilization of every pipe
    pub fn dump(&self) {
        for report in self.reports() {
            info!("{}", report);
        }
        info!("Total buffer memory: {} KiB", self.total_buffer_bytes() / 1024);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

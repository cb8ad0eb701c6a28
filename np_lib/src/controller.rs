//! Sequencing of the pipeline stages.
//!
//! Stages run strictly one after another. Within a stage, units fan out on
//! a thread pool and the stage ends only once every unit has finished.

use crate::aggregate::collect_raw_signal;
use crate::command::{build_command, preflight, Step};
use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::executor::{execute, StageRunner};
use crate::organize::{discard_staging, merge_unit, merged_units, stage_units, staged_units};
use crate::unit::SampleUnit;
use crate::workspace::{LayoutDir, Workspace};
use itertools::Itertools;
use log::{error, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;

/// Where a run is. States are entered strictly in declaration order, except
/// `Failed`, which can follow any state and ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Aggregate,
    Basecall,
    Organize,
    Map,
    QcReport,
    Classify,
    Cleanup,
    Done,
    Failed,
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Init => "init",
            PipelineState::Aggregate => "aggregate",
            PipelineState::Basecall => "basecall",
            PipelineState::Organize => "organize",
            PipelineState::Map => "map",
            PipelineState::QcReport => "qc_report",
            PipelineState::Classify => "classify",
            PipelineState::Cleanup => "cleanup",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Execution knobs that do not change what the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Units processed concurrently within a stage.
    pub jobs: usize,
    /// Skip stages whose completion marker is present.
    pub resume: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            jobs: 1,
            resume: false,
        }
    }
}

/// Stages that leave a completion marker.
const MARKED_STEPS: [Step; 6] = [
    Step::Basecall,
    Step::Organize,
    Step::Align,
    Step::Index,
    Step::QcReport,
    Step::Classify,
];

/// Runs every stage of one experiment against a [`StageRunner`].
pub struct Controller<'a, R: StageRunner> {
    config: &'a PipelineConfig,
    runner: &'a R,
    options: RunOptions,
    pool: ThreadPool,
    workspace: Workspace,
    history: Vec<PipelineState>,
}

impl<'a, R: StageRunner> Controller<'a, R> {
    pub fn new(
        config: &'a PipelineConfig,
        runner: &'a R,
        options: RunOptions,
    ) -> Result<Self, PipelineError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.jobs.max(1))
            .build()
            .map_err(|e| {
                PipelineError::environment(
                    "starting the worker pool",
                    io::Error::new(io::ErrorKind::Other, e),
                )
            })?;
        Ok(Controller {
            config,
            runner,
            options,
            pool,
            workspace: Workspace::at(&config.data_directory),
            history: vec![PipelineState::Init],
        })
    }

    pub fn state(&self) -> PipelineState {
        *self.history.last().unwrap_or(&PipelineState::Init)
    }

    /// The last state entered other than `Failed`, where a failed run stopped.
    pub fn stopped_in(&self) -> PipelineState {
        self.history
            .iter()
            .rev()
            .copied()
            .find(|s| *s != PipelineState::Failed)
            .unwrap_or(PipelineState::Init)
    }

    /// Every state visited so far, in order.
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Run the pipeline to `Done`, or stop at the first failure with `temp`
    /// left in place.
    pub fn run(&mut self) -> Result<Vec<SampleUnit>, PipelineError> {
        match self.run_stages() {
            Ok(units) => {
                self.enter(PipelineState::Done);
                Ok(units)
            }
            Err(e) => {
                error!("pipeline failed during {}: {e}", self.state());
                self.enter(PipelineState::Failed);
                Err(e)
            }
        }
    }

    fn enter(&mut self, state: PipelineState) {
        info!("entering {state}");
        self.history.push(state);
    }

    fn run_stages(&mut self) -> Result<Vec<SampleUnit>, PipelineError> {
        preflight(self.config, &self.workspace)?;
        let loose_unit = SampleUnit::new(self.config.experiment_name.as_str()).ok_or_else(|| {
            PipelineError::Configuration {
                stage: Step::Organize,
                reason: format!(
                    "experiment name {:?} cannot be used as a unit name",
                    self.config.experiment_name
                ),
            }
        })?;
        self.workspace = Workspace::ensure_layout(&self.config.data_directory)?;
        if !self.options.resume {
            self.clear_markers()?;
        }

        self.enter(PipelineState::Aggregate);
        collect_raw_signal(
            self.workspace.data_directory(),
            &self.config.tools.raw_signal_extensions,
            &self.workspace.dir(LayoutDir::RawSignal),
        )?;

        self.enter(PipelineState::Basecall);
        if !self.skip(Step::Basecall) {
            let cmd = build_command(Step::Basecall, self.config, &self.workspace, None)?;
            execute(self.runner, &cmd)?;
            self.mark(Step::Basecall)?;
        }

        self.enter(PipelineState::Organize);
        let units = if self.skip(Step::Organize) {
            merged_units(&self.workspace)?
        } else {
            if !self.options.resume {
                discard_staging(&self.workspace)?;
            }
            stage_units(&self.workspace, &loose_unit)?;
            let units = staged_units(&self.workspace)?;
            if units.is_empty() {
                return Err(PipelineError::MissingArtifact {
                    stage: Step::Organize,
                    unit: None,
                    path: self.workspace.basecall_pass_dir(),
                });
            }
            let workspace = &self.workspace;
            self.for_each_unit(&units, |unit| merge_unit(workspace, unit).map(|_| ()))?;
            self.mark(Step::Organize)?;
            units
        };
        info!("{} unit(s): {}", units.len(), units.iter().join(", "));

        self.enter(PipelineState::Map);
        self.run_unit_steps(&units, &[Step::Align, Step::Index])?;

        self.enter(PipelineState::QcReport);
        self.run_unit_steps(&units, &[Step::QcReport])?;

        self.enter(PipelineState::Classify);
        self.run_unit_steps(&units, &[Step::Classify])?;

        self.enter(PipelineState::Cleanup);
        let temp = self.workspace.dir(LayoutDir::Temp);
        fs::remove_dir_all(&temp).map_err(|e| {
            PipelineError::environment(format!("removing {}", temp.display()), e)
        })?;
        Ok(units)
    }

    /// Run `steps` in order for every unit. Each unit runs its steps in
    /// sequence; units run concurrently.
    fn run_unit_steps(&self, units: &[SampleUnit], steps: &[Step]) -> Result<(), PipelineError> {
        let pending: Vec<Step> = steps.iter().copied().filter(|s| !self.skip(*s)).collect();
        if pending.is_empty() {
            return Ok(());
        }
        self.for_each_unit(units, |unit| {
            for &step in &pending {
                let cmd = build_command(step, self.config, &self.workspace, Some(unit))?;
                execute(self.runner, &cmd)?;
            }
            Ok(())
        })?;
        for step in pending {
            self.mark(step)?;
        }
        Ok(())
    }

    fn for_each_unit<F>(&self, units: &[SampleUnit], f: F) -> Result<(), PipelineError>
    where
        F: Fn(&SampleUnit) -> Result<(), PipelineError> + Send + Sync,
    {
        self.pool.install(|| units.par_iter().try_for_each(|unit| f(unit)))
    }

    fn skip(&self, step: Step) -> bool {
        let skip = self.options.resume && self.workspace.completion_marker(step).exists();
        if skip {
            warn!("skipping {step}: already completed in a previous run");
        }
        skip
    }

    fn mark(&self, step: Step) -> Result<(), PipelineError> {
        let marker = self.workspace.completion_marker(step);
        fs::write(&marker, b"")
            .map_err(|e| PipelineError::environment(format!("writing {}", marker.display()), e))
    }

    fn clear_markers(&self) -> Result<(), PipelineError> {
        for step in MARKED_STEPS {
            let marker = self.workspace.completion_marker(step);
            match fs::remove_file(&marker) {
                Ok(()) => (),
                Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                Err(e) => {
                    return Err(PipelineError::environment(
                        format!("removing {}", marker.display()),
                        e,
                    ))
                }
            }
        }
        Ok(())
    }
}

use crate::command::Step;
use std::fmt;
use std::path::PathBuf;

/// A failure that halts the pipeline.
///
/// Nothing is rolled back: `temp` and any partial outputs stay on disk so the
/// run can be inspected.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{context}")]
    Environment {
        context: String,
        source: std::io::Error,
    },

    #[error(
        "Refusing to move {artifact:?} to {destination:?}: a file with that name is already there. \
         Resolve the conflict manually and re-run the pipeline."
    )]
    ArtifactConflict {
        artifact: PathBuf,
        destination: PathBuf,
    },

    #[error("Cannot build the {stage} command: {reason}")]
    Configuration { stage: Step, reason: String },

    #[error(
        "Stage {stage}{} failed with {}.\n\tcommand: {command}\n\tlog: {log:?}{}",
        UnitSuffix(unit.as_deref()),
        ExitDescription(*exit_code, *signal),
        OutputTail(output_tail)
    )]
    StageFailure {
        stage: Step,
        unit: Option<String>,
        exit_code: Option<i32>,
        signal: Option<i32>,
        command: String,
        log: PathBuf,
        /// The end of the captured output.
        output_tail: String,
    },

    #[error("Stage {stage}{} is missing the expected artifact {path:?}", UnitSuffix(unit.as_deref()))]
    MissingArtifact {
        stage: Step,
        unit: Option<String>,
        path: PathBuf,
    },
}

impl PipelineError {
    /// Wrap an I/O error with a description of what was being attempted.
    pub fn environment(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Environment {
            context: context.into(),
            source,
        }
    }

    /// The stage that failed, if the error is tied to one.
    pub fn stage(&self) -> Option<Step> {
        match self {
            PipelineError::Configuration { stage, .. }
            | PipelineError::StageFailure { stage, .. }
            | PipelineError::MissingArtifact { stage, .. } => Some(*stage),
            PipelineError::Environment { .. } | PipelineError::ArtifactConflict { .. } => None,
        }
    }
}

struct UnitSuffix<'a>(Option<&'a str>);

impl fmt::Display for UnitSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(unit) => write!(f, " (unit {unit})"),
            None => Ok(()),
        }
    }
}

struct OutputTail<'a>(&'a str);

impl fmt::Display for OutputTail<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail = self.0.trim_end();
        if tail.is_empty() {
            return Ok(());
        }
        write!(f, "\n\tlast output:")?;
        for line in tail.lines() {
            write!(f, "\n\t\t{line}")?;
        }
        Ok(())
    }
}

struct ExitDescription(Option<i32>, Option<i32>);

impl fmt::Display for ExitDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.0, self.1) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "an unknown status"),
        }
    }
}

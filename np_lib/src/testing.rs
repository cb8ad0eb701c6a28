//! A stand-in for the external tools, used by the controller tests.

use crate::command::{CommandLine, Step};
use crate::errors::PipelineError;
use crate::executor::{StageResult, StageRunner};
use crate::workspace::Workspace;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Records every command it is asked to run and fakes the outputs the real
/// tool would write. The basecall step writes one read fragment per raw
/// signal file, either loose in `pass` or under each configured barcode.
pub struct SimulatedRunner {
    workspace: Workspace,
    barcodes: Vec<String>,
    fail_on: Option<Step>,
    calls: Mutex<Vec<CommandLine>>,
}

impl SimulatedRunner {
    pub fn new(workspace: Workspace) -> Self {
        SimulatedRunner {
            workspace,
            barcodes: Vec::new(),
            fail_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_barcodes(mut self, barcodes: &[&str]) -> Self {
        self.barcodes = barcodes.iter().map(ToString::to_string).collect();
        self
    }

    pub fn failing_on(mut self, step: Step) -> Self {
        self.fail_on = Some(step);
        self
    }

    pub fn calls(&self) -> Vec<CommandLine> {
        self.calls.lock().unwrap().clone()
    }

    pub fn steps(&self) -> Vec<Step> {
        self.calls().iter().map(|c| c.step).collect()
    }

    fn write_fragment(path: &Path, read_name: &str) -> std::io::Result<()> {
        fs::create_dir_all(path.parent().unwrap())?;
        let mut enc = GzEncoder::new(File::create(path)?, Compression::fast());
        write!(enc, "@{read_name}\nACGT\n+\nIIII\n")?;
        enc.finish()?;
        Ok(())
    }

    fn basecall(&self) -> std::io::Result<()> {
        let raw: Vec<_> = fs::read_dir(self.workspace.dir(crate::workspace::LayoutDir::RawSignal))?
            .collect::<Result<_, _>>()?;
        let pass = self.workspace.basecall_pass_dir();
        for (i, _) in raw.iter().enumerate() {
            let name = format!("fastq_runid_{i}.fastq.gz");
            if self.barcodes.is_empty() {
                Self::write_fragment(&pass.join(&name), &format!("read{i}"))?;
            } else {
                for bc in &self.barcodes {
                    Self::write_fragment(&pass.join(bc).join(&name), &format!("{bc}_read{i}"))?;
                }
            }
        }
        Ok(())
    }
}

impl StageRunner for SimulatedRunner {
    fn run(&self, command: &CommandLine) -> Result<StageResult, PipelineError> {
        self.calls.lock().unwrap().push(command.clone());
        let log = self.workspace.log_dir().join(format!("{}.log", command.label()));
        fs::create_dir_all(self.workspace.log_dir())
            .and_then(|()| fs::write(&log, format!("{command}\n")))
            .map_err(|e| PipelineError::environment("simulating log capture", e))?;
        let result = |code| StageResult {
            exit_code: Some(code),
            signal: None,
            command: command.to_string(),
            log: log.clone(),
            output_tail: String::new(),
        };
        if self.fail_on == Some(command.step) {
            return Ok(result(1));
        }
        if command.step == Step::Basecall {
            self.basecall()
                .map_err(|e| PipelineError::environment("simulating basecall", e))?;
        }
        for output in &command.outputs {
            fs::create_dir_all(output.parent().unwrap())
                .and_then(|()| fs::write(output, command.to_string()))
                .map_err(|e| PipelineError::environment("simulating output", e))?;
        }
        Ok(result(0))
    }
}

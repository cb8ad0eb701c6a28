//! Construction of external tool invocations.
//!
//! Nothing in this module touches the filesystem; every path comes from the
//! [`Workspace`] and every tool setting from the [`PipelineConfig`].

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::unit::SampleUnit;
use crate::workspace::{LayoutDir, Workspace};
use itertools::Itertools;
use shell_escape::escape;
use std::ffi::OsString;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

/// One pipeline step. The mapping stage runs two steps per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    Aggregate,
    Basecall,
    Organize,
    Align,
    Index,
    QcReport,
    Classify,
}

impl Step {
    pub fn name(self) -> &'static str {
        match self {
            Step::Aggregate => "aggregate",
            Step::Basecall => "basecall",
            Step::Organize => "organize",
            Step::Align => "align",
            Step::Index => "index",
            Step::QcReport => "qc_report",
            Step::Classify => "classify",
        }
    }
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
}

impl Invocation {
    fn new(program: &str) -> Self {
        Invocation {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            std::iter::once(escape(self.program.as_str().into()).into_owned())
                .chain(
                    self.args
                        .iter()
                        .map(|a| escape(a.to_string_lossy()).into_owned())
                )
                .join(" ")
        )
    }
}

/// Everything needed to run one step for one unit: a pipe of invocations,
/// an optional file receiving the final stdout, and the files the step must
/// leave behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub step: Step,
    pub unit: Option<SampleUnit>,
    pub pipeline: Vec<Invocation>,
    pub stdout: Option<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

impl CommandLine {
    /// File-name-safe label, used for the captured log.
    pub fn label(&self) -> String {
        match &self.unit {
            Some(unit) => format!("{}.{unit}", self.step),
            None => self.step.to_string(),
        }
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pipeline.iter().join(" | "))?;
        if let Some(stdout) = &self.stdout {
            write!(f, " > {}", escape(stdout.to_string_lossy()))?;
        }
        Ok(())
    }
}

fn configuration(step: Step, reason: impl Into<String>) -> PipelineError {
    PipelineError::Configuration {
        stage: step,
        reason: reason.into(),
    }
}

fn require_unit(step: Step, unit: Option<&SampleUnit>) -> Result<&SampleUnit, PipelineError> {
    unit.ok_or_else(|| configuration(step, "a sample unit is required"))
}

/// Build the external command for `step`.
///
/// Per-unit steps need `unit`; the basecall step ignores it. Missing
/// configuration is reported as [`PipelineError::Configuration`].
pub fn build_command(
    step: Step,
    config: &PipelineConfig,
    workspace: &Workspace,
    unit: Option<&SampleUnit>,
) -> Result<CommandLine, PipelineError> {
    let tools = &config.tools;
    let (unit, pipeline, stdout, outputs) = match step {
        Step::Basecall => {
            let basecaller = basecall_invocation(config, workspace)?;
            (None, vec![basecaller], None, vec![workspace.sequencing_summary()])
        }
        Step::Align => {
            let unit = require_unit(step, unit)?;
            let reference = config
                .reference
                .as_deref()
                .ok_or_else(|| configuration(step, "no reference sequence was provided"))?;
            let bam = workspace.unit_alignment(unit);
            let pipeline = vec![
                Invocation::new(&tools.aligner)
                    .arg("-ax")
                    .arg(&tools.aligner_preset)
                    .arg(reference)
                    .arg(workspace.unit_reads(unit)),
                Invocation::new(&tools.samtools).args(["view", "-S", "-b", "-"]),
                Invocation::new(&tools.samtools)
                    .args(["sort", "-", "-o"])
                    .arg(&bam),
            ];
            (Some(unit), pipeline, None, vec![bam])
        }
        Step::Index => {
            let unit = require_unit(step, unit)?;
            let index = Invocation::new(&tools.samtools)
                .arg("index")
                .arg(workspace.unit_alignment(unit));
            (
                Some(unit),
                vec![index],
                None,
                vec![workspace.unit_alignment_index(unit)],
            )
        }
        Step::QcReport => {
            let unit = require_unit(step, unit)?;
            let report = workspace.unit_qc_report(unit);
            let qc = Invocation::new(&tools.qc_reporter)
                .arg("-f")
                .arg(workspace.sequencing_summary())
                .arg("-a")
                .arg(workspace.unit_alignment(unit))
                .arg("-o")
                .arg(&report);
            (Some(unit), vec![qc], None, vec![report])
        }
        Step::Classify => {
            let unit = require_unit(step, unit)?;
            if tools.classifier_host.is_empty() {
                return Err(configuration(step, "no classifier host is configured"));
            }
            let report = workspace.unit_classification_report(unit);
            let output = workspace.unit_classification_output(unit);
            let classify = Invocation::new(&tools.classifier)
                .arg("--host-ip")
                .arg(&tools.classifier_host)
                .arg("--sequence")
                .arg(workspace.unit_reads(unit))
                .arg("--report")
                .arg(&report);
            (
                Some(unit),
                vec![classify],
                Some(output.clone()),
                vec![report, output],
            )
        }
        Step::Aggregate | Step::Organize => {
            return Err(configuration(step, "this step does not run an external tool"));
        }
    };
    Ok(CommandLine {
        step,
        unit: unit.cloned(),
        pipeline,
        stdout,
        outputs,
    })
}

fn basecall_invocation(
    config: &PipelineConfig,
    workspace: &Workspace,
) -> Result<Invocation, PipelineError> {
    let step = Step::Basecall;
    let tools = &config.tools;
    if config.basecalling_model.is_empty() {
        return Err(configuration(step, "no basecalling model was provided"));
    }
    let mut basecaller = Invocation::new(&tools.basecaller)
        .arg("-i")
        .arg(workspace.dir(LayoutDir::RawSignal))
        .arg("-s")
        .arg(workspace.dir(LayoutDir::Basecall))
        .args([
            "--trim_adapters",
            "--do_read_splitting",
            "--compress_fastq",
            "--device",
        ])
        .arg(&tools.device)
        .arg("--min_qscore")
        .arg(tools.min_qscore.to_string())
        .arg("-c")
        .arg(&config.basecalling_model);

    if config.require_sample_sheet {
        let sample_sheet: &Path = config.sample_sheet.as_deref().ok_or_else(|| {
            configuration(step, "a sample sheet is required but none was provided")
        })?;
        basecaller = basecaller.arg("--sample_sheet").arg(sample_sheet);
    }

    if config.require_barcoding {
        let kit = config.barcoding_kit.as_deref().ok_or_else(|| {
            configuration(step, "barcoding is enabled but no barcoding kit was provided")
        })?;
        basecaller = basecaller
            .args(["--detect_barcodes", "--enable_trim_barcodes", "--barcode_kits"])
            .arg(kit);
    }
    Ok(basecaller)
}

/// Check that every step can be built, before anything is spawned.
pub fn preflight(config: &PipelineConfig, workspace: &Workspace) -> Result<(), PipelineError> {
    let probe = SampleUnit::probe();
    for step in [
        Step::Basecall,
        Step::Align,
        Step::Index,
        Step::QcReport,
        Step::Classify,
    ] {
        build_command(step, config, workspace, Some(&probe))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use np_parameters::ToolParameters;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::HashSet;

    const BASE: &str = "guppy_basecaller -i /data/pipeline_out/all_raw_signal \
                        -s /data/pipeline_out/basecall_out --trim_adapters --do_read_splitting \
                        --compress_fastq --device 'cuda:0' --min_qscore 7 -c dna_r9.4.1_450bps_hac.cfg";

    fn config(require_sample_sheet: bool, require_barcoding: bool) -> PipelineConfig {
        PipelineConfig {
            data_directory: PathBuf::from("/data"),
            experiment_name: "exp1".to_string(),
            barcoding_kit: Some("EXP-NBD104".to_string()),
            sample_sheet: Some(PathBuf::from("/sheets/samples.csv")),
            reference: Some(PathBuf::from("/ref/genome.fa")),
            basecalling_model: "dna_r9.4.1_450bps_hac.cfg".to_string(),
            require_sample_sheet,
            require_barcoding,
            tools: ToolParameters::default(),
        }
    }

    fn basecall_string(cfg: &PipelineConfig) -> String {
        build_command(Step::Basecall, cfg, &Workspace::at("/data"), None)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_basecall_toggle_combinations() {
        let mut seen = HashSet::new();
        for (sheet, barcode) in [(false, false), (true, false), (false, true), (true, true)] {
            let cmd = basecall_string(&config(sheet, barcode));
            assert!(cmd.starts_with(BASE), "{cmd}");
            assert_eq!(cmd.contains("--sample_sheet /sheets/samples.csv"), sheet);
            assert_eq!(
                cmd.contains("--detect_barcodes --enable_trim_barcodes --barcode_kits EXP-NBD104"),
                barcode
            );
            seen.insert(cmd);
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_basecall_all_flags() {
        assert_eq!(
            basecall_string(&config(true, true)),
            format!(
                "{BASE} --sample_sheet /sheets/samples.csv \
                 --detect_barcodes --enable_trim_barcodes --barcode_kits EXP-NBD104"
            )
        );
    }

    #[test]
    fn test_basecall_missing_fields() {
        let ws = Workspace::at("/data");
        let mut cfg = config(true, true);
        cfg.barcoding_kit = None;
        let err = build_command(Step::Basecall, &cfg, &ws, None).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration {
                stage: Step::Basecall,
                ..
            }
        ));

        // not needed when barcoding is off
        cfg.require_barcoding = false;
        assert!(build_command(Step::Basecall, &cfg, &ws, None).is_ok());

        cfg.sample_sheet = None;
        assert!(build_command(Step::Basecall, &cfg, &ws, None).is_err());
    }

    #[test]
    fn test_mapping_commands() {
        let ws = Workspace::at("/data");
        let unit = SampleUnit::new("barcode02").unwrap();
        let cfg = config(false, true);

        let align = build_command(Step::Align, &cfg, &ws, Some(&unit)).unwrap();
        assert_eq!(
            align.to_string(),
            "minimap2 -ax map-ont /ref/genome.fa /data/pipeline_out/fastq/barcode02.fastq.gz \
             | samtools view -S -b - \
             | samtools sort - -o /data/pipeline_out/mapping/barcode02.bam"
        );
        assert_eq!(align.label(), "align.barcode02");

        let index = build_command(Step::Index, &cfg, &ws, Some(&unit)).unwrap();
        assert_eq!(
            index.to_string(),
            "samtools index /data/pipeline_out/mapping/barcode02.bam"
        );
        assert_eq!(
            index.outputs,
            vec![PathBuf::from("/data/pipeline_out/mapping/barcode02.bam.bai")]
        );
    }

    #[test]
    fn test_mapping_requires_reference() {
        let mut cfg = config(false, false);
        cfg.reference = None;
        let unit = SampleUnit::new("barcode02").unwrap();
        let err = build_command(Step::Align, &cfg, &Workspace::at("/data"), Some(&unit))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration {
                stage: Step::Align,
                ..
            }
        ));
        assert!(preflight(&cfg, &Workspace::at("/data")).is_err());
        assert!(preflight(&config(false, false), &Workspace::at("/data")).is_ok());
    }

    #[test]
    fn test_per_unit_step_without_unit() {
        let err =
            build_command(Step::QcReport, &config(false, false), &Workspace::at("/data"), None)
                .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }

    #[test]
    fn test_qc_and_classify_commands() {
        let ws = Workspace::at("/data");
        let unit = SampleUnit::new("barcode11").unwrap();
        let cfg = config(false, false);
        assert_eq!(
            build_command(Step::QcReport, &cfg, &ws, Some(&unit))
                .unwrap()
                .to_string(),
            "pycoQC -f /data/pipeline_out/basecall_out/sequencing_summary.txt \
             -a /data/pipeline_out/mapping/barcode11.bam \
             -o /data/pipeline_out/qc_report/barcode11.pycoqc.html"
        );
        let classify = build_command(Step::Classify, &cfg, &ws, Some(&unit)).unwrap();
        assert_eq!(
            classify.to_string(),
            "kraken2_client --host-ip 10.18.0.25 \
             --sequence /data/pipeline_out/fastq/barcode11.fastq.gz \
             --report /data/pipeline_out/classification_qc/barcode11.kreport \
             > /data/pipeline_out/classification_qc/barcode11.kraken"
        );
        assert_eq!(classify.outputs.len(), 2);
    }

    #[test]
    fn test_paths_are_escaped() {
        let ws = Workspace::at("/my data");
        let cmd = build_command(Step::Basecall, &config(false, false), &ws, None).unwrap();
        assert!(cmd
            .to_string()
            .contains("-i '/my data/pipeline_out/all_raw_signal'"));
    }

    proptest! {
        #[test]
        fn test_unit_id_in_every_output(id in "[A-Za-z0-9_-]{1,24}") {
            let ws = Workspace::at("/data");
            let unit = SampleUnit::new(id.clone()).unwrap();
            let cfg = config(false, false);
            for step in [Step::Align, Step::Index, Step::QcReport, Step::Classify] {
                let cmd = build_command(step, &cfg, &ws, Some(&unit)).unwrap();
                for output in &cmd.outputs {
                    let name = output.file_name().unwrap().to_string_lossy().into_owned();
                    prop_assert!(name.starts_with(&format!("{id}.")), "{}", name);
                }
            }
        }
    }
}

//! nanopipe
//!
//! Drives a nanopore sequencing run from raw signal to per-barcode
//! alignments, QC reports and classification reports.
#![deny(missing_docs)]

use anyhow::{Context, Result};
use chrono::Local;
use clap::{self, Parser};
use env_logger::Builder;
use log::{info, LevelFilter};
use np_lib::{Controller, PipelineConfig, ProcessRunner, RunOptions, Workspace};
use np_parameters::ToolParameters;
use np_wrap::utils::{print_error_chain, validate_id, CliPath, OptionalArg};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[clap(
    name = "nanopipe",
    version,
    about = "Run basecalling, demultiplexing, mapping, QC and classification for a nanopore experiment."
)]
struct NanoPipe {
    /// Experiment directory written by the sequencer. All outputs go to
    /// its pipeline_out subdirectory.
    #[clap(value_name = "DATA_DIRECTORY")]
    data_directory: CliPath,

    /// Experiment name. Names the single output unit when barcoding is
    /// disabled.
    #[clap(value_name = "EXP_NAME", value_parser = validate_id)]
    exp_name: String,

    /// Barcoding kit handed to the basecaller, or "" for none.
    #[clap(value_name = "BARCODING_KIT")]
    barcoding_kit: OptionalArg<String>,

    /// Sample sheet handed to the basecaller, or "" for none.
    #[clap(value_name = "SAMPLE_SHEET")]
    sample_sheet: OptionalArg<CliPath>,

    /// Reference FASTA reads are aligned against, or "" for none.
    #[clap(value_name = "REF_SEQ")]
    ref_seq: OptionalArg<CliPath>,

    /// Basecalling model configuration, e.g. dna_r9.4.1_450bps_hac.cfg.
    #[clap(value_name = "BASECALLING_MODEL")]
    basecalling_model: String,

    /// Do not pass the sample sheet to the basecaller.
    #[clap(long = "disable_sample_sheet")]
    disable_sample_sheet: bool,

    /// Do not detect or trim barcodes. All reads form one unit.
    #[clap(long = "disable_barcode")]
    disable_barcode: bool,

    /// Tool parameter file. Defaults to parameters.toml beside the
    /// executable.
    #[clap(long, value_name = "PATH")]
    parameters: Option<CliPath>,

    /// Number of units processed concurrently within a stage.
    #[clap(
        long,
        value_name = "NUM",
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    jobs: u16,

    /// Skip stages completed by a previous run of the same experiment.
    #[clap(long)]
    resume: bool,
}

impl NanoPipe {
    fn into_config(self, tools: ToolParameters) -> (PipelineConfig, RunOptions) {
        let config = PipelineConfig {
            data_directory: self.data_directory.into(),
            experiment_name: self.exp_name,
            barcoding_kit: self.barcoding_kit.into_inner(),
            sample_sheet: self.sample_sheet.into_inner().map(PathBuf::from),
            reference: self.ref_seq.into_inner().map(PathBuf::from),
            basecalling_model: self.basecalling_model,
            require_sample_sheet: !self.disable_sample_sheet,
            require_barcoding: !self.disable_barcode,
            tools,
        };
        let options = RunOptions {
            jobs: usize::from(self.jobs),
            resume: self.resume,
        };
        (config, options)
    }
}

fn setup_logging() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();
}

fn inner_main() -> Result<ExitCode> {
    let args = NanoPipe::parse();
    setup_logging();
    info!("nanopipe {}", env!("CARGO_PKG_VERSION"));

    let tools = ToolParameters::load(args.parameters.as_deref())
        .context("Failed to load tool parameters")?;
    let (config, options) = args.into_config(tools);
    info!(
        "experiment {} in {}",
        config.experiment_name,
        config.data_directory.display()
    );

    let runner = ProcessRunner::new(Workspace::at(&config.data_directory).log_dir());
    let mut controller = Controller::new(&config, &runner, options)?;
    let result = controller.run();
    let units = result.with_context(|| {
        format!("nanopipe stopped during the {} stage", controller.stopped_in())
    })?;

    info!(
        "finished {} unit(s), results are in {}",
        units.len(),
        controller.workspace().root().display()
    );
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}

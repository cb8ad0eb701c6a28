use np_parameters::ToolParameters;
use std::path::PathBuf;

/// Run configuration, built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Instrument experiment root; the workspace is created beneath it.
    pub data_directory: PathBuf,
    /// Names the single unit produced when barcoding is disabled.
    pub experiment_name: String,
    pub barcoding_kit: Option<String>,
    pub sample_sheet: Option<PathBuf>,
    /// Reference sequence FASTA used by the mapping stage.
    pub reference: Option<PathBuf>,
    pub basecalling_model: String,
    /// Pass the sample sheet to the basecaller.
    pub require_sample_sheet: bool,
    /// Ask the basecaller to detect and trim barcodes.
    pub require_barcoding: bool,
    pub tools: ToolParameters,
}

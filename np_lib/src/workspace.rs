//! The fixed `pipeline_out/` directory tree.
//!
//! Every path a stage reads or writes is resolved here, so that no stage
//! hardcodes another stage's location.

use crate::command::Step;
use crate::errors::PipelineError;
use crate::unit::SampleUnit;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the workspace root inside the data directory.
pub const PIPELINE_OUT: &str = "pipeline_out";

/// The named subdirectories of the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayoutDir {
    RawSignal,
    Basecall,
    Mapping,
    QcReport,
    Classification,
    Fastq,
    Temp,
}

impl LayoutDir {
    pub const ALL: [LayoutDir; 7] = [
        LayoutDir::RawSignal,
        LayoutDir::Basecall,
        LayoutDir::Mapping,
        LayoutDir::QcReport,
        LayoutDir::Classification,
        LayoutDir::Fastq,
        LayoutDir::Temp,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            LayoutDir::RawSignal => "all_raw_signal",
            LayoutDir::Basecall => "basecall_out",
            LayoutDir::Mapping => "mapping",
            LayoutDir::QcReport => "qc_report",
            LayoutDir::Classification => "classification_qc",
            LayoutDir::Fastq => "fastq",
            LayoutDir::Temp => "temp",
        }
    }
}

/// Basecaller output folder holding reads that passed the quality filter.
const PASS_DIR: &str = "pass";
/// Per-read summary written by the basecaller, consumed by the QC report.
const SEQUENCING_SUMMARY: &str = "sequencing_summary.txt";
/// Captured tool output, kept inside `temp` so it survives a failed run.
const LOG_DIR: &str = ".logs";

/// Resolved locations of the pipeline's directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    data_directory: PathBuf,
    root: PathBuf,
}

impl Workspace {
    /// Describe the workspace under `data_directory` without touching the disk.
    pub fn at(data_directory: impl Into<PathBuf>) -> Self {
        let data_directory = data_directory.into();
        let root = data_directory.join(PIPELINE_OUT);
        Workspace {
            data_directory,
            root,
        }
    }

    /// Create every workspace directory. Directories that already exist are left alone.
    pub fn ensure_layout(data_directory: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let workspace = Self::at(data_directory);
        for dir in LayoutDir::ALL {
            let path = workspace.dir(dir);
            fs::create_dir_all(&path).map_err(|e| {
                PipelineError::environment(
                    format!("creating workspace directory {}", path.display()),
                    e,
                )
            })?;
        }
        Ok(workspace)
    }

    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, dir: LayoutDir) -> PathBuf {
        self.root.join(dir.dir_name())
    }

    pub fn basecall_pass_dir(&self) -> PathBuf {
        self.dir(LayoutDir::Basecall).join(PASS_DIR)
    }

    pub fn sequencing_summary(&self) -> PathBuf {
        self.dir(LayoutDir::Basecall).join(SEQUENCING_SUMMARY)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir(LayoutDir::Temp).join(LOG_DIR)
    }

    /// Directory a unit's read fragments are staged in before merging.
    pub fn unit_staging(&self, unit: &SampleUnit) -> PathBuf {
        self.dir(LayoutDir::Temp).join(unit.id())
    }

    pub fn unit_reads(&self, unit: &SampleUnit) -> PathBuf {
        self.unit_file(LayoutDir::Fastq, unit, "fastq.gz")
    }

    pub fn unit_alignment(&self, unit: &SampleUnit) -> PathBuf {
        self.unit_file(LayoutDir::Mapping, unit, "bam")
    }

    pub fn unit_alignment_index(&self, unit: &SampleUnit) -> PathBuf {
        self.unit_file(LayoutDir::Mapping, unit, "bam.bai")
    }

    pub fn unit_qc_report(&self, unit: &SampleUnit) -> PathBuf {
        self.unit_file(LayoutDir::QcReport, unit, "pycoqc.html")
    }

    pub fn unit_classification_report(&self, unit: &SampleUnit) -> PathBuf {
        self.unit_file(LayoutDir::Classification, unit, "kreport")
    }

    pub fn unit_classification_output(&self, unit: &SampleUnit) -> PathBuf {
        self.unit_file(LayoutDir::Classification, unit, "kraken")
    }

    /// Marker recording that `step` finished, used by `--resume`.
    pub fn completion_marker(&self, step: Step) -> PathBuf {
        self.root.join(format!(".{}.complete", step.name()))
    }

    fn unit_file(&self, dir: LayoutDir, unit: &SampleUnit, ext: &str) -> PathBuf {
        self.dir(dir).join(format!("{}.{ext}", unit.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use itertools::Itertools;

    fn listing(root: &Path) -> Result<Vec<String>> {
        Ok(fs::read_dir(root)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .sorted()
            .collect())
    }

    #[test]
    fn test_ensure_layout_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let first = Workspace::ensure_layout(dir.path())?;
        let before = listing(first.root())?;
        fs::write(first.dir(LayoutDir::Fastq).join("keep.fastq.gz"), b"x")?;

        let second = Workspace::ensure_layout(dir.path())?;
        assert_eq!(first, second);
        assert_eq!(before, listing(second.root())?);
        assert_eq!(
            before,
            vec![
                "all_raw_signal",
                "basecall_out",
                "classification_qc",
                "fastq",
                "mapping",
                "qc_report",
                "temp"
            ]
        );
        assert!(second.dir(LayoutDir::Fastq).join("keep.fastq.gz").exists());
        Ok(())
    }

    #[test]
    fn test_ensure_layout_blocked_by_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(PIPELINE_OUT), b"not a directory")?;
        let err = Workspace::ensure_layout(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Environment { .. }));
        Ok(())
    }

    #[test]
    fn test_unit_paths() {
        let ws = Workspace::at("/data/run1");
        let unit = SampleUnit::new("barcode07").unwrap();
        assert_eq!(
            ws.unit_reads(&unit),
            Path::new("/data/run1/pipeline_out/fastq/barcode07.fastq.gz")
        );
        assert_eq!(
            ws.unit_alignment_index(&unit),
            Path::new("/data/run1/pipeline_out/mapping/barcode07.bam.bai")
        );
        assert_eq!(
            ws.unit_staging(&unit),
            Path::new("/data/run1/pipeline_out/temp/barcode07")
        );
        assert_eq!(
            ws.completion_marker(Step::Basecall),
            Path::new("/data/run1/pipeline_out/.basecall.complete")
        );
    }
}

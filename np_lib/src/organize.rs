//! Turn the basecaller's per-barcode output into one read file per unit.

use crate::command::Step;
use crate::errors::PipelineError;
use crate::unit::SampleUnit;
use crate::workspace::{LayoutDir, Workspace};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use itertools::Itertools;
use log::{info, warn};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Suffix of the compressed read fragments written by the basecaller.
pub const FRAGMENT_SUFFIX: &str = ".fastq.gz";

fn env_err(context: String) -> impl FnOnce(io::Error) -> PipelineError {
    move |e| PipelineError::environment(context, e)
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = fs::read_dir(dir).map_err(env_err(format!("listing {}", dir.display())))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(env_err(format!("listing {}", dir.display())))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn is_fragment(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(FRAGMENT_SUFFIX))
}

fn unit_from_name(path: &Path) -> Option<SampleUnit> {
    SampleUnit::new(path.file_name()?.to_str()?)
}

fn move_into(source: &Path, target: &Path) -> Result<(), PipelineError> {
    if target.exists() {
        return Err(PipelineError::ArtifactConflict {
            artifact: source.to_path_buf(),
            destination: target.to_path_buf(),
        });
    }
    fs::rename(source, target).map_err(env_err(format!(
        "moving {} to {}",
        source.display(),
        target.display()
    )))
}

/// Move every barcode directory of the basecaller's pass folder into `temp`.
///
/// Fragments lying directly in the pass folder (no barcoding) are gathered
/// into a unit named `loose_unit`. Returns the units staged by this call.
pub fn stage_units(
    workspace: &Workspace,
    loose_unit: &SampleUnit,
) -> Result<Vec<SampleUnit>, PipelineError> {
    let pass = workspace.basecall_pass_dir();
    if !pass.is_dir() {
        warn!("{} does not exist, nothing to stage", pass.display());
        return Ok(Vec::new());
    }

    let mut staged = Vec::new();
    let mut loose = Vec::new();
    for path in read_dir_sorted(&pass)? {
        if path.is_dir() {
            let Some(unit) = unit_from_name(&path) else {
                warn!("skipping {}: not usable as a unit name", path.display());
                continue;
            };
            move_into(&path, &workspace.unit_staging(&unit))?;
            staged.push(unit);
        } else if is_fragment(&path) {
            loose.push(path);
        }
    }

    if !loose.is_empty() {
        let target_dir = workspace.unit_staging(loose_unit);
        fs::create_dir_all(&target_dir)
            .map_err(env_err(format!("creating {}", target_dir.display())))?;
        for path in &loose {
            // is_fragment guarantees a file name
            let Some(name) = path.file_name() else {
                continue;
            };
            move_into(path, &target_dir.join(name))?;
        }
        if !staged.contains(loose_unit) {
            staged.push(loose_unit.clone());
        }
    }
    info!("staged {} unit(s) from {}", staged.len(), pass.display());
    Ok(staged)
}

/// Units currently staged in `temp`, sorted by identifier.
pub fn staged_units(workspace: &Workspace) -> Result<Vec<SampleUnit>, PipelineError> {
    Ok(read_dir_sorted(&workspace.dir(LayoutDir::Temp))?
        .into_iter()
        .filter(|p| p.is_dir())
        .filter_map(|p| unit_from_name(&p))
        .collect())
}

/// Remove unit staging directories left in `temp` by an earlier run that
/// did not finish. Captured logs are kept.
pub fn discard_staging(workspace: &Workspace) -> Result<(), PipelineError> {
    for unit in staged_units(workspace)? {
        let dir = workspace.unit_staging(&unit);
        warn!("discarding stale staging directory {}", dir.display());
        fs::remove_dir_all(&dir).map_err(env_err(format!("removing {}", dir.display())))?;
    }
    Ok(())
}

/// Units that already have a merged read file in `fastq`.
pub fn merged_units(workspace: &Workspace) -> Result<Vec<SampleUnit>, PipelineError> {
    Ok(read_dir_sorted(&workspace.dir(LayoutDir::Fastq))?
        .into_iter()
        .filter(|p| is_fragment(p))
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?;
            SampleUnit::new(name.strip_suffix(FRAGMENT_SUFFIX)?)
        })
        .collect())
}

/// Concatenate the decompressed contents of every fragment in `unit`'s
/// staging directory into `fastq/<unit>.fastq.gz`.
///
/// A unit without fragments is an error, never an empty output file.
pub fn merge_unit(workspace: &Workspace, unit: &SampleUnit) -> Result<PathBuf, PipelineError> {
    let staging = workspace.unit_staging(unit);
    let fragments = read_dir_sorted(&staging)?
        .into_iter()
        .filter(|p| is_fragment(p))
        .collect_vec();
    if fragments.is_empty() {
        return Err(PipelineError::MissingArtifact {
            stage: Step::Organize,
            unit: Some(unit.id().to_string()),
            path: staging.join(format!("*{FRAGMENT_SUFFIX}")),
        });
    }

    let output = workspace.unit_reads(unit);
    let partial = output.with_extension("gz.partial");
    let context = format!("merging {} fragment(s) into {}", fragments.len(), output.display());
    write_merged(&fragments, &partial).map_err(env_err(context.clone()))?;
    fs::rename(&partial, &output).map_err(env_err(context))?;
    info!("merged {} fragment(s) for unit {unit}", fragments.len());
    Ok(output)
}

fn write_merged(fragments: &[PathBuf], output: &Path) -> io::Result<()> {
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(output)?), Compression::default());
    for fragment in fragments {
        let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(fragment)?));
        io::copy(&mut decoder, &mut encoder)?;
    }
    encoder.finish()?.flush()
}

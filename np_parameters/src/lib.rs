//! np_parameters
//!
//! Settings for the external tools driven by the pipeline, loaded from
//! `parameters.toml`.
// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]
// Other warnings (as of rust 1.55)
#![deny(
    confusable_idents,
    const_item_mutation,
    deprecated,
    drop_bounds,
    dyn_drop,
    elided_lifetimes_in_paths,
    function_item_references,
    irrefutable_let_patterns,
    mixed_script_confusables,
    non_shorthand_field_patterns,
    overlapping_range_endpoints,
    renamed_and_removed_lints,
    stable_features,
    trivial_bounds,
    type_alias_bounds,
    unconditional_recursion,
    unknown_lints,
    unused_comparisons,
    while_true
)]

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the parameter file searched for beside the running executable.
pub const PARAMETERS_FILE_NAME: &str = "parameters.toml";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolParameters {
    /// Basecaller executable.
    pub basecaller: String,
    /// Compute device handed to the basecaller.
    pub device: String,
    /// Reads below this mean quality are written to the fail folder.
    pub min_qscore: u32,
    /// Long-read aligner executable.
    pub aligner: String,
    /// Aligner preset passed with `-ax`.
    pub aligner_preset: String,
    /// samtools executable, used to convert, sort and index alignments.
    pub samtools: String,
    /// QC report generator executable.
    pub qc_reporter: String,
    /// Taxonomic classifier client executable.
    pub classifier: String,
    /// Address of the classification server.
    pub classifier_host: String,
    /// File extensions (without the dot) of instrument raw signal files.
    pub raw_signal_extensions: Vec<String>,
}

impl Default for ToolParameters {
    fn default() -> Self {
        ToolParameters {
            basecaller: "guppy_basecaller".to_string(),
            device: "cuda:0".to_string(),
            min_qscore: 7,
            aligner: "minimap2".to_string(),
            aligner_preset: "map-ont".to_string(),
            samtools: "samtools".to_string(),
            qc_reporter: "pycoQC".to_string(),
            classifier: "kraken2_client".to_string(),
            classifier_host: "10.18.0.25".to_string(),
            raw_signal_extensions: vec!["fast5".to_string(), "pod5".to_string()],
        }
    }
}

macro_rules! warn_non_default {
    ($loaded:expr, $default:expr, $($field:ident),+) => {
        $(
            if $loaded.$field != $default.$field {
                warn!("using non-default {} = {:?}", stringify!($field), $loaded.$field);
            }
        )+
    };
}

impl ToolParameters {
    /// Parse parameters from a TOML string. Missing keys take their default.
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read parameters from `path`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        let params = Self::from_toml(&s).with_context(|| path.display().to_string())?;
        params.log_overrides();
        Ok(params)
    }

    /// Load parameters from an explicit path if given, otherwise from
    /// `parameters.toml` beside the running executable, otherwise fall back
    /// to the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        let path = default_parameters_path()?;
        if path.exists() {
            Self::from_path(&path)
        } else {
            warn!(
                "could not find {PARAMETERS_FILE_NAME} at {}, falling back to defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    fn log_overrides(&self) {
        let default = Self::default();
        warn_non_default!(
            self,
            default,
            basecaller,
            device,
            min_qscore,
            aligner,
            aligner_preset,
            samtools,
            qc_reporter,
            classifier,
            classifier_host,
            raw_signal_extensions
        );
    }
}

fn default_parameters_path() -> Result<PathBuf> {
    Ok(std::env::current_exe()
        .context("Unable to locate the running executable")?
        .with_file_name(PARAMETERS_FILE_NAME))
}

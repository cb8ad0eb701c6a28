//! np_lib
//!
//! Orchestration of a nanopore sequencing run: raw signal aggregation,
//! basecalling, per-barcode read merging, alignment, QC and taxonomic
//! classification, each stage driving an external tool.
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

pub mod aggregate;
pub mod command;
pub mod config;
pub mod controller;
pub mod errors;
pub mod executor;
pub mod organize;
pub mod unit;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use command::Step;
pub use config::PipelineConfig;
pub use controller::{Controller, PipelineState, RunOptions};
pub use errors::PipelineError;
pub use executor::{ProcessRunner, StageRunner};
pub use unit::SampleUnit;
pub use workspace::Workspace;

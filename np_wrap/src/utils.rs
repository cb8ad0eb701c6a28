use anyhow::{bail, ensure, Result};
use itertools::Itertools;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Convert an io::error to a string and strip "(os error 4)" from the end.
fn io_error_to_string(err: &std::io::Error) -> String {
    let s = err.to_string();
    s.strip_suffix(&format!(" (os error {})", err.raw_os_error().unwrap_or(0)))
        .unwrap_or(&s)
        .to_string()
}

/// Format an error chain the way it is printed to the operator.
pub fn format_error_chain(err: &anyhow::Error) -> String {
    if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
        let io_err_str = io_error_to_string(io_err);
        if err.chain().len() == 1 {
            return format!("ERROR: {io_err_str}");
        }
    }
    format!("ERROR: {}", err.chain().join("\n\tCaused by: "))
}

/// Print an error chain to stderr.
pub fn print_error_chain(err: &anyhow::Error) {
    eprintln!("{}", format_error_chain(err));
}

/// Use this type for input paths that should
/// be canonicalized to a fully qualified path
/// before the pipeline starts.
#[derive(Clone, PartialEq, Eq)]
pub struct CliPath {
    path: PathBuf,
}

impl From<PathBuf> for CliPath {
    fn from(path: PathBuf) -> Self {
        CliPath { path }
    }
}

impl From<CliPath> for PathBuf {
    fn from(path: CliPath) -> Self {
        path.path
    }
}

impl FromStr for CliPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<CliPath> {
        match Path::new(s).canonicalize() {
            Ok(p) => Ok(CliPath::from(p)),
            Err(e) => bail!("{s}: {}", io_error_to_string(&e)),
        }
    }
}

impl Display for CliPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        Display::fmt(&self.path.display(), f)
    }
}

impl Debug for CliPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        Debug::fmt(&self.path, f)
    }
}

impl Deref for CliPath {
    type Target = Path;
    fn deref(&self) -> &Path {
        &self.path
    }
}

/// A positional argument that may be passed as an empty string to mean
/// "not provided".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionalArg<T>(pub Option<T>);

impl<T: FromStr> FromStr for OptionalArg<T> {
    type Err = T::Err;

    fn from_str(s: &str) -> Result<Self, T::Err> {
        if s.trim().is_empty() {
            Ok(OptionalArg(None))
        } else {
            s.parse().map(|v| OptionalArg(Some(v)))
        }
    }
}

impl<T> OptionalArg<T> {
    pub fn into_inner(self) -> Option<T> {
        self.0
    }
}

pub fn validate_ascii_identifier(id: &str) -> Result<String> {
    ensure!(!id.is_empty(), "must not be empty.");
    ensure!(
        id.chars()
            .all(|c| matches!(c, '0'..='9' | 'A'..='Z' | 'a'..='z' | '_' | '-')),
        "must contain only letters, digits, underscores, and dashes."
    );
    Ok(String::from(id))
}

/// Max allowed length of the experiment name.
const MAX_ID_LEN: usize = 64;

/// Parse and validate the experiment name, for use with Clap's value_parser.
/// It can end up naming a unit, so it must be a safe file name.
pub fn validate_id(id: &str) -> Result<String> {
    ensure!(
        id.len() <= MAX_ID_LEN,
        "The experiment name must be {MAX_ID_LEN} characters or less, please use a shorter string."
    );
    validate_ascii_identifier(id)
}

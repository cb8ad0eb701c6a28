//! Gather raw signal files scattered through the instrument's output tree.
//!
//! Files are moved, not copied, into the destination and the destination
//! itself is never searched, so re-running only picks up files the
//! instrument wrote since the last run. A file caught mid-write at the
//! moment of the move is not protected against.

use crate::errors::PipelineError;
use glob::{glob_with, MatchOptions, Pattern};
use itertools::Itertools;
use log::info;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Find every file below `root` whose extension is in `extensions` and move
/// it into `destination`. Returns the new locations.
///
/// All moves are planned before any is made; a name collision with a file
/// already in `destination`, or between two source files, fails with
/// [`PipelineError::ArtifactConflict`] and nothing is moved.
pub fn collect_raw_signal(
    root: &Path,
    extensions: &[String],
    destination: &Path,
) -> Result<Vec<PathBuf>, PipelineError> {
    let sources = find_raw_signal(root, extensions, destination)?;

    let mut planned = HashSet::new();
    let mut moves = Vec::with_capacity(sources.len());
    for source in sources {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = destination.join(name);
        if target.exists() || !planned.insert(target.clone()) {
            return Err(PipelineError::ArtifactConflict {
                artifact: source,
                destination: target,
            });
        }
        moves.push((source, target));
    }

    let mut moved = Vec::with_capacity(moves.len());
    for (source, target) in moves {
        relocate(&source, &target)?;
        moved.push(target);
    }
    info!(
        "collected {} raw signal file(s) into {}",
        moved.len(),
        destination.display()
    );
    Ok(moved)
}

fn find_raw_signal(
    root: &Path,
    extensions: &[String],
    destination: &Path,
) -> Result<Vec<PathBuf>, PipelineError> {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let escaped_root = Pattern::escape(&root.to_string_lossy());
    let mut found = Vec::new();
    for ext in extensions {
        let pattern = format!("{escaped_root}/**/*.{}", Pattern::escape(ext));
        let paths = glob_with(&pattern, options).map_err(|e| {
            PipelineError::environment(
                format!("searching {} for .{ext} files", root.display()),
                io::Error::new(io::ErrorKind::InvalidInput, e),
            )
        })?;
        for entry in paths {
            let path = entry.map_err(|e| {
                let context = format!("searching {}", e.path().display());
                PipelineError::environment(context, e.into())
            })?;
            if path.starts_with(destination) || !path.is_file() {
                continue;
            }
            found.push(path);
        }
    }
    Ok(found.into_iter().sorted().dedup().collect())
}

/// Rename, falling back to copy-and-delete across filesystems.
fn relocate(source: &Path, target: &Path) -> Result<(), PipelineError> {
    let context = || format!("moving {} to {}", source.display(), target.display());
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            fs::copy(source, target)
                .and_then(|_| fs::remove_file(source))
                .map_err(|e| PipelineError::environment(context(), e))
        }
        Err(e) => Err(PipelineError::environment(context(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn exts() -> Vec<String> {
        vec!["fast5".to_string(), "pod5".to_string()]
    }

    fn touch(path: &Path) -> Result<()> {
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(path, path.to_string_lossy().as_bytes())?;
        Ok(())
    }

    #[test]
    fn test_collect_moves_nested_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        let dest = root.join("pipeline_out/all_raw_signal");
        fs::create_dir_all(&dest)?;
        touch(&root.join("run1/fast5_pass/a.fast5"))?;
        touch(&root.join("run1/pod5/deep/b.pod5"))?;
        touch(&root.join("run1/report.txt"))?;

        let moved = collect_raw_signal(root, &exts(), &dest)?;
        assert_eq!(moved, vec![dest.join("a.fast5"), dest.join("b.pod5")]);
        assert!(!root.join("run1/fast5_pass/a.fast5").exists());
        assert!(root.join("run1/report.txt").exists());
        assert_eq!(
            fs::read_to_string(dest.join("a.fast5"))?,
            root.join("run1/fast5_pass/a.fast5").to_string_lossy()
        );
        Ok(())
    }

    #[test]
    fn test_files_in_destination_are_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        let dest = root.join("pipeline_out/all_raw_signal");
        touch(&dest.join("old1.pod5"))?;
        touch(&dest.join("old2.fast5"))?;

        assert!(collect_raw_signal(root, &exts(), &dest)?.is_empty());
        // a second pass is a no-op as well
        assert!(collect_raw_signal(root, &exts(), &dest)?.is_empty());
        assert!(dest.join("old1.pod5").exists());
        assert!(dest.join("old2.fast5").exists());
        Ok(())
    }

    #[test]
    fn test_conflict_with_destination() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        let dest = root.join("pipeline_out/all_raw_signal");
        touch(&dest.join("a.pod5"))?;
        touch(&root.join("run2/a.pod5"))?;
        touch(&root.join("run2/b.pod5"))?;

        let err = collect_raw_signal(root, &exts(), &dest).unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactConflict { .. }));
        // nothing moved
        assert!(root.join("run2/a.pod5").exists());
        assert!(root.join("run2/b.pod5").exists());
        Ok(())
    }

    #[test]
    fn test_conflict_between_sources() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        let dest = root.join("pipeline_out/all_raw_signal");
        fs::create_dir_all(&dest)?;
        touch(&root.join("x/reads.fast5"))?;
        touch(&root.join("y/reads.fast5"))?;

        let err = collect_raw_signal(root, &exts(), &dest).unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactConflict { .. }));
        assert!(root.join("x/reads.fast5").exists());
        assert!(root.join("y/reads.fast5").exists());
        Ok(())
    }
}

use std::fmt::{self, Display, Formatter};

/// One barcode's (or, without barcoding, one experiment's) worth of reads.
///
/// The identifier is the barcode directory name and is reused verbatim in
/// every downstream file name for the unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleUnit {
    id: String,
}

impl SampleUnit {
    /// Returns `None` if `id` could not be used as a single path component.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && !id.contains(['/', '\\', '\0']);
        valid.then_some(SampleUnit { id })
    }

    /// Stand-in used to render per-unit commands before any unit exists.
    pub(crate) fn probe() -> Self {
        SampleUnit {
            id: "preflight".to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Display for SampleUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

use std::fmt;

/// Coarse classification shared by every service error.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// A required artifact has not been produced yet.
    PrerequisiteMissing,
    /// The text-generation capability failed or returned unusable content.
    GenerationFailure,
    /// Reading or writing persisted state failed.
    StorageFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PrerequisiteMissing => "prerequisite missing",
            Self::GenerationFailure => "generation failure",
            Self::StorageFailure => "storage failure",
        };
        f.write_str(label)
    }
}

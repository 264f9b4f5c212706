use thiserror::Error;

/// Why a single requirement line was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequirementError {
    #[error("invalid package name: {0:?}")]
    InvalidName(String),

    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("invalid version specifier {spec:?}: {reason}")]
    InvalidSpecifier { spec: String, reason: String },

    #[error("invalid environment marker {marker:?}: {reason}")]
    InvalidMarker { marker: String, reason: String },

    #[error("unsupported line {0:?}: only plain requirement specifiers are allowed")]
    UnsupportedOption(String),
}

/// Errors raised while reading a whole manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: RequirementError,
    },

    #[error("line {line}: package {name:?} is already declared on line {first_line}")]
    DuplicatePackage {
        name: String,
        first_line: usize,
        line: usize,
    },

    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
}

impl ManifestError {
    /// Line the error points at, if it is tied to one
    pub fn line(&self) -> Option<usize> {
        match self {
            ManifestError::Parse { line, .. } | ManifestError::DuplicatePackage { line, .. } => {
                Some(*line)
            }
            ManifestError::Io(_) => None,
        }
    }
}

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, ManifestError>;

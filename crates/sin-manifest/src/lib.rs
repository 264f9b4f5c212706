// Dependency manifest support
// Parses and validates requirements.txt-style manifests: one requirement per
// line, optional version constraints, environment markers and inline comments.

pub mod error;
pub mod marker;
pub mod models;
pub mod parsers;
pub mod version;

pub use error::{ManifestError, RequirementError, Result};
pub use marker::{MarkerEnvironment, MarkerTree};
pub use models::{normalize_name, ConstraintKind, Manifest, ManifestSummary, Requirement};
pub use parsers::{
    parse_requirement, parse_requirements_file, parse_requirements_txt,
    validate_requirements_txt, Issue, ValidationReport,
};
pub use version::{Operator, Version, VersionSpecifier, VersionSpecifiers};

use crate::marker::{MarkerEnvironment, MarkerTree};
use crate::version::{Operator, VersionSpecifiers};
use serde::Serialize;
use std::fmt;

/// Canonical package name: lowercase, runs of `-`, `_` and `.` collapsed to `-`
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    out
}

/// One dependency line of a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    pub specifiers: VersionSpecifiers,
    pub marker: Option<MarkerTree>,
    /// Free text after the inline `#`
    pub comment: Option<String>,
    /// 1-based line the requirement starts on
    pub line: usize,
}

impl Requirement {
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn constraint_kind(&self) -> ConstraintKind {
        ConstraintKind::classify(&self.specifiers)
    }

    /// Whether this line applies to the given runtime
    pub fn applies_to(&self, env: &MarkerEnvironment) -> bool {
        self.marker.as_ref().map_or(true, |m| m.evaluate(env))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        write!(f, "{}", self.specifiers)?;
        if let Some(marker) = &self.marker {
            write!(f, "; {}", marker)?;
        }
        Ok(())
    }
}

/// Rough shape of a version constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Unconstrained, // no specifier at all
    Pinned,        // == or ===
    LowerBound,    // >= / >
    UpperBound,    // <= / <
    Range,         // bounds on both sides, or a wildcard
    Compatible,    // ~=
    Excluded,      // only !=
}

impl ConstraintKind {
    fn classify(specifiers: &VersionSpecifiers) -> Self {
        let clauses: Vec<_> = specifiers.iter().collect();
        match clauses.as_slice() {
            [] => return ConstraintKind::Unconstrained,
            [single] => match single.operator {
                Operator::Equal if !single.wildcard => return ConstraintKind::Pinned,
                Operator::ArbitraryEqual => return ConstraintKind::Pinned,
                Operator::Compatible => return ConstraintKind::Compatible,
                _ => {}
            },
            _ => {}
        }

        let lower = clauses.iter().any(|s| {
            matches!(
                s.operator,
                Operator::GreaterThan | Operator::GreaterThanEqual | Operator::Compatible
            )
        });
        let upper = clauses
            .iter()
            .any(|s| matches!(s.operator, Operator::LessThan | Operator::LessThanEqual));
        let only_exclusions = clauses.iter().all(|s| s.operator == Operator::NotEqual);

        match (lower, upper) {
            _ if only_exclusions => ConstraintKind::Excluded,
            (true, false) => ConstraintKind::LowerBound,
            (false, true) => ConstraintKind::UpperBound,
            _ => ConstraintKind::Range,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKind::Unconstrained => write!(f, "unconstrained"),
            ConstraintKind::Pinned => write!(f, "pinned"),
            ConstraintKind::LowerBound => write!(f, "lower bound"),
            ConstraintKind::UpperBound => write!(f, "upper bound"),
            ConstraintKind::Range => write!(f, "range"),
            ConstraintKind::Compatible => write!(f, "compatible"),
            ConstraintKind::Excluded => write!(f, "excluded"),
        }
    }
}

/// A parsed dependency manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub requirements: Vec<Requirement>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.requirements.iter()
    }

    /// Look up a requirement by name, ignoring case and separator style
    pub fn get(&self, name: &str) -> Option<&Requirement> {
        let wanted = normalize_name(name);
        self.requirements
            .iter()
            .find(|r| r.normalized_name() == wanted)
    }

    /// Requirements whose marker is absent or holds in `env`
    pub fn applicable<'a>(&'a self, env: &'a MarkerEnvironment) -> impl Iterator<Item = &'a Requirement> {
        self.requirements.iter().filter(move |r| r.applies_to(env))
    }

    pub fn summary(&self) -> ManifestSummary {
        ManifestSummary::new(self)
    }
}

/// Counts over a manifest, by constraint shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestSummary {
    pub ecosystem: String,
    pub total_count: usize,
    pub pinned_count: usize,
    pub ranged_count: usize,
    pub unconstrained_count: usize,
    pub marker_count: usize,
}

impl ManifestSummary {
    pub fn new(manifest: &Manifest) -> Self {
        let kinds: Vec<ConstraintKind> = manifest
            .requirements
            .iter()
            .map(Requirement::constraint_kind)
            .collect();
        let pinned_count = kinds.iter().filter(|k| **k == ConstraintKind::Pinned).count();
        let unconstrained_count = kinds
            .iter()
            .filter(|k| **k == ConstraintKind::Unconstrained)
            .count();

        Self {
            ecosystem: "Python".to_string(),
            total_count: kinds.len(),
            pinned_count,
            ranged_count: kinds.len() - pinned_count - unconstrained_count,
            unconstrained_count,
            marker_count: manifest
                .requirements
                .iter()
                .filter(|r| r.marker.is_some())
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Sentence_Transformers"), "sentence-transformers");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("a-_.b"), "a-b");
    }

    #[test]
    fn test_constraint_kinds() {
        let kind = |s: &str| ConstraintKind::classify(&s.parse().unwrap());
        assert_eq!(kind(""), ConstraintKind::Unconstrained);
        assert_eq!(kind("==2.0.1"), ConstraintKind::Pinned);
        assert_eq!(kind(">=1.3"), ConstraintKind::LowerBound);
        assert_eq!(kind("<3"), ConstraintKind::UpperBound);
        assert_eq!(kind(">=1.3,<2"), ConstraintKind::Range);
        assert_eq!(kind("==1.*"), ConstraintKind::Range);
        assert_eq!(kind("~=1.4"), ConstraintKind::Compatible);
        assert_eq!(kind("!=1.5"), ConstraintKind::Excluded);
    }
}

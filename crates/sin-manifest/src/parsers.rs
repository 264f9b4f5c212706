use crate::error::{ManifestError, RequirementError, Result};
use crate::marker::MarkerTree;
use crate::models::{Manifest, Requirement};
use crate::version::VersionSpecifiers;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

lazy_static! {
    static ref NAME_RE: Regex =
        Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?").unwrap();
}

/// A problem found while validating a manifest
#[derive(Debug)]
pub struct Issue {
    pub line: usize,
    pub error: ManifestError,
}

/// Everything that could be read from a manifest plus every problem in it
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub manifest: Manifest,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Machine-readable report: validity, summary, requirements and issues
    pub fn to_json(&self) -> serde_json::Value {
        let issues: Vec<serde_json::Value> = self
            .issues
            .iter()
            .map(|issue| json!({ "line": issue.line, "error": issue.error.to_string() }))
            .collect();

        json!({
            "valid": self.is_valid(),
            "summary": self.manifest.summary(),
            "requirements": self.manifest.requirements,
            "issues": issues,
        })
    }
}

/// A requirement line after continuation joining and comment stripping
struct LogicalLine {
    number: usize,
    body: String,
    comment: Option<String>,
}

/// Join `\`-continued lines and split off inline comments.
/// Blank and comment-only lines are dropped.
fn logical_lines(content: &str) -> Vec<LogicalLine> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let (start, mut text) = match pending.take() {
            Some((start, mut text)) => {
                text.push(' ');
                text.push_str(raw.trim());
                (start, text)
            }
            None => (idx + 1, raw.trim().to_string()),
        };

        // A comment-only line never continues onto the next one
        if !text.starts_with('#') {
            if let Some(stripped) = text.strip_suffix('\\') {
                text = stripped.trim_end().to_string();
                pending = Some((start, text));
                continue;
            }
        }

        let (body, comment) = split_comment(&text);
        if !body.is_empty() {
            lines.push(LogicalLine {
                number: start,
                body: body.to_string(),
                comment,
            });
        }
    }

    if let Some((start, text)) = pending {
        let (body, comment) = split_comment(&text);
        if !body.is_empty() {
            lines.push(LogicalLine {
                number: start,
                body: body.to_string(),
                comment,
            });
        }
    }

    lines
}

/// Split `text` at the first `#` that starts a comment.
/// A `#` counts only at the start or after whitespace, and never inside quotes.
fn split_comment(text: &str) -> (&str, Option<String>) {
    let mut quote: Option<char> = None;
    let mut prev_is_space = true;

    for (idx, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' && prev_is_space => {
                let comment = text[idx + 1..].trim();
                let comment = (!comment.is_empty()).then(|| comment.to_string());
                return (text[..idx].trim(), comment);
            }
            None => {}
        }
        prev_is_space = c.is_whitespace();
    }

    (text.trim(), None)
}

/// Parse a single requirement specifier, e.g. `torch[cuda]>=2.0,<3; python_version >= "3.9"`
pub fn parse_requirement(line: &str) -> std::result::Result<Requirement, RequirementError> {
    let text = line.trim();

    if text.starts_with('-') {
        return Err(RequirementError::UnsupportedOption(text.to_string()));
    }

    // The marker separator may not sit inside a quoted string, but the
    // specifier part never contains quotes, so the first `;` is the split.
    let (spec_part, marker_part) = match text.find(';') {
        Some(idx) => (&text[..idx], Some(&text[idx + 1..])),
        None => (text, None),
    };

    let name_match = NAME_RE
        .find(spec_part.trim_start())
        .ok_or_else(|| RequirementError::InvalidName(spec_part.trim().to_string()))?;
    let name = name_match.as_str().to_string();
    let mut rest = spec_part.trim_start()[name_match.end()..].trim();

    if rest.starts_with('@') {
        return Err(RequirementError::UnsupportedOption(text.to_string()));
    }

    let mut extras = Vec::new();
    if let Some(after) = rest.strip_prefix('[') {
        let end = after
            .find(']')
            .ok_or_else(|| RequirementError::InvalidName(format!("{}[{}", name, after)))?;
        for extra in after[..end].split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let valid = NAME_RE
                .find(extra)
                .is_some_and(|m| m.end() == extra.len());
            if !valid {
                return Err(RequirementError::InvalidName(extra.to_string()));
            }
            extras.push(extra.to_string());
        }
        rest = after[end + 1..].trim();
    }

    // `name (>=1.0)` is an older but still accepted spelling
    if let Some(inner) = rest.strip_prefix('(') {
        rest = inner
            .strip_suffix(')')
            .ok_or_else(|| RequirementError::InvalidSpecifier {
                spec: rest.to_string(),
                reason: "unbalanced parenthesis".to_string(),
            })?
            .trim();
    }

    if !rest.is_empty() && !rest.starts_with(['=', '!', '<', '>', '~']) {
        return Err(RequirementError::InvalidSpecifier {
            spec: rest.to_string(),
            reason: format!("unexpected text after package name {:?}", name),
        });
    }
    let specifiers: VersionSpecifiers = rest.parse()?;

    let marker = match marker_part {
        Some(marker) if marker.trim().is_empty() => {
            return Err(RequirementError::InvalidMarker {
                marker: String::new(),
                reason: "empty marker after `;`".to_string(),
            })
        }
        Some(marker) => Some(marker.parse::<MarkerTree>()?),
        None => None,
    };

    Ok(Requirement {
        name,
        extras,
        specifiers,
        marker,
        comment: None,
        line: 0,
    })
}

/// Lenient read: collect every requirement and every problem.
///
/// Duplicate names are reported against the later line; the first
/// declaration is the one kept in the manifest.
pub fn validate_requirements_txt(content: &str) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for logical in logical_lines(content) {
        match parse_requirement(&logical.body) {
            Ok(mut requirement) => {
                requirement.line = logical.number;
                requirement.comment = logical.comment;

                let key = requirement.normalized_name();
                if let Some(&first_line) = seen.get(&key) {
                    report.issues.push(Issue {
                        line: logical.number,
                        error: ManifestError::DuplicatePackage {
                            name: requirement.name,
                            first_line,
                            line: logical.number,
                        },
                    });
                    continue;
                }

                seen.insert(key, logical.number);
                report.manifest.requirements.push(requirement);
            }
            Err(source) => {
                debug!("line {} rejected: {}", logical.number, source);
                report.issues.push(Issue {
                    line: logical.number,
                    error: ManifestError::Parse {
                        line: logical.number,
                        source,
                    },
                });
            }
        }
    }

    report
}

/// Strict read of a requirements.txt-style manifest; the first problem wins
pub fn parse_requirements_txt(content: &str) -> Result<Manifest> {
    let report = validate_requirements_txt(content);
    match report.issues.into_iter().min_by_key(|issue| issue.line) {
        Some(issue) => Err(issue.error),
        None => Ok(report.manifest),
    }
}

/// Read and strictly parse a manifest file
pub fn parse_requirements_file(path: impl AsRef<Path>) -> Result<Manifest> {
    let content = std::fs::read_to_string(path.as_ref())?;
    parse_requirements_txt(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConstraintKind;

    #[test]
    fn test_parse_requirements_txt() {
        let content = r#"
# Python dependencies
requests==2.28.0
flask>=2.0.0
pandas~=1.5.0
numpy
        "#;

        let manifest = parse_requirements_txt(content).unwrap();
        assert_eq!(manifest.len(), 4);
        assert_eq!(manifest.summary().ecosystem, "Python");
        assert_eq!(manifest.get("requests").unwrap().line, 3);
        assert_eq!(
            manifest.get("numpy").unwrap().constraint_kind(),
            ConstraintKind::Unconstrained
        );
    }

    #[test]
    fn test_full_requirement_line() {
        let req = parse_requirement(
            r#"uvicorn[standard, watch] >=0.20,<1.0 ; python_version >= "3.8" and os_name != "nt""#,
        )
        .unwrap();
        assert_eq!(req.name, "uvicorn");
        assert_eq!(req.extras, vec!["standard", "watch"]);
        assert_eq!(req.specifiers.to_string(), ">=0.20,<1.0");
        assert!(req.marker.is_some());
        assert_eq!(
            req.to_string(),
            r#"uvicorn[standard,watch]>=0.20,<1.0; python_version >= "3.8" and os_name != "nt""#
        );
    }

    #[test]
    fn test_marker_without_constraint() {
        let req = parse_requirement(r#"tomli ; python_version < "3.11""#).unwrap();
        assert!(req.specifiers.is_empty());
        assert!(req.marker.is_some());
    }

    #[test]
    fn test_parenthesised_specifiers() {
        let req = parse_requirement("pydantic (>=2,<3)").unwrap();
        assert_eq!(req.constraint_kind(), ConstraintKind::Range);
    }

    #[test]
    fn test_inline_comments() {
        let content = "torch>=2.0  # CPU build is fine\nscipy#not-a-comment==1.0\n";
        let report = validate_requirements_txt(content);
        assert_eq!(report.manifest.len(), 1);
        assert_eq!(
            report.manifest.requirements[0].comment.as_deref(),
            Some("CPU build is fine")
        );
        // `#` glued to the name is not a comment, so the line is malformed
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].line, 2);
    }

    #[test]
    fn test_hash_inside_marker_string_is_not_a_comment() {
        let content = r##"foo; platform_version == "#1 SMP""##;
        let manifest = parse_requirements_txt(content).unwrap();
        let marker = manifest.requirements[0].marker.as_ref().unwrap();
        assert!(marker.to_string().contains("#1 SMP"));
    }

    #[test]
    fn test_line_continuation() {
        let content = "numpy>=1.24,\\\n    <2.0\nscipy\n";
        let manifest = parse_requirements_txt(content).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.requirements[0].specifiers.to_string(), ">=1.24,<2.0");
        assert_eq!(manifest.requirements[1].line, 3);
    }

    #[test]
    fn test_comment_line_ending_in_backslash_does_not_continue() {
        let content = "# gpu extras \\\nthis is not a requirement\nnumpy\n";
        let report = validate_requirements_txt(content);

        assert!(!report.is_valid());
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].line, 2);
        assert_eq!(report.manifest.len(), 1);
        assert_eq!(report.manifest.requirements[0].line, 3);
    }

    #[test]
    fn test_duplicates_are_reported() {
        let content = "Sentence_Transformers==2.2.2\nnumpy\nsentence-transformers>=2\n";
        let err = parse_requirements_txt(content).unwrap_err();
        match err {
            ManifestError::DuplicatePackage {
                first_line, line, ..
            } => {
                assert_eq!(first_line, 1);
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_malformed_lines() {
        for line in [
            "torch 2.0",
            ">=1.0",
            "torch>=2.0.*",
            "torch==",
            "foo;",
            "foo; python_version <",
            "-r other.txt",
            "--index-url https://example.com/simple",
            "pkg @ https://example.com/pkg.whl",
            "pkg[bad extra]",
        ] {
            assert!(parse_requirement(line).is_err(), "accepted {line:?}");
        }
    }

    #[test]
    fn test_report_json() {
        let report = validate_requirements_txt("requests>=2.0\nflask\nRequests==2.1\n");
        let value = report.to_json();

        assert_eq!(value["valid"], false);
        assert_eq!(value["summary"]["total_count"], 2);
        assert_eq!(value["requirements"][0]["name"], "requests");
        assert_eq!(value["issues"][0]["line"], 3);
        assert!(value["issues"][0]["error"]
            .as_str()
            .unwrap()
            .contains("Requests"));
    }

    #[test]
    fn test_strict_parse_reports_first_line() {
        let content = "ok==1.0\n\nbad line here\nalso bad>\n";
        let err = parse_requirements_txt(content).unwrap_err();
        assert_eq!(err.line(), Some(3));

        let report = validate_requirements_txt(content);
        assert_eq!(report.issues.len(), 2);
        assert!(!report.is_valid());
    }
}

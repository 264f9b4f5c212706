//! Release versions and the comparison operators used in version constraints.
//!
//! Versions follow the PEP 440 layout: `[N!]N(.N)*[{a|b|rc}N][.postN][.devN][+local]`.
//! Ordering pads release segments with zeros, so `1.0 == 1.0.0`.

use crate::error::RequirementError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(
        r"(?xi)^\s*v?
            (?:(?P<epoch>[0-9]+)!)?
            (?P<release>[0-9]+(?:\.[0-9]+)*)
            (?:[-_.]?(?P<pre_l>alpha|a|beta|b|preview|pre|c|rc)[-_.]?(?P<pre_n>[0-9]+)?)?
            (?:-(?P<post_implicit>[0-9]+)|[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n>[0-9]+)?)?
            (?:[-_.]?(?P<dev_l>dev)[-_.]?(?P<dev_n>[0-9]+)?)?
            (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
            \s*$",
    )
    .unwrap();
}

/// Pre-release phase, ordered alpha < beta < release candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    Alpha,
    Beta,
    Rc,
}

impl fmt::Display for PreRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreRelease::Alpha => write!(f, "a"),
            PreRelease::Beta => write!(f, "b"),
            PreRelease::Rc => write!(f, "rc"),
        }
    }
}

/// A parsed release version
#[derive(Debug, Clone)]
pub struct Version {
    pub epoch: u64,
    pub release: Vec<u64>,
    pub pre: Option<(PreRelease, u64)>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
    pub local: Option<String>,
}

/// Where the pre-release part sorts relative to the final release.
/// A bare dev release sorts before every pre-release of the same version.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum PreKey {
    DevOnly,
    Pre(PreRelease, u64),
    Final,
}

impl Version {
    /// Build a plain final release from its numeric segments
    pub fn from_release(release: &[u64]) -> Self {
        Self {
            epoch: 0,
            release: release.to_vec(),
            pre: None,
            post: None,
            dev: None,
            local: None,
        }
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    /// Release segment `i`, treating missing trailing segments as zero
    pub fn segment(&self, i: usize) -> u64 {
        self.release.get(i).copied().unwrap_or(0)
    }

    /// The same version with the local label dropped
    pub fn without_local(&self) -> Version {
        Version {
            local: None,
            ..self.clone()
        }
    }

    /// True when the first `prefix.len()` release segments equal `prefix`
    pub fn starts_with_release(&self, epoch: u64, prefix: &[u64]) -> bool {
        self.epoch == epoch && prefix.iter().enumerate().all(|(i, p)| self.segment(i) == *p)
    }

    fn pre_key(&self) -> PreKey {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => PreKey::DevOnly,
            (Some((kind, n)), _, _) => PreKey::Pre(kind, n),
            _ => PreKey::Final,
        }
    }

    fn compare_release(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        (0..len)
            .map(|i| self.segment(i).cmp(&other.segment(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    fn compare_local(&self, other: &Self) -> Ordering {
        match (&self.local, &other.local) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => {
                let split = |s: &str| -> Vec<String> {
                    s.split(['.', '-', '_']).map(str::to_lowercase).collect()
                };
                let (a, b) = (split(a), split(b));
                for (x, y) in a.iter().zip(b.iter()) {
                    // Numeric segments sort after alphanumeric ones
                    let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                        (Ok(x), Ok(y)) => x.cmp(&y),
                        (Ok(_), Err(_)) => Ordering::Greater,
                        (Err(_), Ok(_)) => Ordering::Less,
                        (Err(_), Err(_)) => x.cmp(y),
                    };
                    if ord.is_ne() {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
        }
    }
}

impl FromStr for Version {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| RequirementError::InvalidVersion {
            version: s.to_string(),
            reason: reason.to_string(),
        };

        let caps = VERSION_RE
            .captures(s)
            .ok_or_else(|| invalid("not a valid release version"))?;

        let number = |name: &str| -> Result<Option<u64>, RequirementError> {
            caps.name(name)
                .map(|m| m.as_str().parse::<u64>())
                .transpose()
                .map_err(|_| invalid("numeric segment out of range"))
        };

        let release = caps
            .name("release")
            .map(|m| m.as_str())
            .unwrap_or_default()
            .split('.')
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("numeric segment out of range"))?;

        let pre = match caps.name("pre_l") {
            Some(label) => {
                let kind = match label.as_str().to_lowercase().as_str() {
                    "a" | "alpha" => PreRelease::Alpha,
                    "b" | "beta" => PreRelease::Beta,
                    _ => PreRelease::Rc,
                };
                Some((kind, number("pre_n")?.unwrap_or(0)))
            }
            None => None,
        };

        let post = match number("post_implicit")? {
            Some(n) => Some(n),
            None if caps.name("post_l").is_some() => Some(number("post_n")?.unwrap_or(0)),
            None => None,
        };

        let dev = match caps.name("dev_l") {
            Some(_) => Some(number("dev_n")?.unwrap_or(0)),
            None => None,
        };

        Ok(Version {
            epoch: number("epoch")?.unwrap_or(0),
            release,
            pre,
            post,
            dev,
            local: caps.name("local").map(|m| m.as_str().to_lowercase()),
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.compare_release(other))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| {
                // A missing dev segment sorts after any dev release
                (self.dev.is_none(), self.dev.unwrap_or(0))
                    .cmp(&(other.dev.is_none(), other.dev.unwrap_or(0)))
            })
            .then_with(|| self.compare_local(other))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", release.join("."))?;
        if let Some((kind, n)) = self.pre {
            write!(f, "{}{}", kind, n)?;
        }
        if let Some(n) = self.post {
            write!(f, ".post{}", n)?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{}", n)?;
        }
        if let Some(local) = &self.local {
            write!(f, "+{}", local)?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Comparison operator of a version specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThanEqual,
    GreaterThanEqual,
    LessThan,
    GreaterThan,
    Compatible,
    ArbitraryEqual,
}

impl Operator {
    /// Operators in the order they must be tried when scanning text
    pub const ALL: [Operator; 8] = [
        Operator::ArbitraryEqual,
        Operator::Equal,
        Operator::NotEqual,
        Operator::Compatible,
        Operator::LessThanEqual,
        Operator::GreaterThanEqual,
        Operator::LessThan,
        Operator::GreaterThan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessThanEqual => "<=",
            Operator::GreaterThanEqual => ">=",
            Operator::LessThan => "<",
            Operator::GreaterThan => ">",
            Operator::Compatible => "~=",
            Operator::ArbitraryEqual => "===",
        }
    }

    /// Split a leading operator off `text`
    pub fn strip_prefix(text: &str) -> Option<(Operator, &str)> {
        Self::ALL
            .iter()
            .find_map(|op| text.strip_prefix(op.as_str()).map(|rest| (*op, rest)))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `<op><version>` clause, e.g. `>=2.0` or `==1.4.*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpecifier {
    pub operator: Operator,
    /// Version text as written, without any trailing `.*`
    pub raw: String,
    /// Parsed version; `None` only for `===` against a non-standard string
    pub version: Option<Version>,
    pub wildcard: bool,
}

impl VersionSpecifier {
    /// Whether `candidate` satisfies this clause
    pub fn contains(&self, candidate: &Version) -> bool {
        if self.operator == Operator::ArbitraryEqual {
            return candidate.to_string().eq_ignore_ascii_case(self.raw.trim());
        }
        let Some(spec) = &self.version else {
            return false;
        };

        match self.operator {
            Operator::Equal => self.matches_equal(spec, candidate),
            Operator::NotEqual => !self.matches_equal(spec, candidate),
            Operator::LessThanEqual => candidate.without_local() <= *spec,
            Operator::GreaterThanEqual => candidate.without_local() >= *spec,
            Operator::LessThan => candidate.without_local() < *spec,
            Operator::GreaterThan => candidate.without_local() > *spec,
            Operator::Compatible => {
                let prefix = &spec.release[..spec.release.len() - 1];
                candidate.without_local() >= *spec
                    && candidate.starts_with_release(spec.epoch, prefix)
            }
            Operator::ArbitraryEqual => false,
        }
    }

    fn matches_equal(&self, spec: &Version, candidate: &Version) -> bool {
        if self.wildcard {
            candidate.starts_with_release(spec.epoch, &spec.release)
        } else if spec.local.is_none() {
            candidate.without_local() == *spec
        } else {
            candidate == spec
        }
    }
}

impl FromStr for VersionSpecifier {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = |reason: &str| RequirementError::InvalidSpecifier {
            spec: text.to_string(),
            reason: reason.to_string(),
        };

        let (operator, rest) =
            Operator::strip_prefix(text).ok_or_else(|| invalid("missing comparison operator"))?;
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(invalid("missing version"));
        }
        if rest.contains(char::is_whitespace) {
            return Err(invalid("version must not contain whitespace"));
        }

        if operator == Operator::ArbitraryEqual {
            return Ok(Self {
                operator,
                raw: rest.to_string(),
                version: rest.parse().ok(),
                wildcard: false,
            });
        }

        let (raw, wildcard) = match rest.strip_suffix(".*") {
            Some(base) => (base, true),
            None => (rest, false),
        };
        if wildcard && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(invalid("`.*` is only allowed with == and !="));
        }

        let version: Version = raw.parse()?;
        if wildcard && version.local.is_some() {
            return Err(invalid("a wildcard version cannot carry a local label"));
        }
        if version.local.is_some() && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(invalid("local versions are only allowed with == and !="));
        }
        if operator == Operator::Compatible && version.release.len() < 2 {
            return Err(invalid("~= needs at least two release segments"));
        }

        Ok(Self {
            operator,
            raw: raw.to_string(),
            version: Some(version),
            wildcard,
        })
    }
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator, self.raw)?;
        if self.wildcard {
            write!(f, ".*")?;
        }
        Ok(())
    }
}

/// Comma-separated conjunction of specifiers; empty means "any version"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionSpecifiers(pub Vec<VersionSpecifier>);

impl VersionSpecifiers {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionSpecifier> {
        self.0.iter()
    }

    pub fn contains(&self, candidate: &Version) -> bool {
        self.0.iter().all(|spec| spec.contains(candidate))
    }
}

impl FromStr for VersionSpecifiers {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        s.split(',')
            .map(str::parse::<VersionSpecifier>)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl fmt::Display for VersionSpecifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

impl Serialize for VersionSpecifiers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

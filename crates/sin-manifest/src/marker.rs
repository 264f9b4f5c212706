//! Environment markers: the `; python_version < "3.10"` tail of a requirement.

use crate::error::RequirementError;
use crate::version::{Operator, Version, VersionSpecifier};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Variables a marker may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerVariable {
    PythonVersion,
    PythonFullVersion,
    OsName,
    SysPlatform,
    PlatformRelease,
    PlatformSystem,
    PlatformVersion,
    PlatformMachine,
    PlatformPythonImplementation,
    ImplementationName,
    ImplementationVersion,
    Extra,
}

impl MarkerVariable {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerVariable::PythonVersion => "python_version",
            MarkerVariable::PythonFullVersion => "python_full_version",
            MarkerVariable::OsName => "os_name",
            MarkerVariable::SysPlatform => "sys_platform",
            MarkerVariable::PlatformRelease => "platform_release",
            MarkerVariable::PlatformSystem => "platform_system",
            MarkerVariable::PlatformVersion => "platform_version",
            MarkerVariable::PlatformMachine => "platform_machine",
            MarkerVariable::PlatformPythonImplementation => "platform_python_implementation",
            MarkerVariable::ImplementationName => "implementation_name",
            MarkerVariable::ImplementationVersion => "implementation_version",
            MarkerVariable::Extra => "extra",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        let var = match name {
            "python_version" => MarkerVariable::PythonVersion,
            "python_full_version" => MarkerVariable::PythonFullVersion,
            "os_name" => MarkerVariable::OsName,
            "sys_platform" => MarkerVariable::SysPlatform,
            "platform_release" => MarkerVariable::PlatformRelease,
            "platform_system" => MarkerVariable::PlatformSystem,
            "platform_version" => MarkerVariable::PlatformVersion,
            "platform_machine" => MarkerVariable::PlatformMachine,
            "platform_python_implementation" => MarkerVariable::PlatformPythonImplementation,
            "implementation_name" => MarkerVariable::ImplementationName,
            "implementation_version" => MarkerVariable::ImplementationVersion,
            "extra" => MarkerVariable::Extra,
            _ => return None,
        };
        Some(var)
    }

    /// Variables whose values compare as versions rather than strings
    fn is_version_like(&self) -> bool {
        matches!(
            self,
            MarkerVariable::PythonVersion
                | MarkerVariable::PythonFullVersion
                | MarkerVariable::ImplementationVersion
        )
    }
}

/// Concrete runtime values markers are evaluated against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerEnvironment {
    pub python_version: String,
    pub python_full_version: String,
    pub os_name: String,
    pub sys_platform: String,
    pub platform_release: String,
    pub platform_system: String,
    pub platform_version: String,
    pub platform_machine: String,
    pub platform_python_implementation: String,
    pub implementation_name: String,
    pub implementation_version: String,
    pub extras: BTreeSet<String>,
}

impl MarkerEnvironment {
    /// Environment for a CPython interpreter on the host platform
    pub fn for_python(full_version: &str) -> Self {
        let short = full_version
            .split('.')
            .take(2)
            .collect::<Vec<_>>()
            .join(".");

        let (os_name, sys_platform, platform_system) = match std::env::consts::OS {
            "windows" => ("nt", "win32", "Windows"),
            "macos" => ("posix", "darwin", "Darwin"),
            "linux" => ("posix", "linux", "Linux"),
            other => ("posix", other, other),
        };

        Self {
            python_version: short,
            python_full_version: full_version.to_string(),
            os_name: os_name.to_string(),
            sys_platform: sys_platform.to_string(),
            platform_release: String::new(),
            platform_system: platform_system.to_string(),
            platform_version: String::new(),
            platform_machine: std::env::consts::ARCH.to_string(),
            platform_python_implementation: "CPython".to_string(),
            implementation_name: "cpython".to_string(),
            implementation_version: full_version.to_string(),
            extras: BTreeSet::new(),
        }
    }

    /// Activate an optional feature set for `extra == "..."` markers
    pub fn with_extra(mut self, extra: &str) -> Self {
        self.extras.insert(crate::models::normalize_name(extra));
        self
    }

    fn value(&self, var: MarkerVariable) -> &str {
        match var {
            MarkerVariable::PythonVersion => &self.python_version,
            MarkerVariable::PythonFullVersion => &self.python_full_version,
            MarkerVariable::OsName => &self.os_name,
            MarkerVariable::SysPlatform => &self.sys_platform,
            MarkerVariable::PlatformRelease => &self.platform_release,
            MarkerVariable::PlatformSystem => &self.platform_system,
            MarkerVariable::PlatformVersion => &self.platform_version,
            MarkerVariable::PlatformMachine => &self.platform_machine,
            MarkerVariable::PlatformPythonImplementation => &self.platform_python_implementation,
            MarkerVariable::ImplementationName => &self.implementation_name,
            MarkerVariable::ImplementationVersion => &self.implementation_version,
            // Extras are a set, handled separately
            MarkerVariable::Extra => "",
        }
    }
}

/// One side of a marker comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerValue {
    Variable(MarkerVariable),
    Literal(String),
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerValue::Variable(var) => f.write_str(var.as_str()),
            MarkerValue::Literal(text) if text.contains('"') => write!(f, "'{}'", text),
            MarkerValue::Literal(text) => write!(f, "\"{}\"", text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOperator {
    Compare(Operator),
    In,
    NotIn,
}

impl fmt::Display for MarkerOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerOperator::Compare(op) => write!(f, "{}", op),
            MarkerOperator::In => f.write_str("in"),
            MarkerOperator::NotIn => f.write_str("not in"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerExpression {
    pub lhs: MarkerValue,
    pub op: MarkerOperator,
    pub rhs: MarkerValue,
}

impl MarkerExpression {
    fn evaluate(&self, env: &MarkerEnvironment) -> bool {
        // `extra` is compared against every active extra
        let extra_side = match (&self.lhs, &self.rhs) {
            (MarkerValue::Variable(MarkerVariable::Extra), MarkerValue::Literal(lit))
            | (MarkerValue::Literal(lit), MarkerValue::Variable(MarkerVariable::Extra)) => {
                Some(crate::models::normalize_name(lit))
            }
            _ => None,
        };
        if let Some(wanted) = extra_side {
            let present = env.extras.contains(&wanted);
            return match self.op {
                MarkerOperator::Compare(Operator::NotEqual) => !present,
                MarkerOperator::Compare(_) => present,
                MarkerOperator::In | MarkerOperator::NotIn => false,
            };
        }

        let resolve = |value: &MarkerValue| -> String {
            match value {
                MarkerValue::Variable(var) => env.value(*var).to_string(),
                MarkerValue::Literal(text) => text.clone(),
            }
        };
        let lhs = resolve(&self.lhs);
        let rhs = resolve(&self.rhs);

        match self.op {
            MarkerOperator::In => rhs.contains(&lhs),
            MarkerOperator::NotIn => !rhs.contains(&lhs),
            MarkerOperator::Compare(op) => {
                let version_like = [&self.lhs, &self.rhs]
                    .iter()
                    .any(|v| matches!(v, MarkerValue::Variable(var) if var.is_version_like()));

                if version_like {
                    let spec = format!("{}{}", op, rhs).parse::<VersionSpecifier>();
                    if let (Ok(spec), Ok(version)) = (spec, lhs.parse::<Version>()) {
                        return spec.contains(&version);
                    }
                }

                match op {
                    Operator::Equal | Operator::ArbitraryEqual => lhs == rhs,
                    Operator::NotEqual => lhs != rhs,
                    _ => {
                        debug!("ordering comparison on non-version marker values {:?} {} {:?}", lhs, op, rhs);
                        false
                    }
                }
            }
        }
    }
}

impl fmt::Display for MarkerExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// Boolean combination of marker expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerTree {
    Expression(MarkerExpression),
    And(Vec<MarkerTree>),
    Or(Vec<MarkerTree>),
}

impl MarkerTree {
    pub fn evaluate(&self, env: &MarkerEnvironment) -> bool {
        match self {
            MarkerTree::Expression(expr) => expr.evaluate(env),
            MarkerTree::And(children) => children.iter().all(|c| c.evaluate(env)),
            MarkerTree::Or(children) => children.iter().any(|c| c.evaluate(env)),
        }
    }
}

impl fmt::Display for MarkerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerTree::Expression(expr) => write!(f, "{}", expr),
            MarkerTree::And(children) => {
                let parts: Vec<String> = children
                    .iter()
                    .map(|c| match c {
                        MarkerTree::Or(_) => format!("({})", c),
                        _ => c.to_string(),
                    })
                    .collect();
                f.write_str(&parts.join(" and "))
            }
            MarkerTree::Or(children) => {
                let parts: Vec<String> = children.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(" or "))
            }
        }
    }
}

impl Serialize for MarkerTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for MarkerTree {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s)?;
        let mut parser = Parser {
            source: s,
            tokens,
            pos: 0,
        };
        let tree = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(tree)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Ident(String),
    Quoted(String),
    Op(Operator),
}

fn tokenize(source: &str) -> Result<Vec<Token>, RequirementError> {
    let invalid = |reason: String| RequirementError::InvalidMarker {
        marker: source.trim().to_string(),
        reason,
    };

    let mut tokens = Vec::new();
    let mut rest = source.trim_start();

    while let Some(c) = rest.chars().next() {
        if c == '(' {
            tokens.push(Token::Open);
            rest = &rest[1..];
        } else if c == ')' {
            tokens.push(Token::Close);
            rest = &rest[1..];
        } else if c == '"' || c == '\'' {
            let body = &rest[1..];
            let end = body
                .find(c)
                .ok_or_else(|| invalid("unterminated string".to_string()))?;
            tokens.push(Token::Quoted(body[..end].to_string()));
            rest = &body[end + 1..];
        } else if let Some((op, tail)) = Operator::strip_prefix(rest) {
            tokens.push(Token::Op(op));
            rest = tail;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let end = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            tokens.push(Token::Ident(rest[..end].to_string()));
            rest = &rest[end..];
        } else {
            return Err(invalid(format!("unexpected character {:?}", c)));
        }
        rest = rest.trim_start();
    }

    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> RequirementError {
        RequirementError::InvalidMarker {
            marker: self.source.trim().to_string(),
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word == keyword)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<MarkerTree, RequirementError> {
        let mut children = vec![self.parse_and()?];
        while self.peek_keyword("or") {
            self.pos += 1;
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            MarkerTree::Or(children)
        })
    }

    fn parse_and(&mut self) -> Result<MarkerTree, RequirementError> {
        let mut children = vec![self.parse_atom()?];
        while self.peek_keyword("and") {
            self.pos += 1;
            children.push(self.parse_atom()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            MarkerTree::And(children)
        })
    }

    fn parse_atom(&mut self) -> Result<MarkerTree, RequirementError> {
        if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            let inner = self.parse_or()?;
            return match self.next() {
                Some(Token::Close) => Ok(inner),
                _ => Err(self.error("missing closing parenthesis")),
            };
        }

        let lhs = self.parse_value()?;
        let op = self.parse_operator()?;
        let rhs = self.parse_value()?;

        if matches!(
            (&lhs, &rhs),
            (MarkerValue::Literal(_), MarkerValue::Literal(_))
        ) {
            return Err(self.error("comparison needs at least one environment variable"));
        }

        Ok(MarkerTree::Expression(MarkerExpression { lhs, op, rhs }))
    }

    fn parse_value(&mut self) -> Result<MarkerValue, RequirementError> {
        match self.next() {
            Some(Token::Quoted(text)) => Ok(MarkerValue::Literal(text)),
            Some(Token::Ident(name)) => MarkerVariable::from_name(&name)
                .map(MarkerValue::Variable)
                .ok_or_else(|| self.error(&format!("unknown marker variable {:?}", name))),
            _ => Err(self.error("expected a variable or quoted string")),
        }
    }

    fn parse_operator(&mut self) -> Result<MarkerOperator, RequirementError> {
        match self.next() {
            Some(Token::Op(op)) => Ok(MarkerOperator::Compare(op)),
            Some(Token::Ident(word)) if word == "in" => Ok(MarkerOperator::In),
            Some(Token::Ident(word)) if word == "not" => match self.next() {
                Some(Token::Ident(next)) if next == "in" => Ok(MarkerOperator::NotIn),
                _ => Err(self.error("expected `in` after `not`")),
            },
            _ => Err(self.error("expected a comparison operator")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> MarkerEnvironment {
        let mut env = MarkerEnvironment::for_python("3.9.18");
        env.sys_platform = "linux".to_string();
        env.platform_system = "Linux".to_string();
        env.platform_machine = "x86_64".to_string();
        env
    }

    fn eval(marker: &str) -> bool {
        marker.parse::<MarkerTree>().unwrap().evaluate(&env())
    }

    #[test]
    fn test_python_version_markers() {
        assert!(eval(r#"python_version < "3.10""#));
        assert!(eval(r#"python_version >= "3.8""#));
        assert!(!eval(r#"python_version >= "3.10""#));
        assert!(eval(r#"python_full_version == "3.9.*""#));
    }

    #[test]
    fn test_boolean_combinations() {
        assert!(eval(
            r#"python_version >= "3.8" and (sys_platform == "linux" or sys_platform == "darwin")"#
        ));
        assert!(!eval(r#"sys_platform == "win32" and python_version < "4""#));
        assert!(eval(r#"platform_machine in "x86_64 aarch64""#));
        assert!(eval(r#"'arm' not in platform_machine"#));
    }

    #[test]
    fn test_extra_markers() {
        let tree: MarkerTree = r#"extra == "GPU""#.parse().unwrap();
        assert!(!tree.evaluate(&env()));
        assert!(tree.evaluate(&env().with_extra("gpu")));
    }

    #[test]
    fn test_display_keeps_grouping() {
        let tree: MarkerTree =
            r#"python_version>='3.8' and (os_name=="nt" or os_name=='posix')"#.parse().unwrap();
        assert_eq!(
            tree.to_string(),
            r#"python_version >= "3.8" and (os_name == "nt" or os_name == "posix")"#
        );
    }

    #[test]
    fn test_invalid_markers() {
        assert!(r#"python_version <"#.parse::<MarkerTree>().is_err());
        assert!(r#"pyver == "3""#.parse::<MarkerTree>().is_err());
        assert!(r#""a" == "b""#.parse::<MarkerTree>().is_err());
        assert!(r#"(os_name == "nt""#.parse::<MarkerTree>().is_err());
        assert!(r#"os_name == "nt" extra"#.parse::<MarkerTree>().is_err());
        assert!(r#"os_name == "nt"#.parse::<MarkerTree>().is_err());
    }
}

//! Abstract syntax tree for SCIM paths and filters.

use std::fmt;

use serde_json::Value;

/// A parsed SCIM filter expression per RFC 7644 Section 3.4.2.2.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Logical AND of two filters
    And(Box<Filter>, Box<Filter>),
    /// Logical OR of two filters
    Or(Box<Filter>, Box<Filter>),
    /// Logical NOT of a filter
    Not(Box<Filter>),
    /// Attribute comparison, e.g. `userName eq "alice"`
    Compare {
        path: AttrPath,
        op: CompareOp,
        value: Value,
    },
    /// Attribute presence check, e.g. `name pr`
    Present(AttrPath),
}

impl Filter {
    /// Convenience constructor for an equality comparison.
    pub fn eq(path: AttrPath, value: Value) -> Self {
        Self::Compare {
            path,
            op: CompareOp::Eq,
            value,
        }
    }

    pub fn and(left: Filter, right: Filter) -> Self {
        Self::And(Box::new(left), Box::new(right))
    }

    pub fn not(inner: Filter) -> Self {
        Self::Not(Box::new(inner))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(l, r) => write!(f, "({} and {})", l, r),
            Self::Or(l, r) => write!(f, "({} or {})", l, r),
            Self::Not(inner) => write!(f, "not ({})", inner),
            Self::Compare { path, op, value } => write!(f, "{} {} {}", path, op, value),
            Self::Present(path) => write!(f, "{} pr", path),
        }
    }
}

/// Comparison operators per RFC 7644.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Co,
    Sw,
    Ew,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    /// Parse a lowercase operator keyword.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "co" => Some(Self::Co),
            "sw" => Some(Self::Sw),
            "ew" => Some(Self::Ew),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Co => "co",
            Self::Sw => "sw",
            Self::Ew => "ew",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One step of an attribute path: a sub-attribute name plus an optional
/// index filter over a multi-valued attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct PathStep {
    pub name: String,
    pub filter: Option<Box<Filter>>,
}

impl PathStep {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
        }
    }
}

/// A compiled attribute path, optionally qualified by a schema URN.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrPath {
    pub schema_urn: Option<String>,
    pub steps: Vec<PathStep>,
}

impl AttrPath {
    /// A bare single-step path.
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            schema_urn: None,
            steps: vec![PathStep::named(name)],
        }
    }

    /// The dotted rendering without the URN qualifier.
    pub fn dotted(&self) -> String {
        self.steps
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(urn) = &self.schema_urn {
            write!(f, "{}:", urn)?;
        }
        for (index, step) in self.steps.iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            f.write_str(&step.name)?;
            if let Some(filter) = &step.filter {
                write!(f, "[{}]", filter)?;
            }
        }
        Ok(())
    }
}

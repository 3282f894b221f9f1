//! Filter expressions over attribute maps
//!
//! A small LDAP-style language used by requirements, service lookups and
//! service listeners:
//!
//! - `(&(a=1)(b=2))`, `(|...)`, `(!...)` boolean composition
//! - `(a=v)` equality, `(a=*)` presence, `(a=pre*mid*suf)` wildcard match
//! - `(a>=v)`, `(a<=v)` ordered comparison
//! - `(a~=v)` approximate match (case and whitespace insensitive)
//!
//! The operand is interpreted according to the attribute's type, so
//! `(version>=1.2)` compares versions and `(size>=10)` compares integers.

mod parser;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::module::model::{AttributeValue, Attributes, Version};

/// Filter parse error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position} in '{input}'")]
pub struct FilterError {
    pub input: String,
    pub position: usize,
    pub message: String,
}

/// Parsed filter expression
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Filter {
    /// Matches everything; the empty filter
    #[default]
    MatchAll,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal { attribute: String, value: String },
    Approx { attribute: String, value: String },
    GreaterEq { attribute: String, value: String },
    LessEq { attribute: String, value: String },
    Present { attribute: String },
    Substring {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
}

impl Filter {
    pub fn match_all() -> Self {
        Filter::MatchAll
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Filter::MatchAll)
    }

    /// Parse a filter string; empty input yields [`Filter::MatchAll`]
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        parser::parse(input)
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    pub fn equal(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equal {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn approx(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Approx {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn greater_eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::GreaterEq {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn less_eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::LessEq {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Evaluate the filter against an attribute map
    pub fn matches(&self, attributes: &Attributes) -> bool {
        match self {
            Filter::MatchAll => true,
            Filter::And(filters) => filters.iter().all(|f| f.matches(attributes)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(attributes)),
            Filter::Not(filter) => !filter.matches(attributes),
            Filter::Present { attribute } => attributes.get(attribute).is_some(),
            Filter::Equal { attribute, value } => {
                compare_attr(attributes, attribute, value, Op::Equal)
            }
            Filter::Approx { attribute, value } => {
                compare_attr(attributes, attribute, value, Op::Approx)
            }
            Filter::GreaterEq { attribute, value } => {
                compare_attr(attributes, attribute, value, Op::GreaterEq)
            }
            Filter::LessEq { attribute, value } => {
                compare_attr(attributes, attribute, value, Op::LessEq)
            }
            Filter::Substring {
                attribute,
                initial,
                any,
                last,
            } => attributes
                .get(attribute)
                .map(|v| substring_matches(v, initial.as_deref(), any, last.as_deref()))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

fn compare_attr(attributes: &Attributes, attribute: &str, operand: &str, op: Op) -> bool {
    attributes
        .get(attribute)
        .map(|value| compare(value, operand, op))
        .unwrap_or(false)
}

fn ordering_satisfies(ordering: Option<Ordering>, op: Op) -> bool {
    match (ordering, op) {
        (None, _) => false,
        (Some(o), Op::Equal) | (Some(o), Op::Approx) => o == Ordering::Equal,
        (Some(o), Op::GreaterEq) => o != Ordering::Less,
        (Some(o), Op::LessEq) => o != Ordering::Greater,
    }
}

fn compare(value: &AttributeValue, operand: &str, op: Op) -> bool {
    match value {
        AttributeValue::String(s) => match op {
            Op::Approx => normalize_approx(s) == normalize_approx(operand),
            _ => ordering_satisfies(Some(s.as_str().cmp(operand)), op),
        },
        AttributeValue::Long(n) => {
            let parsed = operand.trim().parse::<i64>().ok();
            ordering_satisfies(parsed.map(|p| n.cmp(&p)), op)
        }
        AttributeValue::Double(d) => {
            let parsed = operand.trim().parse::<f64>().ok();
            ordering_satisfies(parsed.and_then(|p| d.partial_cmp(&p)), op)
        }
        AttributeValue::Version(v) => {
            let parsed = Version::parse(operand).ok();
            ordering_satisfies(parsed.map(|p| v.cmp(&p)), op)
        }
        AttributeValue::Bool(b) => match op {
            Op::Equal | Op::Approx => {
                let operand = operand.trim();
                (operand.eq_ignore_ascii_case("true") && *b)
                    || (operand.eq_ignore_ascii_case("false") && !*b)
            }
            Op::GreaterEq | Op::LessEq => false,
        },
        AttributeValue::List(items) => items.iter().any(|item| compare(item, operand, op)),
    }
}

fn normalize_approx(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn substring_matches(
    value: &AttributeValue,
    initial: Option<&str>,
    any: &[String],
    last: Option<&str>,
) -> bool {
    match value {
        AttributeValue::String(s) => wildcard_match(s, initial, any, last),
        AttributeValue::List(items) => items
            .iter()
            .any(|item| substring_matches(item, initial, any, last)),
        _ => false,
    }
}

fn wildcard_match(s: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let mut rest = s;
    if let Some(prefix) = initial {
        match rest.strip_prefix(prefix) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        match rest.find(part.as_str()) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    match last {
        Some(suffix) => rest.ends_with(suffix),
        None => true,
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '(' | ')' | '*') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::MatchAll => Ok(()),
            Filter::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                f.write_str(")")
            }
            Filter::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                f.write_str(")")
            }
            Filter::Not(filter) => write!(f, "(!{})", filter),
            Filter::Equal { attribute, value } => write!(f, "({}={})", attribute, escape(value)),
            Filter::Approx { attribute, value } => write!(f, "({}~={})", attribute, escape(value)),
            Filter::GreaterEq { attribute, value } => {
                write!(f, "({}>={})", attribute, escape(value))
            }
            Filter::LessEq { attribute, value } => write!(f, "({}<={})", attribute, escape(value)),
            Filter::Present { attribute } => write!(f, "({}=*)", attribute),
            Filter::Substring {
                attribute,
                initial,
                any,
                last,
            } => {
                write!(f, "({}=", attribute)?;
                if let Some(initial) = initial {
                    f.write_str(&escape(initial))?;
                }
                f.write_str("*")?;
                for part in any {
                    write!(f, "{}*", escape(part))?;
                }
                if let Some(last) = last {
                    f.write_str(&escape(last))?;
                }
                f.write_str(")")
            }
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

impl TryFrom<String> for Filter {
    type Error = FilterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Filter::parse(&value)
    }
}

impl From<Filter> for String {
    fn from(filter: Filter) -> Self {
        filter.to_string()
    }
}

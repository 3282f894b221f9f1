//! Module and capability versions
//!
//! Versions have the form `major.minor.micro.qualifier`. Missing numeric
//! segments default to zero and the qualifier is compared lexicographically,
//! with the empty qualifier sorting first.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::module::filter::Filter;

/// Version parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,

    #[error("invalid numeric segment '{segment}' in version '{input}'")]
    InvalidSegment { input: String, segment: String },

    #[error("too many segments in version '{0}'")]
    TooManySegments(String),

    #[error("invalid qualifier in version '{0}'")]
    InvalidQualifier(String),

    #[error("invalid version range '{0}'")]
    InvalidRange(String),
}

/// Semantic version: `major.minor.micro.qualifier`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub micro: u64,
    pub qualifier: String,
}

impl Version {
    /// `0.0.0`, the version of a module that declares none
    pub const fn empty() -> Self {
        Self {
            major: 0,
            minor: 0,
            micro: 0,
            qualifier: String::new(),
        }
    }

    /// Create a version without a qualifier
    pub const fn new(major: u64, minor: u64, micro: u64) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    /// Create a version with a qualifier
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// Parse a version string
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }

        let mut parts = trimmed.splitn(4, '.');
        let mut numbers = [0u64; 3];
        for slot in numbers.iter_mut() {
            match parts.next() {
                Some(segment) => {
                    *slot = segment.parse().map_err(|_| VersionError::InvalidSegment {
                        input: input.to_string(),
                        segment: segment.to_string(),
                    })?;
                }
                None => break,
            }
        }

        let qualifier = parts.next().unwrap_or("").to_string();
        if qualifier.contains('.') {
            return Err(VersionError::TooManySegments(input.to_string()));
        }
        if !qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(VersionError::InvalidQualifier(input.to_string()));
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            micro: numbers[2],
            qualifier,
        })
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::empty()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.micro)
            .cmp(&(other.major, other.minor, other.micro))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

/// Version interval such as `[1.0,2.0)`
///
/// A bare version (`"1.2"`) means "at least 1.2" with no upper bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    pub floor: Version,
    pub floor_inclusive: bool,
    pub ceiling: Option<(Version, bool)>,
}

impl VersionRange {
    /// Range that includes `floor` and everything above it
    pub fn at_least(floor: Version) -> Self {
        Self {
            floor,
            floor_inclusive: true,
            ceiling: None,
        }
    }

    /// Parse a range in interval notation or a bare minimum version
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        let floor_inclusive = match trimmed.chars().next() {
            Some('[') => true,
            Some('(') => false,
            Some(_) => return Ok(Self::at_least(Version::parse(trimmed)?)),
            None => return Err(VersionError::Empty),
        };
        let ceiling_inclusive = match trimmed.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(VersionError::InvalidRange(input.to_string())),
        };

        let body = &trimmed[1..trimmed.len() - 1];
        let (low, high) = body
            .split_once(',')
            .ok_or_else(|| VersionError::InvalidRange(input.to_string()))?;
        let floor = Version::parse(low)?;
        let ceiling = Version::parse(high)?;
        if ceiling < floor {
            return Err(VersionError::InvalidRange(input.to_string()));
        }

        Ok(Self {
            floor,
            floor_inclusive,
            ceiling: Some((ceiling, ceiling_inclusive)),
        })
    }

    /// Whether `version` falls inside the range
    pub fn includes(&self, version: &Version) -> bool {
        let above_floor = if self.floor_inclusive {
            version >= &self.floor
        } else {
            version > &self.floor
        };
        let below_ceiling = match &self.ceiling {
            None => true,
            Some((ceiling, true)) => version <= ceiling,
            Some((ceiling, false)) => version < ceiling,
        };
        above_floor && below_ceiling
    }

    /// Express the range as a filter over `attribute`
    pub fn to_filter(&self, attribute: &str) -> Filter {
        let floor = if self.floor_inclusive {
            Filter::greater_eq(attribute, self.floor.to_string())
        } else {
            Filter::not(Filter::less_eq(attribute, self.floor.to_string()))
        };
        match &self.ceiling {
            None => floor,
            Some((ceiling, inclusive)) => {
                let ceiling = if *inclusive {
                    Filter::less_eq(attribute, ceiling.to_string())
                } else {
                    Filter::not(Filter::greater_eq(attribute, ceiling.to_string()))
                };
                Filter::and(vec![floor, ceiling])
            }
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ceiling {
            None => write!(f, "{}", self.floor),
            Some((ceiling, inclusive)) => write!(
                f,
                "{}{},{}{}",
                if self.floor_inclusive { '[' } else { '(' },
                self.floor,
                ceiling,
                if *inclusive { ']' } else { ')' }
            ),
        }
    }
}

impl TryFrom<String> for VersionRange {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionRange> for String {
    fn from(range: VersionRange) -> Self {
        range.to_string()
    }
}

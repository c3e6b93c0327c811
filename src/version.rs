//! Semantic-version-like strings and wildcard patterns.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::VersionError;

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)(?:-([0-9A-Za-z.]+))?$").expect("valid version regex")
});

/// A parsed `major.minor.patch[-prerelease]` version.
///
/// Equality, ordering and hashing ignore the raw input, so `v0.2.0` and
/// `0.2.0` are the same version.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    raw: String,
}

impl Version {
    /// Parse `s`, accepting an optional leading `v`.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let caps = VERSION_PATTERN
            .captures(s)
            .ok_or_else(|| VersionError::InvalidFormat(s.to_string()))?;

        let number = |idx: usize| -> Result<u64, VersionError> {
            caps[idx]
                .parse()
                .map_err(|_| VersionError::InvalidFormat(s.to_string()))
        };

        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            prerelease: caps.get(4).map(|m| m.as_str().to_string()),
            raw: s.to_string(),
        })
    }

    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        let raw = format!("{major}.{minor}.{patch}");
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            raw,
        }
    }

    /// The string this version was parsed from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    pub fn to_string_with_v(&self) -> String {
        format!("v{self}")
    }

    /// Whether this version matches a dotted pattern such as `0.2.x`.
    ///
    /// Segments of `x` or `*` match anything and missing trailing segments
    /// are treated as wildcards, so `0.x` matches every `0.*.*` release.
    /// Patterns with more than three segments never match.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        let segments: Vec<&str> = pattern.trim_start_matches('v').split('.').collect();
        if segments.is_empty() || segments.len() > 3 {
            return false;
        }

        let parts = [self.major, self.minor, self.patch];
        segments
            .iter()
            .zip(parts.iter())
            .all(|(segment, value)| match *segment {
                "x" | "X" | "*" => true,
                literal => literal.parse::<u64>().ok() == Some(*value),
            })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.prerelease.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
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

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// src/version.rs

//! Version parsing, comparison and range matching
//!
//! Package and host versions look like `2.0`, `2.0.15`, `2.1rc2`, `2.1 beta 1.2`
//! or `2.1dev`. They are decomposed into a fixed set of fields and compared
//! field by field:
//!
//! - numeric `major.minor.patch`
//! - pre-release kind (`alpha < beta < rc < stable`, no tag means stable)
//! - pre-release `major.minor`
//! - a trailing `dev` marker, which sorts a stable version below its release
//!   but leaves a pre-release equal to itself
//!
//! Version expressions are comma-separated lists of tokens: an exact version,
//! a wildcard (`2.0.*`), an inclusive range (`2.0-2.0.99`) or `all`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

static VERSION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\d+)(?:\.(\d+|))?(?:\.)?(\d+|)(?:(alpha|beta|rc)(\d+|)(?:\.)?(\d+|))?(?:(dev))?(\d+|)",
    )
    .expect("version grammar is a valid regex")
});

/// Upper bound substituted for `*` in wildcard tokens
const WILDCARD_CEILING: &str = "999";

/// Lower bound substituted for `*` in wildcard tokens
const WILDCARD_FLOOR: &str = "0";

/// Pre-release channel of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Prerelease {
    Alpha,
    Beta,
    Rc,
    #[default]
    Stable,
}

impl Prerelease {
    pub fn as_str(&self) -> &str {
        match self {
            Prerelease::Alpha => "alpha",
            Prerelease::Beta => "beta",
            Prerelease::Rc => "rc",
            Prerelease::Stable => "stable",
        }
    }

    fn from_tag(tag: &str) -> Self {
        match tag {
            "alpha" => Prerelease::Alpha,
            "beta" => Prerelease::Beta,
            "rc" => Prerelease::Rc,
            _ => Prerelease::Stable,
        }
    }
}

/// A decomposed version string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Prerelease,
    pub prerelease_major: u64,
    pub prerelease_minor: u64,
    pub dev: bool,
}

impl Version {
    /// Decompose a version string.
    ///
    /// Never fails: a string without any digits decomposes to `0.0.0`.
    pub fn parse(input: &str) -> Self {
        let clean = normalize(input);

        let Some(caps) = VERSION_REGEX.captures(&clean) else {
            return Self::default();
        };

        let number = |idx: usize| -> u64 {
            caps.get(idx)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        };

        Self {
            major: number(1),
            minor: number(2),
            patch: number(3),
            prerelease: caps
                .get(4)
                .map(|m| Prerelease::from_tag(m.as_str()))
                .unwrap_or_default(),
            prerelease_major: number(5),
            prerelease_minor: number(6),
            dev: caps.get(7).is_some(),
        }
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.prerelease != Prerelease::Stable {
            write!(
                f,
                "{}{}.{}",
                self.prerelease.as_str(),
                self.prerelease_major,
                self.prerelease_minor
            )?;
        }
        if self.dev {
            write!(f, "dev")?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then(self.prerelease.cmp(&other.prerelease))
            .then(self.prerelease_major.cmp(&other.prerelease_major))
            .then(self.prerelease_minor.cmp(&other.prerelease_minor))
            .then_with(|| match (self.dev, other.dev) {
                // (stable) dev < (stable), but (unstable) dev == (unstable)
                (true, false) if self.prerelease == Prerelease::Stable => Ordering::Less,
                (false, true) if self.prerelease == Prerelease::Stable => Ordering::Greater,
                _ => Ordering::Equal,
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two version strings
pub fn compare(v1: &str, v2: &str) -> Ordering {
    Version::parse(v1).cmp(&Version::parse(v2))
}

/// One token of a version expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionToken {
    /// Matches any version
    All,
    /// Matches versions comparing equal
    Exact(String),
    /// Inclusive range (wildcards are stored as ranges)
    Range { low: String, high: String },
}

impl VersionToken {
    fn parse(token: &str) -> Option<Self> {
        if token.is_empty() {
            return None;
        }
        if token == "all" {
            return Some(VersionToken::All);
        }

        let token = if token.contains('*') {
            format!(
                "{}-{}",
                token.replace('*', WILDCARD_FLOOR),
                token.replace('*', WILDCARD_CEILING)
            )
        } else {
            token.to_string()
        };

        match token.split_once('-') {
            Some((low, high)) => Some(VersionToken::Range {
                low: low.to_string(),
                high: high.to_string(),
            }),
            None => Some(VersionToken::Exact(token)),
        }
    }

    /// Whether `version` falls within this token
    pub fn matches(&self, version: &str) -> bool {
        match self {
            VersionToken::All => true,
            VersionToken::Exact(exact) => compare(version, exact) == Ordering::Equal,
            VersionToken::Range { low, high } => {
                compare(version, low) != Ordering::Less
                    && compare(version, high) != Ordering::Greater
            }
        }
    }

    /// The version used when ranking tokens against each other
    fn floor(&self) -> Option<&str> {
        match self {
            VersionToken::All => None,
            VersionToken::Exact(v) => Some(v),
            VersionToken::Range { low, .. } => Some(low),
        }
    }
}

/// A parsed comma-separated version expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionExpression {
    tokens: Vec<VersionToken>,
}

impl VersionExpression {
    pub fn parse(expression: &str) -> Self {
        let clean = normalize(expression);
        let tokens = clean.split(',').filter_map(VersionToken::parse).collect();
        Self { tokens }
    }

    /// Whether any token accepts `version`
    pub fn satisfied_by(&self, version: &str) -> bool {
        let version = normalize(version);
        self.tokens.iter().any(|t| t.matches(&version))
    }

    /// Greatest token floor that does not exceed `ceiling`
    pub fn highest_below(&self, ceiling: &str) -> Option<String> {
        let ceiling = Version::parse(ceiling);
        let mut best: Option<(&str, Version)> = None;

        for candidate in self.tokens.iter().filter_map(VersionToken::floor) {
            let parsed = Version::parse(candidate);
            if parsed > ceiling {
                continue;
            }
            match &best {
                Some((_, current)) if *current >= parsed => {}
                _ => best = Some((candidate, parsed)),
            }
        }

        best.map(|(s, _)| s.to_string())
    }
}

impl FromStr for VersionExpression {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Check whether `version` satisfies a comma-separated expression
pub fn satisfies(version: &str, expression: &str) -> bool {
    VersionExpression::parse(expression).satisfied_by(version)
}

/// Pick the most specific expression token at or below `ceiling`
pub fn highest_satisfied(expression: &str, ceiling: &str) -> Option<String> {
    VersionExpression::parse(expression).highest_below(ceiling)
}

fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

//! Server version string and parsing helpers.
//!
//! Run files record the version of the server that produced them; import is
//! gated on an exact match. The parser exists for the startup banner and for
//! diagnostics when an import is rejected, so the operator can see *how far*
//! apart the versions are.

use std::fmt;

/// Version of this debugger server, embedded in every exported run.
pub const SERVER_VERSION: &str = "v0.4.1";

/// Pre-release label, ordered `alpha < beta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Label {
    Alpha,
    Beta,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Alpha => write!(f, "alpha"),
            Label::Beta => write!(f, "beta"),
        }
    }
}

/// A parsed server version: `v<major>.<minor>.<patch>[-<label>[.pre-<n>]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub label: Option<Label>,
    pub pre: Option<u32>,
}

impl Version {
    /// Parse a version string. Returns `None` when the string does not match
    /// the `v<major>.<minor>.<patch>[-<label>[.pre-<n>]]` shape.
    pub fn parse(version: &str) -> Option<Version> {
        let rest = version.strip_prefix('v')?;
        let (numbers, suffix) = match rest.split_once('-') {
            Some((n, s)) => (n, Some(s)),
            None => (rest, None),
        };

        let mut parts = numbers.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }

        let (label, pre) = match suffix {
            None => (None, None),
            Some(suffix) => {
                let (label, pre) = match suffix.split_once('.') {
                    Some((label, pre_part)) => {
                        let pre = pre_part.strip_prefix("pre-")?.parse().ok()?;
                        (label, Some(pre))
                    }
                    None => (suffix, None),
                };
                let label = match label {
                    "alpha" => Label::Alpha,
                    "beta" => Label::Beta,
                    _ => return None,
                };
                (Some(label), pre)
            }
        };

        Some(Version {
            major,
            minor,
            patch,
            label,
            pre,
        })
    }

    /// Whether a peer's version satisfies this one: major and minor must be
    /// at least equal; when all three numbers match, labels must match and
    /// the peer's pre-release must not be older.
    pub fn accepts(&self, provided: &Version) -> bool {
        if provided.major < self.major || provided.minor < self.minor {
            return false;
        }
        if (provided.major, provided.minor, provided.patch)
            != (self.major, self.minor, self.patch)
        {
            return true;
        }
        if self.label != provided.label {
            return false;
        }
        match (self.pre, provided.pre) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(required), Some(provided)) => provided >= required,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(label) = self.label {
            write!(f, "-{label}")?;
            if let Some(pre) = self.pre {
                write!(f, ".pre-{pre}")?;
            }
        }
        Ok(())
    }
}

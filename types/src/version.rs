//! Validator version parsing and compatibility bounds.
//!
//! `klog version` prints a line like `klog v6.4` (possibly followed by
//! build metadata). Only `major.minor` matters for the compatibility gate.
//! Windows needs a newer validator than the Unix family: earlier releases
//! could not read the document from a pipe there, and this server only
//! speaks to the validator over stdin.

use std::fmt;

/// Minimum supported validator version on the Unix family.
pub const MIN_VERSION: KlogVersion = KlogVersion::new(2, 6);

/// Minimum supported validator version on Windows (first release with
/// reliable piped stdin).
pub const MIN_VERSION_WINDOWS: KlogVersion = KlogVersion::new(3, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KlogVersion {
    major: u32,
    minor: u32,
}

impl KlogVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse the first `v<major>.<minor>` token out of `klog version` output.
    ///
    /// Returns `None` when no such token exists; trailing segments after the
    /// minor (patch digits, pre-release tags) are ignored.
    #[must_use]
    pub fn parse(output: &str) -> Option<Self> {
        output
            .split_whitespace()
            .find_map(|token| Self::parse_token(token))
    }

    fn parse_token(token: &str) -> Option<Self> {
        let rest = token.strip_prefix('v')?;
        let mut parts = rest.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor_part = parts.next()?;
        // Tolerate "4-beta" style suffixes on the minor.
        let digits: String = minor_part.chars().take_while(char::is_ascii_digit).collect();
        let minor = digits.parse().ok()?;
        Some(Self { major, minor })
    }

    /// The minimum supported version for the platform this server runs on.
    #[must_use]
    pub fn minimum_supported() -> Self {
        if cfg!(windows) {
            MIN_VERSION_WINDOWS
        } else {
            MIN_VERSION
        }
    }

    #[must_use]
    pub fn is_supported(&self) -> bool {
        *self >= Self::minimum_supported()
    }
}

impl fmt::Display for KlogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

//! Filename version convention: `<base> <version>.<ext>`.
//!
//! Exported page versions and attachments land on disk as e.g.
//! `request_config 0.1.5.1.json` or `Release Notes 3.0.md`. This module
//! recognises that convention and turns the version part into a
//! [`VersionToken`] that orders numerically, segment by segment.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

fn versioned_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Lazy base + anchored tail: the version and extension are split off
    // from the right, so "Plan 2 1.0.docx" keeps "Plan 2" as the base.
    // At least two segments, otherwise "Draft 1.docx" would be versioned.
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.+?)\s+([0-9]+(?:\.[0-9]+)+)\.(\w+)$")
            .expect("versioned name pattern is valid")
    })
}

/// A file name decoded as `<base> <version>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedName {
    pub base: String,
    pub version: String,
    pub extension: String,
}

/// Decode a file name following the versioned naming convention.
///
/// Returns `None` for plain files; that is the routine case, not an error.
pub fn parse_versioned_name(file_name: &str) -> Option<VersionedName> {
    let captures = versioned_name_pattern().captures(file_name)?;
    Some(VersionedName {
        base: captures[1].to_string(),
        version: captures[2].to_string(),
        extension: captures[3].to_string(),
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("empty version string")]
    Empty,
    #[error("version {version:?}: segment {segment:?} is not a non-negative integer")]
    InvalidSegment { version: String, segment: String },
}

/// Parsed, order-comparable form of a dot-separated version string.
///
/// Ordering is lexicographic over the integer segments, so `0.1.5.1` sorts
/// before `0.1.10.0`, and `1.0` sorts before `1.0.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(Vec<u64>);

impl VersionToken {
    pub fn parse(version: &str) -> Result<Self, VersionParseError> {
        if version.is_empty() {
            return Err(VersionParseError::Empty);
        }
        version
            .split('.')
            .map(|segment| {
                if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(VersionParseError::InvalidSegment {
                        version: version.to_string(),
                        segment: segment.to_string(),
                    });
                }
                segment
                    .parse::<u64>()
                    .map_err(|_| VersionParseError::InvalidSegment {
                        version: version.to_string(),
                        segment: segment.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(VersionToken)
    }

    pub fn segments(&self) -> &[u64] {
        &self.0
    }

    /// The wiki page version encoded as `N.0`, if this token has that shape.
    ///
    /// Page exports are named `<title> N.0.md`; attachment versions such as
    /// `0.1.5.1` return `None`.
    pub fn page_version(&self) -> Option<i64> {
        match self.0.as_slice() {
            [number, 0] => i64::try_from(*number).ok(),
            _ => None,
        }
    }
}

impl Ord for VersionToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for VersionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
            first = false;
        }
        Ok(())
    }
}

//! Parsers for the output of the remote bootstrap commands.
//!
//! All of these are pure: they take the text a command printed and either
//! extract a value or report why they could not.

use std::collections::HashMap;
use std::fmt;

/// Parse line-oriented `KEY=VALUE` output.
///
/// Lines are split on the first `=`. Blank lines and lines without `=` are
/// skipped; a repeated key keeps its last value.
pub fn parse_env(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let (key, value) = line.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuseVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FuseVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for FuseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// What the helper's `-V` output said about FUSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuseVersionReport {
    Known(FuseVersion),
    /// `version:` was present but followed by nothing.
    Blank,
}

impl FuseVersionReport {
    /// `-o nonempty` became the default in libfuse 3.0 and was removed as an
    /// option; older (or unknown) versions still need it.
    pub fn needs_nonempty(&self) -> bool {
        match self {
            FuseVersionReport::Known(v) => *v < FuseVersion::new(3, 0, 0),
            FuseVersionReport::Blank => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    /// No line contains `version:`.
    MissingToken,
    /// The text after `version:` is not `major[.minor[.patch]]`.
    Malformed(String),
}

const VERSION_TOKEN: &str = "version:";

/// Parse the first `version:` line of a version report.
pub fn parse_fuse_version(output: &str) -> Result<FuseVersionReport, VersionParseError> {
    let remainder = output
        .lines()
        .find_map(|line| line.find(VERSION_TOKEN).map(|i| &line[i + VERSION_TOKEN.len()..]))
        .ok_or(VersionParseError::MissingToken)?
        .trim();

    if remainder.is_empty() {
        return Ok(FuseVersionReport::Blank);
    }

    let malformed = || VersionParseError::Malformed(remainder.to_string());

    let parts: Vec<&str> = remainder.split('.').collect();
    if parts.len() > 3 {
        return Err(malformed());
    }

    let mut numbers = [0u32; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        *slot = part.parse().map_err(|_| malformed())?;
    }

    let [major, minor, patch] = numbers;
    Ok(FuseVersionReport::Known(FuseVersion::new(major, minor, patch)))
}

/// Parse the output of `id -u` / `id -g`: an unsigned decimal integer,
/// optionally followed by a newline.
pub fn parse_id(output: &str) -> Option<u32> {
    let digits = output.trim_end();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parse the anchor script's output into a directory with a trailing slash.
pub fn parse_anchor(output: &str) -> Option<String> {
    let path = output.trim_end();
    if path.is_empty() {
        return None;
    }
    if path.ends_with('/') {
        Some(path.to_string())
    } else {
        Some(format!("{path}/"))
    }
}

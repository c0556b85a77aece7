//! Ignore rules
//!
//! [`IgnoreMatcher`] compiles the configured glob patterns once and answers
//! whether a relative path is excluded from sync. A path is ignored when the
//! path itself or any of its ancestors matches, so an ignored directory drops
//! its whole subtree.
//!
//! Each pattern is tried against the full relative path and against the last
//! segment. `dir/**` additionally matches the directory `dir` itself.
//! Staging files (`*.oxisync-partial`) are always ignored.

use glob::{MatchOptions, Pattern};

use crate::config::SyncConfig;
use crate::domain::errors::DomainError;
use crate::domain::path;

/// Suffix of in-flight download staging files.
pub const STAGING_SUFFIX: &str = ".oxisync-partial";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled ignore patterns
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
}

impl IgnoreMatcher {
    /// Compiles `patterns`, failing on the first invalid glob.
    pub fn new(patterns: &[String]) -> Result<Self, DomainError> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            compiled.push(compile(raw)?);
            if let Some(dir) = raw.strip_suffix("/**") {
                if !dir.is_empty() {
                    compiled.push(compile(dir)?);
                }
            }
        }
        Ok(Self { patterns: compiled })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, DomainError> {
        Self::new(&config.ignore_patterns)
    }

    /// Whether `path` (relative, `/`-separated) or any ancestor is ignored.
    pub fn is_ignored(&self, path: &str) -> bool {
        path::ancestors_and_self(path)
            .into_iter()
            .any(|p| self.matches_entry(p))
    }

    fn matches_entry(&self, entry: &str) -> bool {
        let name = path::file_name(entry);
        if name.ends_with(STAGING_SUFFIX) {
            return true;
        }
        self.patterns.iter().any(|p| {
            p.matches_with(entry, MATCH_OPTIONS) || p.matches_with(name, MATCH_OPTIONS)
        })
    }
}

fn compile(raw: &str) -> Result<Pattern, DomainError> {
    Pattern::new(raw).map_err(|e| DomainError::InvalidPattern {
        pattern: raw.to_string(),
        reason: e.msg.to_string(),
    })
}

/// Whether `name` is a staging file left by an interrupted download.
pub fn is_staging_file(name: &str) -> bool {
    name.ends_with(STAGING_SUFFIX)
}

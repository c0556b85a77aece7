//! Policy engine for automatic conflict resolution
//!
//! Evaluates the configured conflict rules to pick a [`Strategy`] for a path.
//! Rules are glob patterns matched in first-match-wins order; the configured
//! default strategy applies when no rule matches.

use std::fmt;

use glob::Pattern;
use oxisync_core::config::{ConflictRuleConfig, ConflictsConfig};
use tracing::{debug, trace, warn};

use crate::error::ConflictError;

/// How a divergent path is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Surface the conflict and wait for a decision
    Manual,
    /// The side with the newer modification time wins
    MostRecentWins,
    /// Keep both copies under distinct paths
    KeepBoth,
    KeepLocal,
    KeepRemote,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "most_recent_wins" => Some(Self::MostRecentWins),
            "keep_both" => Some(Self::KeepBoth),
            "keep_local" => Some(Self::KeepLocal),
            "keep_remote" => Some(Self::KeepRemote),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::MostRecentWins => "most_recent_wins",
            Self::KeepBoth => "keep_both",
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a rule's glob pattern and strategy
pub fn validate_rule(rule: &ConflictRuleConfig) -> Result<(), ConflictError> {
    Pattern::new(&rule.pattern).map_err(|e| ConflictError::InvalidPattern {
        pattern: rule.pattern.clone(),
        reason: e.to_string(),
    })?;

    Strategy::parse(&rule.strategy).ok_or_else(|| ConflictError::InvalidPattern {
        pattern: rule.pattern.clone(),
        reason: format!(
            "invalid strategy '{}'; valid: manual, most_recent_wins, keep_both, keep_local, keep_remote",
            rule.strategy
        ),
    })?;

    Ok(())
}

/// Engine that evaluates conflict resolution rules
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    rules: Vec<(Pattern, Strategy)>,
    default_strategy: Strategy,
}

impl PolicyEngine {
    /// Creates a PolicyEngine from the default strategy string and a list of rules
    ///
    /// Invalid rules are logged and skipped; an unknown default falls back to manual.
    pub fn new(default_strategy: &str, rules: &[ConflictRuleConfig]) -> Self {
        let default = Strategy::parse(default_strategy).unwrap_or(Strategy::Manual);

        let compiled: Vec<(Pattern, Strategy)> = rules
            .iter()
            .filter_map(|rule| {
                let pattern = match Pattern::new(&rule.pattern) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(pattern = %rule.pattern, error = %e, "Skipping invalid conflict rule pattern");
                        return None;
                    }
                };
                match Strategy::parse(&rule.strategy) {
                    Some(strategy) => Some((pattern, strategy)),
                    None => {
                        warn!(strategy = %rule.strategy, "Skipping invalid conflict rule strategy");
                        None
                    }
                }
            })
            .collect();

        debug!(rules_count = compiled.len(), default = %default, "PolicyEngine initialized");

        Self {
            rules: compiled,
            default_strategy: default,
        }
    }

    pub fn from_config(config: &ConflictsConfig) -> Self {
        Self::new(&config.strategy, &config.rules)
    }

    /// Strategy for a path relative to the sync root.
    pub fn evaluate(&self, relative_path: &str) -> Strategy {
        for (pattern, strategy) in &self.rules {
            if pattern.matches(relative_path) {
                trace!(path = %relative_path, pattern = %pattern, strategy = %strategy, "Conflict rule matched");
                return *strategy;
            }
        }
        self.default_strategy
    }

    pub fn default_strategy(&self) -> Strategy {
        self.default_strategy
    }

    pub fn rules_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::from_config(&ConflictsConfig::default())
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Regex-to-event rules over output lines.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid pattern {pattern:?} for {owner}: {source}")]
    InvalidPattern {
        owner: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

struct Rule {
    owner: String,
    regex: Regex,
    emit: String,
}

/// A set of `{owner, regex, emit}` rules evaluated against single lines.
///
/// Rules are stored in declaration order; matching never fails once a rule
/// is registered (malformed regexes are rejected at `add_pattern` time).
#[derive(Default)]
pub struct PatternMatcher {
    rules: Vec<Rule>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register a rule; rejects malformed regexes up front.
    pub fn add_pattern(
        &mut self,
        owner: &str,
        pattern: &str,
        emit: &str,
    ) -> Result<(), PatternError> {
        let regex = Regex::new(pattern).map_err(|source| PatternError::InvalidPattern {
            owner: owner.to_string(),
            pattern: pattern.to_string(),
            source,
        })?;
        self.rules.push(Rule {
            owner: owner.to_string(),
            regex,
            emit: emit.to_string(),
        });
        Ok(())
    }

    /// Drop every rule registered under `owner`.
    pub fn remove_owner(&mut self, owner: &str) {
        self.rules.retain(|r| r.owner != owner);
    }

    /// Drop all rules.
    pub fn clear(&mut self) {
        self.rules.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Match `input` against every rule; returns each `emit` at most once,
    /// in rule declaration order. Input may contain embedded newlines; each
    /// line is tested separately.
    pub fn match_line(&self, input: &str) -> Vec<String> {
        self.match_rules(input, |_| true)
    }

    /// Like [`match_line`](Self::match_line), restricted to rules owned by
    /// one process.
    pub fn match_for(&self, owner: &str, input: &str) -> Vec<String> {
        self.match_rules(input, |r| r.owner == owner)
    }

    fn match_rules(&self, input: &str, keep: impl Fn(&Rule) -> bool) -> Vec<String> {
        let mut emitted = Vec::new();
        for rule in self.rules.iter().filter(|r| keep(r)) {
            if emitted.iter().any(|e| e == &rule.emit) {
                continue;
            }
            if input.lines().any(|line| rule.regex.is_match(line)) {
                emitted.push(rule.emit.clone());
            }
        }
        emitted
    }
}

#[cfg(test)]
#[path = "pattern_tests.rs"]
mod tests;

// src/core/forwarding/exclusion.rs

//! Path-based forwarding exclusions (§4.8 "Triggering"): exact match, then
//! glob, then regex, in that order.

use crate::core::errors::LiteFsError;
use regex::Regex;
use std::collections::HashSet;
use wildmatch::WildMatch;

pub struct ExclusionMatcher {
    exact: HashSet<String>,
    glob: Vec<WildMatch>,
    regex: Vec<Regex>,
}

impl ExclusionMatcher {
    pub fn new(
        exact: HashSet<String>,
        glob_patterns: &[String],
        regex_patterns: &[String],
    ) -> Result<Self, LiteFsError> {
        let glob = glob_patterns.iter().map(|p| WildMatch::new(p)).collect();
        let regex = regex_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    LiteFsError::configuration(format!("invalid forwarding exclusion regex '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { exact, glob, regex })
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.exact.contains(path) {
            return true;
        }
        if self.glob.iter().any(|g| g.matches(path)) {
            return true;
        }
        self.regex.iter().any(|r| r.is_match(path))
    }
}

//! Rule file format
//!
//! ```yaml
//! groups:
//!   - name: node
//!     interval: 30s
//!     rules:
//!       - record: job:up:sum
//!         expr: sum by (job) (up)
//!       - alert: InstanceDown
//!         expr: up == 0
//!         for: 5m
//!         labels:
//!           severity: page
//!         annotations:
//!           summary: instance down
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::METRIC_NAME_LABEL;

use super::RuleError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    #[serde(default)]
    pub groups: Vec<RuleGroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleGroupConfig {
    pub name: String,

    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,

    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default)]
    pub record: Option<String>,

    #[serde(default)]
    pub alert: Option<String>,

    pub expr: String,

    #[serde(default, rename = "for", with = "humantime_serde")]
    pub hold: Option<Duration>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Read and validate a rule file.
pub fn load_file(path: &Path) -> Result<RuleFile, RuleError> {
    let content = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: RuleFile = serde_yaml::from_str(&content).map_err(|source| RuleError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let errors = file.validate()?;
    if !errors.is_empty() {
        return Err(RuleError::Invalid {
            path: path.to_path_buf(),
            message: errors.join("; "),
        });
    }
    Ok(file)
}

struct NamePatterns {
    label: Regex,
    metric: Regex,
}

impl NamePatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            label: Regex::new("^[a-zA-Z_][a-zA-Z0-9_]*$")?,
            metric: Regex::new("^[a-zA-Z_:][a-zA-Z0-9_:]*$")?,
        })
    }
}

impl RuleFile {
    /// Every problem found in the file, empty if it is valid.
    pub fn validate(&self) -> Result<Vec<String>, RuleError> {
        let patterns = NamePatterns::new()?;
        let mut errors = Vec::new();
        let mut names = HashSet::new();

        for group in &self.groups {
            if group.name.is_empty() {
                errors.push("group name must not be empty".to_string());
            } else if !names.insert(group.name.as_str()) {
                errors.push(format!("group {:?} is defined more than once", group.name));
            }
            if group.interval.is_some_and(|interval| interval.is_zero()) {
                errors.push(format!("group {:?}: interval must be positive", group.name));
            }

            for (index, rule) in group.rules.iter().enumerate() {
                for message in rule.validate(&patterns) {
                    errors.push(format!("group {:?}, rule {}: {message}", group.name, index + 1));
                }
            }
        }
        Ok(errors)
    }
}

impl RuleConfig {
    fn validate(&self, patterns: &NamePatterns) -> Vec<String> {
        let mut errors = Vec::new();

        match (&self.record, &self.alert) {
            (Some(_), Some(_)) => errors.push("only one of 'record' and 'alert' may be set".into()),
            (None, None) => errors.push("one of 'record' or 'alert' must be set".into()),
            (Some(record), None) => {
                if !patterns.metric.is_match(record) {
                    errors.push(format!("invalid recording rule name {record:?}"));
                }
                if !self.annotations.is_empty() {
                    errors.push("recording rules cannot have annotations".into());
                }
                if self.hold.is_some() {
                    errors.push("recording rules cannot have 'for'".into());
                }
            }
            (None, Some(alert)) => {
                if alert.is_empty() {
                    errors.push("alert name must not be empty".into());
                }
            }
        }

        if self.expr.trim().is_empty() {
            errors.push("'expr' must not be empty".into());
        }

        for name in self.labels.keys().chain(self.annotations.keys()) {
            if !patterns.label.is_match(name) {
                errors.push(format!("invalid label name {name:?}"));
            }
        }
        if self.labels.contains_key(METRIC_NAME_LABEL) {
            errors.push(format!("label {METRIC_NAME_LABEL} is reserved"));
        }

        errors
    }
}

//! Tiered matrix selection.

use reflow_core::context::TriggerKind;
use reflow_core::ids::JobId;
use reflow_core::workflow::MatrixConfig;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Version used when a tier is empty and no default is configured.
pub const FALLBACK_VERSION: &str = "latest";

/// One combination of matrix axis values, in axis order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixCell {
    values: Vec<(String, String)>,
}

impl MatrixCell {
    /// The cell of a job that does not expand over the matrix.
    pub fn empty() -> Self {
        Self::default()
    }

    fn with(mut self, axis: &str, value: &str) -> Self {
        self.values.push((axis.to_string(), value.to_string()));
        self
    }

    pub fn get(&self, axis: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(a, _)| a == axis)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(_, v)| v.as_str())
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values.iter().cloned().collect()
    }

    /// Instance id for this cell, e.g. `test (3.12, ubuntu-latest)`.
    pub fn instance_id(&self, job: &JobId) -> JobId {
        JobId::for_matrix_cell(job, self.values())
    }

    fn matches(&self, exclude: &BTreeMap<String, String>) -> bool {
        !exclude.is_empty()
            && exclude
                .iter()
                .all(|(axis, value)| self.get(axis) == Some(value.as_str()))
    }
}

/// Picks the version tier for a trigger and expands it over the OS axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixSelector;

impl MatrixSelector {
    pub fn new() -> Self {
        Self
    }

    /// Ordered combinations for a trigger. Never empty.
    pub fn select(&self, trigger: TriggerKind, config: &MatrixConfig) -> Vec<MatrixCell> {
        let tier = if trigger.is_fast_feedback() {
            &config.pr_versions
        } else {
            &config.comprehensive_versions
        };

        let default = config.default_version.as_deref().unwrap_or(FALLBACK_VERSION);
        let versions: Vec<&str> = if tier.is_empty() {
            debug!(%trigger, version = default, "Matrix tier empty, using default version");
            vec![default]
        } else {
            first_occurrences(tier)
        };

        let all = self.cross(config, &versions);
        let kept: Vec<MatrixCell> = all
            .iter()
            .filter(|cell| !config.exclude.iter().any(|ex| cell.matches(ex)))
            .cloned()
            .collect();

        if !kept.is_empty() {
            return kept;
        }

        warn!(%trigger, "Matrix excludes removed every combination, falling back to default");
        let defaults = self.cross(config, &[default]);
        defaults
            .iter()
            .find(|cell| !config.exclude.iter().any(|ex| cell.matches(ex)))
            .or_else(|| defaults.first())
            .cloned()
            .into_iter()
            .collect()
    }

    /// Version-major cross product: for each version, each OS.
    fn cross(&self, config: &MatrixConfig, versions: &[&str]) -> Vec<MatrixCell> {
        let os = first_occurrences(&config.os);
        let mut cells = Vec::new();
        for version in versions {
            let base = MatrixCell::empty().with(&config.version_axis, version);
            if os.is_empty() {
                cells.push(base);
                continue;
            }
            for name in &os {
                cells.push(base.clone().with(&config.os_axis, name));
            }
        }
        cells
    }
}

/// Axis values with repeats dropped, keeping the first occurrence.
fn first_occurrences(values: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    values
        .iter()
        .map(String::as_str)
        .filter(|value| seen.insert(*value))
        .collect()
}

//! Pipeline stages: a fixed, ordered, finite set loaded from configuration.
//!
//! Order only matters for progress display. Any stage may move to any other
//! stage; there are no forbidden edges.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage names used when a project does not configure its own pipeline.
pub const DEFAULT_STAGES: [&str; 6] = [
    "Lead",
    "Qualified",
    "Proposal",
    "Negotiation",
    "Closed Won",
    "Closed Lost",
];

/// One pipeline stage name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stage(String);

impl Stage {
    /// Wrap a stage name without checking it against a [`StageSet`].
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Stage {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Error returned when a stage identifier is not in the configured set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid stage: '{0}'")]
pub struct InvalidStage(pub String);

/// The ordered set of valid stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct StageSet {
    stages: Vec<Stage>,
}

impl StageSet {
    /// Build a stage set from names in display order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidStage`] for a blank name and
    /// [`PipelineError::Config`] for an empty list or a duplicate name.
    pub fn new<I, S>(names: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut stages: Vec<Stage> = Vec::new();
        for name in names {
            let name = name.into();
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(PipelineError::invalid_stage(name));
            }
            if stages
                .iter()
                .any(|s| s.as_str().eq_ignore_ascii_case(trimmed))
            {
                return Err(PipelineError::Config(format!(
                    "duplicate stage '{trimmed}'"
                )));
            }
            stages.push(Stage::new(trimmed));
        }

        if stages.is_empty() {
            return Err(PipelineError::Config("stage list is empty".to_string()));
        }

        Ok(Self { stages })
    }

    /// Stages in display order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false: construction rejects empty sets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[must_use]
    pub fn contains(&self, stage: &Stage) -> bool {
        self.stages.contains(stage)
    }

    /// Resolve free-form text (trimmed, case-insensitive) to a configured stage.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStage`] when no configured stage matches.
    pub fn resolve(&self, raw: &str) -> Result<Stage, InvalidStage> {
        let wanted = raw.trim();
        self.stages
            .iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(wanted))
            .cloned()
            .ok_or_else(|| InvalidStage(raw.to_string()))
    }

    /// Position of `stage` in the configured order.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStage`] when the stage is not configured.
    pub fn index(&self, stage: &Stage) -> Result<usize, InvalidStage> {
        self.stages
            .iter()
            .position(|s| s == stage)
            .ok_or_else(|| InvalidStage(stage.to_string()))
    }

    /// Progress percentage: `round(index / (len - 1) * 100)`, or 100 for a
    /// single-stage pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStage`] when the stage is not configured.
    pub fn progress(&self, stage: &Stage) -> Result<u8, InvalidStage> {
        let index = self.index(stage)?;
        let last = self.stages.len().saturating_sub(1);
        if last == 0 {
            return Ok(100);
        }
        // Integer round-half-up of index * 100 / last.
        let percent = (index * 200 + last) / (last * 2);
        Ok(u8::try_from(percent).unwrap_or(100))
    }
}

impl Default for StageSet {
    fn default() -> Self {
        Self {
            stages: DEFAULT_STAGES.iter().map(|s| Stage::new(*s)).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for StageSet {
    type Error = PipelineError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<StageSet> for Vec<String> {
    fn from(set: StageSet) -> Self {
        set.stages.into_iter().map(|s| s.0).collect()
    }
}

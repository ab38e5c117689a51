//! Core domain types: the typed roadmap tree and the audit records built on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, RoadmendError};

/// `new_url` written when a previously dead link answers again.
pub const NOW_VALID: &str = "NOW_VALID";

/// Placeholder used for a missing step title or description.
const MISSING_FIELD: &str = "N/A";

// ---------------------------------------------------------------------------
// Roadmap tree
// ---------------------------------------------------------------------------

/// A generated learning roadmap: `{"roadmap": [stage, ...]}`.
///
/// Every level keeps the JSON it was parsed from and exposes typed,
/// bounds-checked views over it. A known key holding a value of the wrong
/// type reads as absent rather than failing the document. Serializing writes
/// the original objects back with only edited `study_link` values changed, so
/// key order, explicit `null`s, and unknown keys come through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadmapDocument {
    root: Map<String, Value>,
    stages: Vec<Stage>,
}

/// One stage of a roadmap.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    raw: Value,
    steps: Vec<Step>,
}

/// One learning step, pointing at a single external study resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    raw: Value,
}

fn str_field<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str)
}

impl Step {
    fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    pub fn title(&self) -> Option<&str> {
        str_field(&self.raw, "title")
    }

    pub fn description(&self) -> Option<&str> {
        str_field(&self.raw, "description")
    }

    /// The study link, when it is a string.
    pub fn study_link(&self) -> Option<&str> {
        str_field(&self.raw, "study_link")
    }

    /// The study link, if it is an external http(s) reference.
    pub fn external_link(&self) -> Option<&str> {
        self.study_link()
            .filter(|link| !link.is_empty() && link.starts_with("http"))
    }

    pub fn title_or_placeholder(&self) -> &str {
        self.title().unwrap_or(MISSING_FIELD)
    }

    pub fn description_or_placeholder(&self) -> &str {
        self.description().unwrap_or(MISSING_FIELD)
    }

    /// Raw value of any key on the step.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    /// Overwrite the study link in place. Returns `false` if the step is not
    /// a JSON object.
    pub fn set_study_link(&mut self, url: &str) -> bool {
        match self.raw.as_object_mut() {
            Some(fields) => {
                fields.insert("study_link".to_string(), Value::String(url.to_string()));
                true
            }
            None => false,
        }
    }
}

impl Stage {
    fn from_value(raw: Value) -> Self {
        let steps = raw
            .get("steps")
            .and_then(Value::as_array)
            .map(|steps| steps.iter().cloned().map(Step::from_value).collect())
            .unwrap_or_default();
        Self { raw, steps }
    }

    pub fn title(&self) -> Option<&str> {
        str_field(&self.raw, "stage_title")
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    fn to_value(&self) -> Value {
        let mut raw = self.raw.clone();
        if let Some(slot) = raw.get_mut("steps").filter(|slot| slot.is_array()) {
            *slot = Value::Array(self.steps.iter().map(|step| step.raw.clone()).collect());
        }
        raw
    }
}

impl RoadmapDocument {
    /// Parse a stored roadmap body.
    ///
    /// Fails only on invalid JSON, a non-object root, or a `roadmap` key that
    /// is not an array. Stages and steps of unexpected shape are kept as-is
    /// and simply carry no links.
    pub fn parse(json: &str) -> Result<Self> {
        let root: Map<String, Value> = serde_json::from_str(json)
            .map_err(|e| RoadmendError::parse(format!("roadmap JSON: {e}")))?;

        let stages = match root.get("roadmap") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(stages)) => stages.iter().cloned().map(Stage::from_value).collect(),
            Some(_) => return Err(RoadmendError::parse("roadmap JSON: `roadmap` is not an array")),
        };

        Ok(Self { root, stages })
    }

    /// Serialize back to the stored representation.
    pub fn to_json(&self) -> Result<String> {
        let mut root = self.root.clone();
        if let Some(slot) = root.get_mut("roadmap").filter(|slot| slot.is_array()) {
            *slot = Value::Array(self.stages.iter().map(Stage::to_value).collect());
        }
        serde_json::to_string(&root).map_err(|e| RoadmendError::parse(format!("roadmap JSON: {e}")))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Raw value of any top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Bounds-checked access to a step.
    pub fn step(&self, stage_index: usize, step_index: usize) -> Option<&Step> {
        self.stages.get(stage_index)?.steps.get(step_index)
    }

    /// Bounds-checked mutable access to a step.
    pub fn step_mut(&mut self, stage_index: usize, step_index: usize) -> Option<&mut Step> {
        self.stages.get_mut(stage_index)?.steps.get_mut(step_index)
    }

    /// Every external study link in document order, as
    /// `(stage_index, step_index, step, url)`.
    pub fn study_links(&self) -> impl Iterator<Item = (usize, usize, &Step, &str)> {
        self.stages.iter().enumerate().flat_map(|(stage_index, stage)| {
            stage
                .steps
                .iter()
                .enumerate()
                .filter_map(move |(step_index, step)| {
                    step.external_link()
                        .map(|url| (stage_index, step_index, step, url))
                })
        })
    }
}

// ---------------------------------------------------------------------------
// Stored rows
// ---------------------------------------------------------------------------

/// A roadmap row as listed from the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadmapRow {
    /// Opaque document identifier.
    pub id: String,
    /// Career domain the roadmap was generated for.
    pub domain: String,
    /// Raw JSON body.
    pub roadmap_json: String,
}

/// One concrete placement of a URL inside a roadmap. Computed fresh each run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOccurrence {
    pub roadmap_id: String,
    pub domain: String,
    pub stage_index: usize,
    pub step_index: usize,
    pub title: String,
    pub description: String,
    pub url: String,
}

/// Persistent audit row for one invalid-link instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidLinkRecord {
    pub id: i64,
    pub roadmap_id: String,
    pub stage_index: usize,
    pub step_index: usize,
    pub original_url: String,
    /// Numeric status, `"Timeout"`, or an error label.
    pub status_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
    /// Replacement URL, or [`NOW_VALID`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,
}

impl InvalidLinkRecord {
    /// Terminal state: fixed or found reachable again.
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

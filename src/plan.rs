//! Typed action plans parsed from LLM replies.
//!
//! The LLM is an untrusted text source: its reply is expected to contain
//! one JSON object somewhere in the prose. Parsing pulls out the first
//! `{` .. last `}` window, deserializes it into the typed plan and then
//! validates the cross-field rules. Optional fields are default-filled
//! rather than rejected; enumerations and URLs are validated strictly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Rejected plan, carrying the raw reply for diagnostics.
#[derive(Debug, Error)]
#[error("invalid action plan: {reason}")]
pub struct PlanError {
    pub reason: String,
    /// The offending raw LLM output.
    pub raw: String,
}

impl PlanError {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

/// The four browser operations a plan may request.
///
/// Unknown kinds fail deserialization; they are never silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    Wait,
    Extract,
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Wait => "wait",
            ActionKind::Extract => "extract",
        }
    }
}

/// One step of an action plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(alias = "type")]
    pub kind: ActionKind,

    /// Selector or semantic description of the target element.
    #[serde(default, alias = "selector")]
    pub target: String,

    /// URL for navigate, text for type; free-form otherwise.
    #[serde(default)]
    pub value: String,

    /// Optional element to wait for after the action.
    #[serde(default, alias = "waitFor")]
    pub wait_for: String,

    /// Press Enter after typing.
    #[serde(default, alias = "pressEnter")]
    pub press_enter: bool,
}

/// A validated plan: target URL, ordered actions, optional extraction
/// directives. Created per command, discarded after execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub url: String,

    #[serde(default)]
    pub actions: Vec<Action>,

    #[serde(default)]
    pub extraction: serde_json::Map<String, Value>,
}

impl ActionPlan {
    pub fn has_extraction(&self) -> bool {
        !self.extraction.is_empty()
    }
}

/// Parse and validate a raw LLM reply into an [`ActionPlan`].
pub fn parse_plan(raw: &str) -> Result<ActionPlan, PlanError> {
    let window = json_window(raw)
        .ok_or_else(|| PlanError::new("no JSON object found in reply", raw))?;

    let mut plan: ActionPlan = serde_json::from_str(window)
        .map_err(|err| PlanError::new(format!("malformed plan JSON: {err}"), raw))?;

    plan.url = normalize_url(&plan.url)
        .map_err(|err| PlanError::new(format!("invalid plan url: {err}"), raw))?;

    for (index, action) in plan.actions.iter_mut().enumerate() {
        match action.kind {
            ActionKind::Navigate => {
                action.value = normalize_url(&action.value).map_err(|err| {
                    PlanError::new(format!("action {}: invalid navigate url: {err}", index + 1), raw)
                })?;
            }
            ActionKind::Click | ActionKind::Type => {
                if action.target.trim().is_empty() {
                    return Err(PlanError::new(
                        format!("action {}: {} requires a target", index + 1, action.kind.name()),
                        raw,
                    ));
                }
            }
            ActionKind::Wait | ActionKind::Extract => {}
        }
    }

    Ok(plan)
}

/// Slice out the first `{` .. last `}` window, tolerating surrounding
/// prose in the reply.
pub(crate) fn json_window(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end >= start).then(|| &raw[start..=end])
}

/// Prepend `https://` when the scheme is missing, then require a valid
/// absolute URL.
pub fn normalize_url(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty URL".into());
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&candidate).map_err(|err| format!("'{trimmed}': {err}"))?;
    if parsed.host_str().map(|h| h.is_empty()).unwrap_or(true) {
        return Err(format!("'{trimmed}': missing host"));
    }
    Ok(parsed.to_string())
}

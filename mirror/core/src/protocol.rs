//! Wire Protocol
//!
//! Typed shapes for everything the agent backend sends: the per-frame events
//! of a streaming turn and the status polling body.
//!
//! # Frame Payloads
//!
//! Each streamed frame carries one JSON object with a `type` discriminator:
//!
//! ```text
//! {"type":"thought","step":1,"content":"Looking at the repo"}
//! {"type":"action","step":2,"content":"search","tool_name":"grep","tool_input":{"q":"foo"}}
//! {"type":"final","final_answer":"Done","suggestions":["Show the diff"]}
//! {"type":"error","error":"agent crashed","final":true}
//! {"type":"status","message":"Indexing repository"}
//! ```
//!
//! Step frames use the step kind itself as `type` (or `type:"step"` with a
//! `kind` field). Unknown fields are tolerated here, at the deserialization
//! boundary, and nowhere else. A step's `content` is always normalized to
//! text; when the backend sent structured JSON instead, the verbatim value is
//! kept in [`ToolMetadata::structured_content`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MirrorError;

// ============================================================================
// Steps
// ============================================================================

/// Kind of a reasoning step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Internal reasoning
    Thought,
    /// A tool invocation
    Action,
    /// A tool result
    Observation,
    /// Part of the user-facing answer
    Answer,
    /// Backend progress notice
    Status,
    /// A non-terminal failure note
    Error,
}

impl StepKind {
    /// Parse a wire step kind
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "thought" | "thinking" => Some(Self::Thought),
            "action" | "tool" => Some(Self::Action),
            "observation" | "tool_result" => Some(Self::Observation),
            "answer" => Some(Self::Answer),
            "status" => Some(Self::Status),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Wire name of this kind
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thought => "thought",
            Self::Action => "action",
            Self::Observation => "observation",
            Self::Answer => "answer",
            Self::Status => "status",
            Self::Error => "error",
        }
    }

    /// Whether steps of this kind come from the agent's numbered reasoning
    /// sequence, so a frame typed with the kind's name is a step frame
    #[must_use]
    pub fn is_sequenced(self) -> bool {
        matches!(
            self,
            Self::Thought | Self::Action | Self::Observation | Self::Answer
        )
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool details attached to a step
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Tool the agent invoked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Arguments passed to the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    /// Truncated tool output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output_preview: Option<String>,
    /// Tool name as reported by the observation side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_tool_name: Option<String>,
    /// Verbatim `content` when the wire value was not a string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl ToolMetadata {
    /// True when no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tool_name.is_none()
            && self.tool_input.is_none()
            && self.tool_output_preview.is_none()
            && self.observed_tool_name.is_none()
            && self.structured_content.is_none()
    }
}

/// One unit of agent reasoning or output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Backend-assigned sequence number; advisory only
    pub ordinal: i64,
    /// What kind of step this is
    pub kind: StepKind,
    /// Step text
    pub content: String,
    /// Tool details, absent when the step carried none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ToolMetadata>,
}

impl Step {
    /// Create a step without tool metadata
    pub fn new(ordinal: i64, kind: StepKind, content: impl Into<String>) -> Self {
        Self {
            ordinal,
            kind,
            content: content.into(),
            metadata: None,
        }
    }

    /// Attach tool metadata, dropping it again if it is empty
    #[must_use]
    pub fn with_metadata(mut self, metadata: ToolMetadata) -> Self {
        self.metadata = (!metadata.is_empty()).then_some(metadata);
        self
    }

    /// Tool name, if this step carried one
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        self.metadata.as_ref()?.tool_name.as_deref()
    }
}

// ============================================================================
// Protocol Events
// ============================================================================

/// A decoded frame of a streaming turn
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// One reasoning step
    Step(Step),
    /// The turn finished
    Final {
        /// Authoritative answer text, if the backend sent one
        final_answer: Option<String>,
        /// Authoritative step list; overrides streamed steps by ordinal
        steps: Vec<Step>,
        /// Follow-up prompts offered to the user
        suggestions: Vec<String>,
    },
    /// Something went wrong
    Error {
        /// Failure description
        message: String,
        /// Whether the turn ends here
        is_final: bool,
    },
    /// A progress notice
    Status {
        /// Notice text
        message: String,
    },
}

impl ProtocolEvent {
    /// Whether the stream ends after this event
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Final { .. } | Self::Error { is_final: true, .. }
        )
    }

    /// Build a terminal error event
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            is_final: true,
        }
    }

    /// Decode one frame payload
    ///
    /// `next_ordinal` is used for step frames that omit their `step` number.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Decode`] if the payload is not JSON or does not
    /// match any frame shape.
    pub fn from_payload(payload: &str, next_ordinal: i64) -> Result<Self, MirrorError> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(value, next_ordinal)
    }

    /// Decode one already-parsed frame payload
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Decode`] if the value does not match any frame shape.
    pub fn from_value(value: Value, next_ordinal: i64) -> Result<Self, MirrorError> {
        if !value.is_object() {
            return Err(MirrorError::Decode("frame payload is not an object".into()));
        }

        let frame_type = match value.get("type").and_then(Value::as_str) {
            Some(t) => t.to_ascii_lowercase(),
            None => infer_frame_type(&value)
                .ok_or_else(|| MirrorError::Decode("frame has no type".into()))?
                .to_string(),
        };

        match frame_type.as_str() {
            "final" => {
                let wire: WireFinal = serde_json::from_value(value)?;
                let steps = wire
                    .steps
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| s.into_step(None, i as i64 + 1))
                    .collect();
                Ok(Self::Final {
                    final_answer: wire.final_answer,
                    steps,
                    suggestions: wire.suggestions,
                })
            }
            "error" => {
                let wire: WireError = serde_json::from_value(value)?;
                let message = wire
                    .error
                    .and_then(value_to_text)
                    .or(wire.message)
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "unknown backend error".to_string());
                Ok(Self::Error {
                    message,
                    is_final: wire.is_final.unwrap_or(true),
                })
            }
            "status" => {
                let wire: WireStatus = serde_json::from_value(value)?;
                let message = wire
                    .message
                    .or_else(|| wire.content.and_then(value_to_text))
                    .unwrap_or_default();
                Ok(Self::Status { message })
            }
            "step" => {
                let wire: WireStep = serde_json::from_value(value)?;
                let kind = wire
                    .kind
                    .as_deref()
                    .and_then(StepKind::parse)
                    .unwrap_or(StepKind::Thought);
                Ok(Self::Step(wire.into_step(Some(kind), next_ordinal)))
            }
            other => match StepKind::parse(other) {
                Some(kind) if kind.is_sequenced() => {
                    let wire: WireStep = serde_json::from_value(value)?;
                    Ok(Self::Step(wire.into_step(Some(kind), next_ordinal)))
                }
                _ => Err(MirrorError::Decode(format!("unknown frame type `{other}`"))),
            },
        }
    }
}

fn infer_frame_type(value: &Value) -> Option<&'static str> {
    if value.get("final_answer").is_some() {
        Some("final")
    } else if value.get("error").is_some() {
        Some("error")
    } else if value.get("step").is_some() {
        Some("step")
    } else {
        None
    }
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// Wire Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireStep {
    #[serde(default)]
    step: Option<i64>,
    #[serde(default, rename = "type")]
    type_: Option<String>,
    #[serde(default, alias = "step_type")]
    kind: Option<String>,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Option<Value>,
    #[serde(default)]
    tool_output_preview: Option<Value>,
    #[serde(default)]
    observed_tool_name: Option<String>,
}

impl WireStep {
    fn into_step(self, kind: Option<StepKind>, fallback_ordinal: i64) -> Step {
        let kind = kind
            .or_else(|| self.type_.as_deref().and_then(StepKind::parse))
            .or_else(|| self.kind.as_deref().and_then(StepKind::parse))
            .unwrap_or(StepKind::Thought);

        let (content, structured_content) = match self.content {
            Value::Null => (String::new(), None),
            Value::String(s) => (s, None),
            other => (other.to_string(), Some(other)),
        };

        let metadata = ToolMetadata {
            tool_name: self.tool_name,
            tool_input: self.tool_input.filter(|v| !v.is_null()),
            tool_output_preview: self.tool_output_preview.and_then(value_to_text),
            observed_tool_name: self.observed_tool_name,
            structured_content,
        };

        Step::new(self.step.unwrap_or(fallback_ordinal), kind, content).with_metadata(metadata)
    }
}

#[derive(Debug, Deserialize)]
struct WireFinal {
    #[serde(default)]
    final_answer: Option<String>,
    #[serde(default)]
    steps: Vec<WireStep>,
    #[serde(default)]
    suggestions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "final")]
    is_final: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    content: Option<Value>,
}

// ============================================================================
// Status Polling
// ============================================================================

/// Classification of a status report
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusPhase {
    /// Still working; keep polling
    InProgress,
    /// Finished successfully
    Ready,
    /// The backend reported a failure
    Failed,
}

/// Optional progress details of a status report
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Percent complete, 0-100
    #[serde(default, rename = "progress_percentage")]
    pub percentage: Option<f64>,
    /// Items processed so far
    #[serde(default, rename = "progress_items_processed")]
    pub items_processed: Option<u64>,
    /// Total items to process
    #[serde(default, rename = "progress_total_items")]
    pub total_items: Option<u64>,
    /// Item currently being processed
    #[serde(default, rename = "progress_current_item")]
    pub current_item: Option<String>,
    /// Estimated seconds remaining
    #[serde(default, rename = "progress_estimated_time")]
    pub estimated_time_secs: Option<f64>,
}

impl Progress {
    /// True when the backend sent no progress fields at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.percentage.is_none()
            && self.items_processed.is_none()
            && self.total_items.is_none()
            && self.current_item.is_none()
            && self.estimated_time_secs.is_none()
    }

    /// Best available completion fraction in `0.0..=1.0`
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        if let Some(pct) = self.percentage {
            return Some((pct / 100.0).clamp(0.0, 1.0));
        }
        match (self.items_processed, self.total_items) {
            (Some(done), Some(total)) if total > 0 => {
                Some((done as f64 / total as f64).clamp(0.0, 1.0))
            }
            _ => None,
        }
    }
}

/// Body of the status polling endpoint
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Backend status string
    #[serde(default)]
    pub status: String,
    /// Human-readable status message
    #[serde(default)]
    pub message: Option<String>,
    /// Failure description, when the backend failed
    #[serde(default)]
    pub error: Option<String>,
    /// Progress details; any subset may be present
    #[serde(flatten)]
    pub progress: Progress,
}

impl StatusReport {
    /// Create a report with only a status string
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }

    /// Classify this report
    #[must_use]
    pub fn phase(&self) -> StatusPhase {
        match self.status.trim().to_ascii_lowercase().as_str() {
            "ready" | "completed" | "complete" | "indexed" | "success" => StatusPhase::Ready,
            "failed" | "error" => StatusPhase::Failed,
            _ => StatusPhase::InProgress,
        }
    }

    /// Message to show when the backend reported a failure
    #[must_use]
    pub fn failure_message(&self) -> String {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .filter(|m| !m.trim().is_empty())
            .map_or_else(|| format!("backend reported `{}`", self.status), str::to_string)
    }
}

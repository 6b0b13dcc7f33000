//! Transcript Reducer
//!
//! A [`Turn`] is one request/response cycle with the agent backend. Its
//! [`Transcript`] is the ordered step history and `visible_content` is what a
//! surface shows as the answer.
//!
//! The reducer is a pure fold: [`reduce`] takes a Turn and one
//! [`ProtocolEvent`] and returns the next Turn. It has no rendering or I/O
//! dependency, so the whole state machine is unit-testable.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──first event──▶ Streaming ──Final──────▶ Completed
//!                              │     ──fatal Error─▶ Failed
//!                              └─────cancel()─────▶ Cancelled
//! ```
//!
//! Once terminal, a Turn ignores every further event.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{ProtocolEvent, Step, StepKind};

/// Shown when a turn completes without any answer text
pub const NO_ANSWER_PLACEHOLDER: &str = "The agent finished without producing an answer.";

// ============================================================================
// Identifiers and State
// ============================================================================

/// Unique identifier for a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub Uuid);

impl TurnId {
    /// Create a new unique turn ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Lifecycle state of a turn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnState {
    /// Request issued, nothing received yet
    #[default]
    Pending,
    /// Events are arriving
    Streaming,
    /// The backend sent its final frame
    Completed,
    /// A terminal error ended the turn
    Failed,
    /// The turn was superseded or aborted locally
    Cancelled,
}

impl TurnState {
    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

// ============================================================================
// Transcript
// ============================================================================

/// Ordered step history of a turn
///
/// Arrival order is authoritative; ordinals are advisory. The transcript
/// never shrinks.
///
/// Steps that arrived with a backend ordinal are indexed by it, whatever
/// their kind. Steps synthesized locally from `Status` and non-final `Error`
/// events carry no ordinal of their own and are not indexed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    steps: Vec<Step>,
    #[serde(skip)]
    ordinals: HashMap<i64, usize>,
}

impl Transcript {
    /// Create an empty transcript
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether there are no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All steps in arrival order
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Iterate steps in arrival order
    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    /// Most recent step
    #[must_use]
    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Steps of one kind, in arrival order
    pub fn of_kind(&self, kind: StepKind) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(move |s| s.kind == kind)
    }

    /// Whether a step with this backend ordinal is already present
    #[must_use]
    pub fn contains_ordinal(&self, ordinal: i64) -> bool {
        self.ordinals.contains_key(&ordinal)
    }

    fn push_ordered(&mut self, step: Step) {
        self.ordinals.insert(step.ordinal, self.steps.len());
        self.steps.push(step);
    }

    /// Append a locally synthesized step unless it repeats the previous one
    fn push_local(&mut self, step: Step) -> bool {
        let repeat = self
            .steps
            .last()
            .is_some_and(|last| last.kind == step.kind && last.content == step.content);
        if repeat {
            return false;
        }
        self.steps.push(step);
        true
    }

    /// Replace by ordinal if present, otherwise append
    fn upsert(&mut self, step: Step) {
        match self.ordinals.get(&step.ordinal) {
            Some(&idx) => self.steps[idx] = step,
            None => self.push_ordered(step),
        }
    }

    fn local_ordinal(&self) -> i64 {
        self.steps.last().map_or(0, |s| s.ordinal)
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

// ============================================================================
// Turn
// ============================================================================

/// One request/response cycle
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Turn {
    id: TurnId,
    prompt: String,
    state: TurnState,
    transcript: Transcript,
    visible_content: String,
    suggestions: Vec<String>,
    error: Option<String>,
    #[serde(skip)]
    answer_buffer: String,
}

impl Turn {
    /// Create a pending turn for a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: TurnId::new(),
            prompt: prompt.into(),
            state: TurnState::Pending,
            transcript: Transcript::new(),
            visible_content: String::new(),
            suggestions: Vec::new(),
            error: None,
            answer_buffer: String::new(),
        }
    }

    /// Turn identifier
    #[must_use]
    pub fn id(&self) -> TurnId {
        self.id
    }

    /// The user's input for this turn
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Whether the turn has reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Step history
    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Text a surface should show as the answer
    #[must_use]
    pub fn visible_content(&self) -> &str {
        &self.visible_content
    }

    /// Follow-up prompts delivered with the final frame
    #[must_use]
    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// Terminal error message, for failed turns
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Apply one event in place
    ///
    /// Returns `true` if the turn changed.
    pub fn apply(&mut self, event: &ProtocolEvent) -> bool {
        if self.state.is_terminal() {
            tracing::trace!(turn = %self.id, state = ?self.state, "ignoring event after terminal state");
            return false;
        }

        let mut changed = false;
        if self.state == TurnState::Pending {
            self.state = TurnState::Streaming;
            changed = true;
        }

        match event {
            ProtocolEvent::Step(step) => changed |= self.apply_step(step),
            ProtocolEvent::Final {
                final_answer,
                steps,
                suggestions,
            } => {
                for step in steps {
                    self.transcript.upsert(step.clone());
                }
                self.visible_content = match final_answer.as_deref() {
                    Some(answer) if !answer.trim().is_empty() => answer.to_string(),
                    _ if !self.answer_buffer.is_empty() => self.answer_buffer.clone(),
                    _ => NO_ANSWER_PLACEHOLDER.to_string(),
                };
                self.suggestions.clone_from(suggestions);
                self.state = TurnState::Completed;
                tracing::debug!(turn = %self.id, steps = self.transcript.len(), "turn completed");
                changed = true;
            }
            ProtocolEvent::Error {
                message,
                is_final: true,
            } => {
                self.visible_content.clone_from(message);
                self.error = Some(message.clone());
                self.state = TurnState::Failed;
                tracing::debug!(turn = %self.id, error = %message, "turn failed");
                changed = true;
            }
            ProtocolEvent::Error {
                message,
                is_final: false,
            } => {
                let step = Step::new(self.transcript.local_ordinal(), StepKind::Error, message.clone());
                changed |= self.transcript.push_local(step);
            }
            ProtocolEvent::Status { message } => {
                let step =
                    Step::new(self.transcript.local_ordinal(), StepKind::Status, message.clone());
                changed |= self.transcript.push_local(step);
            }
        }

        changed
    }

    fn apply_step(&mut self, step: &Step) -> bool {
        if self.transcript.contains_ordinal(step.ordinal) {
            tracing::trace!(turn = %self.id, ordinal = step.ordinal, "duplicate step ignored");
            return false;
        }

        self.transcript.push_ordered(step.clone());
        if step.kind == StepKind::Answer {
            if !self.answer_buffer.is_empty() {
                self.answer_buffer.push('\n');
            }
            self.answer_buffer.push_str(&step.content);
            self.visible_content.clone_from(&self.answer_buffer);
        }
        true
    }

    /// Mark a non-terminal turn as cancelled
    ///
    /// Returns `false` (and changes nothing) if the turn was already terminal.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = TurnState::Cancelled;
        true
    }
}

/// Fold one event into a turn
#[must_use]
pub fn reduce(mut turn: Turn, event: &ProtocolEvent) -> Turn {
    turn.apply(event);
    turn
}

/// Fold a whole event sequence into a turn
pub fn reduce_all<'a>(turn: Turn, events: impl IntoIterator<Item = &'a ProtocolEvent>) -> Turn {
    events.into_iter().fold(turn, reduce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn step(ordinal: i64, kind: StepKind, content: &str) -> ProtocolEvent {
        ProtocolEvent::Step(Step::new(ordinal, kind, content))
    }

    fn final_event(answer: Option<&str>) -> ProtocolEvent {
        ProtocolEvent::Final {
            final_answer: answer.map(str::to_string),
            steps: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    #[test]
    fn test_answer_steps_are_newline_joined() {
        let events = vec![
            step(1, StepKind::Thought, "a"),
            step(2, StepKind::Action, "b"),
            step(3, StepKind::Answer, "Hello "),
            step(4, StepKind::Answer, "world"),
            final_event(None),
        ];
        let turn = reduce_all(Turn::new("hi"), &events);

        assert_eq!(turn.visible_content(), "Hello \nworld");
        assert_eq!(turn.transcript().len(), 4);
        assert_eq!(turn.state(), TurnState::Completed);
    }

    #[test]
    fn test_first_event_starts_streaming() {
        let turn = Turn::new("q");
        assert_eq!(turn.state(), TurnState::Pending);
        let turn = reduce(
            turn,
            &ProtocolEvent::Status {
                message: "queued".into(),
            },
        );
        assert_eq!(turn.state(), TurnState::Streaming);
        assert_eq!(turn.visible_content(), "");
        assert_eq!(turn.transcript().steps()[0].kind, StepKind::Status);
    }

    #[test]
    fn test_visible_content_mirrors_answer_buffer_while_streaming() {
        let turn = reduce_all(
            Turn::new("q"),
            &[step(1, StepKind::Answer, "part one"), step(2, StepKind::Thought, "x")],
        );
        assert_eq!(turn.visible_content(), "part one");
        assert_eq!(turn.state(), TurnState::Streaming);
    }

    #[test]
    fn test_replayed_step_is_idempotent() {
        let answer = step(1, StepKind::Answer, "once");
        let turn = reduce(Turn::new("q"), &answer);
        let replayed = reduce(turn.clone(), &answer);

        assert_eq!(replayed.transcript().len(), turn.transcript().len());
        assert_eq!(replayed.visible_content(), "once");
        assert_eq!(replayed, turn);
    }

    #[test]
    fn test_replayed_status_is_idempotent() {
        let status = ProtocolEvent::Status {
            message: "indexing".into(),
        };
        let turn = reduce_all(Turn::new("q"), &[status.clone(), status]);
        assert_eq!(turn.transcript().len(), 1);
    }

    #[test]
    fn test_replayed_status_step_is_idempotent_after_other_steps() {
        let status = step(3, StepKind::Status, "indexing");
        let turn = reduce_all(
            Turn::new("q"),
            &[status.clone(), step(4, StepKind::Thought, "x"), status],
        );
        assert_eq!(turn.transcript().len(), 2);

        let error = step(5, StepKind::Error, "tool failed");
        let replayed = reduce_all(
            turn.clone(),
            &[error.clone(), step(6, StepKind::Answer, "y"), error],
        );
        assert_eq!(replayed.transcript().len(), 4);
        assert_eq!(replayed.visible_content(), "y");
    }

    #[test]
    fn test_final_answer_takes_precedence() {
        let turn = reduce_all(
            Turn::new("q"),
            &[step(1, StepKind::Answer, "draft"), final_event(Some("final"))],
        );
        assert_eq!(turn.visible_content(), "final");
    }

    #[test]
    fn test_blank_final_answer_falls_back_to_buffer_then_placeholder() {
        let turn = reduce_all(
            Turn::new("q"),
            &[step(1, StepKind::Answer, "buffered"), final_event(Some("  "))],
        );
        assert_eq!(turn.visible_content(), "buffered");

        let empty = reduce(Turn::new("q"), &final_event(None));
        assert_eq!(empty.visible_content(), NO_ANSWER_PLACEHOLDER);
        assert_eq!(empty.state(), TurnState::Completed);
    }

    #[test]
    fn test_final_steps_override_by_ordinal() {
        let turn = reduce_all(
            Turn::new("q"),
            &[
                step(1, StepKind::Thought, "streamed"),
                step(2, StepKind::Action, "call"),
                ProtocolEvent::Final {
                    final_answer: Some("done".into()),
                    steps: vec![
                        Step::new(1, StepKind::Thought, "authoritative"),
                        Step::new(3, StepKind::Observation, "result"),
                    ],
                    suggestions: vec!["next?".into()],
                },
            ],
        );

        let contents: Vec<&str> = turn.transcript().iter().map(|s| s.content.as_str()).collect();
        assert_eq!(contents, vec!["authoritative", "call", "result"]);
        assert_eq!(turn.suggestions(), ["next?".to_string()]);
    }

    #[test]
    fn test_error_preserves_transcript() {
        let turn = reduce_all(
            Turn::new("q"),
            &[
                step(1, StepKind::Thought, "a"),
                step(2, StepKind::Action, "b"),
                ProtocolEvent::fatal("boom"),
            ],
        );
        assert_eq!(turn.transcript().len(), 2);
        assert_eq!(turn.visible_content(), "boom");
        assert_eq!(turn.state(), TurnState::Failed);
        assert_eq!(turn.error(), Some("boom"));
    }

    #[test]
    fn test_non_final_server_error_is_recorded_as_step() {
        let turn = reduce_all(
            Turn::new("q"),
            &[
                step(1, StepKind::Answer, "x"),
                ProtocolEvent::Error {
                    message: "tool call retried".into(),
                    is_final: false,
                },
            ],
        );
        assert_eq!(turn.state(), TurnState::Streaming);
        assert_eq!(turn.visible_content(), "x");
        assert_eq!(turn.transcript().last().map(|s| s.kind), Some(StepKind::Error));
    }

    #[test]
    fn test_malformed_frame_fails_turn() {
        let events = crate::decoder::FrameDecoder::decode_all(
            b"data: {\"type\":\"answer\",\"step\":1,\"content\":\"partial\"}\n\n\
              data: {not json\n\n\
              data: {\"type\":\"final\",\"final_answer\":\"ok\"}\n\n",
        );
        assert_eq!(events.len(), 3);

        let turn = reduce_all(Turn::new("q"), &events);
        assert_eq!(turn.state(), TurnState::Failed);
        assert_eq!(turn.transcript().len(), 1);
        assert!(turn.error().is_some_and(|e| e.contains("malformed frame")));
    }

    #[test]
    fn test_events_after_terminal_are_ignored() {
        let mut turn = reduce(Turn::new("q"), &final_event(Some("done")));
        assert!(!turn.apply(&step(5, StepKind::Answer, "late")));
        assert!(!turn.apply(&ProtocolEvent::fatal("late error")));
        assert_eq!(turn.visible_content(), "done");
        assert_eq!(turn.state(), TurnState::Completed);
        assert!(turn.transcript().is_empty());
    }

    #[test]
    fn test_cancel_only_from_non_terminal() {
        let mut turn = Turn::new("q");
        assert!(turn.cancel());
        assert_eq!(turn.state(), TurnState::Cancelled);
        assert!(!turn.cancel());

        let mut done = reduce(Turn::new("q"), &final_event(None));
        assert!(!done.cancel());
        assert_eq!(done.state(), TurnState::Completed);
    }
}

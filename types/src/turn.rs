//! The canonical, provider-neutral conversation model.
//!
//! A conversation is an ordered sequence of [`Turn`]s. Every provider client
//! translates to and from this shape rather than exposing its own wire
//! format to callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::strings::NonEmptyString;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A single function (tool) call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Stable id, round-tripped unchanged through provider translation.
    pub id: String,
    pub name: String,
    pub args: JsonMap,
}

/// The result of executing a previously requested [`FunctionCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Must match the id of a preceding [`FunctionCall`] in history.
    pub id: String,
    pub name: String,
    pub response: JsonMap,
}

/// A JSON object, compared by its canonical serialized form for `Eq`.
///
/// `serde_json::Value` has no `Eq` impl (floats), but argument/response maps
/// in this system are always object-shaped string/bool/number/string trees
/// produced by JSON decoding, so structural equality on the serialized form
/// is sufficient and keeps `Turn`/`Part` derivable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonMap(pub Value);

impl PartialEq for JsonMap {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for JsonMap {}

impl From<Value> for JsonMap {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// One element of a turn's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
    InlineBinaryData { mime_type: String, data: Vec<u8> },
}

impl Part {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// A part is empty if it carries no meaningful payload: blank text, or
    /// binary data with zero bytes. Function calls/responses are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Part::Text(t) => t.trim().is_empty(),
            Part::InlineBinaryData { data, .. } => data.is_empty(),
            Part::FunctionCall(_) | Part::FunctionResponse(_) => false,
        }
    }
}

/// A single turn: one role, an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    #[must_use]
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    #[must_use]
    pub fn model_text(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    fn non_empty_parts(&self) -> usize {
        self.parts.iter().filter(|p| !p.is_empty()).count()
    }
}

/// The placeholder part used wherever the spec requires a non-empty
/// stand-in: an empty parts list, or an empty conversation.
fn placeholder_part() -> Part {
    Part::text(" ")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("turn {turn_index} has no non-empty parts")]
    EmptyTurn { turn_index: usize },
    #[error(
        "function-response id {id:?} at turn {turn_index} has no preceding function-call with a matching id"
    )]
    DanglingFunctionResponse { turn_index: usize, id: String },
}

/// Validate conversation invariants: every turn carries at least one
/// non-empty part, and every function-response's id matches a preceding
/// function-call's id.
///
/// This never mutates `history`; replacement of empty turns/parts with a
/// placeholder happens only in [`sanitize`], at the translation boundary.
pub fn validate(history: &[Turn]) -> Result<(), ValidationError> {
    let mut seen_call_ids: std::collections::HashSet<&str> = std::collections::HashSet::new();

    for (turn_index, turn) in history.iter().enumerate() {
        if turn.non_empty_parts() == 0 {
            return Err(ValidationError::EmptyTurn { turn_index });
        }
        for part in &turn.parts {
            match part {
                Part::FunctionCall(call) => {
                    seen_call_ids.insert(call.id.as_str());
                }
                Part::FunctionResponse(resp) => {
                    if !seen_call_ids.contains(resp.id.as_str()) {
                        return Err(ValidationError::DanglingFunctionResponse {
                            turn_index,
                            id: resp.id.clone(),
                        });
                    }
                }
                Part::Text(_) | Part::InlineBinaryData { .. } => {}
            }
        }
    }
    Ok(())
}

/// Drop nil/empty parts, replace an empty parts list with a single-space
/// text part, and guarantee at least one turn (user role, single-space
/// text) if `history` is empty.
///
/// Idempotent: `sanitize(sanitize(h)) == sanitize(h)`.
#[must_use]
pub fn sanitize(history: &[Turn]) -> Vec<Turn> {
    let mut sanitized: Vec<Turn> = history
        .iter()
        .map(|turn| {
            let mut parts: Vec<Part> = turn
                .parts
                .iter()
                .filter(|p| !p.is_empty())
                .cloned()
                .collect();
            if parts.is_empty() {
                parts.push(placeholder_part());
            }
            Turn {
                role: turn.role,
                parts,
            }
        })
        .collect();

    if sanitized.is_empty() {
        sanitized.push(Turn::new(Role::User, vec![placeholder_part()]));
    }

    sanitized
}

/// Build a [`Turn`] from validated text, rejecting empty/whitespace-only
/// content outright rather than silently placeholdering it.
pub fn try_text_turn(role: Role, text: impl Into<String>) -> Result<Turn, crate::strings::EmptyStringError> {
    let text = NonEmptyString::new(text)?;
    Ok(Turn::new(role, vec![Part::text(text.into_inner())]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> Part {
        Part::FunctionCall(FunctionCall {
            id: id.to_string(),
            name: "calc".to_string(),
            args: JsonMap(json!({})),
        })
    }

    fn response(id: &str) -> Part {
        Part::FunctionResponse(FunctionResponse {
            id: id.to_string(),
            name: "calc".to_string(),
            response: JsonMap(json!({})),
        })
    }

    #[test]
    fn validate_accepts_matched_call_and_response() {
        let history = vec![
            Turn::new(Role::Model, vec![call("toolu_1")]),
            Turn::new(Role::User, vec![response("toolu_1")]),
        ];
        assert!(validate(&history).is_ok());
    }

    #[test]
    fn validate_rejects_dangling_response() {
        let history = vec![Turn::new(Role::User, vec![response("toolu_missing")])];
        assert_eq!(
            validate(&history),
            Err(ValidationError::DanglingFunctionResponse {
                turn_index: 0,
                id: "toolu_missing".to_string(),
            })
        );
    }

    #[test]
    fn validate_rejects_turn_with_no_non_empty_parts() {
        let history = vec![Turn::new(Role::User, vec![Part::text("   ")])];
        assert_eq!(
            validate(&history),
            Err(ValidationError::EmptyTurn { turn_index: 0 })
        );
    }

    #[test]
    fn sanitize_replaces_empty_parts_list() {
        let history = vec![Turn::new(Role::User, vec![Part::text("")])];
        let sanitized = sanitize(&history);
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized[0].parts, vec![Part::text(" ")]);
    }

    #[test]
    fn sanitize_empty_history_yields_single_user_turn() {
        let sanitized = sanitize(&[]);
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized[0].role, Role::User);
        assert_eq!(sanitized[0].parts, vec![Part::text(" ")]);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let history = vec![
            Turn::new(Role::User, vec![Part::text(""), Part::text("hi")]),
            Turn::new(Role::Model, vec![]),
        ];
        let once = sanitize(&history);
        let twice = sanitize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_drops_empty_parts_but_keeps_valid_ones() {
        let history = vec![Turn::new(
            Role::User,
            vec![Part::text(""), Part::text("keep me")],
        )];
        let sanitized = sanitize(&history);
        assert_eq!(sanitized[0].parts, vec![Part::text("keep me")]);
    }
}

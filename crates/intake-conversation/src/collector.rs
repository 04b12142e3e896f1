//! Field collection engine.
//!
//! Walks an ordered list of [`FieldDefinition`]s over a [`ConversationState`]:
//! the state's `field_index` is the cursor and `data` holds the answers.
//! Rejected input never moves the cursor or touches earlier answers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use intake_core::types::Timestamp;

use crate::error::FieldError;
use crate::fields::{FieldDefinition, ValidationFailure};
use crate::sanitize::sanitize;
use crate::state::ConversationState;

/// Result of answering the current field.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Stored; `next` is the index now being asked.
    Advanced { next: usize },
    /// Stored the last field.
    Completed,
    Rejected(ValidationFailure),
}

/// Result of stepping back one field.
#[derive(Debug, Clone, PartialEq)]
pub enum BackOutcome {
    Previous {
        index: usize,
        previous_answer: Option<String>,
    },
    AtStart,
}

/// One row of a confirmation screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryLine {
    /// 1-based, matching the direct-edit index.
    pub index: usize,
    pub key: String,
    pub label: String,
    pub value: String,
}

/// Paused form progress, stored apart from the live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub context: String,
    pub field_index: usize,
    pub data: Map<String, Value>,
    pub saved_at: Timestamp,
}

pub struct FieldCollector {
    fields: &'static [FieldDefinition],
    max_input_len: usize,
}

impl FieldCollector {
    pub fn new(fields: &'static [FieldDefinition], max_input_len: usize) -> Self {
        Self {
            fields,
            max_input_len,
        }
    }

    pub fn fields(&self) -> &'static [FieldDefinition] {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field currently being asked, or `None` once every field is answered.
    pub fn current(&self, state: &ConversationState) -> Option<&'static FieldDefinition> {
        self.fields.get(state.field_index)
    }

    /// Field at a 1-based position.
    pub fn field_at(&self, index: usize) -> Result<&'static FieldDefinition, FieldError> {
        index
            .checked_sub(1)
            .and_then(|i| self.fields.get(i))
            .ok_or(FieldError::IndexOutOfRange {
                index,
                max: self.fields.len(),
            })
    }

    /// Sanitize and validate `raw` against a field without storing it.
    pub fn check(
        &self,
        field: &FieldDefinition,
        raw: &str,
    ) -> Result<String, ValidationFailure> {
        field.validate(&sanitize(raw, self.max_input_len))
    }

    /// Answer the current field.
    pub fn submit(&self, state: &mut ConversationState, raw: &str) -> SubmitOutcome {
        let Some(field) = self.current(state) else {
            return SubmitOutcome::Completed;
        };

        match self.check(field, raw) {
            Ok(value) => {
                state.record(field.key, value);
                state.field_index += 1;
                if state.field_index >= self.fields.len() {
                    SubmitOutcome::Completed
                } else {
                    SubmitOutcome::Advanced {
                        next: state.field_index,
                    }
                }
            }
            Err(failure) => SubmitOutcome::Rejected(failure),
        }
    }

    /// Move the cursor back one field, surfacing the answer given there.
    pub fn back(&self, state: &mut ConversationState) -> BackOutcome {
        if state.field_index == 0 {
            return BackOutcome::AtStart;
        }
        let index = state.field_index.min(self.fields.len()) - 1;
        state.field_index = index;
        BackOutcome::Previous {
            index,
            previous_answer: state.answer(self.fields[index].key).map(str::to_string),
        }
    }

    /// Replace the answer at a 1-based position. The cursor does not move.
    pub fn edit(
        &self,
        state: &mut ConversationState,
        index: usize,
        raw: &str,
    ) -> Result<&'static FieldDefinition, FieldError> {
        let field = self.field_at(index)?;
        let value = self.check(field, raw).map_err(FieldError::Validation)?;
        state.record(field.key, value);
        Ok(field)
    }

    pub fn is_complete(&self, state: &ConversationState) -> bool {
        self.first_missing(state).is_none()
    }

    /// Zero-based index of the first unanswered field.
    pub fn first_missing(&self, state: &ConversationState) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| state.answer(f.key).is_none())
    }

    /// Every field with its 1-based index and current answer.
    pub fn summary(&self, state: &ConversationState) -> Vec<SummaryLine> {
        self.fields
            .iter()
            .enumerate()
            .map(|(i, f)| SummaryLine {
                index: i + 1,
                key: f.key.to_string(),
                label: f.label.to_string(),
                value: state.answer(f.key).unwrap_or_default().to_string(),
            })
            .collect()
    }

    /// Snapshot progress for the draft slot.
    pub fn pause(&self, state: &ConversationState) -> Draft {
        Draft {
            context: state.context.clone(),
            field_index: state.field_index,
            data: state.data.clone(),
            saved_at: Timestamp::now(),
        }
    }

    /// Restore a draft into `state`, which keeps its identity.
    pub fn resume(&self, state: &mut ConversationState, draft: Draft) {
        state.reset_to(crate::state::StateType::Form, &draft.context);
        state.data = draft.data;
        state.field_index = draft.field_index.min(self.fields.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::PERMIT_FIELDS;
    use crate::state::{contexts, StateType};
    use intake_core::types::IdentityKey;

    const ANSWERS: [&str; 9] = [
        "Ana Lopez Garcia",
        "ana@example.com",
        "5215550001234",
        "Nissan",
        "Versa",
        "rojo",
        "2019",
        "3N1CN7AD5KL123456",
        "HR16123456",
    ];

    fn collector() -> FieldCollector {
        FieldCollector::new(&PERMIT_FIELDS, 500)
    }

    fn form() -> ConversationState {
        ConversationState::new(
            IdentityKey::parse("5550001").unwrap(),
            StateType::Form,
            contexts::PERMIT_APPLICATION,
        )
    }

    #[test]
    fn test_valid_answer_advances_and_keeps_prior_answers() {
        let c = collector();
        let mut state = form();
        assert_eq!(c.submit(&mut state, ANSWERS[0]), SubmitOutcome::Advanced { next: 1 });
        let before = state.data.clone();

        assert_eq!(c.submit(&mut state, ANSWERS[1]), SubmitOutcome::Advanced { next: 2 });
        assert_eq!(state.answer("full_name"), before["full_name"].as_str());
        assert_eq!(state.answer("email"), Some("ana@example.com"));
    }

    #[test]
    fn test_invalid_answer_changes_nothing() {
        let c = collector();
        let mut state = form();
        c.submit(&mut state, ANSWERS[0]);
        let before = state.clone();

        match c.submit(&mut state, "not-an-email") {
            SubmitOutcome::Rejected(failure) => {
                assert_eq!(failure.field, "email");
                assert!(!failure.example.is_empty());
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(state, before);
    }

    #[test]
    fn test_last_answer_completes() {
        let c = collector();
        let mut state = form();
        for (i, answer) in ANSWERS.iter().enumerate() {
            let outcome = c.submit(&mut state, answer);
            if i == ANSWERS.len() - 1 {
                assert_eq!(outcome, SubmitOutcome::Completed);
            }
        }
        assert!(c.is_complete(&state));
        let summary = c.summary(&state);
        assert_eq!(summary.len(), 9);
        assert_eq!(summary[0].index, 1);
        assert_eq!(summary[5].value, "ROJO");
        assert_eq!(summary[8].key, "engine_number");
    }

    #[test]
    fn test_back_reshows_previous_answer() {
        let c = collector();
        let mut state = form();
        c.submit(&mut state, ANSWERS[0]);
        c.submit(&mut state, ANSWERS[1]);

        assert_eq!(
            c.back(&mut state),
            BackOutcome::Previous {
                index: 1,
                previous_answer: Some("ana@example.com".to_string())
            }
        );
        assert_eq!(state.field_index, 1);
        c.back(&mut state);
        assert_eq!(c.back(&mut state), BackOutcome::AtStart);
        assert_eq!(state.field_index, 0);
        // Stepping back never drops answers.
        assert_eq!(state.answer("email"), Some("ana@example.com"));
    }

    #[test]
    fn test_direct_edit_by_position() {
        let c = collector();
        let mut state = form();
        for answer in ANSWERS {
            c.submit(&mut state, answer);
        }

        let field = c.edit(&mut state, 6, "azul").unwrap();
        assert_eq!(field.key, "vehicle_color");
        assert_eq!(state.answer("vehicle_color"), Some("AZUL"));
        assert_eq!(state.field_index, 9);

        assert_eq!(
            c.edit(&mut state, 10, "x").unwrap_err(),
            FieldError::IndexOutOfRange { index: 10, max: 9 }
        );
        assert!(matches!(
            c.edit(&mut state, 0, "x").unwrap_err(),
            FieldError::IndexOutOfRange { .. }
        ));
        assert!(matches!(
            c.edit(&mut state, 7, "nineteen").unwrap_err(),
            FieldError::Validation(_)
        ));
        assert_eq!(state.answer("vehicle_year"), Some("2019"));
    }

    #[test]
    fn test_pause_and_resume_roundtrip() {
        let c = collector();
        let mut state = form();
        c.submit(&mut state, ANSWERS[0]);
        c.submit(&mut state, ANSWERS[1]);
        let draft = c.pause(&state);

        let mut fresh = ConversationState::initial(state.identity.clone());
        c.resume(&mut fresh, draft);

        assert!(fresh.is_at(StateType::Form, contexts::PERMIT_APPLICATION));
        assert_eq!(fresh.field_index, 2);
        assert_eq!(fresh.data, state.data);
        assert_eq!(c.current(&fresh).map(|f| f.key), Some("phone"));
    }

    #[test]
    fn test_input_is_sanitized_before_validation() {
        let c = collector();
        let mut state = form();
        c.submit(&mut state, "  Ana\u{200B}   Lopez\t");
        assert_eq!(state.answer("full_name"), Some("ANA LOPEZ"));
    }
}

//! Structured conversation state.
//!
//! A conversation is always somewhere: a [`StateType`] plus a context label
//! that scopes it (`form` + `renewal_edit`, `menu` + `main`, ...). The pair
//! decides how the router reads the next message.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use intake_core::types::{IdentityKey, Timestamp};

use crate::registry::ExpectedInput;

/// Context labels used by the standard flows.
pub mod contexts {
    pub const MAIN: &str = "main";
    pub const PERMIT_APPLICATION: &str = "permit_application";
    pub const PERMIT_EDIT: &str = "permit_edit";
    pub const PERMIT_EDIT_VALUE: &str = "permit_edit_value";
    pub const RENEWAL: &str = "renewal";
    pub const RENEWAL_EDIT: &str = "renewal_edit";
    pub const RENEWAL_EDIT_VALUE: &str = "renewal_edit_value";
    pub const PAYMENT_PENDING: &str = "payment_pending";
}

/// Kind of screen the conversation is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Menu,
    Form,
    Confirmation,
    Status,
    Help,
    Error,
    Notification,
}

impl StateType {
    pub const ALL: [StateType; 7] = [
        StateType::Menu,
        StateType::Form,
        StateType::Confirmation,
        StateType::Status,
        StateType::Help,
        StateType::Error,
        StateType::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateType::Menu => "menu",
            StateType::Form => "form",
            StateType::Confirmation => "confirmation",
            StateType::Status => "status",
            StateType::Help => "help",
            StateType::Error => "error",
            StateType::Notification => "notification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where one identity's conversation currently is, and what it has collected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub identity: IdentityKey,
    #[serde(rename = "type")]
    pub state_type: StateType,
    pub context: String,
    /// Collected answers and flow scratch. Keys are only added or
    /// overwritten while a flow runs; a reset replaces the whole map.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Zero-based cursor into the active field list.
    #[serde(default)]
    pub field_index: usize,
    pub created_at: Timestamp,
    pub last_transition_at: Timestamp,
    /// Inputs registered for (`state_type`, `context`) at the last transition.
    #[serde(default)]
    pub expected_inputs: Vec<ExpectedInput>,
}

impl ConversationState {
    pub fn new(identity: IdentityKey, state_type: StateType, context: &str) -> Self {
        let now = Timestamp::now();
        Self {
            identity,
            state_type,
            context: context.to_string(),
            data: Map::new(),
            field_index: 0,
            created_at: now,
            last_transition_at: now,
            expected_inputs: Vec::new(),
        }
    }

    /// State for an identity seen for the first time.
    pub fn initial(identity: IdentityKey) -> Self {
        Self::new(identity, StateType::Menu, contexts::MAIN)
    }

    /// `type/context`, the label used by navigation history and logs.
    pub fn label(&self) -> String {
        format!("{}/{}", self.state_type, self.context)
    }

    pub fn is_at(&self, state_type: StateType, context: &str) -> bool {
        self.state_type == state_type && self.context == context
    }

    /// Move to another screen of the same flow, keeping collected data.
    pub fn transition_to(&mut self, state_type: StateType, context: &str) {
        self.state_type = state_type;
        self.context = context.to_string();
        self.last_transition_at = Timestamp::now();
    }

    /// Move to another screen and start over with empty data.
    pub fn reset_to(&mut self, state_type: StateType, context: &str) {
        self.transition_to(state_type, context);
        self.data = Map::new();
        self.field_index = 0;
    }

    pub fn record(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(key.to_string(), value.into());
    }

    /// String answer stored under `key`, if any.
    pub fn answer(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// Split a `type/context` label back into its parts.
pub fn parse_label(label: &str) -> Option<(StateType, &str)> {
    let (state_type, context) = label.split_once('/')?;
    Some((StateType::parse(state_type)?, context))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> IdentityKey {
        IdentityKey::parse("5215550001234").unwrap()
    }

    #[test]
    fn test_initial_state_is_main_menu() {
        let state = ConversationState::initial(identity());
        assert!(state.is_at(StateType::Menu, contexts::MAIN));
        assert!(state.data.is_empty());
        assert_eq!(state.field_index, 0);
        assert_eq!(state.created_at, state.last_transition_at);
    }

    #[test]
    fn test_transition_keeps_data() {
        let mut state = ConversationState::new(identity(), StateType::Form, "permit_application");
        state.record("full_name", "ANA LOPEZ");
        state.field_index = 1;
        state.transition_to(StateType::Confirmation, "permit_application");

        assert_eq!(state.answer("full_name"), Some("ANA LOPEZ"));
        assert_eq!(state.field_index, 1);
    }

    #[test]
    fn test_reset_replaces_data_wholesale() {
        let mut state = ConversationState::new(identity(), StateType::Form, "permit_application");
        state.record("full_name", "ANA LOPEZ");
        state.field_index = 4;
        state.reset_to(StateType::Menu, contexts::MAIN);

        assert!(state.data.is_empty());
        assert_eq!(state.field_index, 0);
        assert_eq!(state.label(), "menu/main");
    }

    #[test]
    fn test_label_roundtrip() {
        let state = ConversationState::new(identity(), StateType::Form, "renewal_edit");
        let label = state.label();
        assert_eq!(parse_label(&label), Some((StateType::Form, "renewal_edit")));
    }

    #[test]
    fn test_parse_label_rejects_unknown_type() {
        assert!(parse_label("wizard/main").is_none());
        assert!(parse_label("menu").is_none());
    }

    #[test]
    fn test_state_type_parse_covers_all() {
        for t in StateType::ALL {
            assert_eq!(StateType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_serialized_shape_uses_type_key() {
        let state = ConversationState::initial(identity());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["type"], "menu");
        assert_eq!(json["context"], "main");
        assert_eq!(json["identity"], "5215550001234");
    }

    #[test]
    fn test_deserialize_tolerates_missing_optional_fields() {
        let json = r#"{
            "identity": "5550001",
            "type": "form",
            "context": "renewal",
            "created_at": 1700000000,
            "last_transition_at": 1700000100
        }"#;
        let state: ConversationState = serde_json::from_str(json).unwrap();
        assert!(state.is_at(StateType::Form, "renewal"));
        assert!(state.data.is_empty());
        assert!(state.expected_inputs.is_empty());
    }
}

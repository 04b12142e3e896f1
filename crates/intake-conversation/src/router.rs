//! State transition router.
//!
//! Turns (current state, sanitized text) into a [`RoutingDecision`] without
//! touching storage. The same literal text can mean a menu option, a field
//! selection, or a field answer; which one is decided purely by the state's
//! registration, in this order:
//!
//! 1. global commands (home, help)
//! 2. priority commands scoped to the current context
//! 3. expected-input validation
//! 4. dispatch by state type

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::registry::{
    parse_addressed_edit, parse_index, ContextSpec, ExpectedInput, PriorityCommand, StateRegistry,
};
use crate::sanitize::fold_keyword;
use crate::state::{ConversationState, StateType};

/// Commands honoured on every screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalCommand {
    Home,
    Help,
}

const HOME_KEYWORDS: &[&str] = &["menu", "home", "inicio", "salir"];
const HELP_KEYWORDS: &[&str] = &["help", "ayuda"];

impl GlobalCommand {
    pub fn parse(text: &str) -> Option<Self> {
        let folded = fold_keyword(text);
        if HOME_KEYWORDS.contains(&folded.as_str()) {
            Some(GlobalCommand::Home)
        } else if HELP_KEYWORDS.contains(&folded.as_str()) {
            Some(GlobalCommand::Help)
        } else {
            None
        }
    }
}

/// What an inbound message means on the current screen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RoutingDecision {
    Global { command: GlobalCommand },
    Priority { command: PriorityCommand },
    InvalidInput { valid_options: Vec<String> },
    MenuOption { option: u8 },
    FieldValue { raw: String },
    FieldSelection { index: u8 },
    DirectEdit { index: u8, value: String },
    UnregisteredState { state_type: StateType, context: String },
}

/// Pure router over a shared registry.
pub struct StateRouter {
    registry: Arc<StateRegistry>,
}

impl StateRouter {
    pub fn new(registry: Arc<StateRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn route(&self, state: &ConversationState, text: &str) -> RoutingDecision {
        if let Some(command) = GlobalCommand::parse(text) {
            return RoutingDecision::Global { command };
        }

        let Some(spec) = self.registry.lookup(state.state_type, &state.context) else {
            return RoutingDecision::UnregisteredState {
                state_type: state.state_type,
                context: state.context.clone(),
            };
        };

        if let Some(command) = spec.priority_command(text) {
            return RoutingDecision::Priority { command };
        }

        if !spec.accepts(text) {
            return RoutingDecision::InvalidInput {
                valid_options: spec.valid_options(),
            };
        }

        match state.state_type {
            StateType::Form => Self::dispatch_form(state, spec, text),
            _ => Self::dispatch_choice(state, spec, text),
        }
    }

    fn dispatch_form(state: &ConversationState, spec: &ContextSpec, text: &str) -> RoutingDecision {
        if spec.edit {
            if let Some(index) = single_digit(text) {
                log_ambiguity(state, text, "field selection");
                return RoutingDecision::FieldSelection { index };
            }
            // Edit screens register only field indexes, so anything else was
            // already rejected; keep the fallback total anyway.
            return RoutingDecision::InvalidInput {
                valid_options: spec.valid_options(),
            };
        }

        if parse_index(text, u8::MAX).is_some() {
            log_ambiguity(state, text, "field answer");
        }
        RoutingDecision::FieldValue {
            raw: text.trim().to_string(),
        }
    }

    fn dispatch_choice(
        state: &ConversationState,
        spec: &ContextSpec,
        text: &str,
    ) -> RoutingDecision {
        for expected in &spec.expected {
            match expected {
                ExpectedInput::AddressedEdit { max } => {
                    if let Some((index, value)) = parse_addressed_edit(text) {
                        if (1..=*max).contains(&index) {
                            return RoutingDecision::DirectEdit { index, value };
                        }
                    }
                }
                ExpectedInput::Option { max } => {
                    if let Some(option) = parse_index(text, *max) {
                        log_ambiguity(state, text, "menu option");
                        return RoutingDecision::MenuOption { option };
                    }
                }
                ExpectedInput::FieldIndex { max } => {
                    if let Some(index) = parse_index(text, *max) {
                        return RoutingDecision::FieldSelection { index };
                    }
                }
                ExpectedInput::FreeText => {
                    return RoutingDecision::FieldValue {
                        raw: text.trim().to_string(),
                    };
                }
            }
        }

        RoutingDecision::InvalidInput {
            valid_options: spec.valid_options(),
        }
    }
}

fn single_digit(text: &str) -> Option<u8> {
    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    match c.to_digit(10)? {
        d @ 1..=9 => Some(d as u8),
        _ => None,
    }
}

fn log_ambiguity(state: &ConversationState, text: &str, reading: &'static str) {
    debug!(
        state = %state.label(),
        input = text.trim(),
        reading,
        "Routing ambiguity resolved"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::contexts;
    use intake_core::types::IdentityKey;

    fn router() -> StateRouter {
        StateRouter::new(Arc::new(StateRegistry::standard()))
    }

    fn state(state_type: StateType, context: &str) -> ConversationState {
        ConversationState::new(IdentityKey::parse("5550001").unwrap(), state_type, context)
    }

    #[test]
    fn test_same_digit_three_readings() {
        let r = router();

        let menu = state(StateType::Menu, contexts::MAIN);
        assert_eq!(r.route(&menu, "3"), RoutingDecision::MenuOption { option: 3 });

        let edit = state(StateType::Form, contexts::RENEWAL_EDIT);
        assert_eq!(
            r.route(&edit, "3"),
            RoutingDecision::FieldSelection { index: 3 }
        );

        let form = state(StateType::Form, contexts::PERMIT_APPLICATION);
        assert_eq!(
            r.route(&form, "3"),
            RoutingDecision::FieldValue {
                raw: "3".to_string()
            }
        );
    }

    #[test]
    fn test_global_commands_override_every_state() {
        let r = router();
        for (t, c) in [
            (StateType::Form, contexts::PERMIT_APPLICATION),
            (StateType::Form, contexts::RENEWAL_EDIT),
            (StateType::Notification, contexts::PAYMENT_PENDING),
            (StateType::Form, "never_registered"),
        ] {
            assert_eq!(
                r.route(&state(t, c), "MENÚ"),
                RoutingDecision::Global {
                    command: GlobalCommand::Home
                }
            );
            assert_eq!(
                r.route(&state(t, c), "ayuda"),
                RoutingDecision::Global {
                    command: GlobalCommand::Help
                }
            );
        }
    }

    #[test]
    fn test_priority_commands_are_context_scoped() {
        let r = router();

        let renewal = state(StateType::Form, contexts::RENEWAL_EDIT);
        assert_eq!(
            r.route(&renewal, "renovar"),
            RoutingDecision::Priority {
                command: PriorityCommand::RestartRenewal
            }
        );

        // Outside renewal contexts the keyword is just an answer.
        let permit = state(StateType::Form, contexts::PERMIT_APPLICATION);
        assert_eq!(
            r.route(&permit, "renovar"),
            RoutingDecision::FieldValue {
                raw: "renovar".to_string()
            }
        );
        assert_eq!(
            r.route(&permit, "back"),
            RoutingDecision::Priority {
                command: PriorityCommand::PreviousField
            }
        );
    }

    #[test]
    fn test_unexpected_input_is_invalid_with_options() {
        let r = router();
        let menu = state(StateType::Menu, contexts::MAIN);
        let before = menu.clone();

        for input in ["7", "0", "hola", "", "1.5"] {
            match r.route(&menu, input) {
                RoutingDecision::InvalidInput { valid_options } => {
                    assert!(valid_options.contains(&"1".to_string()));
                    assert!(valid_options.contains(&"4".to_string()));
                }
                other => panic!("{:?} routed to {:?}", input, other),
            }
        }
        assert_eq!(menu, before);
    }

    #[test]
    fn test_edit_context_rejects_text_and_out_of_range() {
        let r = router();
        let edit = state(StateType::Form, contexts::PERMIT_EDIT);
        assert!(matches!(
            r.route(&edit, "ROJO"),
            RoutingDecision::InvalidInput { .. }
        ));
        assert!(matches!(
            r.route(&edit, "10"),
            RoutingDecision::InvalidInput { .. }
        ));
        assert_eq!(
            r.route(&edit, "listo"),
            RoutingDecision::Priority {
                command: PriorityCommand::FinishEditing
            }
        );
    }

    #[test]
    fn test_confirmation_reads_options_and_addressed_edits() {
        let r = router();
        let confirm = state(StateType::Confirmation, contexts::PERMIT_APPLICATION);
        assert_eq!(
            r.route(&confirm, "1"),
            RoutingDecision::MenuOption { option: 1 }
        );
        assert_eq!(
            r.route(&confirm, "edit 6 azul"),
            RoutingDecision::DirectEdit {
                index: 6,
                value: "azul".to_string()
            }
        );
        assert!(matches!(
            r.route(&confirm, "4"),
            RoutingDecision::InvalidInput { .. }
        ));
    }

    #[test]
    fn test_unregistered_state_is_reported() {
        let r = router();
        let odd = state(StateType::Menu, "renewal");
        assert_eq!(
            r.route(&odd, "1"),
            RoutingDecision::UnregisteredState {
                state_type: StateType::Menu,
                context: "renewal".to_string()
            }
        );
    }

    #[test]
    fn test_routing_is_deterministic() {
        let r = router();
        let edit = state(StateType::Form, contexts::RENEWAL_EDIT);
        let first = r.route(&edit, "5");
        for _ in 0..10 {
            assert_eq!(r.route(&edit, "5"), first);
        }
    }

    #[test]
    fn test_single_digit() {
        assert_eq!(single_digit("7"), Some(7));
        assert_eq!(single_digit(" 9 "), Some(9));
        assert_eq!(single_digit("0"), None);
        assert_eq!(single_digit("12"), None);
        assert_eq!(single_digit("٣"), None);
    }
}

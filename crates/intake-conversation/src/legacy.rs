//! Translation between the legacy status-string session and the structured
//! state model.
//!
//! Older call sites read and write a flat session keyed by a `status` string.
//! While they exist, every structured turn is written through to that shape,
//! and the adapter decides per message which router owns the turn.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use intake_core::types::{IdentityKey, Timestamp};

use crate::fields::FlowKind;
use crate::state::{contexts, ConversationState, StateType};

/// Session shape the legacy handlers understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacySession {
    pub status: String,
    #[serde(default)]
    pub current_step: usize,
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Set while a structured flow owns the conversation.
    #[serde(default)]
    pub structured: bool,
    pub updated_at: Timestamp,
}

/// Legacy status to structured screen. Every row must round-trip.
pub const STATUS_TABLE: &[(&str, StateType, &str)] = &[
    ("idle", StateType::Menu, contexts::MAIN),
    ("collecting_data", StateType::Form, contexts::PERMIT_APPLICATION),
    ("awaiting_confirmation", StateType::Confirmation, contexts::PERMIT_APPLICATION),
    ("editing_data", StateType::Form, contexts::PERMIT_EDIT),
    ("editing_field", StateType::Form, contexts::PERMIT_EDIT_VALUE),
    ("awaiting_payment", StateType::Notification, contexts::PAYMENT_PENDING),
    ("checking_status", StateType::Status, contexts::MAIN),
    ("viewing_help", StateType::Help, contexts::MAIN),
    ("renewal_lookup", StateType::Form, contexts::RENEWAL),
    ("renewal_confirming", StateType::Confirmation, contexts::RENEWAL),
    ("renewal_editing", StateType::Form, contexts::RENEWAL_EDIT),
    ("renewal_editing_field", StateType::Form, contexts::RENEWAL_EDIT_VALUE),
    ("error", StateType::Error, contexts::MAIN),
];

pub struct LegacyAdapter {
    migrated: HashSet<String>,
}

impl LegacyAdapter {
    pub fn new<I, S>(migrated_contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            migrated: migrated_contexts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_migrated(&self, context: &str) -> bool {
        self.migrated.contains(context)
    }

    /// Structured screen for a legacy status: table first, then inference.
    pub fn screen_for_status(&self, status: &str) -> (StateType, &'static str) {
        if let Some((_, state_type, context)) = STATUS_TABLE.iter().find(|(s, _, _)| *s == status)
        {
            return (*state_type, *context);
        }
        let inferred = infer_screen(status);
        debug!(
            status,
            state_type = %inferred.0,
            context = inferred.1,
            "Legacy status inferred"
        );
        inferred
    }

    /// Legacy status for a structured screen. Pairs missing from the table
    /// are written as `{type}_{context}`.
    pub fn status_for_screen(&self, state_type: StateType, context: &str) -> String {
        STATUS_TABLE
            .iter()
            .find(|(_, t, c)| *t == state_type && *c == context)
            .map(|(s, _, _)| s.to_string())
            .unwrap_or_else(|| format!("{}_{}", state_type, context))
    }

    pub fn to_structured(&self, identity: IdentityKey, legacy: &LegacySession) -> ConversationState {
        let (state_type, context) = self.screen_for_status(&legacy.status);
        let mut state = ConversationState::new(identity, state_type, context);
        state.data = legacy.data.clone();
        state.field_index = legacy.current_step;
        state.last_transition_at = legacy.updated_at;
        state
    }

    /// Legacy shape of `state`. `detour_from` names the context of a form
    /// parked behind an open help detour.
    pub fn to_legacy(&self, state: &ConversationState, detour_from: Option<&str>) -> LegacySession {
        LegacySession {
            status: self.status_for_screen(state.state_type, &state.context),
            current_step: state.field_index,
            data: state.data.clone(),
            structured: self.owns(state, detour_from),
            updated_at: Timestamp::now(),
        }
    }

    /// Whether turns taken from `state` belong to the structured router.
    ///
    /// A migrated context is owned outright. Every screen of a flow whose
    /// entry context is migrated stays owned until the flow ends, and so does
    /// any screen reached while a detour away from such a flow is open.
    pub fn owns(&self, state: &ConversationState, detour_from: Option<&str>) -> bool {
        self.is_migrated(&state.context)
            || self.owns_flow(state.state_type, &state.context)
            || detour_from
                .is_some_and(|c| self.is_migrated(c) || self.owns_flow(StateType::Form, c))
    }

    fn owns_flow(&self, state_type: StateType, context: &str) -> bool {
        FlowKind::locate(state_type, context)
            .is_some_and(|(flow, _)| self.is_migrated(flow.context()))
    }

    /// Whether both records describe the same screen with the same answers.
    pub fn agrees(&self, legacy: &LegacySession, state: &ConversationState) -> bool {
        let (state_type, context) = self.screen_for_status(&legacy.status);
        state.is_at(state_type, context)
            && legacy.current_step == state.field_index
            && legacy.data == state.data
    }

    /// Whether the structured router owns this turn.
    ///
    /// The legacy record is consulted first since legacy handlers only ever
    /// write that one. A fresh identity goes wherever the main menu goes.
    pub fn should_route_structured(
        &self,
        legacy: Option<&LegacySession>,
        structured: Option<&ConversationState>,
    ) -> bool {
        if let Some(legacy) = legacy {
            if legacy.structured {
                return true;
            }
            let (_, context) = self.screen_for_status(&legacy.status);
            return self.is_migrated(context);
        }
        match structured {
            Some(state) => self.is_migrated(&state.context),
            None => self.is_migrated(contexts::MAIN),
        }
    }
}

fn infer_screen(status: &str) -> (StateType, &'static str) {
    let s = status.to_lowercase();
    let has = |needle: &str| s.contains(needle);

    if has("renewal") || has("renov") {
        return if has("edit") {
            if has("field") || has("value") {
                (StateType::Form, contexts::RENEWAL_EDIT_VALUE)
            } else {
                (StateType::Form, contexts::RENEWAL_EDIT)
            }
        } else if has("confirm") {
            (StateType::Confirmation, contexts::RENEWAL)
        } else {
            (StateType::Form, contexts::RENEWAL)
        };
    }
    if has("payment") || has("pago") {
        return (StateType::Notification, contexts::PAYMENT_PENDING);
    }
    if has("confirm") {
        return (StateType::Confirmation, contexts::PERMIT_APPLICATION);
    }
    if has("edit") {
        return if has("field") || has("value") {
            (StateType::Form, contexts::PERMIT_EDIT_VALUE)
        } else {
            (StateType::Form, contexts::PERMIT_EDIT)
        };
    }
    if has("help") || has("ayuda") {
        return (StateType::Help, contexts::MAIN);
    }
    if has("status") {
        return (StateType::Status, contexts::MAIN);
    }
    if has("collect") || has("form") || has("data") {
        return (StateType::Form, contexts::PERMIT_APPLICATION);
    }
    if has("error") {
        return (StateType::Error, contexts::MAIN);
    }
    (StateType::Menu, contexts::MAIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> LegacyAdapter {
        LegacyAdapter::new(["main", "renewal", "renewal_edit", "renewal_edit_value"])
    }

    fn identity() -> IdentityKey {
        IdentityKey::parse("5550001").unwrap()
    }

    fn legacy(status: &str) -> LegacySession {
        LegacySession {
            status: status.to_string(),
            current_step: 0,
            data: Map::new(),
            structured: false,
            updated_at: Timestamp::now(),
        }
    }

    #[test]
    fn test_every_table_row_roundtrips() {
        let a = adapter();
        for (status, state_type, context) in STATUS_TABLE {
            let structured = a.to_structured(identity(), &legacy(status));
            assert!(structured.is_at(*state_type, context));
            assert_eq!(a.to_legacy(&structured, None).status, *status);
        }
    }

    #[test]
    fn test_table_is_one_to_one() {
        let statuses: HashSet<&str> = STATUS_TABLE.iter().map(|(s, _, _)| *s).collect();
        let screens: HashSet<(StateType, &str)> =
            STATUS_TABLE.iter().map(|(_, t, c)| (*t, *c)).collect();
        assert_eq!(statuses.len(), STATUS_TABLE.len());
        assert_eq!(screens.len(), STATUS_TABLE.len());
    }

    #[test]
    fn test_inference_fallback() {
        let a = adapter();
        assert_eq!(
            a.screen_for_status("renewal_v2_started"),
            (StateType::Form, contexts::RENEWAL)
        );
        assert_eq!(
            a.screen_for_status("RENEWAL_EDIT_SELECT"),
            (StateType::Form, contexts::RENEWAL_EDIT)
        );
        assert_eq!(
            a.screen_for_status("pending_payment_link"),
            (StateType::Notification, contexts::PAYMENT_PENDING)
        );
        assert_eq!(
            a.screen_for_status("something_else"),
            (StateType::Menu, contexts::MAIN)
        );
    }

    #[test]
    fn test_unknown_screen_synthesizes_status() {
        let a = adapter();
        assert_eq!(a.status_for_screen(StateType::Menu, "renewal"), "menu_renewal");
    }

    #[test]
    fn test_data_and_step_carry_across() {
        let a = adapter();
        let mut l = legacy("collecting_data");
        l.current_step = 3;
        l.data.insert("full_name".to_string(), Value::from("ANA LOPEZ"));

        let s = a.to_structured(identity(), &l);
        assert_eq!(s.field_index, 3);
        assert_eq!(s.answer("full_name"), Some("ANA LOPEZ"));
        assert!(a.agrees(&l, &s));

        let back = a.to_legacy(&s, None);
        assert_eq!(back.current_step, 3);
        assert_eq!(back.data, l.data);
        assert!(!back.structured);
    }

    #[test]
    fn test_routing_gate() {
        let a = adapter();

        // Unmigrated flow stays legacy unless the marker says otherwise.
        let mut l = legacy("collecting_data");
        assert!(!a.should_route_structured(Some(&l), None));
        l.structured = true;
        assert!(a.should_route_structured(Some(&l), None));

        assert!(a.should_route_structured(Some(&legacy("renewal_editing")), None));

        let s = ConversationState::new(identity(), StateType::Form, contexts::PERMIT_APPLICATION);
        assert!(!a.should_route_structured(None, Some(&s)));

        assert!(a.should_route_structured(None, None));
        assert!(!LegacyAdapter::new(Vec::<String>::new()).should_route_structured(None, None));
    }

    #[test]
    fn test_write_through_marks_migrated_contexts() {
        let a = adapter();
        let s = ConversationState::new(identity(), StateType::Form, contexts::RENEWAL_EDIT);
        let l = a.to_legacy(&s, None);
        assert_eq!(l.status, "renewal_editing");
        assert!(l.structured);
    }

    #[test]
    fn test_marker_holds_for_flow_and_open_detour() {
        let a = LegacyAdapter::new(["renewal"]);

        // renewal_edit is not listed, but the renewal flow started migrated.
        let edit = ConversationState::new(identity(), StateType::Form, contexts::RENEWAL_EDIT);
        assert!(a.to_legacy(&edit, None).structured);

        let help = ConversationState::new(identity(), StateType::Help, contexts::MAIN);
        assert!(!a.to_legacy(&help, None).structured);
        assert!(a.to_legacy(&help, Some(contexts::RENEWAL_EDIT_VALUE)).structured);
        assert!(!a
            .to_legacy(&help, Some(contexts::PERMIT_APPLICATION))
            .structured);

        let marked = a.to_legacy(&help, Some(contexts::RENEWAL_EDIT));
        assert!(a.should_route_structured(Some(&marked), None));
    }

    #[test]
    fn test_changed_answers_disagree() {
        let a = adapter();
        let mut l = legacy("collecting_data");
        l.current_step = 1;
        l.data.insert("full_name".to_string(), Value::from("ANA LOPEZ"));
        let s = a.to_structured(identity(), &l);

        l.data.insert("full_name".to_string(), Value::from("MARIA PEREZ"));
        assert!(!a.agrees(&l, &s));
    }
}

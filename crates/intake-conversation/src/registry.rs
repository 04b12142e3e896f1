//! Registered inputs per (state type, context).
//!
//! Every screen the engine can show has an entry here. The router treats a
//! missing entry as an error state rather than guessing.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sanitize::fold_keyword;
use crate::state::{contexts, StateType};

// =============================================================================
// Expected inputs
// =============================================================================

/// One kind of input a screen accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpectedInput {
    /// Bare integer `1..=max` naming a menu option.
    Option { max: u8 },
    /// Any non-empty text, read as a field answer.
    FreeText,
    /// Bare integer `1..=max` naming a field to edit.
    FieldIndex { max: u8 },
    /// "edit 3 ROJO" or "3: ROJO", naming a field and its new value at once.
    AddressedEdit { max: u8 },
}

struct AddressedPatterns {
    verb: Regex,
    colon: Regex,
}

static ADDRESSED: LazyLock<AddressedPatterns> = LazyLock::new(|| AddressedPatterns {
    verb: Regex::new(r"(?i)^(?:edit|editar|cambiar)\s+(\d{1,2})\s*[:=-]?\s*(.+)$")
        .expect("Invalid addressed edit regex"),
    colon: Regex::new(r"^(\d{1,2})\s*[:=]\s*(.+)$").expect("Invalid addressed edit regex"),
});

/// Parse an addressed edit into its 1-based index and value.
pub fn parse_addressed_edit(text: &str) -> Option<(u8, String)> {
    let caps = ADDRESSED
        .verb
        .captures(text)
        .or_else(|| ADDRESSED.colon.captures(text))?;
    let index = caps.get(1)?.as_str().parse::<u8>().ok()?;
    let value = caps.get(2)?.as_str().trim();
    if value.is_empty() {
        return None;
    }
    Some((index, value.to_string()))
}

/// Parse a bare integer in `1..=max`.
pub fn parse_index(text: &str, max: u8) -> Option<u8> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n = trimmed.parse::<u8>().ok()?;
    (1..=max).contains(&n).then_some(n)
}

impl ExpectedInput {
    pub fn accepts(&self, text: &str) -> bool {
        match self {
            ExpectedInput::Option { max } | ExpectedInput::FieldIndex { max } => {
                parse_index(text, *max).is_some()
            }
            ExpectedInput::FreeText => !text.trim().is_empty(),
            ExpectedInput::AddressedEdit { max } => {
                parse_addressed_edit(text).is_some_and(|(i, _)| (1..=*max).contains(&i))
            }
        }
    }

    /// Human-facing descriptions of what this input accepts.
    pub fn options(&self) -> Vec<String> {
        match self {
            ExpectedInput::Option { max } | ExpectedInput::FieldIndex { max } => {
                (1..=*max).map(|n| n.to_string()).collect()
            }
            ExpectedInput::FreeText => vec!["<text>".to_string()],
            ExpectedInput::AddressedEdit { max } => vec![format!("edit <1-{}> <value>", max)],
        }
    }
}

// =============================================================================
// Priority commands
// =============================================================================

/// Context-scoped command that overrides generic parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityCommand {
    PreviousField,
    PauseForm,
    RestartRenewal,
    ResumeDraft,
    NavigateBack,
    NavigateForward,
    FinishEditing,
    CancelFlow,
}

/// Registration for one (state type, context) pair.
#[derive(Clone, Debug)]
pub struct ContextSpec {
    /// Screen title used in breadcrumbs.
    pub title: &'static str,
    pub expected: Vec<ExpectedInput>,
    /// Keywords are matched after [`fold_keyword`].
    pub priority: Vec<(PriorityCommand, &'static [&'static str])>,
    /// Inside an edit context a bare digit selects a field.
    pub edit: bool,
}

impl ContextSpec {
    fn new(title: &'static str, expected: Vec<ExpectedInput>) -> Self {
        Self {
            title,
            expected,
            priority: Vec::new(),
            edit: false,
        }
    }

    fn with(mut self, command: PriorityCommand, keywords: &'static [&'static str]) -> Self {
        self.priority.push((command, keywords));
        self
    }

    fn editing(mut self) -> Self {
        self.edit = true;
        self
    }

    /// Priority command named by `text`, if any.
    pub fn priority_command(&self, text: &str) -> Option<PriorityCommand> {
        let folded = fold_keyword(text);
        self.priority
            .iter()
            .find(|(_, keywords)| keywords.contains(&folded.as_str()))
            .map(|(command, _)| *command)
    }

    pub fn accepts(&self, text: &str) -> bool {
        self.expected.iter().any(|e| e.accepts(text))
    }

    /// Everything this screen accepts, for an invalid-input reply.
    pub fn valid_options(&self) -> Vec<String> {
        let mut options: Vec<String> = self.expected.iter().flat_map(|e| e.options()).collect();
        options.extend(
            self.priority
                .iter()
                .filter_map(|(_, keywords)| keywords.first().map(|k| k.to_string())),
        );
        options
    }
}

const BACK: &[&str] = &["back", "atras", "regresar"];
const FORWARD: &[&str] = &["forward", "adelante", "siguiente"];
const CANCEL: &[&str] = &["cancel", "cancelar"];
const PAUSE: &[&str] = &["pause", "pausar", "later", "despues"];
const RENEW: &[&str] = &["renew", "renovar", "renovacion"];
const RESUME: &[&str] = &["resume", "continuar", "retomar"];
const DONE: &[&str] = &["done", "listo", "back", "atras", "regresar"];

/// Number of fields addressable from confirmation and edit screens.
pub const EDITABLE_FIELDS: u8 = 9;

// =============================================================================
// Registry
// =============================================================================

/// Lookup table from (state type, context) to its registration.
pub struct StateRegistry {
    entries: HashMap<(StateType, String), ContextSpec>,
}

impl StateRegistry {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registrations for every screen of the standard flows.
    pub fn standard() -> Self {
        use PriorityCommand::*;

        let mut registry = Self::empty();

        registry.register(
            StateType::Menu,
            contexts::MAIN,
            ContextSpec::new("Main menu", vec![ExpectedInput::Option { max: 4 }])
                .with(ResumeDraft, RESUME)
                .with(NavigateBack, BACK)
                .with(NavigateForward, FORWARD),
        );

        registry.register(
            StateType::Form,
            contexts::PERMIT_APPLICATION,
            ContextSpec::new("Permit application", vec![ExpectedInput::FreeText])
                .with(PreviousField, BACK)
                .with(PauseForm, PAUSE)
                .with(CancelFlow, CANCEL),
        );
        registry.register(
            StateType::Confirmation,
            contexts::PERMIT_APPLICATION,
            ContextSpec::new(
                "Confirm application",
                vec![
                    ExpectedInput::Option { max: 3 },
                    ExpectedInput::AddressedEdit {
                        max: EDITABLE_FIELDS,
                    },
                ],
            )
            .with(PreviousField, BACK)
            .with(PauseForm, PAUSE)
            .with(CancelFlow, CANCEL),
        );
        registry.register(
            StateType::Form,
            contexts::PERMIT_EDIT,
            ContextSpec::new(
                "Edit application",
                vec![ExpectedInput::FieldIndex {
                    max: EDITABLE_FIELDS,
                }],
            )
            .with(FinishEditing, DONE)
            .with(CancelFlow, CANCEL)
            .editing(),
        );
        registry.register(
            StateType::Form,
            contexts::PERMIT_EDIT_VALUE,
            ContextSpec::new("Edit field", vec![ExpectedInput::FreeText])
                .with(PreviousField, BACK)
                .with(CancelFlow, CANCEL),
        );

        registry.register(
            StateType::Form,
            contexts::RENEWAL,
            ContextSpec::new("Renewal", vec![ExpectedInput::FreeText])
                .with(RestartRenewal, RENEW)
                .with(CancelFlow, CANCEL),
        );
        registry.register(
            StateType::Confirmation,
            contexts::RENEWAL,
            ContextSpec::new(
                "Confirm renewal",
                vec![
                    ExpectedInput::Option { max: 3 },
                    ExpectedInput::AddressedEdit {
                        max: EDITABLE_FIELDS,
                    },
                ],
            )
            .with(RestartRenewal, RENEW)
            .with(CancelFlow, CANCEL),
        );
        registry.register(
            StateType::Form,
            contexts::RENEWAL_EDIT,
            ContextSpec::new(
                "Edit renewal",
                vec![ExpectedInput::FieldIndex {
                    max: EDITABLE_FIELDS,
                }],
            )
            .with(RestartRenewal, RENEW)
            .with(FinishEditing, DONE)
            .with(CancelFlow, CANCEL)
            .editing(),
        );
        registry.register(
            StateType::Form,
            contexts::RENEWAL_EDIT_VALUE,
            ContextSpec::new("Edit renewal field", vec![ExpectedInput::FreeText])
                .with(RestartRenewal, RENEW)
                .with(PreviousField, BACK)
                .with(CancelFlow, CANCEL),
        );

        registry.register(
            StateType::Status,
            contexts::MAIN,
            ContextSpec::new("Application status", vec![ExpectedInput::Option { max: 1 }])
                .with(NavigateBack, BACK),
        );
        registry.register(
            StateType::Help,
            contexts::MAIN,
            ContextSpec::new("Help", vec![ExpectedInput::Option { max: 2 }])
                .with(NavigateBack, BACK)
                .with(NavigateForward, FORWARD),
        );
        registry.register(
            StateType::Error,
            contexts::MAIN,
            ContextSpec::new("Something went wrong", vec![ExpectedInput::Option { max: 1 }]),
        );
        registry.register(
            StateType::Notification,
            contexts::PAYMENT_PENDING,
            ContextSpec::new("Payment pending", vec![ExpectedInput::Option { max: 2 }]),
        );

        registry
    }

    pub fn register(&mut self, state_type: StateType, context: &str, spec: ContextSpec) {
        self.entries.insert((state_type, context.to_string()), spec);
    }

    pub fn lookup(&self, state_type: StateType, context: &str) -> Option<&ContextSpec> {
        self.entries.get(&(state_type, context.to_string()))
    }

    pub fn contains(&self, state_type: StateType, context: &str) -> bool {
        self.lookup(state_type, context).is_some()
    }

    /// Expected inputs registered for a screen; empty when unregistered.
    pub fn expected_inputs(&self, state_type: StateType, context: &str) -> Vec<ExpectedInput> {
        self.lookup(state_type, context)
            .map(|spec| spec.expected.clone())
            .unwrap_or_default()
    }

    pub fn title(&self, state_type: StateType, context: &str) -> String {
        self.lookup(state_type, context)
            .map(|spec| spec.title.to_string())
            .unwrap_or_else(|| format!("{}/{}", state_type, context))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(StateType, String), &ContextSpec)> {
        self.entries.iter()
    }
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

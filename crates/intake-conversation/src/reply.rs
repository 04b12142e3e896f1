//! Reply content references handed back to the transport.
//!
//! A reply names what to show and carries its data; wording and language are
//! the transport's concern.

use serde::Serialize;

use crate::collaborators::ApplicationStatus;
use crate::collector::SummaryLine;
use crate::fields::{FieldDefinition, ValidationFailure};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    MainMenu {
        has_draft: bool,
    },
    FieldPrompt {
        key: String,
        label: String,
        prompt: String,
        example: String,
        /// 1-based.
        position: usize,
        total: usize,
        previous_answer: Option<String>,
    },
    ValidationFailed {
        failure: ValidationFailure,
        position: usize,
        total: usize,
    },
    InvalidOption {
        valid_options: Vec<String>,
    },
    Confirmation {
        context: String,
        lines: Vec<SummaryLine>,
    },
    EditMenu {
        lines: Vec<SummaryLine>,
    },
    PaymentLink {
        application_id: String,
        url: String,
    },
    Status {
        status: Option<ApplicationStatus>,
    },
    Help {
        breadcrumb: String,
        can_resume: bool,
    },
    DraftSaved,
    NoDraft,
    NoHistory,
    FolioNotFound {
        folio: String,
    },
    Cancelled,
    TemporarilyUnavailable,
    SessionError,
}

impl Reply {
    /// Prompt for the field at zero-based `index` of `total`.
    pub fn prompt(
        field: &FieldDefinition,
        index: usize,
        total: usize,
        previous_answer: Option<String>,
    ) -> Self {
        Reply::FieldPrompt {
            key: field.key.to_string(),
            label: field.label.to_string(),
            prompt: field.prompt.to_string(),
            example: field.example.to_string(),
            position: index + 1,
            total,
            previous_answer,
        }
    }

    /// Short name of the reply kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::MainMenu { .. } => "main_menu",
            Reply::FieldPrompt { .. } => "field_prompt",
            Reply::ValidationFailed { .. } => "validation_failed",
            Reply::InvalidOption { .. } => "invalid_option",
            Reply::Confirmation { .. } => "confirmation",
            Reply::EditMenu { .. } => "edit_menu",
            Reply::PaymentLink { .. } => "payment_link",
            Reply::Status { .. } => "status",
            Reply::Help { .. } => "help",
            Reply::DraftSaved => "draft_saved",
            Reply::NoDraft => "no_draft",
            Reply::NoHistory => "no_history",
            Reply::FolioNotFound { .. } => "folio_not_found",
            Reply::Cancelled => "cancelled",
            Reply::TemporarilyUnavailable => "temporarily_unavailable",
            Reply::SessionError => "session_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::PERMIT_FIELDS;

    #[test]
    fn test_prompt_is_one_based() {
        let reply = Reply::prompt(&PERMIT_FIELDS[2], 2, 9, None);
        match reply {
            Reply::FieldPrompt {
                key,
                position,
                total,
                ..
            } => {
                assert_eq!(key, "phone");
                assert_eq!(position, 3);
                assert_eq!(total, 9);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_serialized_tag_matches_kind() {
        let replies = [
            Reply::MainMenu { has_draft: true },
            Reply::NoHistory,
            Reply::InvalidOption {
                valid_options: vec!["1".to_string()],
            },
        ];
        for reply in replies {
            let json = serde_json::to_value(&reply).unwrap();
            assert_eq!(json["reply"], reply.kind());
        }
    }
}

//! Field definitions and validators for the intake flows.

use std::sync::LazyLock;

use chrono::{Datelike, Utc};
use regex::Regex;
use serde::Serialize;

use crate::sanitize::fold_keyword;
use crate::state::{contexts, StateType};

// =============================================================================
// Validators
// =============================================================================

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9\-]+(?:\.[a-z0-9\-]+)*\.[a-z]{2,}$")
        .expect("Invalid email regex")
});

/// Accepted vehicle colors, stored uppercase.
pub const VEHICLE_COLORS: &[&str] = &[
    "BLANCO", "NEGRO", "GRIS", "PLATA", "ROJO", "AZUL", "VERDE", "AMARILLO", "NARANJA", "CAFE",
    "BEIGE", "DORADO", "MORADO", "VINO", "ROSA",
];

/// Pure check plus normalizer for one answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validator {
    /// Free text within a character range, stored uppercase.
    Text { min: usize, max: usize },
    /// At least two words of letters, stored uppercase.
    PersonName,
    /// Stored lowercase.
    Email,
    /// 10 to 13 digits once separators are removed.
    Phone,
    /// Four-digit model year from `min` to next year.
    Year { min: i32 },
    /// One of a fixed set, matched without accents or case.
    OneOf(&'static [&'static str]),
    /// Letters and digits only, separators dropped, stored uppercase.
    Serial { min: usize, max: usize },
}

impl Validator {
    /// Normalized value, or a short explanation of what was wrong.
    pub fn check(&self, raw: &str) -> Result<String, String> {
        let value = raw.trim();
        if value.is_empty() {
            return Err("A value is required".to_string());
        }

        match *self {
            Validator::Text { min, max } => {
                let len = value.chars().count();
                if len < min || len > max {
                    return Err(format!("Must be between {} and {} characters", min, max));
                }
                Ok(value.to_uppercase())
            }
            Validator::PersonName => {
                let valid_chars = value
                    .chars()
                    .all(|c| c.is_alphabetic() || c == ' ' || c == '.' || c == '\'' || c == '-');
                if !valid_chars {
                    return Err("Names may only contain letters".to_string());
                }
                if value.split_whitespace().count() < 2 {
                    return Err("Include at least first name and last name".to_string());
                }
                if value.chars().count() > 100 {
                    return Err("Must be at most 100 characters".to_string());
                }
                Ok(value.to_uppercase())
            }
            Validator::Email => {
                let lowered = value.to_lowercase();
                if lowered.len() > 100 || !EMAIL_RE.is_match(&lowered) {
                    return Err("Not a valid email address".to_string());
                }
                Ok(lowered)
            }
            Validator::Phone => {
                if !value
                    .chars()
                    .all(|c| c.is_ascii_digit() || " -()+.".contains(c))
                {
                    return Err("Phone numbers may only contain digits".to_string());
                }
                let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
                if !(10..=13).contains(&digits.len()) {
                    return Err("Must have between 10 and 13 digits".to_string());
                }
                Ok(digits)
            }
            Validator::Year { min } => {
                let max = Utc::now().year() + 1;
                let year = value
                    .parse::<i32>()
                    .ok()
                    .filter(|_| value.len() == 4)
                    .ok_or_else(|| "Must be a four-digit year".to_string())?;
                if year < min || year > max {
                    return Err(format!("Must be between {} and {}", min, max));
                }
                Ok(year.to_string())
            }
            Validator::OneOf(options) => {
                let folded = fold_keyword(value).to_uppercase();
                options
                    .iter()
                    .find(|o| **o == folded)
                    .map(|o| o.to_string())
                    .ok_or_else(|| format!("Must be one of: {}", options.join(", ")))
            }
            Validator::Serial { min, max } => {
                let cleaned: String = value
                    .chars()
                    .filter(|c| !matches!(c, ' ' | '-' | '.'))
                    .collect();
                if !cleaned.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err("Only letters and digits are allowed".to_string());
                }
                let len = cleaned.len();
                if len < min || len > max {
                    return Err(format!("Must be between {} and {} characters", min, max));
                }
                Ok(cleaned.to_uppercase())
            }
        }
    }
}

// =============================================================================
// Field definitions
// =============================================================================

/// One answer a flow collects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDefinition {
    pub key: &'static str,
    pub label: &'static str,
    pub prompt: &'static str,
    pub example: &'static str,
    pub validator: Validator,
}

/// Why an answer was refused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub field: String,
    pub message: String,
    pub example: String,
}

impl FieldDefinition {
    pub fn validate(&self, raw: &str) -> Result<String, ValidationFailure> {
        self.validator.check(raw).map_err(|message| ValidationFailure {
            field: self.key.to_string(),
            message,
            example: self.example.to_string(),
        })
    }
}

/// Permit record fields, in collection order. Their position is also the
/// 1-based index used by direct edits.
pub static PERMIT_FIELDS: [FieldDefinition; 9] = [
    FieldDefinition {
        key: "full_name",
        label: "Full name",
        prompt: "What is the owner's full name?",
        example: "ANA MARIA LOPEZ GARCIA",
        validator: Validator::PersonName,
    },
    FieldDefinition {
        key: "email",
        label: "Email",
        prompt: "Which email should receive the permit?",
        example: "ana.lopez@example.com",
        validator: Validator::Email,
    },
    FieldDefinition {
        key: "phone",
        label: "Phone",
        prompt: "What is a contact phone number?",
        example: "5215550001234",
        validator: Validator::Phone,
    },
    FieldDefinition {
        key: "vehicle_make",
        label: "Vehicle make",
        prompt: "What is the vehicle make?",
        example: "NISSAN",
        validator: Validator::Text { min: 2, max: 50 },
    },
    FieldDefinition {
        key: "vehicle_model",
        label: "Vehicle model",
        prompt: "What is the vehicle model?",
        example: "VERSA",
        validator: Validator::Text { min: 1, max: 50 },
    },
    FieldDefinition {
        key: "vehicle_color",
        label: "Vehicle color",
        prompt: "What color is the vehicle?",
        example: "ROJO",
        validator: Validator::OneOf(VEHICLE_COLORS),
    },
    FieldDefinition {
        key: "vehicle_year",
        label: "Model year",
        prompt: "What is the model year?",
        example: "2019",
        validator: Validator::Year { min: 1950 },
    },
    FieldDefinition {
        key: "serial_number",
        label: "Serial number (VIN)",
        prompt: "What is the serial number (VIN)?",
        example: "3N1CN7AD5KL123456",
        validator: Validator::Serial { min: 5, max: 17 },
    },
    FieldDefinition {
        key: "engine_number",
        label: "Engine number",
        prompt: "What is the engine number?",
        example: "HR16123456",
        validator: Validator::Serial { min: 3, max: 20 },
    },
];

/// The renewal flow asks only for the folio of the permit being renewed.
pub static RENEWAL_LOOKUP_FIELDS: [FieldDefinition; 1] = [FieldDefinition {
    key: "folio",
    label: "Permit folio",
    prompt: "What is the folio of the permit you want to renew?",
    example: "PRM2024001",
    validator: Validator::Serial { min: 4, max: 20 },
}];

// =============================================================================
// Flows
// =============================================================================

/// Multi-step flows that collect a permit record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    PermitApplication,
    Renewal,
}

/// Which screen of a flow a state is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowStage {
    Collect,
    Confirm,
    EditSelect,
    EditValue,
}

impl FlowKind {
    /// Flow and stage for a screen, if it belongs to one.
    pub fn locate(state_type: StateType, context: &str) -> Option<(FlowKind, FlowStage)> {
        use FlowKind::*;
        use FlowStage::*;

        let located = match (state_type, context) {
            (StateType::Form, contexts::PERMIT_APPLICATION) => (PermitApplication, Collect),
            (StateType::Confirmation, contexts::PERMIT_APPLICATION) => (PermitApplication, Confirm),
            (StateType::Form, contexts::PERMIT_EDIT) => (PermitApplication, EditSelect),
            (StateType::Form, contexts::PERMIT_EDIT_VALUE) => (PermitApplication, EditValue),
            (StateType::Form, contexts::RENEWAL) => (Renewal, Collect),
            (StateType::Confirmation, contexts::RENEWAL) => (Renewal, Confirm),
            (StateType::Form, contexts::RENEWAL_EDIT) => (Renewal, EditSelect),
            (StateType::Form, contexts::RENEWAL_EDIT_VALUE) => (Renewal, EditValue),
            _ => return None,
        };
        Some(located)
    }

    /// Context shared by the collect and confirm screens.
    pub fn context(&self) -> &'static str {
        match self {
            FlowKind::PermitApplication => contexts::PERMIT_APPLICATION,
            FlowKind::Renewal => contexts::RENEWAL,
        }
    }

    pub fn edit_context(&self) -> &'static str {
        match self {
            FlowKind::PermitApplication => contexts::PERMIT_EDIT,
            FlowKind::Renewal => contexts::RENEWAL_EDIT,
        }
    }

    pub fn edit_value_context(&self) -> &'static str {
        match self {
            FlowKind::PermitApplication => contexts::PERMIT_EDIT_VALUE,
            FlowKind::Renewal => contexts::RENEWAL_EDIT_VALUE,
        }
    }

    /// Fields asked one by one on the collect screen.
    pub fn collection_fields(&self) -> &'static [FieldDefinition] {
        match self {
            FlowKind::PermitApplication => &PERMIT_FIELDS,
            FlowKind::Renewal => &RENEWAL_LOOKUP_FIELDS,
        }
    }

    /// Fields shown on confirmation and addressable by edits.
    pub fn record_fields(&self) -> &'static [FieldDefinition] {
        &PERMIT_FIELDS
    }
}

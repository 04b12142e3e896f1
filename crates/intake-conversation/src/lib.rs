//! Conversation state engine for messaging-channel intake flows.
//!
//! Turns a sequence of free-text replies from one identity into a completed,
//! validated permit record. The router disambiguates overloaded input by
//! state, the field collector walks the form with back, edit and pause, the
//! navigation history handles detours, and the legacy adapter keeps the old
//! status-string sessions in step during migration.

pub mod collaborators;
pub mod collector;
pub mod engine;
pub mod error;
pub mod fields;
pub mod legacy;
pub mod maintenance;
pub mod navigation;
pub mod offline;
pub mod registry;
pub mod reply;
pub mod router;
pub mod sanitize;
pub mod state;

pub use collaborators::{
    ApplicationRecord, ApplicationRecords, ApplicationStatus, ApplicationSubmission,
    Collaborators, IdentityDirectory, PaymentLinks, PaymentRequest, SubmissionKind,
};
pub use collector::{BackOutcome, Draft, FieldCollector, SubmitOutcome, SummaryLine};
pub use engine::{ConversationEngine, MaintenanceReport, TurnOutcome};
pub use error::{EngineError, FieldError};
pub use fields::{FieldDefinition, FlowKind, FlowStage, ValidationFailure, Validator};
pub use legacy::{LegacyAdapter, LegacySession};
pub use maintenance::MaintenanceTask;
pub use navigation::{NavigationEntry, NavigationHistory, NavigationStep};
pub use offline::OfflineServices;
pub use registry::{ContextSpec, ExpectedInput, PriorityCommand, StateRegistry};
pub use reply::Reply;
pub use router::{GlobalCommand, RoutingDecision, StateRouter};
pub use state::{contexts, ConversationState, StateType};

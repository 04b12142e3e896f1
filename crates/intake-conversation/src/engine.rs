//! Conversation engine: one service object that owns the stores, router,
//! navigation history and collaborators, and turns one inbound message into
//! one reply plus the next persisted state.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use intake_core::config::{IntakeConfig, PaymentConfig};
use intake_core::error::Result;
use intake_core::types::{IdentityKey, Timestamp};
use intake_storage::{CacheStats, PrimaryStore, SessionStore};

use crate::collaborators::{
    ApplicationSubmission, Collaborators, PaymentRequest, SubmissionKind,
};
use crate::collector::{BackOutcome, Draft, FieldCollector, SubmitOutcome};
use crate::error::{EngineError, FieldError};
use crate::fields::{FieldDefinition, FlowKind, FlowStage};
use crate::legacy::{LegacyAdapter, LegacySession};
use crate::navigation::{NavigationEntry, NavigationHistory, NavigationStep, FORM_DATA};
use crate::registry::{PriorityCommand, StateRegistry};
use crate::reply::Reply;
use crate::router::{GlobalCommand, RoutingDecision, StateRouter};
use crate::sanitize::sanitize;
use crate::state::{contexts, parse_label, ConversationState, StateType};

/// Scratch keys kept in `ConversationState::data` next to the answers.
pub mod keys {
    pub const EDITING_FIELD: &str = "editing_field";
    pub const RENEWAL_OF: &str = "renewal_of";
    pub const APPLICATION_ID: &str = "application_id";
    pub const PAYMENT_URL: &str = "payment_url";
    pub const STATUS: &str = "status";
}

/// What the host should do with a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Handled here; `state` has already been persisted.
    Structured {
        reply: Reply,
        state: ConversationState,
    },
    /// Not migrated yet; the legacy handlers own this turn.
    Legacy {
        identity: IdentityKey,
        session: LegacySession,
    },
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub cache_entries_purged: usize,
    pub histories_purged: usize,
}

/// A form parked while the user looks at help.
#[derive(Debug, Serialize, Deserialize)]
struct FormSnapshot {
    state_type: StateType,
    context: String,
    field_index: usize,
    data: Map<String, Value>,
}

pub struct ConversationEngine {
    registry: Arc<StateRegistry>,
    router: StateRouter,
    adapter: LegacyAdapter,
    sessions: SessionStore<ConversationState>,
    legacy: SessionStore<LegacySession>,
    drafts: SessionStore<Draft>,
    navigation: NavigationHistory,
    collaborators: Collaborators,
    payment: PaymentConfig,
    max_input_len: usize,
    breadcrumb_len: usize,
    inactivity_timeout: Duration,
}

impl ConversationEngine {
    pub fn new(
        config: &IntakeConfig,
        primary: Arc<dyn PrimaryStore>,
        collaborators: Collaborators,
    ) -> Self {
        let registry = Arc::new(StateRegistry::standard());
        Self {
            router: StateRouter::new(Arc::clone(&registry)),
            registry,
            adapter: LegacyAdapter::new(config.router.migrated_contexts.iter().cloned()),
            sessions: SessionStore::new("conv", Arc::clone(&primary), &config.session),
            legacy: SessionStore::new("legacy", Arc::clone(&primary), &config.session),
            drafts: SessionStore::new("draft", primary, &config.session),
            navigation: NavigationHistory::new(config.navigation.max_depth),
            collaborators,
            payment: config.payment.clone(),
            max_input_len: config.router.max_input_len,
            breadcrumb_len: config.navigation.breadcrumb_len,
            inactivity_timeout: Duration::from_secs(config.navigation.inactivity_timeout_secs),
        }
    }

    pub fn router(&self) -> &StateRouter {
        &self.router
    }

    pub fn navigation(&self) -> &NavigationHistory {
        &self.navigation
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.sessions.stats()
    }

    /// Current structured state for `identity`, if any.
    pub async fn session(&self, identity: &IdentityKey) -> Option<ConversationState> {
        self.sessions.get(identity).await
    }

    pub async fn legacy_session(&self, identity: &IdentityKey) -> Option<LegacySession> {
        self.legacy.get(identity).await
    }

    /// Write a session produced by a legacy handler.
    pub async fn store_legacy(&self, identity: &IdentityKey, session: &LegacySession) {
        self.legacy.set(identity, session).await;
    }

    /// Forget everything held for `identity`.
    pub async fn clear_session(&self, identity: &IdentityKey) {
        self.sessions.clear(identity).await;
        self.legacy.clear(identity).await;
        self.drafts.clear(identity).await;
        self.navigation.clear(identity);
        info!(identity = %identity, "Session cleared");
    }

    /// Handle one inbound message.
    pub async fn handle_message(
        &self,
        raw_identity: &str,
        text: &str,
    ) -> std::result::Result<TurnOutcome, EngineError> {
        let identity = IdentityKey::parse(raw_identity)
            .ok_or_else(|| EngineError::InvalidIdentity(raw_identity.to_string()))?;
        let text = sanitize(text, self.max_input_len);

        let legacy = self.legacy.get(&identity).await;
        let structured = self.sessions.get(&identity).await;

        let global = GlobalCommand::parse(&text);
        if global.is_none()
            && !self
                .adapter
                .should_route_structured(legacy.as_ref(), structured.as_ref())
        {
            let session = match (legacy, structured) {
                (Some(session), _) => session,
                (None, Some(state)) => self.adapter.to_legacy(&state, None),
                (None, None) => self
                    .adapter
                    .to_legacy(&ConversationState::initial(identity.clone()), None),
            };
            debug!(identity = %identity, status = %session.status, "Turn left on legacy path");
            return Ok(TurnOutcome::Legacy { identity, session });
        }

        let (mut state, is_new) = self.reconcile(&identity, legacy, structured);
        let before = state.clone();

        let reply = if is_new {
            info!(identity = %identity, "New conversation started");
            self.main_menu(&state).await
        } else {
            let decision = self.router.route(&state, &text);
            let navigated = matches!(
                decision,
                RoutingDecision::Priority {
                    command: PriorityCommand::NavigateBack | PriorityCommand::NavigateForward
                }
            );
            let reply = match self.apply(&mut state, decision).await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(
                        identity = %identity,
                        state = %before.label(),
                        error = %err,
                        "Collaborator call failed, turn rolled back"
                    );
                    state = before.clone();
                    Reply::TemporarilyUnavailable
                }
            };
            if !navigated {
                self.record_visit(&state);
            }
            reply
        };
        if is_new {
            self.record_visit(&state);
        }

        state.expected_inputs = self
            .registry
            .expected_inputs(state.state_type, &state.context);
        self.sessions.set(&identity, &state).await;
        let detour_from = self.detour_context(&identity);
        self.legacy
            .set(
                &identity,
                &self.adapter.to_legacy(&state, detour_from.as_deref()),
            )
            .await;

        info!(
            identity = %identity,
            from = %before.label(),
            to = %state.label(),
            reply = reply.kind(),
            "Turn handled"
        );
        Ok(TurnOutcome::Structured { reply, state })
    }

    /// Drop expired cache entries and idle navigation histories.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let cache_entries_purged = self.sessions.purge_expired().await
            + self.legacy.purge_expired().await
            + self.drafts.purge_expired().await;
        let histories_purged = self.navigation.purge_inactive(self.inactivity_timeout);

        info!(
            cache_entries_purged,
            histories_purged, "Maintenance pass complete"
        );
        MaintenanceReport {
            cache_entries_purged,
            histories_purged,
        }
    }

    // -------------------------------------------------------------------------
    // Turn plumbing
    // -------------------------------------------------------------------------

    /// Pick the state to route against. A legacy record that disagrees with
    /// the structured one was written by a legacy handler and wins.
    fn reconcile(
        &self,
        identity: &IdentityKey,
        legacy: Option<LegacySession>,
        structured: Option<ConversationState>,
    ) -> (ConversationState, bool) {
        match (structured, legacy) {
            (Some(state), Some(session)) if self.adapter.agrees(&session, &state) => (state, false),
            (_, Some(session)) => {
                debug!(identity = %identity, status = %session.status, "State rebuilt from legacy session");
                (self.adapter.to_structured(identity.clone(), &session), false)
            }
            (Some(state), None) => (state, false),
            (None, None) => (ConversationState::initial(identity.clone()), true),
        }
    }

    /// Push a history entry when the turn landed on a different screen,
    /// otherwise refresh the current entry so it carries the latest answers.
    fn record_visit(&self, state: &ConversationState) {
        let label = state.label();
        let unchanged = self
            .navigation
            .current(&state.identity)
            .is_some_and(|entry| entry.label == label);
        if unchanged {
            self.navigation
                .update_current(&state.identity, &state.data, state.field_index);
            return;
        }
        self.navigation.push(
            &state.identity,
            NavigationEntry {
                title: self.registry.title(state.state_type, &state.context),
                label,
                snapshot: state.data.clone(),
                field_index: state.field_index,
                timestamp: Timestamp::now(),
            },
        );
    }

    async fn apply(&self, state: &mut ConversationState, decision: RoutingDecision) -> Result<Reply> {
        match decision {
            RoutingDecision::Global {
                command: GlobalCommand::Home,
            } => Ok(self.go_home(state).await),
            RoutingDecision::Global {
                command: GlobalCommand::Help,
            } => Ok(self.open_help(state)),
            RoutingDecision::Priority { command } => self.apply_priority(state, command).await,
            RoutingDecision::InvalidInput { valid_options } => {
                Ok(Reply::InvalidOption { valid_options })
            }
            RoutingDecision::MenuOption { option } => self.apply_option(state, option).await,
            RoutingDecision::FieldValue { raw } => self.apply_field_value(state, &raw).await,
            RoutingDecision::FieldSelection { index } => {
                Ok(self.select_field(state, usize::from(index)))
            }
            RoutingDecision::DirectEdit { index, value } => {
                Ok(self.direct_edit(state, usize::from(index), &value))
            }
            RoutingDecision::UnregisteredState {
                state_type,
                context,
            } => {
                error!(
                    identity = %state.identity,
                    state_type = %state_type,
                    context = %context,
                    "No registration for current state"
                );
                state.reset_to(StateType::Error, contexts::MAIN);
                Ok(Reply::SessionError)
            }
        }
    }

    async fn apply_priority(
        &self,
        state: &mut ConversationState,
        command: PriorityCommand,
    ) -> Result<Reply> {
        let reply = match command {
            PriorityCommand::PreviousField => self.previous_field(state).await,
            PriorityCommand::PauseForm => self.pause(state).await,
            PriorityCommand::RestartRenewal => {
                state.reset_to(StateType::Form, contexts::RENEWAL);
                self.render(state).await
            }
            PriorityCommand::ResumeDraft => self.resume_draft(state).await,
            PriorityCommand::NavigateBack => {
                let step = self.navigation.back(&state.identity);
                self.navigate(state, step).await
            }
            PriorityCommand::NavigateForward => {
                let step = self.navigation.forward(&state.identity);
                self.navigate(state, step).await
            }
            PriorityCommand::FinishEditing => match self.flow_of(state) {
                Some((flow, _)) => {
                    state.transition_to(StateType::Confirmation, flow.context());
                    self.confirmation(state, flow)
                }
                None => self.render(state).await,
            },
            PriorityCommand::CancelFlow => {
                state.reset_to(StateType::Menu, contexts::MAIN);
                self.navigation.clear_preserved(&state.identity, FORM_DATA);
                Reply::Cancelled
            }
        };
        Ok(reply)
    }

    async fn apply_option(&self, state: &mut ConversationState, option: u8) -> Result<Reply> {
        if let Some((flow, FlowStage::Confirm)) = self.flow_of(state) {
            return match option {
                1 => self.submit(state, flow).await,
                2 => {
                    state.transition_to(StateType::Form, flow.edit_context());
                    Ok(self.edit_menu(state, flow))
                }
                _ => {
                    state.reset_to(StateType::Menu, contexts::MAIN);
                    self.navigation.clear_preserved(&state.identity, FORM_DATA);
                    Ok(Reply::Cancelled)
                }
            };
        }

        match (state.state_type, option) {
            (StateType::Menu, 1) => {
                state.reset_to(StateType::Form, contexts::PERMIT_APPLICATION);
                Ok(self.render(state).await)
            }
            (StateType::Menu, 2) => self.show_status(state).await,
            (StateType::Menu, 3) => {
                state.reset_to(StateType::Form, contexts::RENEWAL);
                Ok(self.render(state).await)
            }
            (StateType::Menu, _) => Ok(self.open_help(state)),
            (StateType::Help, 1) => Ok(self.resume_preserved(state).await),
            // Resend the pending link.
            (StateType::Notification, 1) => Ok(self.render(state).await),
            _ => Ok(self.go_home(state).await),
        }
    }

    async fn apply_field_value(&self, state: &mut ConversationState, raw: &str) -> Result<Reply> {
        let Some((flow, stage)) = self.flow_of(state) else {
            return Ok(self.render(state).await);
        };

        match (flow, stage) {
            (FlowKind::Renewal, FlowStage::Collect) => self.lookup_renewal(state, raw).await,
            (_, FlowStage::Collect) => Ok(self.collect_answer(state, flow, raw)),
            (_, FlowStage::EditValue) => Ok(self.edit_value(state, flow, raw)),
            _ => Ok(self.render_flow(state, flow, stage)),
        }
    }

    // -------------------------------------------------------------------------
    // Field collection
    // -------------------------------------------------------------------------

    fn collector(&self, fields: &'static [FieldDefinition]) -> FieldCollector {
        FieldCollector::new(fields, self.max_input_len)
    }

    fn flow_of(&self, state: &ConversationState) -> Option<(FlowKind, FlowStage)> {
        FlowKind::locate(state.state_type, &state.context)
    }

    fn collect_answer(&self, state: &mut ConversationState, flow: FlowKind, raw: &str) -> Reply {
        let collector = self.collector(flow.collection_fields());
        match collector.submit(state, raw) {
            SubmitOutcome::Advanced { next } => {
                let field = &collector.fields()[next];
                Reply::prompt(
                    field,
                    next,
                    collector.len(),
                    state.answer(field.key).map(str::to_string),
                )
            }
            SubmitOutcome::Completed => {
                state.transition_to(StateType::Confirmation, flow.context());
                info!(identity = %state.identity, flow = ?flow, "All fields collected");
                self.confirmation(state, flow)
            }
            SubmitOutcome::Rejected(failure) => {
                debug!(
                    identity = %state.identity,
                    field = %failure.field,
                    "Answer rejected"
                );
                Reply::ValidationFailed {
                    failure,
                    position: state.field_index + 1,
                    total: collector.len(),
                }
            }
        }
    }

    async fn lookup_renewal(&self, state: &mut ConversationState, raw: &str) -> Result<Reply> {
        let flow = FlowKind::Renewal;
        let collector = self.collector(flow.collection_fields());
        let Some(field) = collector.current(state) else {
            state.transition_to(StateType::Confirmation, flow.context());
            return Ok(self.confirmation(state, flow));
        };

        let folio = match collector.check(field, raw) {
            Ok(folio) => folio,
            Err(failure) => {
                return Ok(Reply::ValidationFailed {
                    failure,
                    position: state.field_index + 1,
                    total: collector.len(),
                })
            }
        };

        let Some(record) = self.collaborators.records.find_by_folio(&folio).await? else {
            info!(identity = %state.identity, folio = %folio, "Renewal folio not found");
            return Ok(Reply::FolioNotFound { folio });
        };

        state.record(field.key, folio);
        state.record(keys::RENEWAL_OF, record.id.clone());
        for f in flow.record_fields() {
            if let Some(value) = record.fields.get(f.key).and_then(Value::as_str) {
                state.record(f.key, value);
            }
        }
        state.field_index = collector.len();
        state.transition_to(StateType::Confirmation, flow.context());
        info!(identity = %state.identity, renewal_of = %record.id, "Renewal prefilled");
        Ok(self.confirmation(state, flow))
    }

    fn select_field(&self, state: &mut ConversationState, index: usize) -> Reply {
        let Some((flow, FlowStage::EditSelect)) = self.flow_of(state) else {
            return self.invalid_option(state);
        };
        let collector = self.collector(flow.record_fields());
        match collector.field_at(index) {
            Ok(field) => {
                state.record(keys::EDITING_FIELD, index as u64);
                state.transition_to(StateType::Form, flow.edit_value_context());
                Reply::prompt(
                    field,
                    index - 1,
                    collector.len(),
                    state.answer(field.key).map(str::to_string),
                )
            }
            Err(_) => self.edit_menu(state, flow),
        }
    }

    fn edit_value(&self, state: &mut ConversationState, flow: FlowKind, raw: &str) -> Reply {
        let index = editing_field(state);
        let collector = self.collector(flow.record_fields());
        match collector.edit(state, index, raw) {
            Ok(field) => {
                debug!(identity = %state.identity, field = field.key, "Field edited");
                state.transition_to(StateType::Confirmation, flow.context());
                self.confirmation(state, flow)
            }
            Err(FieldError::Validation(failure)) => Reply::ValidationFailed {
                failure,
                position: index,
                total: collector.len(),
            },
            Err(FieldError::IndexOutOfRange { .. }) => {
                state.transition_to(StateType::Form, flow.edit_context());
                self.edit_menu(state, flow)
            }
        }
    }

    fn direct_edit(&self, state: &mut ConversationState, index: usize, value: &str) -> Reply {
        let Some((flow, FlowStage::Confirm)) = self.flow_of(state) else {
            return self.invalid_option(state);
        };
        let collector = self.collector(flow.record_fields());
        match collector.edit(state, index, value) {
            Ok(_) => self.confirmation(state, flow),
            Err(FieldError::Validation(failure)) => Reply::ValidationFailed {
                failure,
                position: index,
                total: collector.len(),
            },
            Err(FieldError::IndexOutOfRange { .. }) => self.invalid_option(state),
        }
    }

    async fn previous_field(&self, state: &mut ConversationState) -> Reply {
        let Some((flow, stage)) = self.flow_of(state) else {
            return self.render(state).await;
        };

        match stage {
            FlowStage::Collect => {
                let collector = self.collector(flow.collection_fields());
                match collector.back(state) {
                    BackOutcome::Previous {
                        index,
                        previous_answer,
                    } => Reply::prompt(
                        &collector.fields()[index],
                        index,
                        collector.len(),
                        previous_answer,
                    ),
                    BackOutcome::AtStart => self.render_flow(state, flow, stage),
                }
            }
            FlowStage::Confirm => {
                let collector = self.collector(flow.collection_fields());
                state.transition_to(StateType::Form, flow.context());
                state.field_index = collector.len().saturating_sub(1);
                self.render_flow(state, flow, FlowStage::Collect)
            }
            FlowStage::EditValue => {
                state.transition_to(StateType::Form, flow.edit_context());
                self.edit_menu(state, flow)
            }
            FlowStage::EditSelect => {
                state.transition_to(StateType::Confirmation, flow.context());
                self.confirmation(state, flow)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Drafts, detours and navigation
    // -------------------------------------------------------------------------

    async fn pause(&self, state: &mut ConversationState) -> Reply {
        let Some((flow, _)) = self.flow_of(state) else {
            return self.render(state).await;
        };
        let draft = self.collector(flow.collection_fields()).pause(state);
        self.drafts.set(&state.identity, &draft).await;
        info!(
            identity = %state.identity,
            field_index = draft.field_index,
            "Form paused to draft"
        );
        state.reset_to(StateType::Menu, contexts::MAIN);
        Reply::DraftSaved
    }

    async fn resume_draft(&self, state: &mut ConversationState) -> Reply {
        let Some(draft) = self.drafts.get(&state.identity).await else {
            return Reply::NoDraft;
        };
        let flow = FlowKind::locate(StateType::Form, &draft.context)
            .map(|(flow, _)| flow)
            .unwrap_or(FlowKind::PermitApplication);
        let collector = self.collector(flow.collection_fields());
        collector.resume(state, draft);
        self.drafts.clear(&state.identity).await;
        if collector.current(state).is_none() {
            state.transition_to(StateType::Confirmation, flow.context());
        }
        info!(identity = %state.identity, field_index = state.field_index, "Draft resumed");
        self.render(state).await
    }

    fn open_help(&self, state: &mut ConversationState) -> Reply {
        if self.flow_of(state).is_some() {
            let snapshot = FormSnapshot {
                state_type: state.state_type,
                context: state.context.clone(),
                field_index: state.field_index,
                data: state.data.clone(),
            };
            match serde_json::to_value(&snapshot) {
                Ok(value) => self.navigation.preserve(&state.identity, FORM_DATA, value),
                Err(e) => warn!(identity = %state.identity, error = %e, "Form snapshot not preserved"),
            }
        }

        let breadcrumb = self
            .navigation
            .breadcrumb(&state.identity, self.breadcrumb_len);
        state.reset_to(StateType::Help, contexts::MAIN);
        self.help(state, breadcrumb)
    }

    async fn resume_preserved(&self, state: &mut ConversationState) -> Reply {
        let Some(value) = self.navigation.preserved(&state.identity, FORM_DATA) else {
            return Reply::NoDraft;
        };
        self.navigation.clear_preserved(&state.identity, FORM_DATA);

        match serde_json::from_value::<FormSnapshot>(value) {
            Ok(snapshot) => {
                state.reset_to(snapshot.state_type, &snapshot.context);
                state.data = snapshot.data;
                state.field_index = snapshot.field_index;
                self.render(state).await
            }
            Err(e) => {
                warn!(identity = %state.identity, error = %e, "Preserved form unreadable, dropped");
                Reply::NoDraft
            }
        }
    }

    /// Context of the form parked behind an open help detour.
    fn detour_context(&self, identity: &IdentityKey) -> Option<String> {
        self.navigation
            .preserved(identity, FORM_DATA)
            .and_then(|value| serde_json::from_value::<FormSnapshot>(value).ok())
            .map(|snapshot| snapshot.context)
    }

    async fn navigate(&self, state: &mut ConversationState, step: NavigationStep) -> Reply {
        let NavigationStep::Moved(entry) = step else {
            return Reply::NoHistory;
        };
        let Some((state_type, context)) = parse_label(&entry.label) else {
            warn!(label = %entry.label, "Unreadable navigation label");
            return Reply::NoHistory;
        };
        state.reset_to(state_type, context);
        state.data = entry.snapshot;
        state.field_index = entry.field_index;
        if self.flow_of(state).is_some() {
            // Back on the form itself, so the detour is over.
            self.navigation.clear_preserved(&state.identity, FORM_DATA);
        }
        self.render(state).await
    }

    async fn go_home(&self, state: &mut ConversationState) -> Reply {
        state.reset_to(StateType::Menu, contexts::MAIN);
        self.navigation.clear_preserved(&state.identity, FORM_DATA);
        self.main_menu(state).await
    }

    // -------------------------------------------------------------------------
    // Collaborator-backed steps
    // -------------------------------------------------------------------------

    async fn submit(&self, state: &mut ConversationState, flow: FlowKind) -> Result<Reply> {
        let record_fields = self.collector(flow.record_fields());
        if let Some(missing) = record_fields.first_missing(state) {
            return Ok(self.request_missing(state, flow, missing));
        }

        let user_id = self
            .collaborators
            .identities
            .resolve_user(&state.identity)
            .await?;
        let kind = match flow {
            FlowKind::PermitApplication => SubmissionKind::New,
            FlowKind::Renewal => SubmissionKind::Renewal {
                of: state
                    .answer(keys::RENEWAL_OF)
                    .unwrap_or_default()
                    .to_string(),
            },
        };
        let fields: Map<String, Value> = flow
            .record_fields()
            .iter()
            .filter_map(|f| state.data.get(f.key).map(|v| (f.key.to_string(), v.clone())))
            .collect();

        let application_id = self
            .collaborators
            .records
            .save_application(&ApplicationSubmission {
                user_id,
                kind,
                fields,
            })
            .await?;

        let amount_minor = match flow {
            FlowKind::PermitApplication => self.payment.permit_amount_minor,
            FlowKind::Renewal => self.payment.renewal_amount_minor,
        };
        let url = self
            .collaborators
            .payments
            .create_checkout(&PaymentRequest {
                amount_minor,
                currency: self.payment.currency.clone(),
                application_id: application_id.clone(),
            })
            .await?;

        state.reset_to(StateType::Notification, contexts::PAYMENT_PENDING);
        self.navigation.clear_preserved(&state.identity, FORM_DATA);
        state.record(keys::APPLICATION_ID, application_id.as_str());
        state.record(keys::PAYMENT_URL, url.as_str());
        info!(
            identity = %state.identity,
            application_id = %application_id,
            flow = ?flow,
            "Application submitted"
        );
        Ok(Reply::PaymentLink {
            application_id,
            url,
        })
    }

    async fn show_status(&self, state: &mut ConversationState) -> Result<Reply> {
        let user_id = self
            .collaborators
            .identities
            .resolve_user(&state.identity)
            .await?;
        let status = self.collaborators.records.latest_status(&user_id).await?;

        state.reset_to(StateType::Status, contexts::MAIN);
        if let Some(status) = &status {
            state.record(keys::STATUS, serde_json::to_value(status)?);
        }
        Ok(Reply::Status { status })
    }

    fn request_missing(&self, state: &mut ConversationState, flow: FlowKind, missing: usize) -> Reply {
        let collector = self.collector(flow.record_fields());
        let field = &collector.fields()[missing];
        match flow {
            FlowKind::PermitApplication => {
                state.transition_to(StateType::Form, flow.context());
                state.field_index = missing;
            }
            FlowKind::Renewal => {
                state.record(keys::EDITING_FIELD, (missing + 1) as u64);
                state.transition_to(StateType::Form, flow.edit_value_context());
            }
        }
        Reply::prompt(field, missing, collector.len(), None)
    }

    // -------------------------------------------------------------------------
    // Rendering
    // -------------------------------------------------------------------------

    /// Reply that shows the screen `state` is on.
    async fn render(&self, state: &ConversationState) -> Reply {
        if let Some((flow, stage)) = self.flow_of(state) {
            return self.render_flow(state, flow, stage);
        }

        match state.state_type {
            StateType::Menu => self.main_menu(state).await,
            StateType::Help => {
                let breadcrumb = self
                    .navigation
                    .breadcrumb(&state.identity, self.breadcrumb_len);
                self.help(state, breadcrumb)
            }
            StateType::Status => Reply::Status {
                status: state
                    .data
                    .get(keys::STATUS)
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok()),
            },
            StateType::Notification => match (
                state.answer(keys::APPLICATION_ID),
                state.answer(keys::PAYMENT_URL),
            ) {
                (Some(application_id), Some(url)) => Reply::PaymentLink {
                    application_id: application_id.to_string(),
                    url: url.to_string(),
                },
                _ => Reply::SessionError,
            },
            _ => Reply::SessionError,
        }
    }

    fn render_flow(&self, state: &ConversationState, flow: FlowKind, stage: FlowStage) -> Reply {
        match stage {
            FlowStage::Collect => {
                let collector = self.collector(flow.collection_fields());
                match collector.current(state) {
                    Some(field) => Reply::prompt(
                        field,
                        state.field_index,
                        collector.len(),
                        state.answer(field.key).map(str::to_string),
                    ),
                    None => self.confirmation(state, flow),
                }
            }
            FlowStage::Confirm => self.confirmation(state, flow),
            FlowStage::EditSelect => self.edit_menu(state, flow),
            FlowStage::EditValue => {
                let collector = self.collector(flow.record_fields());
                match collector.field_at(editing_field(state)) {
                    Ok(field) => Reply::prompt(
                        field,
                        editing_field(state) - 1,
                        collector.len(),
                        state.answer(field.key).map(str::to_string),
                    ),
                    Err(_) => self.edit_menu(state, flow),
                }
            }
        }
    }

    async fn main_menu(&self, state: &ConversationState) -> Reply {
        Reply::MainMenu {
            has_draft: self.drafts.has_state(&state.identity).await,
        }
    }

    fn help(&self, state: &ConversationState, breadcrumb: String) -> Reply {
        Reply::Help {
            breadcrumb,
            can_resume: self
                .navigation
                .preserved(&state.identity, FORM_DATA)
                .is_some(),
        }
    }

    fn confirmation(&self, state: &ConversationState, flow: FlowKind) -> Reply {
        Reply::Confirmation {
            context: flow.context().to_string(),
            lines: self.collector(flow.record_fields()).summary(state),
        }
    }

    fn edit_menu(&self, state: &ConversationState, flow: FlowKind) -> Reply {
        Reply::EditMenu {
            lines: self.collector(flow.record_fields()).summary(state),
        }
    }

    fn invalid_option(&self, state: &ConversationState) -> Reply {
        Reply::InvalidOption {
            valid_options: self
                .registry
                .lookup(state.state_type, &state.context)
                .map(|spec| spec.valid_options())
                .unwrap_or_default(),
        }
    }
}

/// 1-based index of the field being edited, 0 when unset.
fn editing_field(state: &ConversationState) -> usize {
    state
        .data
        .get(keys::EDITING_FIELD)
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize
}

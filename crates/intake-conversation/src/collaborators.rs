//! Downstream services the engine calls during a turn.
//!
//! Each seam is an async trait injected at construction. Failures come back
//! as `IntakeError::Collaborator` and are turned into a retryable reply by the
//! engine; they never corrupt the session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use intake_core::error::Result;
use intake_core::types::{IdentityKey, Timestamp};

/// Checkout request for a submitted application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRequest {
    pub amount_minor: u64,
    pub currency: String,
    pub application_id: String,
}

#[async_trait]
pub trait PaymentLinks: Send + Sync {
    /// Create a checkout session and return its URL.
    async fn create_checkout(&self, request: &PaymentRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionKind {
    New,
    Renewal { of: String },
}

/// Collected fields ready to be stored as an application record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationSubmission {
    pub user_id: String,
    pub kind: SubmissionKind,
    pub fields: Map<String, Value>,
}

/// A stored application, as returned by a folio lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: String,
    pub folio: String,
    pub fields: Map<String, Value>,
}

/// Latest known status of a user's most recent application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    pub application_id: String,
    pub status: String,
    pub updated_at: Timestamp,
}

#[async_trait]
pub trait ApplicationRecords: Send + Sync {
    /// Persist a submission and return the new application id.
    async fn save_application(&self, submission: &ApplicationSubmission) -> Result<String>;

    async fn find_by_folio(&self, folio: &str) -> Result<Option<ApplicationRecord>>;

    async fn latest_status(&self, user_id: &str) -> Result<Option<ApplicationStatus>>;
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Resolve (or create) the user behind a phone identity.
    async fn resolve_user(&self, identity: &IdentityKey) -> Result<String>;
}

/// Bundle of collaborators handed to the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub payments: Arc<dyn PaymentLinks>,
    pub records: Arc<dyn ApplicationRecords>,
    pub identities: Arc<dyn IdentityDirectory>,
}

//! In-process collaborators.
//!
//! Used by the CLI when no external services are wired in, and by tests.
//! Each one can be switched into a failing mode to exercise the engine's
//! retryable-reply path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use intake_core::error::{IntakeError, Result};
use intake_core::types::{IdentityKey, Timestamp};

use crate::collaborators::{
    ApplicationRecord, ApplicationRecords, ApplicationStatus, ApplicationSubmission,
    Collaborators, IdentityDirectory, PaymentLinks, PaymentRequest,
};

const PENDING_PAYMENT: &str = "pending_payment";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Records
// =============================================================================

struct StoredApplication {
    id: String,
    submission: ApplicationSubmission,
    saved_at: Timestamp,
}

#[derive(Default)]
pub struct InMemoryRecords {
    applications: Mutex<Vec<StoredApplication>>,
    by_folio: Mutex<HashMap<String, ApplicationRecord>>,
    failing: AtomicBool,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a permit findable by folio for renewals.
    pub fn seed(&self, record: ApplicationRecord) {
        lock(&self.by_folio).insert(record.folio.to_uppercase(), record);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every submission saved so far, oldest first.
    pub fn submissions(&self) -> Vec<(String, ApplicationSubmission)> {
        lock(&self.applications)
            .iter()
            .map(|a| (a.id.clone(), a.submission.clone()))
            .collect()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IntakeError::Collaborator(
                "application records unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ApplicationRecords for InMemoryRecords {
    async fn save_application(&self, submission: &ApplicationSubmission) -> Result<String> {
        self.check()?;
        let id = Uuid::new_v4().to_string();
        lock(&self.applications).push(StoredApplication {
            id: id.clone(),
            submission: submission.clone(),
            saved_at: Timestamp::now(),
        });
        Ok(id)
    }

    async fn find_by_folio(&self, folio: &str) -> Result<Option<ApplicationRecord>> {
        self.check()?;
        Ok(lock(&self.by_folio).get(&folio.to_uppercase()).cloned())
    }

    async fn latest_status(&self, user_id: &str) -> Result<Option<ApplicationStatus>> {
        self.check()?;
        Ok(lock(&self.applications)
            .iter()
            .rev()
            .find(|a| a.submission.user_id == user_id)
            .map(|a| ApplicationStatus {
                application_id: a.id.clone(),
                status: PENDING_PAYMENT.to_string(),
                updated_at: a.saved_at,
            }))
    }
}

// =============================================================================
// Payments
// =============================================================================

/// Issues deterministic checkout URLs under a base URL.
pub struct CheckoutLinks {
    base_url: String,
    issued: AtomicUsize,
    failing: AtomicBool,
}

impl CheckoutLinks {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            issued: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentLinks for CheckoutLinks {
    async fn create_checkout(&self, request: &PaymentRequest) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IntakeError::Collaborator(
                "payment provider unavailable".to_string(),
            ));
        }
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "{}/{}?amount={}&currency={}",
            self.base_url, request.application_id, request.amount_minor, request.currency
        ))
    }
}

// =============================================================================
// Identities
// =============================================================================

/// Derives a stable user id from the phone identity.
#[derive(Default)]
pub struct PhoneDirectory;

#[async_trait]
impl IdentityDirectory for PhoneDirectory {
    async fn resolve_user(&self, identity: &IdentityKey) -> Result<String> {
        Ok(format!("user-{}", identity))
    }
}

/// The three offline collaborators, kept reachable for inspection.
#[derive(Clone)]
pub struct OfflineServices {
    pub records: Arc<InMemoryRecords>,
    pub payments: Arc<CheckoutLinks>,
    pub identities: Arc<PhoneDirectory>,
}

impl OfflineServices {
    pub fn new(checkout_base_url: &str) -> Self {
        Self {
            records: Arc::new(InMemoryRecords::new()),
            payments: Arc::new(CheckoutLinks::new(checkout_base_url)),
            identities: Arc::new(PhoneDirectory),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            payments: self.payments.clone(),
            records: self.records.clone(),
            identities: self.identities.clone(),
        }
    }
}

//! Approver notifications.
//!
//! Dispatched after commit. Failures are reported to the caller, which logs
//! them; they never roll back the approval state.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use payflow_auth::Role;
use payflow_core::{DocumentId, OrganizationId, UserId};

/// "Document X awaits your approval at level N".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalNotice {
    pub document_id: DocumentId,
    pub organization_id: OrganizationId,
    pub number: String,
    pub amount: f64,
    pub currency: String,
    pub level: u32,
    /// Assigned approvers; empty when a role had no active holder.
    pub approvers: Vec<UserId>,
    pub roles: Vec<Role>,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

pub trait NotificationDispatcher: Send + Sync {
    fn notify_approvers(&self, notice: ApprovalNotice) -> Result<(), NotificationError>;
}

impl<N: NotificationDispatcher + ?Sized> NotificationDispatcher for Arc<N> {
    fn notify_approvers(&self, notice: ApprovalNotice) -> Result<(), NotificationError> {
        (**self).notify_approvers(notice)
    }
}

/// Logs notices instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationDispatcher for TracingNotifier {
    fn notify_approvers(&self, notice: ApprovalNotice) -> Result<(), NotificationError> {
        tracing::info!(
            target: "notifications",
            document_id = %notice.document_id,
            number = %notice.number,
            level = notice.level,
            approvers = notice.approvers.len(),
            "document {} awaits approval at level {}",
            notice.number,
            notice.level
        );
        Ok(())
    }
}

/// Collects notices; can be switched to fail for error-path tests.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<ApprovalNotice>>,
    failing: Mutex<bool>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.lock() {
            *flag = failing;
        }
    }

    pub fn sent(&self) -> Vec<ApprovalNotice> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl NotificationDispatcher for InMemoryNotifier {
    fn notify_approvers(&self, notice: ApprovalNotice) -> Result<(), NotificationError> {
        if self.failing.lock().map(|f| *f).unwrap_or(false) {
            return Err(NotificationError::Unavailable("simulated outage".into()));
        }
        self.sent
            .lock()
            .map_err(|_| NotificationError::Unavailable("notifier poisoned".into()))?
            .push(notice);
        Ok(())
    }
}

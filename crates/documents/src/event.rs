use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payflow_core::{DocumentId, OrganizationId, UserId};
use payflow_events::Event;

use crate::status::DocumentStatus;

/// Payload shared by every document milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub document_id: DocumentId,
    pub organization_id: OrganizationId,
    pub from: DocumentStatus,
    pub to: DocumentStatus,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Milestone emitted by every committed status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentEvent {
    Submitted(StatusChange),
    Approved(StatusChange),
    Rejected(StatusChange),
    Scheduled(StatusChange),
    PartiallyPaid {
        #[serde(flatten)]
        change: StatusChange,
        paid_amount: f64,
        remaining_amount: f64,
    },
    Paid(StatusChange),
    Cancelled(StatusChange),
    /// Any other edge (pending_approval, recall, back to draft).
    StatusChanged(StatusChange),
}

impl DocumentEvent {
    pub(crate) fn from_change(change: StatusChange, paid: f64, remaining: f64) -> Self {
        match change.to {
            DocumentStatus::Submitted if change.from == DocumentStatus::Draft => {
                DocumentEvent::Submitted(change)
            }
            DocumentStatus::Approved => DocumentEvent::Approved(change),
            DocumentStatus::Rejected => DocumentEvent::Rejected(change),
            DocumentStatus::Scheduled => DocumentEvent::Scheduled(change),
            DocumentStatus::PartiallyPaid => DocumentEvent::PartiallyPaid {
                change,
                paid_amount: paid,
                remaining_amount: remaining,
            },
            DocumentStatus::Paid => DocumentEvent::Paid(change),
            DocumentStatus::Cancelled => DocumentEvent::Cancelled(change),
            _ => DocumentEvent::StatusChanged(change),
        }
    }

    pub fn change(&self) -> &StatusChange {
        match self {
            DocumentEvent::Submitted(c)
            | DocumentEvent::Approved(c)
            | DocumentEvent::Rejected(c)
            | DocumentEvent::Scheduled(c)
            | DocumentEvent::Paid(c)
            | DocumentEvent::Cancelled(c)
            | DocumentEvent::StatusChanged(c) => c,
            DocumentEvent::PartiallyPaid { change, .. } => change,
        }
    }

    pub fn document_id(&self) -> DocumentId {
        self.change().document_id
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.change().organization_id
    }
}

impl Event for DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::Submitted(_) => "payments.document.submitted",
            DocumentEvent::Approved(_) => "payments.document.approved",
            DocumentEvent::Rejected(_) => "payments.document.rejected",
            DocumentEvent::Scheduled(_) => "payments.document.scheduled",
            DocumentEvent::PartiallyPaid { .. } => "payments.document.partially_paid",
            DocumentEvent::Paid(_) => "payments.document.paid",
            DocumentEvent::Cancelled(_) => "payments.document.cancelled",
            DocumentEvent::StatusChanged(_) => "payments.document.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.change().occurred_at
    }
}

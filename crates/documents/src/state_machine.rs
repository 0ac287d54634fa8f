//! The only code path that changes a document's status and settlement amounts.

use chrono::{DateTime, Utc};

use payflow_core::{DomainError, DomainResult, UserId, ValidationError, money};

use crate::document::PaymentDocument;
use crate::event::{DocumentEvent, StatusChange};
use crate::status::DocumentStatus;

impl PaymentDocument {
    pub fn can_transition(&self, to: DocumentStatus) -> bool {
        self.status().can_transition_to(to)
    }

    /// Move along one edge of the status graph.
    ///
    /// Stamps the milestone timestamp for `to`. A transition into `paid`
    /// closes the document exactly (`paid_amount = amount`, `remaining = 0`).
    /// `reason` is kept for rejections and cancellations.
    pub fn transition(
        &mut self,
        to: DocumentStatus,
        at: DateTime<Utc>,
        actor: UserId,
        reason: Option<String>,
    ) -> DomainResult<DocumentEvent> {
        let from = self.status();
        if !from.can_transition_to(to) {
            return Err(DomainError::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }

        self.set_status(to);
        let stamps = self.timestamps_mut();
        match to {
            DocumentStatus::Submitted => stamps.submitted_at = Some(at),
            DocumentStatus::Approved => stamps.approved_at = Some(at),
            DocumentStatus::Scheduled => stamps.scheduled_at = Some(at),
            DocumentStatus::Paid => stamps.paid_at = Some(at),
            DocumentStatus::Rejected => stamps.rejected_at = Some(at),
            DocumentStatus::Cancelled => stamps.cancelled_at = Some(at),
            DocumentStatus::Draft
            | DocumentStatus::PendingApproval
            | DocumentStatus::PartiallyPaid => {}
        }

        match to {
            DocumentStatus::Paid => self.settle_exactly(),
            DocumentStatus::Rejected | DocumentStatus::Cancelled => {
                self.set_status_reason(reason.clone())
            }
            DocumentStatus::Draft => self.set_status_reason(None),
            _ => {}
        }
        self.updated_at = at;

        let change = StatusChange {
            document_id: self.id,
            organization_id: self.organization_id,
            from,
            to,
            reason,
            actor,
            occurred_at: at,
        };
        Ok(DocumentEvent::from_change(
            change,
            self.paid_amount(),
            self.remaining_amount(),
        ))
    }

    /// Settle `amount` of the remaining balance.
    ///
    /// Lands in `paid` when the remainder drops within tolerance; otherwise
    /// moves to `partially_paid` (from `approved` by way of `scheduled`) or,
    /// if already partially paid, only updates the amounts. On error the
    /// document is left untouched.
    pub fn register_partial_payment(
        &mut self,
        amount: f64,
        at: DateTime<Utc>,
        actor: UserId,
    ) -> DomainResult<Vec<DocumentEvent>> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(DomainError::validation(ValidationError::new(
                "amount",
                "payment.amount_positive",
                "payment amount must be positive",
            )));
        }
        if !self.status().is_settleable() {
            return Err(DomainError::rule(format!(
                "payments can only be registered on approved, scheduled or partially paid \
                 documents (current status: {})",
                self.status()
            )));
        }
        if amount > self.remaining_amount() + money::EPSILON {
            return Err(DomainError::rule(format!(
                "payment amount {amount:.2} exceeds remaining amount {:.2}",
                self.remaining_amount()
            )));
        }

        let mut next = self.clone();
        let mut events = Vec::new();
        next.set_paid_amount(self.paid_amount() + amount);

        if money::is_settled(next.remaining_amount()) {
            events.push(next.transition(DocumentStatus::Paid, at, actor, None)?);
        } else if next.status() != DocumentStatus::PartiallyPaid {
            if next.status() == DocumentStatus::Approved {
                events.push(next.transition(DocumentStatus::Scheduled, at, actor, None)?);
            }
            events.push(next.transition(DocumentStatus::PartiallyPaid, at, actor, None)?);
        } else {
            next.updated_at = at;
        }

        *self = next;
        Ok(events)
    }
}

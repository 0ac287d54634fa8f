use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payflow_core::{OrganizationId, Party, money};
use payflow_documents::{Direction, PaymentDocument};

/// Derived balance between an organization and one counterparty.
///
/// Balances and counts are recomputed from source documents; only the
/// block flag and the credit limit are edited directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyAccount {
    pub organization_id: OrganizationId,
    pub counterparty: Party,
    pub receivable_balance: f64,
    pub payable_balance: f64,
    pub net_balance: f64,
    pub open_receivables: u32,
    pub open_payables: u32,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    pub credit_limit: Option<f64>,
    pub recalculated_at: Option<DateTime<Utc>>,
}

impl CounterpartyAccount {
    pub fn new(organization_id: OrganizationId, counterparty: Party) -> Self {
        Self {
            organization_id,
            counterparty,
            receivable_balance: 0.0,
            payable_balance: 0.0,
            net_balance: 0.0,
            open_receivables: 0,
            open_payables: 0,
            blocked: false,
            blocked_reason: None,
            credit_limit: None,
            recalculated_at: None,
        }
    }

    /// Whether `doc` contributes to this account. Every non-terminal
    /// status counts, drafts and rejected documents included.
    pub fn covers(&self, doc: &PaymentDocument) -> bool {
        doc.organization_id == self.organization_id
            && doc.counterparty() == Some(self.counterparty)
            && !doc.status().is_terminal()
    }

    /// Rebuild balances from `documents`; unrelated documents are ignored.
    pub fn recompute<'a>(
        &mut self,
        documents: impl IntoIterator<Item = &'a PaymentDocument>,
        at: DateTime<Utc>,
    ) {
        let mut receivable = 0.0;
        let mut payable = 0.0;
        let mut open_receivables = 0;
        let mut open_payables = 0;

        for doc in documents.into_iter().filter(|d| self.covers(d)) {
            match doc.direction {
                Direction::Incoming => {
                    receivable += doc.remaining_amount();
                    open_receivables += 1;
                }
                Direction::Outgoing => {
                    payable += doc.remaining_amount();
                    open_payables += 1;
                }
            }
        }

        self.receivable_balance = money::round_minor(receivable);
        self.payable_balance = money::round_minor(payable);
        self.net_balance = money::round_minor(receivable - payable);
        self.open_receivables = open_receivables;
        self.open_payables = open_payables;
        self.recalculated_at = Some(at);
    }

    pub fn block(&mut self, reason: impl Into<String>) {
        self.blocked = true;
        self.blocked_reason = Some(reason.into());
    }

    pub fn unblock(&mut self) {
        self.blocked = false;
        self.blocked_reason = None;
    }

    /// `None` removes the limit.
    pub fn set_credit_limit(&mut self, limit: Option<f64>) {
        self.credit_limit = limit;
    }

    /// Headroom left under the credit limit, if one is set.
    pub fn available_credit(&self) -> Option<f64> {
        self.credit_limit
            .map(|limit| (limit - self.receivable_balance).max(0.0))
    }

    /// A new receivable of `amount` would push the balance over the limit.
    pub fn would_exceed_credit(&self, amount: f64) -> bool {
        match self.credit_limit {
            Some(limit) => self.receivable_balance + amount > limit + money::EPSILON,
            None => false,
        }
    }

    /// Credit check for `doc` itself. A covered document already sits in
    /// `receivable_balance`, so only its amount beyond what was counted is new.
    pub fn would_exceed_credit_with(&self, doc: &PaymentDocument) -> bool {
        let counted = if self.covers(doc) { doc.remaining_amount() } else { 0.0 };
        self.would_exceed_credit(doc.amount() - counted)
    }
}

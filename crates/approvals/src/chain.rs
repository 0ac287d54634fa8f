use serde::Serialize;

use payflow_core::{DocumentId, UserId};

use crate::approval::{ApprovalStatus, PaymentApproval};

/// The latest approval round of one document, ordered by level then order.
#[derive(Debug, Clone)]
pub struct ChainState<'a> {
    round: u32,
    rows: Vec<&'a PaymentApproval>,
}

impl<'a> ChainState<'a> {
    /// Build from every approval row of a document (all rounds).
    pub fn new(rows: &'a [PaymentApproval]) -> Self {
        let round = rows.iter().map(|r| r.round).max().unwrap_or(0);
        let mut current: Vec<_> = rows.iter().filter(|r| r.round == round).collect();
        current.sort_by_key(|r| (r.approval_level, r.approval_order, r.created_at));
        Self {
            round,
            rows: current,
        }
    }

    /// 0 when no round was ever created.
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn next_round(&self) -> u32 {
        self.round + 1
    }

    pub fn rows(&self) -> &[&'a PaymentApproval] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn pending(&self) -> impl Iterator<Item = &'a PaymentApproval> + '_ {
        self.rows.iter().copied().filter(|r| r.is_pending())
    }

    /// Pending rows that hold the chain back; optional signers never do.
    fn blocking(&self) -> impl Iterator<Item = &'a PaymentApproval> + '_ {
        self.pending().filter(|r| r.required)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Lowest level that still has a required row pending.
    pub fn current_level(&self) -> Option<u32> {
        self.blocking().map(|r| r.approval_level).min()
    }

    pub fn pending_at_level(&self, level: u32) -> Vec<&'a PaymentApproval> {
        self.pending().filter(|r| r.approval_level == level).collect()
    }

    pub fn is_rejected(&self) -> bool {
        self.rows.iter().any(|r| r.status == ApprovalStatus::Rejected)
    }

    /// No required row pending at `level` and nothing rejected in the round.
    pub fn is_level_complete(&self, level: u32) -> bool {
        !self.is_rejected() && !self.blocking().any(|r| r.approval_level == level)
    }

    /// Every required row decided and none rejected.
    pub fn is_fully_approved(&self) -> bool {
        !self.rows.is_empty() && !self.is_rejected() && self.blocking().next().is_none()
    }

    /// The caller's own pending row, lowest level first.
    pub fn assigned_pending(&self, user: UserId) -> Option<&'a PaymentApproval> {
        self.pending().find(|r| r.is_assigned_to(user))
    }

    /// Earliest pending row of the current level, else of any level.
    pub fn earliest_pending(&self) -> Option<&'a PaymentApproval> {
        self.current_level()
            .and_then(|level| self.pending().find(|r| r.approval_level == level))
            .or_else(|| self.pending().next())
    }

    /// Read model for presentation layers.
    pub fn report(&self, document_id: DocumentId) -> ApprovalStatusReport {
        let count =
            |status: ApprovalStatus| self.rows.iter().filter(|r| r.status == status).count();
        let approved = count(ApprovalStatus::Approved);
        let rejected = count(ApprovalStatus::Rejected);
        let pending = count(ApprovalStatus::Pending);
        let skipped = count(ApprovalStatus::Skipped);
        let counted = self.rows.len() - skipped;
        let progress_percent = if counted == 0 {
            0.0
        } else {
            ((approved as f64 / counted as f64) * 1000.0).round() / 10.0
        };

        ApprovalStatusReport {
            document_id,
            round: self.round,
            total: self.rows.len(),
            approved,
            rejected,
            pending,
            skipped,
            progress_percent,
            current_level: self.current_level(),
            total_levels: self.rows.iter().map(|r| r.approval_level).max().unwrap_or(0),
            is_complete: self.is_fully_approved(),
            is_rejected: self.is_rejected(),
            approvals: self.rows.iter().map(|r| (*r).clone()).collect(),
        }
    }
}

/// Approval progress of a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalStatusReport {
    pub document_id: DocumentId,
    pub round: u32,
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
    pub pending: usize,
    pub skipped: usize,
    /// Approved share of non-skipped rows, one decimal.
    pub progress_percent: f64,
    pub current_level: Option<u32>,
    pub total_levels: u32,
    pub is_complete: bool,
    pub is_rejected: bool,
    pub approvals: Vec<PaymentApproval>,
}

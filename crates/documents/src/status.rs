use serde::{Deserialize, Serialize};

/// Document status lifecycle.
///
/// ```text
/// draft            -> submitted, cancelled
/// submitted        -> pending_approval, approved, rejected, cancelled
/// pending_approval -> approved, rejected, submitted
/// approved         -> scheduled, paid, cancelled
/// scheduled        -> paid, partially_paid, cancelled
/// partially_paid   -> paid, scheduled
/// rejected         -> draft
/// ```
///
/// `paid` and `cancelled` are terminal. `partially_paid -> partially_paid` is
/// not an edge: a further partial payment on a partially paid document only
/// updates its amounts (see `PaymentDocument::register_partial_payment`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Submitted,
    PendingApproval,
    Approved,
    Scheduled,
    PartiallyPaid,
    Paid,
    Rejected,
    Cancelled,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 9] = [
        DocumentStatus::Draft,
        DocumentStatus::Submitted,
        DocumentStatus::PendingApproval,
        DocumentStatus::Approved,
        DocumentStatus::Scheduled,
        DocumentStatus::PartiallyPaid,
        DocumentStatus::Paid,
        DocumentStatus::Rejected,
        DocumentStatus::Cancelled,
    ];

    /// Statuses a document can be settled from (payments and offsets).
    pub const SETTLEABLE: [DocumentStatus; 3] = [
        DocumentStatus::Approved,
        DocumentStatus::Scheduled,
        DocumentStatus::PartiallyPaid,
    ];

    pub fn allowed_transitions(self) -> &'static [DocumentStatus] {
        use DocumentStatus::*;
        match self {
            Draft => &[Submitted, Cancelled],
            Submitted => &[PendingApproval, Approved, Rejected, Cancelled],
            PendingApproval => &[Approved, Rejected, Submitted],
            Approved => &[Scheduled, Paid, Cancelled],
            Scheduled => &[Paid, PartiallyPaid, Cancelled],
            PartiallyPaid => &[Paid, Scheduled],
            Rejected => &[Draft],
            Paid | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, to: DocumentStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Paid | DocumentStatus::Cancelled)
    }

    pub fn is_settleable(self) -> bool {
        Self::SETTLEABLE.contains(&self)
    }

    /// Whether a document in this status is a live claim for duplicate detection.
    pub fn counts_as_live(self) -> bool {
        !matches!(
            self,
            DocumentStatus::Draft | DocumentStatus::Cancelled | DocumentStatus::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Submitted => "submitted",
            DocumentStatus::PendingApproval => "pending_approval",
            DocumentStatus::Approved => "approved",
            DocumentStatus::Scheduled => "scheduled",
            DocumentStatus::PartiallyPaid => "partially_paid",
            DocumentStatus::Paid => "paid",
            DocumentStatus::Rejected => "rejected",
            DocumentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Human label of the status itself.
    pub fn label(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "Draft",
            DocumentStatus::Submitted => "Submitted",
            DocumentStatus::PendingApproval => "Pending approval",
            DocumentStatus::Approved => "Approved",
            DocumentStatus::Scheduled => "Scheduled for payment",
            DocumentStatus::PartiallyPaid => "Partially paid",
            DocumentStatus::Paid => "Paid",
            DocumentStatus::Rejected => "Rejected",
            DocumentStatus::Cancelled => "Cancelled",
        }
    }

    /// Legal next transitions with the labels presentation layers show.
    pub fn available_actions(self) -> Vec<DocumentAction> {
        self.allowed_transitions()
            .iter()
            .map(|&to| DocumentAction::between(self, to))
            .collect()
    }
}

impl core::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition offered to presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DocumentAction {
    /// Stable action key (e.g. `send_for_approval`).
    pub action: &'static str,
    pub label: &'static str,
    pub target: DocumentStatus,
}

impl DocumentAction {
    fn between(from: DocumentStatus, to: DocumentStatus) -> Self {
        use DocumentStatus::*;
        let (action, label) = match (from, to) {
            (Draft, Submitted) => ("submit", "Submit"),
            (PendingApproval, Submitted) => ("recall", "Recall from approval"),
            (_, PendingApproval) => ("send_for_approval", "Send for approval"),
            (_, Approved) => ("approve", "Approve"),
            (_, Rejected) => ("reject", "Reject"),
            (PartiallyPaid, Scheduled) => ("reschedule", "Schedule remaining amount"),
            (_, Scheduled) => ("schedule", "Schedule payment"),
            (_, PartiallyPaid) => ("register_partial_payment", "Register partial payment"),
            (_, Paid) => ("mark_paid", "Mark as paid"),
            (_, Cancelled) => ("cancel", "Cancel"),
            (_, Draft) => ("return_to_draft", "Return to draft"),
            (_, Submitted) => ("submit", "Submit"),
        };
        Self {
            action,
            label,
            target: to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};

    #[test]
    fn terminals_have_no_exits() {
        for status in DocumentStatus::ALL {
            assert_eq!(
                status.is_terminal(),
                status.allowed_transitions().is_empty(),
                "{status}"
            );
        }
    }

    #[test]
    fn self_edges_are_never_listed() {
        for status in DocumentStatus::ALL {
            assert!(!status.can_transition_to(status), "{status}");
        }
    }

    #[test]
    fn every_status_is_reachable_from_draft() {
        let mut seen = HashSet::from([DocumentStatus::Draft]);
        let mut queue = VecDeque::from([DocumentStatus::Draft]);
        while let Some(s) = queue.pop_front() {
            for &next in s.allowed_transitions() {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        assert_eq!(seen.len(), DocumentStatus::ALL.len());
    }

    #[test]
    fn parse_round_trips_every_name() {
        for status in DocumentStatus::ALL {
            assert_eq!(DocumentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::parse("archived"), None);
    }

    #[test]
    fn pending_approval_offers_recall_and_decisions() {
        let actions: Vec<_> = DocumentStatus::PendingApproval
            .available_actions()
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(actions, vec!["approve", "reject", "recall"]);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payflow_auth::Role;
use payflow_core::{
    ApprovalId, DocumentId, DomainError, DomainResult, OrganizationId, UserId, money,
};
use payflow_documents::PaymentDocument;

use crate::rule::{ChainStep, Conditions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "skipped" => Some(ApprovalStatus::Skipped),
            _ => None,
        }
    }
}

impl core::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One required signature on one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentApproval {
    pub id: ApprovalId,
    pub document_id: DocumentId,
    pub organization_id: OrganizationId,
    pub approval_role: Role,
    /// `None` when nobody held the role at creation time.
    pub approver_user_id: Option<UserId>,
    pub approval_level: u32,
    pub approval_order: u32,
    pub round: u32,
    pub required: bool,
    pub status: ApprovalStatus,
    pub amount_threshold: Option<f64>,
    pub conditions: Option<Conditions>,
    pub decided_by: Option<UserId>,
    pub comment: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PaymentApproval {
    pub fn from_step(
        doc: &PaymentDocument,
        step: &ChainStep,
        approver: Option<UserId>,
        round: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalId::new(),
            document_id: doc.id,
            organization_id: doc.organization_id,
            approval_role: step.role.clone(),
            approver_user_id: approver,
            approval_level: step.level,
            approval_order: step.order,
            round,
            required: step.required,
            status: ApprovalStatus::Pending,
            amount_threshold: step.amount_threshold,
            conditions: step.conditions.clone(),
            decided_by: None,
            comment: None,
            decided_at: None,
            created_at: at,
        }
    }

    /// An already-decided `admin` row recording a direct admin decision on a
    /// document that had no row to act on.
    pub fn admin_decision(
        doc: &PaymentDocument,
        status: ApprovalStatus,
        actor: UserId,
        comment: Option<String>,
        round: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalId::new(),
            document_id: doc.id,
            organization_id: doc.organization_id,
            approval_role: Role::ADMIN,
            approver_user_id: Some(actor),
            approval_level: 1,
            approval_order: 1,
            round,
            required: true,
            status,
            amount_threshold: None,
            conditions: None,
            decided_by: Some(actor),
            comment,
            decided_at: Some(at),
            created_at: at,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn is_assigned_to(&self, user: UserId) -> bool {
        self.approver_user_id == Some(user)
    }

    /// Whether this signer's threshold admits `amount`.
    pub fn can_approve_amount(&self, amount: f64) -> bool {
        self.amount_threshold
            .is_none_or(|limit| amount <= limit + money::EPSILON)
    }

    /// Whether this signer's conditions admit `doc`.
    pub fn check_conditions(&self, doc: &PaymentDocument) -> bool {
        self.conditions.as_ref().is_none_or(|c| c.matches(doc))
    }

    pub fn approve(
        &mut self,
        actor: UserId,
        comment: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.decide(ApprovalStatus::Approved, actor, comment, at)
    }

    pub fn reject(&mut self, actor: UserId, reason: String, at: DateTime<Utc>) -> DomainResult<()> {
        self.decide(ApprovalStatus::Rejected, actor, Some(reason), at)
    }

    /// Retire a pending row without a decision (superseded round, sibling
    /// rejection).
    pub fn skip(&mut self, note: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending()?;
        self.status = ApprovalStatus::Skipped;
        self.comment = Some(note.into());
        self.decided_at = Some(at);
        Ok(())
    }

    fn decide(
        &mut self,
        status: ApprovalStatus,
        actor: UserId,
        comment: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_pending()?;
        self.status = status;
        self.decided_by = Some(actor);
        self.comment = comment;
        self.decided_at = Some(at);
        Ok(())
    }

    fn ensure_pending(&self) -> DomainResult<()> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(DomainError::rule(format!(
                "approval {} is already {}",
                self.id, self.status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, document};
    use payflow_documents::{Direction, DocumentType};

    fn row(doc: &PaymentDocument, step: ChainStep) -> PaymentApproval {
        PaymentApproval::from_step(doc, &step, Some(UserId::new()), 1, at())
    }

    #[test]
    fn threshold_and_conditions_restrict_the_signer() {
        let doc = document(Direction::Outgoing, 1_000.0);
        let open = row(&doc, ChainStep::new(Role::CHIEF_ACCOUNTANT, 1, 1));
        assert!(open.can_approve_amount(1e9));
        assert!(open.check_conditions(&doc));

        let capped = row(
            &doc,
            ChainStep::new(Role::CHIEF_ACCOUNTANT, 1, 1)
                .with_threshold(500.0)
                .with_conditions(Conditions {
                    document_types: vec![DocumentType::PaymentOrder],
                    ..Conditions::default()
                }),
        );
        assert!(!capped.can_approve_amount(doc.amount()));
        assert!(capped.can_approve_amount(500.0));
        assert!(!capped.check_conditions(&doc));
    }

    #[test]
    fn decided_rows_cannot_be_decided_again() {
        let doc = document(Direction::Outgoing, 10.0);
        let mut approval = row(&doc, ChainStep::new(Role::CHIEF_ACCOUNTANT, 1, 1));
        let actor = UserId::new();

        approval.approve(actor, Some("ok".into()), at()).unwrap();
        assert_eq!(approval.status, ApprovalStatus::Approved);
        assert_eq!(approval.decided_by, Some(actor));

        assert!(matches!(
            approval.reject(actor, "late".into(), at()),
            Err(DomainError::Rule(_))
        ));
        assert!(approval.skip("superseded", at()).is_err());
    }

    #[test]
    fn admin_decision_row_is_already_decided() {
        let doc = document(Direction::Outgoing, 10.0);
        let actor = UserId::new();
        let row =
            PaymentApproval::admin_decision(&doc, ApprovalStatus::Approved, actor, None, 1, at());
        assert_eq!(row.approval_role, Role::ADMIN);
        assert_eq!(row.decided_by, Some(actor));
        assert!(!row.is_pending());
    }
}

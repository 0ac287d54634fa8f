//! Counterparty ledger maintenance.
//!
//! Balances are never adjusted incrementally: every mutation that touches a
//! document recomputes the whole (organization, counterparty) account from
//! its documents in the same transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use payflow_core::{DomainError, DomainResult, OperationContext, OrganizationId, Party};
use payflow_documents::PaymentDocument;
use payflow_infra::{AuditEntry, PaymentStore, UnitOfWork};
use payflow_ledger::CounterpartyAccount;

use crate::context::{Effects, Shared};

/// Recompute the account of the document's counterparty, if it has one.
pub(crate) fn refresh_for(
    uow: &mut dyn UnitOfWork,
    doc: &PaymentDocument,
    at: DateTime<Utc>,
) -> DomainResult<Option<CounterpartyAccount>> {
    match doc.counterparty() {
        Some(counterparty) => recompute_in(uow, doc.organization_id, counterparty, at).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn recompute_in(
    uow: &mut dyn UnitOfWork,
    organization_id: OrganizationId,
    counterparty: Party,
    at: DateTime<Utc>,
) -> DomainResult<CounterpartyAccount> {
    let mut account = uow.lock_counterparty_account(organization_id, counterparty)?;
    let documents = uow.documents_for_counterparty(organization_id, counterparty)?;
    account.recompute(&documents, at);
    uow.save_counterparty_account(&account)?;
    Ok(account)
}

pub struct LedgerAggregator<S> {
    shared: Arc<Shared<S>>,
}

impl<S: PaymentStore> LedgerAggregator<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>) -> Self {
        Self { shared }
    }

    #[instrument(
        skip(self, ctx),
        fields(organization_id = %organization_id, counterparty = ?counterparty),
        err
    )]
    pub fn recompute(
        &self,
        ctx: &OperationContext,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<CounterpartyAccount> {
        self.shared
            .run(|uow, _| recompute_in(uow, organization_id, counterparty, ctx.now()))
    }

    pub fn account(
        &self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<Option<CounterpartyAccount>> {
        self.shared
            .read(|uow| uow.lookup().counterparty_account(organization_id, counterparty))
    }

    #[instrument(
        skip(self, ctx, reason),
        fields(organization_id = %organization_id, counterparty = ?counterparty),
        err
    )]
    pub fn block(
        &self,
        ctx: &OperationContext,
        organization_id: OrganizationId,
        counterparty: Party,
        reason: impl Into<String>,
    ) -> DomainResult<CounterpartyAccount> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::rule("a reason is required to block a counterparty"));
        }
        self.update(ctx, organization_id, counterparty, "counterparty.blocked", |account| {
            account.block(reason);
            Ok(())
        })
    }

    #[instrument(
        skip(self, ctx),
        fields(organization_id = %organization_id, counterparty = ?counterparty),
        err
    )]
    pub fn unblock(
        &self,
        ctx: &OperationContext,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<CounterpartyAccount> {
        self.update(ctx, organization_id, counterparty, "counterparty.unblocked", |account| {
            account.unblock();
            Ok(())
        })
    }

    /// `None` removes the limit.
    #[instrument(
        skip(self, ctx),
        fields(organization_id = %organization_id, counterparty = ?counterparty),
        err
    )]
    pub fn set_credit_limit(
        &self,
        ctx: &OperationContext,
        organization_id: OrganizationId,
        counterparty: Party,
        limit: Option<f64>,
    ) -> DomainResult<CounterpartyAccount> {
        if limit.is_some_and(|l| !l.is_finite() || l < 0.0) {
            return Err(DomainError::rule("credit limit must be a non-negative amount"));
        }
        self.update(ctx, organization_id, counterparty, "counterparty.credit_limit_set", |account| {
            account.set_credit_limit(limit);
            Ok(())
        })
    }

    fn update(
        &self,
        ctx: &OperationContext,
        organization_id: OrganizationId,
        counterparty: Party,
        action: &'static str,
        change: impl FnOnce(&mut CounterpartyAccount) -> DomainResult<()>,
    ) -> DomainResult<CounterpartyAccount> {
        self.shared.run(|uow, fx: &mut Effects| {
            let mut account = uow.lock_counterparty_account(organization_id, counterparty)?;
            let before = account.clone();
            change(&mut account)?;
            uow.save_counterparty_account(&account)?;
            fx.audit(
                AuditEntry::new(
                    organization_id,
                    action,
                    "counterparty_account",
                    counterparty,
                    ctx.actor,
                    ctx.now(),
                )
                .with_change(Some(&before), Some(&account)),
            );
            Ok(account)
        })
    }
}

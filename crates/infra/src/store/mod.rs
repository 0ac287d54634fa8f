//! Transactional storage boundary.
//!
//! Engines never hold in-process locks. Every state-changing operation runs
//! inside [`PaymentStore::transaction`] and takes row locks through the
//! `lock_*` methods of [`UnitOfWork`] before reading decision fields.
//! Returning `Err` from the closure rolls back every write made through the
//! unit of work; returning `Ok` commits them atomically.

pub mod memory;
pub mod postgres;

use payflow_approvals::{ApprovalRuleDef, PaymentApproval};
use payflow_core::{ApprovalId, DocumentId, DomainResult, OrganizationId, Party};
use payflow_documents::PaymentDocument;
use payflow_ledger::{CounterpartyAccount, PaymentTransaction};
use payflow_validation::ValidationLookup;

/// A storage backend able to run closures transactionally.
pub trait PaymentStore: Send + Sync {
    /// Run `work` in one transaction.
    ///
    /// A `Conflict` error from commit (unique number race) is returned like any
    /// other error; nothing of the closure's writes is visible afterwards.
    fn transaction<T, F>(&self, work: F) -> DomainResult<T>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> DomainResult<T>;
}

/// Reads and writes scoped to one transaction.
///
/// Reads see the transaction's own uncommitted writes. `lock_*` methods block
/// until the row is free (bounded by the backend's lock timeout) and fail with
/// `NotFound` for a missing row.
pub trait UnitOfWork {
    // documents
    fn lock_document(&mut self, id: DocumentId) -> DomainResult<PaymentDocument>;

    fn get_document(&mut self, id: DocumentId) -> DomainResult<Option<PaymentDocument>>;

    fn insert_document(&mut self, doc: &PaymentDocument) -> DomainResult<()>;

    /// Requires the row lock.
    fn update_document(&mut self, doc: &PaymentDocument) -> DomainResult<()>;

    /// Every document of the organization whose counterparty is `counterparty`.
    fn documents_for_counterparty(
        &mut self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<Vec<PaymentDocument>>;

    /// Document numbers of the organization starting with `prefix`.
    fn numbers_with_prefix(
        &mut self,
        organization_id: OrganizationId,
        prefix: &str,
    ) -> DomainResult<Vec<String>>;

    // approvals
    fn approvals_for_document(&mut self, document_id: DocumentId)
    -> DomainResult<Vec<PaymentApproval>>;

    fn lock_approval(&mut self, id: ApprovalId) -> DomainResult<PaymentApproval>;

    fn insert_approvals(&mut self, rows: &[PaymentApproval]) -> DomainResult<()>;

    /// Requires the row lock.
    fn update_approval(&mut self, row: &PaymentApproval) -> DomainResult<()>;

    /// Organizational rules, active or not.
    fn approval_rules(&mut self, organization_id: OrganizationId)
    -> DomainResult<Vec<ApprovalRuleDef>>;

    // ledger
    fn insert_transactions(&mut self, rows: &[PaymentTransaction]) -> DomainResult<()>;

    fn transactions_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> DomainResult<Vec<PaymentTransaction>>;

    /// Locks the account row, creating an empty one if absent.
    fn lock_counterparty_account(
        &mut self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<CounterpartyAccount>;

    /// Requires the row lock.
    fn save_counterparty_account(&mut self, account: &CounterpartyAccount) -> DomainResult<()>;

    /// Read access for the validation layer.
    fn lookup(&self) -> &dyn ValidationLookup;
}

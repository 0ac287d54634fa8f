use chrono::NaiveDate;

use payflow_core::{
    ActId, ContractId, ContractorId, DocumentId, DomainResult, OrganizationId, Party,
};
use payflow_documents::{PaymentDocument, SourceLink};
use payflow_ledger::CounterpartyAccount;

use crate::source::{ActTerms, ContractTerms};

/// Reads the validation layer needs from storage.
///
/// Implemented by the storage unit of work, so checks see the same snapshot
/// (and the same uncommitted writes) as the operation they gate.
pub trait ValidationLookup {
    fn organization_exists(&self, id: OrganizationId) -> DomainResult<bool>;

    fn contractor_exists(&self, id: ContractorId) -> DomainResult<bool>;

    /// Whether another document of the organization already uses `number`.
    fn number_taken(
        &self,
        organization_id: OrganizationId,
        number: &str,
        exclude: DocumentId,
    ) -> DomainResult<bool>;

    /// Documents of the organization payable to `payee` dated within `[from, to]`.
    fn documents_for_payee(
        &self,
        organization_id: OrganizationId,
        payee: Party,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DomainResult<Vec<PaymentDocument>>;

    fn counterparty_account(
        &self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<Option<CounterpartyAccount>>;

    fn contract(&self, id: ContractId) -> DomainResult<Option<ContractTerms>>;

    fn act(&self, id: ActId) -> DomainResult<Option<ActTerms>>;

    /// Every document linked to the contract or act named by `source`
    /// (all projects of a contract).
    fn documents_for_source(&self, source: &SourceLink) -> DomainResult<Vec<PaymentDocument>>;
}

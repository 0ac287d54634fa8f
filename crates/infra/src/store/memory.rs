//! In-memory transactional store (tests/dev).
//!
//! Writes are staged per unit of work and applied atomically at commit.
//! Row locks live in a lock table guarded by a mutex + condvar; a waiter
//! gives up after the configured timeout with `Conflict`. The unique
//! `(organization, number)` constraint is checked at commit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::debug;

use payflow_approvals::{ApprovalRuleDef, PaymentApproval};
use payflow_core::{
    ActId, ApprovalId, ContractId, ContractorId, DocumentId, DomainError, DomainResult,
    OrganizationId, Party,
};
use payflow_documents::{PaymentDocument, SourceLink};
use payflow_ledger::{CounterpartyAccount, PaymentTransaction};
use payflow_validation::{ActTerms, ContractTerms, ValidationLookup};

use super::{PaymentStore, UnitOfWork};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Document(DocumentId),
    Approval(ApprovalId),
    Account(OrganizationId, Party),
}

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashMap<RowKey, u64>>,
    released: Condvar,
}

impl LockTable {
    fn acquire(&self, key: RowKey, tx: u64, timeout: Duration) -> DomainResult<()> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().map_err(|_| poisoned("lock table"))?;
        loop {
            match held.get(&key).copied() {
                None => {
                    debug!(tx, ?key, "row lock acquired");
                    held.insert(key, tx);
                    return Ok(());
                }
                Some(owner) if owner == tx => return Ok(()),
                Some(owner) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(DomainError::conflict(format!(
                            "lock wait timeout on {key:?} (held by transaction {owner})"
                        )));
                    }
                    debug!(tx, owner, ?key, "waiting for row lock");
                    let (guard, _) = self
                        .released
                        .wait_timeout(held, deadline - now)
                        .map_err(|_| poisoned("lock table"))?;
                    held = guard;
                }
            }
        }
    }

    fn release_all(&self, tx: u64) {
        if let Ok(mut held) = self.held.lock() {
            held.retain(|_, owner| *owner != tx);
        }
        self.released.notify_all();
    }
}

#[derive(Debug, Default)]
struct State {
    organizations: HashSet<OrganizationId>,
    contractors: HashSet<ContractorId>,
    documents: BTreeMap<DocumentId, PaymentDocument>,
    approvals: BTreeMap<ApprovalId, PaymentApproval>,
    rules: Vec<ApprovalRuleDef>,
    transactions: Vec<PaymentTransaction>,
    accounts: HashMap<(OrganizationId, Party), CounterpartyAccount>,
    contracts: HashMap<ContractId, ContractTerms>,
    acts: HashMap<ActId, ActTerms>,
}

#[derive(Debug, Default)]
struct Staged {
    documents: BTreeMap<DocumentId, PaymentDocument>,
    new_documents: HashSet<DocumentId>,
    approvals: BTreeMap<ApprovalId, PaymentApproval>,
    transactions: Vec<PaymentTransaction>,
    accounts: HashMap<(OrganizationId, Party), CounterpartyAccount>,
}

/// In-memory [`PaymentStore`].
#[derive(Debug)]
pub struct InMemoryPaymentStore {
    state: RwLock<State>,
    locks: LockTable,
    next_tx: AtomicU64,
    lock_timeout: Duration,
}

impl Default for InMemoryPaymentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            locks: LockTable::default(),
            next_tx: AtomicU64::new(1),
            lock_timeout,
        }
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| poisoned("store state"))
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| poisoned("store state"))
    }

    // Reference data. These writes bypass transactions.

    pub fn add_organization(&self, id: OrganizationId) -> DomainResult<()> {
        self.write()?.organizations.insert(id);
        Ok(())
    }

    pub fn add_contractor(&self, id: ContractorId) -> DomainResult<()> {
        self.write()?.contractors.insert(id);
        Ok(())
    }

    pub fn add_contract(&self, contract: ContractTerms) -> DomainResult<()> {
        self.write()?.contracts.insert(contract.id, contract);
        Ok(())
    }

    pub fn add_act(&self, act: ActTerms) -> DomainResult<()> {
        self.write()?.acts.insert(act.id, act);
        Ok(())
    }

    pub fn add_rule(&self, rule: ApprovalRuleDef) -> DomainResult<()> {
        self.write()?.rules.push(rule);
        Ok(())
    }

    // Committed-state snapshots.

    pub fn document(&self, id: DocumentId) -> DomainResult<Option<PaymentDocument>> {
        Ok(self.read()?.documents.get(&id).cloned())
    }

    pub fn documents(&self) -> DomainResult<Vec<PaymentDocument>> {
        Ok(self.read()?.documents.values().cloned().collect())
    }

    pub fn approvals(&self, document_id: DocumentId) -> DomainResult<Vec<PaymentApproval>> {
        Ok(self
            .read()?
            .approvals
            .values()
            .filter(|a| a.document_id == document_id)
            .cloned()
            .collect())
    }

    pub fn transactions(&self, document_id: DocumentId) -> DomainResult<Vec<PaymentTransaction>> {
        Ok(self
            .read()?
            .transactions
            .iter()
            .filter(|t| t.document_id == document_id)
            .cloned()
            .collect())
    }

    pub fn account(
        &self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<Option<CounterpartyAccount>> {
        Ok(self.read()?.accounts.get(&(organization_id, counterparty)).cloned())
    }
}

impl PaymentStore for InMemoryPaymentStore {
    fn transaction<T, F>(&self, work: F) -> DomainResult<T>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> DomainResult<T>,
    {
        let mut uow = MemoryUnitOfWork {
            store: self,
            tx: self.next_tx.fetch_add(1, Ordering::Relaxed),
            held: HashSet::new(),
            staged: Staged::default(),
        };
        let out = work(&mut uow)?;
        uow.commit()?;
        Ok(out)
    }
}

struct MemoryUnitOfWork<'s> {
    store: &'s InMemoryPaymentStore,
    tx: u64,
    held: HashSet<RowKey>,
    staged: Staged,
}

impl MemoryUnitOfWork<'_> {
    fn lock(&mut self, key: RowKey) -> DomainResult<()> {
        if self.held.contains(&key) {
            return Ok(());
        }
        self.store
            .locks
            .acquire(key.clone(), self.tx, self.store.lock_timeout)?;
        self.held.insert(key);
        Ok(())
    }

    fn ensure_locked(&self, key: &RowKey) -> DomainResult<()> {
        if self.held.contains(key) {
            Ok(())
        } else {
            Err(DomainError::store(format!("write to {key:?} without holding its row lock")))
        }
    }

    fn current_document(&self, id: DocumentId) -> DomainResult<Option<PaymentDocument>> {
        if let Some(doc) = self.staged.documents.get(&id) {
            return Ok(Some(doc.clone()));
        }
        Ok(self.store.read()?.documents.get(&id).cloned())
    }

    fn documents_where(
        &self,
        pred: impl Fn(&PaymentDocument) -> bool,
    ) -> DomainResult<Vec<PaymentDocument>> {
        let state = self.store.read()?;
        let mut merged: BTreeMap<DocumentId, PaymentDocument> = state
            .documents
            .iter()
            .filter(|(id, doc)| !self.staged.documents.contains_key(id) && pred(doc))
            .map(|(id, doc)| (*id, doc.clone()))
            .collect();
        for (id, doc) in &self.staged.documents {
            if pred(doc) {
                merged.insert(*id, doc.clone());
            }
        }
        Ok(merged.into_values().collect())
    }

    fn current_approval(&self, id: ApprovalId) -> DomainResult<Option<PaymentApproval>> {
        if let Some(row) = self.staged.approvals.get(&id) {
            return Ok(Some(row.clone()));
        }
        Ok(self.store.read()?.approvals.get(&id).cloned())
    }

    fn commit(mut self) -> DomainResult<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut state = self.store.write()?;

        for doc in staged.documents.values() {
            let taken_committed = state.documents.values().any(|other| {
                other.id != doc.id
                    && !staged.documents.contains_key(&other.id)
                    && other.organization_id == doc.organization_id
                    && other.number == doc.number
            });
            let taken_staged = staged.documents.values().any(|other| {
                other.id != doc.id
                    && other.organization_id == doc.organization_id
                    && other.number == doc.number
            });
            if taken_committed || taken_staged {
                return Err(DomainError::conflict(format!(
                    "document number '{}' already exists in organization {}",
                    doc.number, doc.organization_id
                )));
            }
        }
        for id in &staged.new_documents {
            if state.documents.contains_key(id) {
                return Err(DomainError::conflict(format!("document {id} already exists")));
            }
        }

        state.documents.extend(staged.documents);
        state.approvals.extend(staged.approvals);
        state.transactions.extend(staged.transactions);
        state.accounts.extend(staged.accounts);
        debug!(tx = self.tx, "transaction committed");
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            self.store.locks.release_all(self.tx);
        }
    }
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn lock_document(&mut self, id: DocumentId) -> DomainResult<PaymentDocument> {
        if self.current_document(id)?.is_none() {
            return Err(DomainError::not_found("document", id));
        }
        self.lock(RowKey::Document(id))?;
        self.current_document(id)?
            .ok_or_else(|| DomainError::not_found("document", id))
    }

    fn get_document(&mut self, id: DocumentId) -> DomainResult<Option<PaymentDocument>> {
        self.current_document(id)
    }

    fn insert_document(&mut self, doc: &PaymentDocument) -> DomainResult<()> {
        if self.current_document(doc.id)?.is_some() {
            return Err(DomainError::conflict(format!("document {} already exists", doc.id)));
        }
        self.lock(RowKey::Document(doc.id))?;
        self.staged.new_documents.insert(doc.id);
        self.staged.documents.insert(doc.id, doc.clone());
        Ok(())
    }

    fn update_document(&mut self, doc: &PaymentDocument) -> DomainResult<()> {
        self.ensure_locked(&RowKey::Document(doc.id))?;
        self.staged.documents.insert(doc.id, doc.clone());
        Ok(())
    }

    fn documents_for_counterparty(
        &mut self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<Vec<PaymentDocument>> {
        self.documents_where(|d| {
            d.organization_id == organization_id && d.counterparty() == Some(counterparty)
        })
    }

    fn numbers_with_prefix(
        &mut self,
        organization_id: OrganizationId,
        prefix: &str,
    ) -> DomainResult<Vec<String>> {
        Ok(self
            .documents_where(|d| {
                d.organization_id == organization_id && d.number.starts_with(prefix)
            })?
            .into_iter()
            .map(|d| d.number)
            .collect())
    }

    fn approvals_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> DomainResult<Vec<PaymentApproval>> {
        let state = self.store.read()?;
        let mut rows: BTreeMap<ApprovalId, PaymentApproval> = state
            .approvals
            .iter()
            .filter(|(_, a)| a.document_id == document_id)
            .map(|(id, a)| (*id, a.clone()))
            .collect();
        for (id, a) in &self.staged.approvals {
            if a.document_id == document_id {
                rows.insert(*id, a.clone());
            }
        }
        let mut rows: Vec<_> = rows.into_values().collect();
        rows.sort_by_key(|a| (a.round, a.approval_level, a.approval_order, a.created_at));
        Ok(rows)
    }

    fn lock_approval(&mut self, id: ApprovalId) -> DomainResult<PaymentApproval> {
        if self.current_approval(id)?.is_none() {
            return Err(DomainError::not_found("approval", id));
        }
        self.lock(RowKey::Approval(id))?;
        self.current_approval(id)?
            .ok_or_else(|| DomainError::not_found("approval", id))
    }

    fn insert_approvals(&mut self, rows: &[PaymentApproval]) -> DomainResult<()> {
        for row in rows {
            self.lock(RowKey::Approval(row.id))?;
            self.staged.approvals.insert(row.id, row.clone());
        }
        Ok(())
    }

    fn update_approval(&mut self, row: &PaymentApproval) -> DomainResult<()> {
        self.ensure_locked(&RowKey::Approval(row.id))?;
        self.staged.approvals.insert(row.id, row.clone());
        Ok(())
    }

    fn approval_rules(
        &mut self,
        organization_id: OrganizationId,
    ) -> DomainResult<Vec<ApprovalRuleDef>> {
        Ok(self
            .store
            .read()?
            .rules
            .iter()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect())
    }

    fn insert_transactions(&mut self, rows: &[PaymentTransaction]) -> DomainResult<()> {
        self.staged.transactions.extend_from_slice(rows);
        Ok(())
    }

    fn transactions_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> DomainResult<Vec<PaymentTransaction>> {
        let state = self.store.read()?;
        Ok(state
            .transactions
            .iter()
            .chain(self.staged.transactions.iter())
            .filter(|t| t.document_id == document_id)
            .cloned()
            .collect())
    }

    fn lock_counterparty_account(
        &mut self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<CounterpartyAccount> {
        self.lock(RowKey::Account(organization_id, counterparty))?;
        let key = (organization_id, counterparty);
        if let Some(account) = self.staged.accounts.get(&key) {
            return Ok(account.clone());
        }
        Ok(self
            .store
            .read()?
            .accounts
            .get(&key)
            .cloned()
            .unwrap_or_else(|| CounterpartyAccount::new(organization_id, counterparty)))
    }

    fn save_counterparty_account(&mut self, account: &CounterpartyAccount) -> DomainResult<()> {
        self.ensure_locked(&RowKey::Account(account.organization_id, account.counterparty))?;
        self.staged
            .accounts
            .insert((account.organization_id, account.counterparty), account.clone());
        Ok(())
    }

    fn lookup(&self) -> &dyn ValidationLookup {
        self
    }
}

impl ValidationLookup for MemoryUnitOfWork<'_> {
    fn organization_exists(&self, id: OrganizationId) -> DomainResult<bool> {
        Ok(self.store.read()?.organizations.contains(&id))
    }

    fn contractor_exists(&self, id: ContractorId) -> DomainResult<bool> {
        Ok(self.store.read()?.contractors.contains(&id))
    }

    fn number_taken(
        &self,
        organization_id: OrganizationId,
        number: &str,
        exclude: DocumentId,
    ) -> DomainResult<bool> {
        Ok(!self
            .documents_where(|d| {
                d.organization_id == organization_id && d.number == number && d.id != exclude
            })?
            .is_empty())
    }

    fn documents_for_payee(
        &self,
        organization_id: OrganizationId,
        payee: Party,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DomainResult<Vec<PaymentDocument>> {
        self.documents_where(|d| {
            d.organization_id == organization_id
                && d.payee == Some(payee)
                && d.document_date >= from
                && d.document_date <= to
        })
    }

    fn counterparty_account(
        &self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<Option<CounterpartyAccount>> {
        let key = (organization_id, counterparty);
        if let Some(account) = self.staged.accounts.get(&key) {
            return Ok(Some(account.clone()));
        }
        Ok(self.store.read()?.accounts.get(&key).cloned())
    }

    fn contract(&self, id: ContractId) -> DomainResult<Option<ContractTerms>> {
        Ok(self.store.read()?.contracts.get(&id).cloned())
    }

    fn act(&self, id: ActId) -> DomainResult<Option<ActTerms>> {
        Ok(self.store.read()?.acts.get(&id).cloned())
    }

    fn documents_for_source(&self, source: &SourceLink) -> DomainResult<Vec<PaymentDocument>> {
        self.documents_where(|d| match (d.source, *source) {
            (
                Some(SourceLink::Contract { contract_id: a, .. }),
                SourceLink::Contract { contract_id: b, .. },
            ) => a == b,
            (Some(SourceLink::Act { act_id: a }), SourceLink::Act { act_id: b }) => a == b,
            _ => false,
        })
    }
}

fn poisoned(what: &str) -> DomainError {
    DomainError::store(format!("{what} poisoned"))
}

//! Postgres-backed payment store.
//!
//! Schema lives in `migrations/0001_payments.sql`. The store is synchronous:
//! every call blocks on the given Tokio runtime handle, so it must be used
//! from a blocking context (`spawn_blocking`, a plain thread), never from
//! inside an async task.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | DomainError | Scenario |
//! |----------------------|-------------|----------|
//! | `23505` | `Conflict` | Duplicate `(organization_id, number)` |
//! | `55P03` | `Conflict` | `lock_timeout` expired waiting for a row lock |
//! | `40P01` | `Conflict` | Deadlock detected, transaction aborted |
//! | `40001` | `Conflict` | Serialization failure |
//! | Any other | `Store` | Connection, decode and constraint errors |

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{instrument, warn};
use uuid::Uuid;

use payflow_approvals::{ApprovalRuleDef, ApprovalStatus, PaymentApproval};
use payflow_auth::Role;
use payflow_core::{
    ActId, ApprovalId, ContractId, ContractorId, DocumentId, DomainError, DomainResult,
    OrganizationId, Party, RuleId, TransactionId, UserId,
};
use payflow_documents::{
    Direction, DocumentStatus, DocumentType, Lifecycle, NewDocument, PaymentDocument, PaymentKind,
    SourceLink, Timestamps,
};
use payflow_ledger::{CounterpartyAccount, PaymentMethod, PaymentTransaction, TransactionStatus};
use payflow_validation::{ActTerms, ContractTerms, ValidationLookup};

use super::{PaymentStore, UnitOfWork};

const DOCUMENT_COLUMNS: &str = r#"
    id, organization_id, number, direction, document_type, payment_kind,
    document_date, due_date, purpose, amount, vat_rate, currency,
    payer, payee, payee_bank, source,
    status, paid_amount, submitted_at, approved_at, scheduled_at, paid_at,
    rejected_at, cancelled_at, status_reason, created_by, created_at, updated_at
"#;

const APPROVAL_COLUMNS: &str = r#"
    id, document_id, organization_id, approval_role, approver_user_id,
    approval_level, approval_order, round, required, status, amount_threshold,
    conditions, decided_by, comment, decided_at, created_at
"#;

const ACCOUNT_COLUMNS: &str = r#"
    organization_id, counterparty, receivable_balance, payable_balance, net_balance,
    open_receivables, open_payables, blocked, blocked_reason, credit_limit, recalculated_at
"#;

/// Postgres [`PaymentStore`].
///
/// Each [`PaymentStore::transaction`] call runs in one database transaction
/// with `lock_timeout` set, so a blocked `SELECT ... FOR UPDATE` surfaces as
/// `Conflict` instead of hanging. Validation reads go through the same
/// transaction and see its uncommitted writes.
#[derive(Debug, Clone)]
pub struct PostgresPaymentStore {
    pool: Arc<PgPool>,
    handle: Handle,
    lock_timeout: Duration,
}

impl PostgresPaymentStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            handle,
            lock_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

impl PaymentStore for PostgresPaymentStore {
    #[instrument(skip(self, work), err)]
    fn transaction<T, F>(&self, work: F) -> DomainResult<T>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> DomainResult<T>,
    {
        let mut tx = self
            .handle
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin", e))?;

        // SET LOCAL takes no bind parameters; the value is a formatted integer.
        let set_timeout = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        self.handle
            .block_on(sqlx::query(&set_timeout).execute(&mut *tx))
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        let mut uow = PgUnitOfWork {
            tx: RefCell::new(tx),
            handle: &self.handle,
        };
        match work(&mut uow) {
            Ok(out) => {
                self.handle
                    .block_on(uow.tx.into_inner().commit())
                    .map_err(|e| map_sqlx_error("commit", e))?;
                Ok(out)
            }
            Err(err) => {
                if let Err(rollback) = self.handle.block_on(uow.tx.into_inner().rollback()) {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

struct PgUnitOfWork<'h> {
    tx: RefCell<Transaction<'static, Postgres>>,
    handle: &'h Handle,
}

impl PgUnitOfWork<'_> {
    fn fetch_all(
        &self,
        operation: &str,
        query: Query<'_, Postgres, PgArguments>,
    ) -> DomainResult<Vec<PgRow>> {
        let mut tx = self.tx.borrow_mut();
        self.handle
            .block_on(query.fetch_all(&mut **tx))
            .map_err(|e| map_sqlx_error(operation, e))
    }

    fn fetch_optional(
        &self,
        operation: &str,
        query: Query<'_, Postgres, PgArguments>,
    ) -> DomainResult<Option<PgRow>> {
        let mut tx = self.tx.borrow_mut();
        self.handle
            .block_on(query.fetch_optional(&mut **tx))
            .map_err(|e| map_sqlx_error(operation, e))
    }

    fn execute(
        &self,
        operation: &str,
        query: Query<'_, Postgres, PgArguments>,
    ) -> DomainResult<u64> {
        let mut tx = self.tx.borrow_mut();
        self.handle
            .block_on(query.execute(&mut **tx))
            .map(|done| done.rows_affected())
            .map_err(|e| map_sqlx_error(operation, e))
    }

    fn documents(
        &self,
        operation: &str,
        query: Query<'_, Postgres, PgArguments>,
    ) -> DomainResult<Vec<PaymentDocument>> {
        self.fetch_all(operation, query)?
            .iter()
            .map(document_from_row)
            .collect()
    }

    fn exists(
        &self,
        operation: &str,
        query: Query<'_, Postgres, PgArguments>,
    ) -> DomainResult<bool> {
        match self.fetch_optional(operation, query)? {
            Some(row) => col(&row, "found"),
            None => Ok(false),
        }
    }
}

impl UnitOfWork for PgUnitOfWork<'_> {
    fn lock_document(&mut self, id: DocumentId) -> DomainResult<PaymentDocument> {
        let sql =
            format!("SELECT {DOCUMENT_COLUMNS} FROM payment_documents WHERE id = $1 FOR UPDATE");
        let row = self
            .fetch_optional("lock_document", sqlx::query(&sql).bind(*id.as_uuid()))?
            .ok_or_else(|| DomainError::not_found("document", id))?;
        document_from_row(&row)
    }

    fn get_document(&mut self, id: DocumentId) -> DomainResult<Option<PaymentDocument>> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM payment_documents WHERE id = $1");
        self.fetch_optional("get_document", sqlx::query(&sql).bind(*id.as_uuid()))?
            .map(|row| document_from_row(&row))
            .transpose()
    }

    fn insert_document(&mut self, doc: &PaymentDocument) -> DomainResult<()> {
        let sql = format!(
            "INSERT INTO payment_documents ({DOCUMENT_COLUMNS}, remaining_amount)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                     $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29)"
        );
        let query = bind_document(sqlx::query(&sql), doc)?.bind(doc.remaining_amount());
        self.execute("insert_document", query)?;
        Ok(())
    }

    fn update_document(&mut self, doc: &PaymentDocument) -> DomainResult<()> {
        let query = bind_document(
            sqlx::query(
                r#"
                UPDATE payment_documents SET
                    organization_id = $2, number = $3, direction = $4, document_type = $5,
                    payment_kind = $6, document_date = $7, due_date = $8, purpose = $9,
                    amount = $10, vat_rate = $11, currency = $12, payer = $13, payee = $14,
                    payee_bank = $15, source = $16, status = $17, paid_amount = $18,
                    submitted_at = $19, approved_at = $20, scheduled_at = $21, paid_at = $22,
                    rejected_at = $23, cancelled_at = $24, status_reason = $25,
                    created_by = $26, created_at = $27, updated_at = $28,
                    remaining_amount = $29
                WHERE id = $1
                "#,
            ),
            doc,
        )?
        .bind(doc.remaining_amount());
        if self.execute("update_document", query)? == 0 {
            return Err(DomainError::not_found("document", doc.id));
        }
        Ok(())
    }

    fn documents_for_counterparty(
        &mut self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<Vec<PaymentDocument>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM payment_documents
             WHERE organization_id = $1
               AND ((direction = 'outgoing' AND payee = $2)
                    OR (direction = 'incoming' AND payer = $2))
             ORDER BY created_at, id"
        );
        self.documents(
            "documents_for_counterparty",
            sqlx::query(&sql)
                .bind(*organization_id.as_uuid())
                .bind(to_json(&counterparty)?),
        )
    }

    fn numbers_with_prefix(
        &mut self,
        organization_id: OrganizationId,
        prefix: &str,
    ) -> DomainResult<Vec<String>> {
        let rows = self.fetch_all(
            "numbers_with_prefix",
            sqlx::query(
                "SELECT number FROM payment_documents
                 WHERE organization_id = $1 AND starts_with(number, $2)",
            )
            .bind(*organization_id.as_uuid())
            .bind(prefix.to_string()),
        )?;
        rows.iter().map(|row| col(row, "number")).collect()
    }

    fn approvals_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> DomainResult<Vec<PaymentApproval>> {
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM payment_approvals WHERE document_id = $1
             ORDER BY round, approval_level, approval_order, created_at"
        );
        self.fetch_all("approvals_for_document", sqlx::query(&sql).bind(*document_id.as_uuid()))?
            .iter()
            .map(approval_from_row)
            .collect()
    }

    fn lock_approval(&mut self, id: ApprovalId) -> DomainResult<PaymentApproval> {
        let sql =
            format!("SELECT {APPROVAL_COLUMNS} FROM payment_approvals WHERE id = $1 FOR UPDATE");
        let row = self
            .fetch_optional("lock_approval", sqlx::query(&sql).bind(*id.as_uuid()))?
            .ok_or_else(|| DomainError::not_found("approval", id))?;
        approval_from_row(&row)
    }

    fn insert_approvals(&mut self, rows: &[PaymentApproval]) -> DomainResult<()> {
        let sql = format!(
            "INSERT INTO payment_approvals ({APPROVAL_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        );
        for row in rows {
            self.execute("insert_approval", bind_approval(sqlx::query(&sql), row)?)?;
        }
        Ok(())
    }

    fn update_approval(&mut self, row: &PaymentApproval) -> DomainResult<()> {
        let query = bind_approval(
            sqlx::query(
                r#"
                UPDATE payment_approvals SET
                    document_id = $2, organization_id = $3, approval_role = $4,
                    approver_user_id = $5, approval_level = $6, approval_order = $7,
                    round = $8, required = $9, status = $10, amount_threshold = $11,
                    conditions = $12, decided_by = $13, comment = $14, decided_at = $15,
                    created_at = $16
                WHERE id = $1
                "#,
            ),
            row,
        )?;
        if self.execute("update_approval", query)? == 0 {
            return Err(DomainError::not_found("approval", row.id));
        }
        Ok(())
    }

    fn approval_rules(
        &mut self,
        organization_id: OrganizationId,
    ) -> DomainResult<Vec<ApprovalRuleDef>> {
        let rows = self.fetch_all(
            "approval_rules",
            sqlx::query(
                "SELECT id, organization_id, name, priority, active, approval_required,
                        conditions, chain, created_at
                 FROM approval_rules WHERE organization_id = $1
                 ORDER BY priority, created_at",
            )
            .bind(*organization_id.as_uuid()),
        )?;
        rows.iter()
            .map(|row| {
                Ok(ApprovalRuleDef {
                    id: RuleId::from_uuid(col(row, "id")?),
                    organization_id: OrganizationId::from_uuid(col(row, "organization_id")?),
                    name: col(row, "name")?,
                    priority: col(row, "priority")?,
                    active: col(row, "active")?,
                    approval_required: col(row, "approval_required")?,
                    conditions: from_json(col(row, "conditions")?, "conditions")?,
                    chain: from_json(col(row, "chain")?, "chain")?,
                    created_at: col(row, "created_at")?,
                })
            })
            .collect()
    }

    fn insert_transactions(&mut self, rows: &[PaymentTransaction]) -> DomainResult<()> {
        for row in rows {
            self.execute(
                "insert_transaction",
                sqlx::query(
                    r#"
                    INSERT INTO payment_transactions (
                        id, organization_id, document_id, amount, currency, method, status,
                        reference, paired_document_id, notes, created_by, created_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    "#,
                )
                .bind(*row.id.as_uuid())
                .bind(*row.organization_id.as_uuid())
                .bind(*row.document_id.as_uuid())
                .bind(row.amount)
                .bind(row.currency.clone())
                .bind(row.method.as_str())
                .bind(row.status.as_str())
                .bind(row.reference.clone())
                .bind(row.paired_document_id.map(Uuid::from))
                .bind(row.notes.clone())
                .bind(*row.created_by.as_uuid())
                .bind(row.created_at),
            )?;
        }
        Ok(())
    }

    fn transactions_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> DomainResult<Vec<PaymentTransaction>> {
        let rows = self.fetch_all(
            "transactions_for_document",
            sqlx::query(
                "SELECT id, organization_id, document_id, amount, currency, method, status,
                        reference, paired_document_id, notes, created_by, created_at
                 FROM payment_transactions WHERE document_id = $1
                 ORDER BY created_at, id",
            )
            .bind(*document_id.as_uuid()),
        )?;
        rows.iter()
            .map(|row| {
                let method: String = col(row, "method")?;
                Ok(PaymentTransaction {
                    id: TransactionId::from_uuid(col(row, "id")?),
                    organization_id: OrganizationId::from_uuid(col(row, "organization_id")?),
                    document_id: DocumentId::from_uuid(col(row, "document_id")?),
                    amount: col(row, "amount")?,
                    currency: col(row, "currency")?,
                    method: PaymentMethod::parse(&method)
                        .ok_or_else(|| corrupt("method", &method))?,
                    status: TransactionStatus::Completed,
                    reference: col(row, "reference")?,
                    paired_document_id: col::<Option<Uuid>>(row, "paired_document_id")?
                        .map(DocumentId::from_uuid),
                    notes: col(row, "notes")?,
                    created_by: UserId::from_uuid(col(row, "created_by")?),
                    created_at: col(row, "created_at")?,
                })
            })
            .collect()
    }

    fn lock_counterparty_account(
        &mut self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<CounterpartyAccount> {
        let party = to_json(&counterparty)?;
        self.execute(
            "create_counterparty_account",
            sqlx::query(
                "INSERT INTO counterparty_accounts (organization_id, counterparty)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(*organization_id.as_uuid())
            .bind(party.clone()),
        )?;
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM counterparty_accounts
             WHERE organization_id = $1 AND counterparty = $2 FOR UPDATE"
        );
        let row = self
            .fetch_optional(
                "lock_counterparty_account",
                sqlx::query(&sql).bind(*organization_id.as_uuid()).bind(party),
            )?
            .ok_or_else(|| DomainError::store("counterparty account vanished after insert"))?;
        account_from_row(&row)
    }

    fn save_counterparty_account(&mut self, account: &CounterpartyAccount) -> DomainResult<()> {
        self.execute(
            "save_counterparty_account",
            sqlx::query(
                r#"
                UPDATE counterparty_accounts SET
                    receivable_balance = $3, payable_balance = $4, net_balance = $5,
                    open_receivables = $6, open_payables = $7, blocked = $8,
                    blocked_reason = $9, credit_limit = $10, recalculated_at = $11
                WHERE organization_id = $1 AND counterparty = $2
                "#,
            )
            .bind(*account.organization_id.as_uuid())
            .bind(to_json(&account.counterparty)?)
            .bind(account.receivable_balance)
            .bind(account.payable_balance)
            .bind(account.net_balance)
            .bind(account.open_receivables as i32)
            .bind(account.open_payables as i32)
            .bind(account.blocked)
            .bind(account.blocked_reason.clone())
            .bind(account.credit_limit)
            .bind(account.recalculated_at),
        )?;
        Ok(())
    }

    fn lookup(&self) -> &dyn ValidationLookup {
        self
    }
}

impl ValidationLookup for PgUnitOfWork<'_> {
    fn organization_exists(&self, id: OrganizationId) -> DomainResult<bool> {
        self.exists(
            "organization_exists",
            sqlx::query("SELECT EXISTS (SELECT 1 FROM organizations WHERE id = $1) AS found")
                .bind(*id.as_uuid()),
        )
    }

    fn contractor_exists(&self, id: ContractorId) -> DomainResult<bool> {
        self.exists(
            "contractor_exists",
            sqlx::query("SELECT EXISTS (SELECT 1 FROM contractors WHERE id = $1) AS found")
                .bind(*id.as_uuid()),
        )
    }

    fn number_taken(
        &self,
        organization_id: OrganizationId,
        number: &str,
        exclude: DocumentId,
    ) -> DomainResult<bool> {
        self.exists(
            "number_taken",
            sqlx::query(
                "SELECT EXISTS (
                    SELECT 1 FROM payment_documents
                    WHERE organization_id = $1 AND number = $2 AND id <> $3
                 ) AS found",
            )
            .bind(*organization_id.as_uuid())
            .bind(number.to_string())
            .bind(*exclude.as_uuid()),
        )
    }

    fn documents_for_payee(
        &self,
        organization_id: OrganizationId,
        payee: Party,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DomainResult<Vec<PaymentDocument>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM payment_documents
             WHERE organization_id = $1 AND payee = $2 AND document_date BETWEEN $3 AND $4"
        );
        self.documents(
            "documents_for_payee",
            sqlx::query(&sql)
                .bind(*organization_id.as_uuid())
                .bind(to_json(&payee)?)
                .bind(from)
                .bind(to),
        )
    }

    fn counterparty_account(
        &self,
        organization_id: OrganizationId,
        counterparty: Party,
    ) -> DomainResult<Option<CounterpartyAccount>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM counterparty_accounts
             WHERE organization_id = $1 AND counterparty = $2"
        );
        self.fetch_optional(
            "counterparty_account",
            sqlx::query(&sql)
                .bind(*organization_id.as_uuid())
                .bind(to_json(&counterparty)?),
        )?
        .map(|row| account_from_row(&row))
        .transpose()
    }

    fn contract(&self, id: ContractId) -> DomainResult<Option<ContractTerms>> {
        let row = self.fetch_optional(
            "contract",
            sqlx::query(
                "SELECT id, organization_id, contractor_id, number, total_amount,
                        advance_limit, currency, projects
                 FROM contracts WHERE id = $1",
            )
            .bind(*id.as_uuid()),
        )?;
        row.map(|row| {
            Ok(ContractTerms {
                id: ContractId::from_uuid(col(&row, "id")?),
                organization_id: OrganizationId::from_uuid(col(&row, "organization_id")?),
                contractor_id: ContractorId::from_uuid(col(&row, "contractor_id")?),
                number: col(&row, "number")?,
                total_amount: col(&row, "total_amount")?,
                advance_limit: col(&row, "advance_limit")?,
                currency: col(&row, "currency")?,
                projects: from_json(col(&row, "projects")?, "projects")?,
            })
        })
        .transpose()
    }

    fn act(&self, id: ActId) -> DomainResult<Option<ActTerms>> {
        let row = self.fetch_optional(
            "act",
            sqlx::query(
                "SELECT id, organization_id, contract_id, number, amount, currency
                 FROM acts WHERE id = $1",
            )
            .bind(*id.as_uuid()),
        )?;
        row.map(|row| {
            Ok(ActTerms {
                id: ActId::from_uuid(col(&row, "id")?),
                organization_id: OrganizationId::from_uuid(col(&row, "organization_id")?),
                contract_id: col::<Option<Uuid>>(&row, "contract_id")?.map(ContractId::from_uuid),
                number: col(&row, "number")?,
                amount: col(&row, "amount")?,
                currency: col(&row, "currency")?,
            })
        })
        .transpose()
    }

    fn documents_for_source(&self, source: &SourceLink) -> DomainResult<Vec<PaymentDocument>> {
        // Containment on the discriminating keys only, so every project of a
        // contract matches.
        let needle = match source {
            SourceLink::Contract { contract_id, .. } => {
                serde_json::json!({ "kind": "contract", "contract_id": contract_id })
            }
            SourceLink::Act { act_id } => serde_json::json!({ "kind": "act", "act_id": act_id }),
        };
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM payment_documents WHERE source @> $1");
        self.documents("documents_for_source", sqlx::query(&sql).bind(needle))
    }
}

fn bind_document<'q>(
    query: Query<'q, Postgres, PgArguments>,
    doc: &PaymentDocument,
) -> DomainResult<Query<'q, Postgres, PgArguments>> {
    let stamps = doc.timestamps();
    Ok(query
        .bind(*doc.id.as_uuid())
        .bind(*doc.organization_id.as_uuid())
        .bind(doc.number.clone())
        .bind(doc.direction.as_str())
        .bind(doc.document_type.as_str())
        .bind(doc.payment_kind.as_str())
        .bind(doc.document_date)
        .bind(doc.due_date)
        .bind(doc.purpose.clone())
        .bind(doc.amount())
        .bind(doc.vat_rate)
        .bind(doc.currency.clone())
        .bind(optional_json(doc.payer.as_ref())?)
        .bind(optional_json(doc.payee.as_ref())?)
        .bind(optional_json(doc.payee_bank.as_ref())?)
        .bind(optional_json(doc.source.as_ref())?)
        .bind(doc.status().as_str())
        .bind(doc.paid_amount())
        .bind(stamps.submitted_at)
        .bind(stamps.approved_at)
        .bind(stamps.scheduled_at)
        .bind(stamps.paid_at)
        .bind(stamps.rejected_at)
        .bind(stamps.cancelled_at)
        .bind(doc.status_reason().map(str::to_string))
        .bind(*doc.created_by.as_uuid())
        .bind(doc.created_at)
        .bind(doc.updated_at))
}

fn document_from_row(row: &PgRow) -> DomainResult<PaymentDocument> {
    let direction: String = col(row, "direction")?;
    let document_type: String = col(row, "document_type")?;
    let payment_kind: String = col(row, "payment_kind")?;
    let status: String = col(row, "status")?;
    let created_at: DateTime<Utc> = col(row, "created_at")?;

    let input = NewDocument {
        organization_id: OrganizationId::from_uuid(col(row, "organization_id")?),
        direction: Direction::parse(&direction).ok_or_else(|| corrupt("direction", &direction))?,
        document_type: DocumentType::parse(&document_type)
            .ok_or_else(|| corrupt("document_type", &document_type))?,
        payment_kind: PaymentKind::parse(&payment_kind)
            .ok_or_else(|| corrupt("payment_kind", &payment_kind))?,
        number: None,
        document_date: col(row, "document_date")?,
        due_date: col(row, "due_date")?,
        purpose: col(row, "purpose")?,
        amount: col(row, "amount")?,
        vat_rate: col(row, "vat_rate")?,
        currency: col(row, "currency")?,
        payer: optional_from_json(col(row, "payer")?, "payer")?,
        payee: optional_from_json(col(row, "payee")?, "payee")?,
        payee_bank: optional_from_json(col(row, "payee_bank")?, "payee_bank")?,
        source: optional_from_json(col(row, "source")?, "source")?,
    };
    let amount = input.amount;
    let lifecycle = Lifecycle {
        status: DocumentStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        paid_amount: col(row, "paid_amount")?,
        timestamps: Timestamps {
            submitted_at: col(row, "submitted_at")?,
            approved_at: col(row, "approved_at")?,
            scheduled_at: col(row, "scheduled_at")?,
            paid_at: col(row, "paid_at")?,
            rejected_at: col(row, "rejected_at")?,
            cancelled_at: col(row, "cancelled_at")?,
        },
        status_reason: col(row, "status_reason")?,
    };

    let mut doc = PaymentDocument::draft(
        DocumentId::from_uuid(col(row, "id")?),
        input,
        col(row, "number")?,
        UserId::from_uuid(col(row, "created_by")?),
        created_at,
    )
    .with_lifecycle(amount, lifecycle);
    doc.updated_at = col(row, "updated_at")?;
    Ok(doc)
}

fn bind_approval<'q>(
    query: Query<'q, Postgres, PgArguments>,
    row: &PaymentApproval,
) -> DomainResult<Query<'q, Postgres, PgArguments>> {
    Ok(query
        .bind(*row.id.as_uuid())
        .bind(*row.document_id.as_uuid())
        .bind(*row.organization_id.as_uuid())
        .bind(row.approval_role.as_str().to_string())
        .bind(row.approver_user_id.map(Uuid::from))
        .bind(row.approval_level as i32)
        .bind(row.approval_order as i32)
        .bind(row.round as i32)
        .bind(row.required)
        .bind(row.status.as_str())
        .bind(row.amount_threshold)
        .bind(optional_json(row.conditions.as_ref())?)
        .bind(row.decided_by.map(Uuid::from))
        .bind(row.comment.clone())
        .bind(row.decided_at)
        .bind(row.created_at))
}

fn approval_from_row(row: &PgRow) -> DomainResult<PaymentApproval> {
    let status: String = col(row, "status")?;
    let role: String = col(row, "approval_role")?;
    Ok(PaymentApproval {
        id: ApprovalId::from_uuid(col(row, "id")?),
        document_id: DocumentId::from_uuid(col(row, "document_id")?),
        organization_id: OrganizationId::from_uuid(col(row, "organization_id")?),
        approval_role: Role::new(role),
        approver_user_id: col::<Option<Uuid>>(row, "approver_user_id")?.map(UserId::from_uuid),
        approval_level: col::<i32>(row, "approval_level")? as u32,
        approval_order: col::<i32>(row, "approval_order")? as u32,
        round: col::<i32>(row, "round")? as u32,
        required: col(row, "required")?,
        status: ApprovalStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        amount_threshold: col(row, "amount_threshold")?,
        conditions: optional_from_json(col(row, "conditions")?, "conditions")?,
        decided_by: col::<Option<Uuid>>(row, "decided_by")?.map(UserId::from_uuid),
        comment: col(row, "comment")?,
        decided_at: col(row, "decided_at")?,
        created_at: col(row, "created_at")?,
    })
}

fn account_from_row(row: &PgRow) -> DomainResult<CounterpartyAccount> {
    Ok(CounterpartyAccount {
        organization_id: OrganizationId::from_uuid(col(row, "organization_id")?),
        counterparty: from_json(col(row, "counterparty")?, "counterparty")?,
        receivable_balance: col(row, "receivable_balance")?,
        payable_balance: col(row, "payable_balance")?,
        net_balance: col(row, "net_balance")?,
        open_receivables: col::<i32>(row, "open_receivables")? as u32,
        open_payables: col::<i32>(row, "open_payables")? as u32,
        blocked: col(row, "blocked")?,
        blocked_reason: col(row, "blocked_reason")?,
        credit_limit: col(row, "credit_limit")?,
        recalculated_at: col(row, "recalculated_at")?,
    })
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> DomainResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(|e| map_sqlx_error("decode", e))
}

fn to_json<T: Serialize>(value: &T) -> DomainResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| DomainError::store(format!("failed to encode json: {e}")))
}

fn optional_json<T: Serialize>(value: Option<&T>) -> DomainResult<Option<serde_json::Value>> {
    value.map(to_json).transpose()
}

fn from_json<T: DeserializeOwned>(value: serde_json::Value, column: &str) -> DomainResult<T> {
    serde_json::from_value(value)
        .map_err(|e| DomainError::store(format!("failed to decode column {column}: {e}")))
}

fn optional_from_json<T: DeserializeOwned>(
    value: Option<serde_json::Value>,
    column: &str,
) -> DomainResult<Option<T>> {
    value.map(|v| from_json(v, column)).transpose()
}

fn corrupt(column: &str, value: &str) -> DomainError {
    DomainError::store(format!("unexpected value '{value}' in column {column}"))
}

/// Map SQLx errors to domain errors. Lock contention and unique violations
/// become `Conflict` so callers can retry.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DomainError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("55P03") | Some("40P01") | Some("40001") => {
                    DomainError::conflict(msg)
                }
                _ => DomainError::store(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            DomainError::store(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            DomainError::store(format!("unexpected row not found in {operation}"))
        }
        other => DomainError::store(format!("sqlx error in {operation}: {other}")),
    }
}

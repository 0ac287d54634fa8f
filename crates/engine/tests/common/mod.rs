#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};

use payflow_auth::{MembershipRegistry, Role};
use payflow_core::{ContractorId, DocumentId, OperationContext, OrganizationId, Party, UserId};
use payflow_documents::{
    Direction, DocumentEvent, DocumentStatus, DocumentType, NewDocument, PaymentDocument,
    PaymentKind,
};
use payflow_engine::{Collaborators, PaymentEngine};
use payflow_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use payflow_infra::{EngineConfig, InMemoryAuditSink, InMemoryNotifier, InMemoryPaymentStore};

pub type Bus = InMemoryEventBus<EventEnvelope<DocumentEvent>>;

pub fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-06-15T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).unwrap()
}

/// One organization, one contractor and a full set of signers.
pub struct Harness {
    pub engine: PaymentEngine<InMemoryPaymentStore>,
    pub store: Arc<InMemoryPaymentStore>,
    pub registry: Arc<MembershipRegistry>,
    pub audit: Arc<InMemoryAuditSink>,
    pub notifier: Arc<InMemoryNotifier>,
    pub bus: Arc<Bus>,
    pub org: OrganizationId,
    pub contractor: ContractorId,
    pub clerk: UserId,
    pub chief_accountant: UserId,
    pub financial_director: UserId,
    pub general_director: UserId,
    pub admin: UserId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(InMemoryPaymentStore::with_lock_timeout(Duration::from_secs(5)))
    }

    pub fn with_store(store: InMemoryPaymentStore) -> Self {
        payflow_observability::init_for_tests();
        let store = Arc::new(store);
        let org = OrganizationId::new();
        let contractor = ContractorId::new();
        store.add_organization(org).unwrap();
        store.add_contractor(contractor).unwrap();

        let registry = Arc::new(MembershipRegistry::new());
        let clerk = UserId::new();
        let chief_accountant = UserId::new();
        let financial_director = UserId::new();
        let general_director = UserId::new();
        let admin = UserId::new();
        registry.grant_role(org, chief_accountant, Role::CHIEF_ACCOUNTANT);
        registry.grant_role(org, financial_director, Role::FINANCIAL_DIRECTOR);
        registry.grant_role(org, general_director, Role::GENERAL_DIRECTOR);
        registry.grant_role(org, admin, Role::ADMIN);

        let audit = Arc::new(InMemoryAuditSink::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let bus = Arc::new(Bus::new());
        let collaborators = Collaborators::new(registry.clone())
            .with_audit(audit.clone())
            .with_notifier(notifier.clone())
            .with_events(bus.clone());

        let engine = PaymentEngine::new(store.clone(), EngineConfig::default(), collaborators);
        Self {
            engine,
            store,
            registry,
            audit,
            notifier,
            bus,
            org,
            contractor,
            clerk,
            chief_accountant,
            financial_director,
            general_director,
            admin,
        }
    }

    pub fn ctx(&self, user: UserId) -> OperationContext {
        OperationContext::at(user, now())
    }

    pub fn clerk(&self) -> OperationContext {
        self.ctx(self.clerk)
    }

    pub fn events(&self) -> Subscription<EventEnvelope<DocumentEvent>> {
        self.bus.subscribe()
    }

    pub fn counterparty(&self) -> Party {
        Party::Contractor(self.contractor)
    }

    /// Outgoing invoice to the harness contractor.
    pub fn new_payable(&self, amount: f64) -> NewDocument {
        self.new_document(Direction::Outgoing, amount)
    }

    /// Incoming invoice from the harness contractor.
    pub fn new_receivable(&self, amount: f64) -> NewDocument {
        self.new_document(Direction::Incoming, amount)
    }

    pub fn new_document(&self, direction: Direction, amount: f64) -> NewDocument {
        let (payer, payee) = match direction {
            Direction::Outgoing => (Party::Organization(self.org), self.counterparty()),
            Direction::Incoming => (self.counterparty(), Party::Organization(self.org)),
        };
        NewDocument {
            organization_id: self.org,
            direction,
            document_type: DocumentType::Invoice,
            payment_kind: PaymentKind::Regular,
            number: None,
            document_date: date(6, 10),
            due_date: Some(date(6, 30)),
            purpose: "engineering services".into(),
            amount,
            vat_rate: Some(20.0),
            currency: "RUB".into(),
            payer: Some(payer),
            payee: Some(payee),
            payee_bank: None,
            source: None,
        }
    }

    pub fn create(&self, input: NewDocument) -> PaymentDocument {
        self.engine.workflow.create(&self.clerk(), input).unwrap()
    }

    /// Create and submit, acknowledging duplicate warnings.
    pub fn submitted(&self, input: NewDocument) -> PaymentDocument {
        let doc = self.create(input);
        self.engine.workflow.submit(&self.clerk(), doc.id, true).unwrap()
    }

    /// Create, submit and approve directly as the administrator.
    pub fn approved(&self, input: NewDocument) -> PaymentDocument {
        let doc = self.submitted(input);
        let doc = self.engine.workflow.approve(&self.ctx(self.admin), doc.id).unwrap();
        assert_eq!(doc.status(), DocumentStatus::Approved);
        doc
    }

    pub fn reload(&self, id: DocumentId) -> PaymentDocument {
        self.engine.workflow.get_document(id).unwrap()
    }
}

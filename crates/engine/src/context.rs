//! Collaborators injected into the engine and the transaction runner shared
//! by every service.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::warn;

use payflow_auth::AuthorizationOracle;
use payflow_core::{DomainResult, OperationContext};
use payflow_documents::{DocumentEvent, PaymentDocument};
use payflow_events::{EventBus, EventEnvelope, InMemoryEventBus};
use payflow_infra::{
    ApprovalNotice, AuditEntry, AuditSink, EngineConfig, NotificationDispatcher, PaymentStore,
    TracingAuditSink, TracingNotifier, UnitOfWork,
};
use payflow_validation::{DocumentValidator, ValidationLookup};

use crate::numbering::DocumentNumberGenerator;

/// Object-safe view of an event bus carrying document events.
pub trait DocumentEventSink: Send + Sync {
    fn publish_document_event(&self, envelope: EventEnvelope<DocumentEvent>) -> Result<(), String>;
}

impl<B> DocumentEventSink for B
where
    B: EventBus<EventEnvelope<DocumentEvent>>,
{
    fn publish_document_event(&self, envelope: EventEnvelope<DocumentEvent>) -> Result<(), String> {
        self.publish(envelope).map_err(|e| format!("{e:?}"))
    }
}

/// External collaborators of the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub authz: Arc<dyn AuthorizationOracle>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub events: Arc<dyn DocumentEventSink>,
}

impl Collaborators {
    /// Tracing-backed audit and notifications, in-process event bus.
    pub fn new(authz: Arc<dyn AuthorizationOracle>) -> Self {
        Self {
            authz,
            audit: Arc::new(TracingAuditSink),
            notifier: Arc::new(TracingNotifier),
            events: Arc::new(InMemoryEventBus::<EventEnvelope<DocumentEvent>>::new()),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn DocumentEventSink>) -> Self {
        self.events = events;
        self
    }
}

/// Side effects collected during a transaction, dispatched after commit.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    audit: Vec<AuditEntry>,
    events: Vec<EventEnvelope<DocumentEvent>>,
    notices: Vec<ApprovalNotice>,
}

impl Effects {
    pub(crate) fn audit(&mut self, entry: AuditEntry) {
        self.audit.push(entry);
    }

    pub(crate) fn events(
        &mut self,
        doc: &PaymentDocument,
        events: impl IntoIterator<Item = DocumentEvent>,
    ) {
        self.events.extend(
            events
                .into_iter()
                .map(|event| EventEnvelope::wrap(doc.organization_id, doc.id, event)),
        );
    }

    pub(crate) fn notify(&mut self, notice: ApprovalNotice) {
        self.notices.push(notice);
    }

    fn dispatch(self, collab: &Collaborators) {
        for entry in self.audit {
            collab.audit.record(entry);
        }
        for envelope in self.events {
            let event_type = envelope.event_type().to_string();
            let document_id = envelope.document_id();
            if let Err(error) = collab.events.publish_document_event(envelope) {
                warn!(%document_id, %event_type, %error, "failed to publish document event");
            }
        }
        for notice in self.notices {
            let document_id = notice.document_id;
            let level = notice.level;
            if let Err(error) = collab.notifier.notify_approvers(notice) {
                warn!(%document_id, level, %error, "failed to notify approvers");
            }
        }
    }
}

/// Store-independent part of the engine state.
pub(crate) struct Env {
    pub(crate) config: EngineConfig,
    pub(crate) collab: Collaborators,
    pub(crate) numbers: DocumentNumberGenerator,
}

impl Env {
    pub(crate) fn new(config: EngineConfig, collab: Collaborators) -> Self {
        let numbers =
            DocumentNumberGenerator::new(config.number_retry_attempts, config.number_retry_base());
        Self {
            config,
            collab,
            numbers,
        }
    }

    pub(crate) fn authz(&self) -> &dyn AuthorizationOracle {
        &*self.collab.authz
    }

    pub(crate) fn validator<'a>(
        &self,
        lookup: &'a dyn ValidationLookup,
        today: NaiveDate,
    ) -> DocumentValidator<'a> {
        DocumentValidator::new(lookup, self.config.validation_rules(), today)
    }
}

pub(crate) struct Shared<S> {
    pub(crate) store: Arc<S>,
    pub(crate) env: Env,
}

impl<S: PaymentStore> Shared<S> {
    /// Run a state-changing unit of work; effects are dispatched only after
    /// the commit succeeded.
    pub(crate) fn run<T>(
        &self,
        work: impl FnOnce(&mut dyn UnitOfWork, &mut Effects) -> DomainResult<T>,
    ) -> DomainResult<T> {
        let mut effects = Effects::default();
        let out = self.store.transaction(|uow| work(uow, &mut effects))?;
        effects.dispatch(&self.env.collab);
        Ok(out)
    }

    /// Read-only unit of work.
    pub(crate) fn read<T>(
        &self,
        work: impl FnOnce(&mut dyn UnitOfWork) -> DomainResult<T>,
    ) -> DomainResult<T> {
        self.store.transaction(work)
    }
}

pub(crate) fn today(ctx: &OperationContext) -> NaiveDate {
    ctx.now().date_naive()
}

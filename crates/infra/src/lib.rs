//! Infrastructure layer: transactional storage, audit and notification
//! adapters, configuration.

pub mod audit;
pub mod config;
pub mod notify;
pub mod store;

pub use audit::{AuditEntry, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use config::{ConfigError, EngineConfig};
pub use notify::{
    ApprovalNotice, InMemoryNotifier, NotificationDispatcher, NotificationError, TracingNotifier,
};
pub use store::memory::InMemoryPaymentStore;
pub use store::postgres::PostgresPaymentStore;
pub use store::{PaymentStore, UnitOfWork};

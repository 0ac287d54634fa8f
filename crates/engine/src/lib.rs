//! `payflow-engine`: transactional services over the payment domain.
//!
//! [`PaymentEngine`] bundles the document workflow, the approval engine, the
//! offset engine and the counterparty ledger. Each public operation runs in
//! one storage transaction; audit entries, domain events and approver
//! notifications are dispatched only after it commits.

pub mod approval;
pub mod context;
pub mod engine;
pub mod ledger;
pub mod numbering;
pub mod offset;
pub mod workflow;

pub use approval::{ApprovalDecision, ApprovalEngine};
pub use context::{Collaborators, DocumentEventSink};
pub use engine::PaymentEngine;
pub use ledger::LedgerAggregator;
pub use numbering::DocumentNumberGenerator;
pub use offset::{
    AutoOffsetReport, OffsetCandidate, OffsetEngine, OffsetResult, SkippedPair, plan_offsets,
};
pub use workflow::{DocumentWorkflow, PaymentReceipt};

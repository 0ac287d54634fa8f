//! Payment documents and their lifecycle (pure domain logic).
//!
//! This crate owns the document model and the state machine that is the
//! single place a document's status, settlement amounts and milestone
//! timestamps change. No IO, no storage, no clocks: callers pass time in.

pub mod document;
pub mod event;
pub mod state_machine;
pub mod status;

pub use document::{
    BankDetails, Direction, DocumentPatch, DocumentType, Lifecycle, NewDocument, PaymentDocument,
    PaymentKind, SourceLink, Timestamps,
};
pub use event::{DocumentEvent, StatusChange};
pub use status::{DocumentAction, DocumentStatus};

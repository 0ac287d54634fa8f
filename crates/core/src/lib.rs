//! `payflow-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod context;
pub mod error;
pub mod id;
pub mod money;
pub mod party;

pub use context::{Clock, FixedClock, OperationContext, SystemClock};
pub use error::{DomainError, DomainResult, Severity, ValidationError, ValidationErrors};
pub use id::{
    ActId, ApprovalId, ContractId, ContractorId, DocumentId, OrganizationId, ProjectId, RuleId,
    TransactionId, UserId,
};
pub use party::Party;

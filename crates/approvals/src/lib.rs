//! Approval chains: rule matching, default tiers, approval rows and the
//! status read model.
//!
//! Pure domain logic. The approval engine in `payflow-engine` drives these
//! types inside storage transactions.

pub mod approval;
pub mod chain;
pub mod rule;
pub mod tiers;

#[cfg(test)]
pub(crate) mod test_support;

pub use approval::{ApprovalStatus, PaymentApproval};
pub use chain::{ApprovalStatusReport, ChainState};
pub use rule::{ApprovalRule, ApprovalRuleDef, ChainStep, Conditions, select_rule};
pub use tiers::DefaultTiers;

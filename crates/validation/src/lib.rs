//! Invariant checks run before a document is created, edited or submitted.
//!
//! Every check is a pure function of the proposed document plus whatever it
//! reads through [`ValidationLookup`]. Two modes:
//!
//! - [`DocumentValidator::validate_fast`] stops at the first error (create/update)
//! - [`DocumentValidator::validate_all`] collects every finding (submission)

pub mod bank;
pub mod checks;
pub mod lookup;
pub mod source;
pub mod validator;

pub use lookup::ValidationLookup;
pub use source::{ActTerms, ContractTerms, ProjectBudget};
pub use validator::{DocumentValidator, ValidationRules};

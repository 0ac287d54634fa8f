//! Payment ledger: append-only transactions and the derived counterparty account.
//!
//! Pure domain logic only: no IO, no persistence concerns.

pub mod account;
pub mod transaction;

pub use account::CounterpartyAccount;
pub use transaction::{
    NewPayment, PaymentMethod, PaymentTransaction, TransactionStatus, offset_reference,
};

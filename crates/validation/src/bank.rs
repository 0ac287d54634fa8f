//! Bank requisite formats.

use payflow_core::ValidationError;
use payflow_documents::BankDetails;

pub const BIK_LEN: usize = 9;
pub const ACCOUNT_LEN: usize = 20;

fn is_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_valid_bik(value: &str) -> bool {
    is_digits(value, BIK_LEN)
}

pub fn is_valid_account(value: &str) -> bool {
    is_digits(value, ACCOUNT_LEN)
}

/// Every format problem in `bank`, in field order.
pub fn check_details(bank: &BankDetails) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !is_valid_bik(&bank.bik) {
        errors.push(ValidationError::new(
            "payee_bank.bik",
            "bank.bik_format",
            "BIK must be exactly 9 digits",
        ));
    }
    if !is_valid_account(&bank.account) {
        errors.push(ValidationError::new(
            "payee_bank.account",
            "bank.account_format",
            "account number must be exactly 20 digits",
        ));
    }
    if let Some(corr) = &bank.correspondent_account {
        if !is_valid_account(corr) {
            errors.push(ValidationError::new(
                "payee_bank.correspondent_account",
                "bank.correspondent_account_format",
                "correspondent account must be exactly 20 digits",
            ));
        }
    }
    errors
}

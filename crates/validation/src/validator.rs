use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use payflow_core::{DomainResult, ValidationError, ValidationErrors};
use payflow_documents::PaymentDocument;

use crate::checks;
use crate::lookup::ValidationLookup;

/// Tunables for date and duplicate checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRules {
    pub future_date_days: u64,
    pub duplicate_window_days: u64,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            future_date_days: 30,
            duplicate_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    RequiredFields,
    Amounts,
    Dates,
    PartyConsistency,
    PartyExistence,
    BankDetails,
    NumberUniqueness,
    Duplicates,
    CounterpartyStanding,
    SpendCap,
}

impl Stage {
    const FAST: [Stage; 7] = [
        Stage::RequiredFields,
        Stage::Amounts,
        Stage::Dates,
        Stage::PartyConsistency,
        Stage::PartyExistence,
        Stage::BankDetails,
        Stage::NumberUniqueness,
    ];

    const ALL: [Stage; 10] = [
        Stage::RequiredFields,
        Stage::Amounts,
        Stage::Dates,
        Stage::PartyConsistency,
        Stage::PartyExistence,
        Stage::BankDetails,
        Stage::NumberUniqueness,
        Stage::Duplicates,
        Stage::CounterpartyStanding,
        Stage::SpendCap,
    ];
}

/// Runs check categories against a proposed document state.
///
/// The outer `DomainResult` of both modes carries lookup failures; the inner
/// result is the verdict. `validator.validate_fast(&doc)??` turns a failed
/// verdict into a `DomainError::Validation`.
pub struct DocumentValidator<'a> {
    lookup: &'a dyn ValidationLookup,
    rules: ValidationRules,
    today: NaiveDate,
}

impl<'a> DocumentValidator<'a> {
    pub fn new(lookup: &'a dyn ValidationLookup, rules: ValidationRules, today: NaiveDate) -> Self {
        Self {
            lookup,
            rules,
            today,
        }
    }

    /// Create/update checks; stops at the first error-severity finding.
    pub fn validate_fast(
        &self,
        doc: &PaymentDocument,
    ) -> DomainResult<Result<(), ValidationError>> {
        for stage in Stage::FAST {
            if let Some(error) = self.run(stage, doc)?.into_iter().find(|e| !e.is_warning()) {
                return Ok(Err(error));
            }
        }
        Ok(Ok(()))
    }

    /// Every category, every finding (warnings included).
    pub fn validate_all(
        &self,
        doc: &PaymentDocument,
    ) -> DomainResult<Result<(), ValidationErrors>> {
        let mut report = ValidationErrors::new();
        for stage in Stage::ALL {
            report.extend(self.run(stage, doc)?.into());
        }
        Ok(report.into_result())
    }

    /// [`validate_all`](Self::validate_all) with warnings dropped when the
    /// caller acknowledged them.
    pub fn validate_for_submission(
        &self,
        doc: &PaymentDocument,
        acknowledge_warnings: bool,
    ) -> DomainResult<Result<(), ValidationErrors>> {
        let report = match self.validate_all(doc)? {
            Ok(()) => return Ok(Ok(())),
            Err(report) => report,
        };
        if acknowledge_warnings {
            let blocking: Vec<_> = report.into_iter().filter(|e| !e.is_warning()).collect();
            return Ok(ValidationErrors::from(blocking).into_result());
        }
        Ok(Err(report))
    }

    fn run(&self, stage: Stage, doc: &PaymentDocument) -> DomainResult<Vec<ValidationError>> {
        Ok(match stage {
            Stage::RequiredFields => checks::required_fields(doc),
            Stage::Amounts => checks::amounts(doc),
            Stage::Dates => checks::dates(doc, self.today, self.rules.future_date_days),
            Stage::PartyConsistency => checks::party_consistency(doc),
            Stage::PartyExistence => checks::party_existence(doc, self.lookup)?,
            Stage::BankDetails => checks::bank_details(doc),
            Stage::NumberUniqueness => checks::number_uniqueness(doc, self.lookup)?,
            Stage::Duplicates => {
                checks::duplicates(doc, self.lookup, self.rules.duplicate_window_days)?
            }
            Stage::CounterpartyStanding => checks::counterparty_standing(doc, self.lookup)?,
            Stage::SpendCap => checks::spend_cap(doc, self.lookup)?,
        })
    }
}

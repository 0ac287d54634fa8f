//! Document numbers: `{PREFIX}-{YYYY}-{seq:06}`, sequential per organization,
//! type and year.

use std::thread;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use tracing::warn;

use payflow_core::{DomainResult, OrganizationId};
use payflow_documents::DocumentType;
use payflow_infra::UnitOfWork;

#[derive(Debug, Clone, Copy)]
pub struct DocumentNumberGenerator {
    attempts: u32,
    base_delay: Duration,
}

impl DocumentNumberGenerator {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub fn prefix(document_type: DocumentType, date: NaiveDate) -> String {
        format!("{}-{}-", document_type.number_prefix(), date.year())
    }

    /// Next free number as seen by this transaction.
    ///
    /// Two concurrent transactions can compute the same number; the unique
    /// `(organization, number)` constraint rejects the second at commit with
    /// `Conflict`, which [`retry`](Self::retry) absorbs.
    pub fn next_number(
        uow: &mut dyn UnitOfWork,
        organization_id: OrganizationId,
        document_type: DocumentType,
        date: NaiveDate,
    ) -> DomainResult<String> {
        let prefix = Self::prefix(document_type, date);
        let last = uow
            .numbers_with_prefix(organization_id, &prefix)?
            .iter()
            .filter_map(|n| n.strip_prefix(&prefix)?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok(format!("{prefix}{:06}", last + 1))
    }

    /// Re-run `attempt` on `Conflict` with exponential backoff.
    pub fn retry<T>(&self, mut attempt: impl FnMut() -> DomainResult<T>) -> DomainResult<T> {
        let mut delay = self.base_delay;
        let mut tries = 1;
        loop {
            match attempt() {
                Err(err) if err.is_conflict() && tries < self.attempts => {
                    warn!(
                        tries,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "document number taken, retrying"
                    );
                    thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    tries += 1;
                }
                other => return other,
            }
        }
    }
}

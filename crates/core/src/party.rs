//! Counterparty references.

use serde::{Deserialize, Serialize};

use crate::id::{ContractorId, OrganizationId};

/// One side of a payment document.
///
/// Either an internal organization or an external contractor, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Party {
    Organization(OrganizationId),
    Contractor(ContractorId),
}

impl Party {
    pub fn kind(&self) -> &'static str {
        match self {
            Party::Organization(_) => "organization",
            Party::Contractor(_) => "contractor",
        }
    }

    pub fn as_organization(&self) -> Option<OrganizationId> {
        match self {
            Party::Organization(id) => Some(*id),
            Party::Contractor(_) => None,
        }
    }

    pub fn as_contractor(&self) -> Option<ContractorId> {
        match self {
            Party::Contractor(id) => Some(*id),
            Party::Organization(_) => None,
        }
    }

    pub fn is_organization(&self, organization_id: OrganizationId) -> bool {
        self.as_organization() == Some(organization_id)
    }
}

impl From<OrganizationId> for Party {
    fn from(value: OrganizationId) -> Self {
        Party::Organization(value)
    }
}

impl From<ContractorId> for Party {
    fn from(value: ContractorId) -> Self {
        Party::Contractor(value)
    }
}

impl core::fmt::Display for Party {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Party::Organization(id) => write!(f, "organization:{id}"),
            Party::Contractor(id) => write!(f, "contractor:{id}"),
        }
    }
}

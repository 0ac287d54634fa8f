//! Spend-cap sources: contracts (optionally split by project) and acts.

use serde::{Deserialize, Serialize};

use payflow_core::{ActId, ContractId, ContractorId, OrganizationId, ProjectId};

/// Budget of one project inside a multi-project contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectBudget {
    pub project_id: ProjectId,
    pub amount: f64,
    /// Cap on advance payments within this project.
    pub advance_limit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractTerms {
    pub id: ContractId,
    pub organization_id: OrganizationId,
    pub contractor_id: ContractorId,
    pub number: String,
    pub total_amount: f64,
    /// Cap on advance payments across the contract.
    pub advance_limit: Option<f64>,
    pub currency: String,
    /// Non-empty for multi-project contracts; caps then apply per project.
    #[serde(default)]
    pub projects: Vec<ProjectBudget>,
}

impl ContractTerms {
    pub fn is_multi_project(&self) -> bool {
        !self.projects.is_empty()
    }

    pub fn project(&self, id: ProjectId) -> Option<&ProjectBudget> {
        self.projects.iter().find(|p| p.project_id == id)
    }
}

/// Act of completed work; payments against it cannot exceed its amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActTerms {
    pub id: ActId,
    pub organization_id: OrganizationId,
    pub contract_id: Option<ContractId>,
    pub number: String,
    pub amount: f64,
    pub currency: String,
}

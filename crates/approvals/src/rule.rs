use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payflow_auth::Role;
use payflow_core::{OrganizationId, RuleId};
use payflow_documents::{Direction, DocumentType, PaymentDocument};

use crate::tiers::DefaultTiers;

/// Match predicate over a document. Empty lists and absent bounds match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default)]
    pub min_amount: Option<f64>,
    #[serde(default)]
    pub max_amount: Option<f64>,
    #[serde(default)]
    pub document_types: Vec<DocumentType>,
    #[serde(default)]
    pub directions: Vec<Direction>,
    #[serde(default)]
    pub currencies: Vec<String>,
}

impl Conditions {
    pub fn matches(&self, doc: &PaymentDocument) -> bool {
        let amount = doc.amount();
        self.min_amount.is_none_or(|min| amount >= min)
            && self.max_amount.is_none_or(|max| amount <= max)
            && (self.document_types.is_empty() || self.document_types.contains(&doc.document_type))
            && (self.directions.is_empty() || self.directions.contains(&doc.direction))
            && (self.currencies.is_empty()
                || self
                    .currencies
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&doc.currency)))
    }
}

/// One signer slot in a chain template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    pub role: Role,
    /// Levels run sequentially, starting at 1.
    pub level: u32,
    /// Position inside the level.
    pub order: u32,
    pub required: bool,
    /// Largest amount this signer may approve.
    pub amount_threshold: Option<f64>,
    /// Documents this signer may approve.
    pub conditions: Option<Conditions>,
}

impl ChainStep {
    pub fn new(role: Role, level: u32, order: u32) -> Self {
        Self {
            role,
            level,
            order,
            required: true,
            amount_threshold: None,
            conditions: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.amount_threshold = Some(threshold);
        self
    }

    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// An organizational approval rule, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRuleDef {
    pub id: RuleId,
    pub organization_id: OrganizationId,
    pub name: String,
    /// Lower number wins.
    pub priority: i32,
    pub active: bool,
    pub approval_required: bool,
    pub conditions: Conditions,
    pub chain: Vec<ChainStep>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRuleDef {
    pub fn applies_to(&self, doc: &PaymentDocument) -> bool {
        self.active && self.organization_id == doc.organization_id && self.conditions.matches(doc)
    }
}

/// The chain a document is approved against.
///
/// A persisted rule and a synthesized default chain execute identically; the
/// synthesized one is never stored.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalRule {
    Persisted(ApprovalRuleDef),
    Synthesized(Vec<ChainStep>),
}

impl ApprovalRule {
    pub fn chain(&self) -> &[ChainStep] {
        match self {
            ApprovalRule::Persisted(def) => &def.chain,
            ApprovalRule::Synthesized(chain) => chain,
        }
    }

    /// False when the document should be approved without any signer.
    pub fn requires_approval(&self) -> bool {
        match self {
            ApprovalRule::Persisted(def) => {
                def.approval_required && def.chain.iter().any(|step| step.required)
            }
            ApprovalRule::Synthesized(chain) => chain.iter().any(|step| step.required),
        }
    }

    pub fn rule_id(&self) -> Option<RuleId> {
        match self {
            ApprovalRule::Persisted(def) => Some(def.id),
            ApprovalRule::Synthesized(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ApprovalRule::Persisted(def) => format!("rule '{}'", def.name),
            ApprovalRule::Synthesized(chain) => format!("default {}-level chain", chain.len()),
        }
    }

    /// Steps ordered by level, then order.
    pub fn ordered_steps(&self) -> Vec<&ChainStep> {
        let mut steps: Vec<_> = self.chain().iter().collect();
        steps.sort_by_key(|s| (s.level, s.order));
        steps
    }
}

/// Pick the rule governing `doc`: the highest-priority matching
/// organizational rule, or the default tiered chain.
pub fn select_rule(
    rules: &[ApprovalRuleDef],
    doc: &PaymentDocument,
    tiers: &DefaultTiers,
) -> ApprovalRule {
    rules
        .iter()
        .filter(|r| r.applies_to(doc))
        .min_by_key(|r| (r.priority, r.created_at))
        .cloned()
        .map(ApprovalRule::Persisted)
        .unwrap_or_else(|| ApprovalRule::Synthesized(tiers.chain_for(doc.amount())))
}

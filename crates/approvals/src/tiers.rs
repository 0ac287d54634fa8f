use serde::{Deserialize, Serialize};

use payflow_auth::Role;

use crate::rule::ChainStep;

/// Amount tiers for the default chain used when no organizational rule matches.
///
/// ```text
/// amount <  tier_one_limit  -> chief_accountant
/// amount <  tier_two_limit  -> + financial_director
/// otherwise                 -> + general_director
/// ```
/// Each role sits on its own level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefaultTiers {
    pub tier_one_limit: f64,
    pub tier_two_limit: f64,
}

impl Default for DefaultTiers {
    fn default() -> Self {
        Self {
            tier_one_limit: 50_000.0,
            tier_two_limit: 500_000.0,
        }
    }
}

impl DefaultTiers {
    pub fn levels_for(&self, amount: f64) -> usize {
        if amount < self.tier_one_limit {
            1
        } else if amount < self.tier_two_limit {
            2
        } else {
            3
        }
    }

    pub fn chain_for(&self, amount: f64) -> Vec<ChainStep> {
        [Role::CHIEF_ACCOUNTANT, Role::FINANCIAL_DIRECTOR, Role::GENERAL_DIRECTOR]
            .into_iter()
            .take(self.levels_for(amount))
            .zip(1u32..)
            .map(|(role, level)| ChainStep::new(role, level, 1))
            .collect()
    }
}

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC and approval chains.
///
/// Roles are opaque strings; approval rules reference them by name and the
/// authorization oracle resolves which users hold them in an organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const CHIEF_ACCOUNTANT: Role = Role(Cow::Borrowed("chief_accountant"));
    pub const FINANCIAL_DIRECTOR: Role = Role(Cow::Borrowed("financial_director"));
    pub const GENERAL_DIRECTOR: Role = Role(Cow::Borrowed("general_director"));
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const FINANCE_ADMIN: Role = Role(Cow::Borrowed("finance_admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Roles whose holders may override the approval chain of their organization.
    pub fn is_admin_role(&self) -> bool {
        *self == Role::ADMIN || *self == Role::FINANCE_ADMIN
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Role {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

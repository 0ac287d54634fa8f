use serde::{Deserialize, Serialize};

use payflow_core::{OrganizationId, UserId};

use crate::{Permission, Role};

/// A user's membership in an organization's authorization context.
///
/// States which roles/permissions the user holds *within that organization*.
/// Inactive memberships are kept for history but never resolve as approvers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationMembership {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
    pub active: bool,
}

impl OrganizationMembership {
    pub fn new(organization_id: OrganizationId, user_id: UserId) -> Self {
        Self {
            organization_id,
            user_id,
            roles: Vec::new(),
            permissions: Vec::new(),
            active: true,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.active && self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &Permission) -> bool {
        self.active && self.permissions.iter().any(|p| p.grants(permission))
    }
}

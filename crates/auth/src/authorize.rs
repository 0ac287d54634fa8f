use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use payflow_core::{OrganizationId, UserId};

use crate::{OrganizationMembership, Permission, Role};

/// Authorization questions the workflow engine needs answered.
///
/// Implementations are expected to be cheap, side-effect free lookups. The
/// approval engine combines them into its admin-override decision (see
/// [`is_approval_admin`]) and uses [`first_active_user_with_role`] to resolve
/// chain roles to concrete approvers.
///
/// [`first_active_user_with_role`]: AuthorizationOracle::first_active_user_with_role
pub trait AuthorizationOracle: Send + Sync {
    fn is_organization_owner(&self, user: UserId, organization: OrganizationId) -> bool;

    fn is_system_admin(&self, user: UserId) -> bool;

    fn has_role(&self, user: UserId, organization: OrganizationId, role: &Role) -> bool;

    fn can(&self, user: UserId, organization: OrganizationId, permission: &Permission) -> bool;

    /// First active user holding `role` in the organization, if any.
    fn first_active_user_with_role(&self, organization: OrganizationId, role: &Role)
    -> Option<UserId>;
}

impl<A> AuthorizationOracle for Arc<A>
where
    A: AuthorizationOracle + ?Sized,
{
    fn is_organization_owner(&self, user: UserId, organization: OrganizationId) -> bool {
        (**self).is_organization_owner(user, organization)
    }

    fn is_system_admin(&self, user: UserId) -> bool {
        (**self).is_system_admin(user)
    }

    fn has_role(&self, user: UserId, organization: OrganizationId, role: &Role) -> bool {
        (**self).has_role(user, organization, role)
    }

    fn can(&self, user: UserId, organization: OrganizationId, permission: &Permission) -> bool {
        (**self).can(user, organization, permission)
    }

    fn first_active_user_with_role(
        &self,
        organization: OrganizationId,
        role: &Role,
    ) -> Option<UserId> {
        (**self).first_active_user_with_role(organization, role)
    }
}

/// Whether `user` may override the approval chain of `organization`.
///
/// Organization owner, system admin, holder of an admin/finance-admin role, or
/// holder of the explicit approve permission.
pub fn is_approval_admin(
    oracle: &dyn AuthorizationOracle,
    user: UserId,
    organization: OrganizationId,
) -> bool {
    oracle.is_organization_owner(user, organization)
        || oracle.is_system_admin(user)
        || oracle.has_role(user, organization, &Role::ADMIN)
        || oracle.has_role(user, organization, &Role::FINANCE_ADMIN)
        || oracle.can(user, organization, &Permission::APPROVE_PAYMENTS)
}

#[derive(Debug, Default)]
struct Registry {
    /// Memberships per organization, in registration order.
    memberships: HashMap<OrganizationId, Vec<OrganizationMembership>>,
    owners: HashMap<OrganizationId, UserId>,
    system_admins: HashSet<UserId>,
}

/// In-memory authorization oracle for tests/dev.
///
/// Registration order matters: "first active user with role" is the earliest
/// registered active membership holding that role.
#[derive(Debug, Default)]
pub struct MembershipRegistry {
    inner: RwLock<Registry>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a user's membership in an organization.
    pub fn add_membership(&self, membership: OrganizationMembership) {
        if let Ok(mut reg) = self.inner.write() {
            let list = reg
                .memberships
                .entry(membership.organization_id)
                .or_default();
            match list.iter_mut().find(|m| m.user_id == membership.user_id) {
                Some(existing) => *existing = membership,
                None => list.push(membership),
            }
        }
    }

    /// Convenience: grant a single role to a user.
    pub fn grant_role(&self, organization: OrganizationId, user: UserId, role: Role) {
        let existing = self.membership(organization, user);
        let membership = existing
            .unwrap_or_else(|| OrganizationMembership::new(organization, user))
            .with_role(role);
        self.add_membership(membership);
    }

    pub fn set_owner(&self, organization: OrganizationId, user: UserId) {
        if let Ok(mut reg) = self.inner.write() {
            reg.owners.insert(organization, user);
        }
    }

    pub fn add_system_admin(&self, user: UserId) {
        if let Ok(mut reg) = self.inner.write() {
            reg.system_admins.insert(user);
        }
    }

    pub fn deactivate(&self, organization: OrganizationId, user: UserId) {
        if let Ok(mut reg) = self.inner.write() {
            if let Some(m) = reg
                .memberships
                .get_mut(&organization)
                .and_then(|list| list.iter_mut().find(|m| m.user_id == user))
            {
                m.active = false;
            }
        }
    }

    pub fn membership(
        &self,
        organization: OrganizationId,
        user: UserId,
    ) -> Option<OrganizationMembership> {
        let reg = self.inner.read().ok()?;
        reg.memberships
            .get(&organization)?
            .iter()
            .find(|m| m.user_id == user)
            .cloned()
    }
}

impl AuthorizationOracle for MembershipRegistry {
    fn is_organization_owner(&self, user: UserId, organization: OrganizationId) -> bool {
        self.inner
            .read()
            .map(|reg| reg.owners.get(&organization) == Some(&user))
            .unwrap_or(false)
    }

    fn is_system_admin(&self, user: UserId) -> bool {
        self.inner
            .read()
            .map(|reg| reg.system_admins.contains(&user))
            .unwrap_or(false)
    }

    fn has_role(&self, user: UserId, organization: OrganizationId, role: &Role) -> bool {
        self.membership(organization, user)
            .is_some_and(|m| m.has_role(role))
    }

    fn can(&self, user: UserId, organization: OrganizationId, permission: &Permission) -> bool {
        self.membership(organization, user)
            .is_some_and(|m| m.has_permission(permission))
    }

    fn first_active_user_with_role(
        &self,
        organization: OrganizationId,
        role: &Role,
    ) -> Option<UserId> {
        let reg = self.inner.read().ok()?;
        let found = reg
            .memberships
            .get(&organization)?
            .iter()
            .find(|m| m.has_role(role))
            .map(|m| m.user_id);
        if found.is_none() {
            tracing::debug!(%organization, role = %role, "no active user holds role");
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_active_holder_wins() {
        let registry = MembershipRegistry::new();
        let org = OrganizationId::new();
        let retired = UserId::new();
        let current = UserId::new();
        let later = UserId::new();

        registry.add_membership(
            OrganizationMembership::new(org, retired)
                .with_role(Role::CHIEF_ACCOUNTANT)
                .inactive(),
        );
        registry.grant_role(org, current, Role::CHIEF_ACCOUNTANT);
        registry.grant_role(org, later, Role::CHIEF_ACCOUNTANT);

        assert_eq!(
            registry.first_active_user_with_role(org, &Role::CHIEF_ACCOUNTANT),
            Some(current)
        );
        assert_eq!(
            registry.first_active_user_with_role(org, &Role::GENERAL_DIRECTOR),
            None
        );
    }

    #[test]
    fn roles_are_scoped_to_organization() {
        let registry = MembershipRegistry::new();
        let org = OrganizationId::new();
        let other = OrganizationId::new();
        let user = UserId::new();
        registry.grant_role(org, user, Role::ADMIN);

        assert!(is_approval_admin(&registry, user, org));
        assert!(!is_approval_admin(&registry, user, other));
    }

    #[test]
    fn each_admin_source_is_recognised() {
        let registry = MembershipRegistry::new();
        let org = OrganizationId::new();

        let owner = UserId::new();
        registry.set_owner(org, owner);

        let sysadmin = UserId::new();
        registry.add_system_admin(sysadmin);

        let finance = UserId::new();
        registry.grant_role(org, finance, Role::FINANCE_ADMIN);

        let delegated = UserId::new();
        registry.add_membership(
            OrganizationMembership::new(org, delegated)
                .with_permission(Permission::APPROVE_PAYMENTS),
        );

        let clerk = UserId::new();
        registry.grant_role(org, clerk, Role::new("clerk"));

        for user in [owner, sysadmin, finance, delegated] {
            assert!(is_approval_admin(&registry, user, org));
        }
        assert!(!is_approval_admin(&registry, clerk, org));
    }

    #[test]
    fn deactivated_member_loses_rights() {
        let registry = MembershipRegistry::new();
        let org = OrganizationId::new();
        let user = UserId::new();
        registry.grant_role(org, user, Role::ADMIN);
        registry.deactivate(org, user);

        assert!(!registry.has_role(user, org, &Role::ADMIN));
        assert!(!is_approval_admin(&registry, user, org));
    }
}

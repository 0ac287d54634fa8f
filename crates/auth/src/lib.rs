//! `payflow-auth`: authorization boundary consumed by the approval engine.
//!
//! This crate is intentionally decoupled from HTTP and storage: the engine asks
//! an [`AuthorizationOracle`] questions, it never inspects a global user object.

pub mod authorize;
pub mod membership;
pub mod permissions;
pub mod roles;

pub use authorize::{AuthorizationOracle, MembershipRegistry, is_approval_admin};
pub use membership::OrganizationMembership;
pub use permissions::Permission;
pub use roles::Role;

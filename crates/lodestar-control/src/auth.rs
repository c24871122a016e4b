//! Permission evaluation for the multi-tenant scoping model.
//!
//! The caller's credential is threaded through every orchestrator entry
//! point as an explicit [`AuthContext`] value, never as ambient state.
//! Authorization for any target entity reduces to: is the target's owning
//! project in the caller's project set, or the target's owning customer in
//! the caller's customer set? Admins bypass both checks.

use std::collections::HashSet;

use crate::types::{CustomerId, ProjectId};

/// The role carried by a caller's credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Bypasses all scope checks.
    Admin,
    /// Scoped to the credential's customer/project sets.
    User,
}

/// A caller's identity as seen by the authorization core.
#[derive(Debug, Clone)]
pub struct AuthContext {
    role: Role,
    customer_ids: HashSet<CustomerId>,
    project_ids: HashSet<ProjectId>,
}

impl AuthContext {
    /// Create an admin context.
    #[must_use]
    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            customer_ids: HashSet::new(),
            project_ids: HashSet::new(),
        }
    }

    /// Create a scoped (non-admin) context.
    #[must_use]
    pub fn scoped(
        customer_ids: impl IntoIterator<Item = CustomerId>,
        project_ids: impl IntoIterator<Item = ProjectId>,
    ) -> Self {
        Self {
            role: Role::User,
            customer_ids: customer_ids.into_iter().collect(),
            project_ids: project_ids.into_iter().collect(),
        }
    }

    /// Whether the caller holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Customer identifiers the caller may act on.
    #[must_use]
    pub fn customer_ids(&self) -> &HashSet<CustomerId> {
        &self.customer_ids
    }

    /// Project identifiers the caller may act on.
    #[must_use]
    pub fn project_ids(&self) -> &HashSet<ProjectId> {
        &self.project_ids
    }

    /// Decide whether the caller may act on an entity owned by the given
    /// project/customer pair.
    #[must_use]
    pub fn can_access(&self, project_id: &ProjectId, customer_id: &CustomerId) -> bool {
        if self.is_admin() {
            return true;
        }
        self.project_ids.contains(project_id) || self.customer_ids.contains(customer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_bypasses_scope_checks() {
        let ctx = AuthContext::admin();
        assert!(ctx.can_access(&ProjectId::new("p1"), &CustomerId::new("c1")));
        assert!(ctx.can_access(&ProjectId::new("anything"), &CustomerId::new("else")));
    }

    #[test]
    fn project_scope_grants_access() {
        let ctx = AuthContext::scoped([], [ProjectId::new("p1")]);
        assert!(ctx.can_access(&ProjectId::new("p1"), &CustomerId::new("c-other")));
        assert!(!ctx.can_access(&ProjectId::new("p2"), &CustomerId::new("c-other")));
    }

    #[test]
    fn customer_scope_grants_access() {
        let ctx = AuthContext::scoped([CustomerId::new("c1")], []);
        assert!(ctx.can_access(&ProjectId::new("p-other"), &CustomerId::new("c1")));
        assert!(!ctx.can_access(&ProjectId::new("p-other"), &CustomerId::new("c2")));
    }

    #[test]
    fn empty_scope_denies_everything() {
        let ctx = AuthContext::scoped([], []);
        assert!(!ctx.can_access(&ProjectId::new("p1"), &CustomerId::new("c1")));
    }
}

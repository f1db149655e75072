use crate::error::{DomainError, DomainResult};
use crate::id::{BranchId, TenantId};

/// Tenant context for one unit of work (request, task, scan).
///
/// This is a plain value owned by the unit of work and passed by reference
/// into every service call. It is never stored globally, so concurrent units
/// of work cannot observe each other's tenant.
///
/// An empty context is a valid state; operations that need a tenant call
/// [`TenantContext::require`], which fails with `DomainError::Configuration`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: Option<TenantId>,
    branch_id: Option<BranchId>,
}

impl TenantContext {
    /// Context with no tenant selected.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Context pinned to `tenant_id` (no branch).
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            branch_id: None,
        }
    }

    /// Select the active tenant. Switching tenant drops any selected branch.
    pub fn set(&mut self, tenant_id: TenantId) {
        if self.tenant_id != Some(tenant_id) {
            self.branch_id = None;
        }
        self.tenant_id = Some(tenant_id);
    }

    pub fn set_branch(&mut self, branch_id: BranchId) {
        self.branch_id = Some(branch_id);
    }

    pub fn current(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn current_branch(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn clear(&mut self) {
        self.tenant_id = None;
        self.branch_id = None;
    }

    /// The active tenant, or a configuration error when none is set.
    pub fn require(&self) -> DomainResult<TenantId> {
        self.tenant_id
            .ok_or_else(|| DomainError::configuration("no tenant set in the current context"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_is_valid_but_require_fails() {
        let ctx = TenantContext::empty();
        assert_eq!(ctx.current(), None);
        assert!(matches!(ctx.require(), Err(DomainError::Configuration(_))));
    }

    #[test]
    fn set_then_clear() {
        let tenant = TenantId::new();
        let mut ctx = TenantContext::empty();
        ctx.set(tenant);
        ctx.set_branch(BranchId::new());
        assert_eq!(ctx.require().unwrap(), tenant);
        assert!(ctx.current_branch().is_some());

        ctx.clear();
        assert_eq!(ctx.current(), None);
        assert_eq!(ctx.current_branch(), None);
    }

    #[test]
    fn switching_tenant_drops_branch() {
        let mut ctx = TenantContext::for_tenant(TenantId::new());
        ctx.set_branch(BranchId::new());
        ctx.set(TenantId::new());
        assert_eq!(ctx.current_branch(), None);
    }

    #[test]
    fn overwriting_with_same_tenant_keeps_branch() {
        let tenant = TenantId::new();
        let branch = BranchId::new();
        let mut ctx = TenantContext::for_tenant(tenant);
        ctx.set_branch(branch);
        ctx.set(tenant);
        assert_eq!(ctx.current_branch(), Some(branch));
    }
}

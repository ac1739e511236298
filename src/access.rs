//! Tenant-scoped access control.
//!
//! A [`Principal`] is built by the auth middleware from a verified token and
//! the stored user. Note queries in [`crate::storage`] take a [`TenantScope`],
//! which can only be obtained from a principal, so every note lookup is bound
//! to the caller's tenant.

use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{Role, Tenant, User};

/// The authenticated caller. Only built from a stored [`User`].
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    user_id: Uuid,
    email: String,
    role: Role,
    tenant_id: Uuid,
}

impl Principal {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn scope(&self) -> TenantScope {
        TenantScope {
            tenant_id: self.tenant_id,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            tenant_id: user.tenant_id,
        }
    }
}

/// Proof that a query runs on behalf of one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantScope {
    tenant_id: Uuid,
}

impl TenantScope {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub(crate) fn key_prefix(&self) -> [u8; 16] {
        *self.tenant_id.as_bytes()
    }
}

/// What a tenant-addressed operation needs from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantAccess {
    Read,
    Manage,
}

/// Check that `principal` may address its own `tenant` through `slug`.
///
/// Role is checked first, then the slug. Slugs compare exactly; stored slugs
/// are lowercase. Both failures are access-denied.
pub fn authorize_tenant(
    principal: &Principal,
    tenant: &Tenant,
    slug: &str,
    access: TenantAccess,
) -> ApiResult<()> {
    if access == TenantAccess::Manage && !principal.is_admin() {
        return Err(ApiError::AccessDenied("Insufficient permissions"));
    }
    if tenant.id != principal.tenant_id || tenant.slug != slug {
        return Err(ApiError::AccessDenied("Access denied"));
    }
    Ok(())
}

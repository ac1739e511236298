//! Tenant info and plan upgrade, addressed by slug.

use tracing::info;

use crate::access::{authorize_tenant, Principal, TenantAccess};
use crate::error::{ApiError, ApiResult};
use crate::models::{Tenant, TenantSummary};
use crate::storage::Storage;

const TENANT_NOT_FOUND: &str = "Tenant not found";

fn own_tenant(storage: &Storage, principal: &Principal) -> ApiResult<Tenant> {
    storage
        .tenant(&principal.scope())?
        .ok_or(ApiError::NotFound(TENANT_NOT_FOUND))
}

pub fn tenant_info(storage: &Storage, principal: &Principal, slug: &str) -> ApiResult<TenantSummary> {
    let tenant = own_tenant(storage, principal)?;
    authorize_tenant(principal, &tenant, slug, TenantAccess::Read)?;
    Ok(TenantSummary::from(&tenant))
}

/// Upgrade the caller's tenant to pro. Admin only; repeating it is harmless.
pub fn upgrade_tenant(storage: &Storage, principal: &Principal, slug: &str) -> ApiResult<TenantSummary> {
    let tenant = own_tenant(storage, principal)?;
    authorize_tenant(principal, &tenant, slug, TenantAccess::Manage)?;

    let upgraded = storage
        .upgrade_tenant(&principal.scope())?
        .ok_or(ApiError::NotFound(TENANT_NOT_FOUND))?;
    info!(tenant = %upgraded.slug, by = %principal.email(), "tenant upgraded to pro");
    Ok(TenantSummary::from(&upgraded))
}

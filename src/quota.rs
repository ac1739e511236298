//! Tenant quota policy.
//!
//! Free tenants may hold at most [`FREE_PLAN_NOTE_LIMIT`] notes; pro tenants
//! are unlimited. The limit is never stored, it is computed from the tier.

use chrono::Utc;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::models::{Subscription, Tenant};

pub const FREE_PLAN_NOTE_LIMIT: usize = 3;

/// Wire sentinel for "no cap".
pub const UNLIMITED_SENTINEL: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteLimit {
    Capped(usize),
    Unlimited,
}

impl NoteLimit {
    pub fn admits(self, current_count: usize) -> bool {
        match self {
            NoteLimit::Capped(max) => current_count < max,
            NoteLimit::Unlimited => true,
        }
    }

    pub fn as_wire(self) -> i64 {
        match self {
            NoteLimit::Capped(max) => max as i64,
            NoteLimit::Unlimited => UNLIMITED_SENTINEL,
        }
    }
}

impl Serialize for NoteLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_wire())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("note limit of {limit} reached")]
pub struct QuotaExceeded {
    pub limit: usize,
}

/// Decide whether `tenant` may create another note given its current count.
///
/// The count is read before the insert without a transaction, so two
/// concurrent creates at the boundary can both pass and leave a free tenant
/// one note over its limit.
pub fn can_create_note(tenant: &Tenant, current_count: usize) -> Result<(), QuotaExceeded> {
    match tenant.note_limit() {
        limit if limit.admits(current_count) => Ok(()),
        NoteLimit::Capped(limit) => Err(QuotaExceeded { limit }),
        NoteLimit::Unlimited => Ok(()),
    }
}

/// Move a tenant to the pro plan. Already-pro tenants come back untouched.
pub fn upgrade(mut tenant: Tenant) -> Tenant {
    if tenant.subscription != Subscription::Pro {
        tenant.subscription = Subscription::Pro;
        tenant.updated_at = Utc::now();
    }
    tenant
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::quota::NoteLimit;

/// Subscription tier of a tenant. The note limit is derived from it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Subscription {
    Free,
    Pro,
}

impl Subscription {
    pub fn note_limit(self) -> NoteLimit {
        match self {
            Subscription::Free => NoteLimit::Capped(crate::quota::FREE_PLAN_NOTE_LIMIT),
            Subscription::Pro => NoteLimit::Unlimited,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub subscription: Subscription,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// New free-tier tenant. The slug is trimmed and lowercased.
    pub fn new(name: &str, slug: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_owned(),
            slug: normalize_slug(slug),
            subscription: Subscription::Free,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn note_limit(&self) -> NoteLimit {
        self.subscription.note_limit()
    }
}

pub fn normalize_slug(slug: &str) -> String {
    slug.trim().to_lowercase()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str, password_hash: String, role: Role, tenant_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            password_hash,
            role,
            tenant_id,
            created_at: Utc::now(),
        }
    }
}

/// A note record. `tenant_id` is fixed at creation; the store keys notes by it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Note {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_id: Uuid,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a note's editable fields.
#[derive(Debug, Clone, Default)]
pub struct NoteChanges {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl NoteChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthPayload {
    pub sub: Uuid, // user id
    pub tenant: Uuid,
    pub role: Role,
    pub exp: usize,
}

/// Tenant as exposed over the API, with the derived note limit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantSummary {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub subscription: Subscription,
    /// `3` on the free plan, `-1` for unlimited
    pub note_limit: i64,
}

impl From<&Tenant> for TenantSummary {
    fn from(tenant: &Tenant) -> Self {
        Self {
            id: tenant.id,
            name: tenant.name.clone(),
            slug: tenant.slug.clone(),
            subscription: tenant.subscription,
            note_limit: tenant.note_limit().as_wire(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct AuthorSummary {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NoteView {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author: AuthorSummary,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NoteView {
    pub fn new(note: Note, author_email: Option<String>) -> Self {
        Self {
            id: note.id,
            title: note.title,
            content: note.content,
            author: AuthorSummary {
                id: note.author_id,
                email: author_email,
            },
            tenant_id: note.tenant_id,
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub tenant: TenantSummary,
}

impl UserView {
    pub fn new(user: &User, tenant: &Tenant) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            tenant: TenantSummary::from(tenant),
        }
    }
}

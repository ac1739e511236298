//! Note operations for an authenticated principal.
//!
//! Order of checks: input validation, then tenant resolution, then quota, then
//! the write. A note outside the caller's tenant is reported as not found.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::access::Principal;
use crate::error::{ApiError, ApiResult};
use crate::models::{Note, NoteChanges, NoteView};
use crate::quota;
use crate::storage::Storage;

const NOTE_NOT_FOUND: &str = "Note not found";

#[derive(Deserialize, Validate, Debug, Clone, ToSchema)]
pub struct CreateNoteRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be 1-100 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 10000, message = "Content must be 1-10000 characters"))]
    pub content: String,
}

impl CreateNoteRequest {
    fn trimmed(self) -> Self {
        Self {
            title: self.title.trim().to_owned(),
            content: self.content.trim().to_owned(),
        }
    }
}

#[derive(Deserialize, Validate, Debug, Clone, Default, ToSchema)]
pub struct UpdateNoteRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be 1-100 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 10000, message = "Content must be 1-10000 characters"))]
    pub content: Option<String>,
}

impl UpdateNoteRequest {
    fn trimmed(self) -> Self {
        Self {
            title: self.title.map(|t| t.trim().to_owned()),
            content: self.content.map(|c| c.trim().to_owned()),
        }
    }
}

pub fn create_note(
    storage: &Storage,
    principal: &Principal,
    request: CreateNoteRequest,
) -> ApiResult<NoteView> {
    let request = request.trimmed();
    request.validate()?;

    let scope = principal.scope();
    let tenant = storage
        .tenant(&scope)?
        .ok_or(ApiError::NotFound("Tenant not found"))?;

    let count = storage.count_notes(&scope)?;
    if let Err(denied) = quota::can_create_note(&tenant, count) {
        info!(tenant = %tenant.slug, count, limit = denied.limit, "note quota reached");
        return Err(denied.into());
    }

    let note = storage.create_note(&scope, principal.user_id(), request.title, request.content)?;
    info!(tenant = %tenant.slug, note_id = %note.id, "note created");
    Ok(NoteView::new(note, Some(principal.email().to_owned())))
}

pub fn list_notes(storage: &Storage, principal: &Principal) -> ApiResult<Vec<NoteView>> {
    let notes = storage.list_notes(&principal.scope())?;
    with_authors(storage, notes)
}

pub fn get_note(storage: &Storage, principal: &Principal, id: Uuid) -> ApiResult<NoteView> {
    match storage.note(&principal.scope(), id)? {
        Some(note) => view(storage, note),
        None => Err(not_found(principal, id)),
    }
}

pub fn update_note(
    storage: &Storage,
    principal: &Principal,
    id: Uuid,
    request: UpdateNoteRequest,
) -> ApiResult<NoteView> {
    let request = request.trimmed();
    request.validate()?;

    let changes = NoteChanges {
        title: request.title,
        content: request.content,
    };
    match storage.update_note(&principal.scope(), id, changes)? {
        Some(note) => {
            info!(note_id = %id, "note updated");
            view(storage, note)
        }
        None => Err(not_found(principal, id)),
    }
}

pub fn delete_note(storage: &Storage, principal: &Principal, id: Uuid) -> ApiResult<()> {
    match storage.delete_note(&principal.scope(), id)? {
        Some(_) => {
            info!(note_id = %id, "note deleted");
            Ok(())
        }
        None => Err(not_found(principal, id)),
    }
}

fn not_found(principal: &Principal, id: Uuid) -> ApiError {
    debug!(tenant_id = %principal.tenant_id(), note_id = %id, "note not in caller scope");
    ApiError::NotFound(NOTE_NOT_FOUND)
}

fn view(storage: &Storage, note: Note) -> ApiResult<NoteView> {
    let email = storage.user(note.author_id)?.map(|u| u.email);
    Ok(NoteView::new(note, email))
}

fn with_authors(storage: &Storage, notes: Vec<Note>) -> ApiResult<Vec<NoteView>> {
    let mut emails: HashMap<Uuid, Option<String>> = HashMap::new();
    let mut views = Vec::with_capacity(notes.len());
    for note in notes {
        let email = match emails.get(&note.author_id) {
            Some(email) => email.clone(),
            None => {
                let email = storage.user(note.author_id)?.map(|u| u.email);
                emails.insert(note.author_id, email.clone());
                email
            }
        };
        views.push(NoteView::new(note, email));
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    fn req(title: &str, content: &str) -> CreateNoteRequest {
        CreateNoteRequest {
            title: title.into(),
            content: content.into(),
        }
    }

    #[test]
    fn test_round_trip_trims_input() {
        let fx = Fixture::new();
        let created = create_note(&fx.storage, &fx.acme_member, req("  Groceries ", "\n milk, eggs \n")).unwrap();
        let fetched = get_note(&fx.storage, &fx.acme_member, created.id).unwrap();
        assert_eq!(fetched.title, "Groceries");
        assert_eq!(fetched.content, "milk, eggs");
        assert_eq!(fetched.author.email.as_deref(), Some("user@acme.test"));
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_free_tenant_quota_then_upgrade() {
        let fx = Fixture::new();
        for i in 0..3 {
            create_note(&fx.storage, &fx.acme_member, req(&format!("n{i}"), "body")).unwrap();
        }
        let denied = create_note(&fx.storage, &fx.acme_member, req("n3", "body"));
        assert!(matches!(denied, Err(ApiError::QuotaExceeded(_))));

        fx.storage.upgrade_tenant(&fx.acme_admin.scope()).unwrap();
        create_note(&fx.storage, &fx.acme_member, req("n3", "body")).unwrap();
        assert_eq!(list_notes(&fx.storage, &fx.acme_member).unwrap().len(), 4);
    }

    #[test]
    fn test_quota_is_per_tenant() {
        let fx = Fixture::new();
        for i in 0..3 {
            create_note(&fx.storage, &fx.acme_member, req(&format!("n{i}"), "body")).unwrap();
        }
        assert!(create_note(&fx.storage, &fx.globex_member, req("g", "body")).is_ok());
    }

    #[test]
    fn test_validation_runs_before_quota() {
        let fx = Fixture::new();
        for i in 0..3 {
            create_note(&fx.storage, &fx.acme_member, req(&format!("n{i}"), "body")).unwrap();
        }
        let long_title = "x".repeat(101);
        match create_note(&fx.storage, &fx.acme_member, req(&long_title, "   ")) {
            Err(ApiError::Validation(fields)) => {
                let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
                assert_eq!(names, ["content", "title"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_length_limits_are_inclusive() {
        let fx = Fixture::new();
        let title = "t".repeat(100);
        let content = "c".repeat(10_000);
        assert!(create_note(&fx.storage, &fx.acme_member, req(&title, &content)).is_ok());
        assert!(matches!(
            create_note(&fx.storage, &fx.acme_member, req("ok", &"c".repeat(10_001))),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn test_cross_tenant_access_is_not_found() {
        let fx = Fixture::new();
        let note = create_note(&fx.storage, &fx.acme_member, req("Acme plan", "secret")).unwrap();

        assert!(matches!(
            get_note(&fx.storage, &fx.globex_admin, note.id),
            Err(ApiError::NotFound(NOTE_NOT_FOUND))
        ));
        let edit = UpdateNoteRequest {
            title: Some("mine now".into()),
            content: None,
        };
        assert!(matches!(
            update_note(&fx.storage, &fx.globex_admin, note.id, edit),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            delete_note(&fx.storage, &fx.globex_admin, note.id),
            Err(ApiError::NotFound(_))
        ));
        assert!(list_notes(&fx.storage, &fx.globex_member).unwrap().is_empty());
        assert_eq!(get_note(&fx.storage, &fx.acme_admin, note.id).unwrap().title, "Acme plan");
    }

    #[test]
    fn test_update_rejects_blank_fields_and_applies_partial_changes() {
        let fx = Fixture::new();
        let note = create_note(&fx.storage, &fx.acme_member, req("Title", "Body")).unwrap();

        let blank = UpdateNoteRequest {
            title: Some("   ".into()),
            content: None,
        };
        assert!(matches!(
            update_note(&fx.storage, &fx.acme_member, note.id, blank),
            Err(ApiError::Validation(_))
        ));

        let partial = UpdateNoteRequest {
            title: None,
            content: Some(" New body ".into()),
        };
        let updated = update_note(&fx.storage, &fx.acme_admin, note.id, partial).unwrap();
        assert_eq!(updated.title, "Title");
        assert_eq!(updated.content, "New body");
        assert_eq!(updated.author.id, fx.acme_member.user_id());
    }

    #[test]
    fn test_delete_frees_quota() {
        let fx = Fixture::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(create_note(&fx.storage, &fx.acme_member, req(&format!("n{i}"), "b")).unwrap().id);
        }
        delete_note(&fx.storage, &fx.acme_member, ids[0]).unwrap();
        assert!(create_note(&fx.storage, &fx.acme_member, req("again", "b")).is_ok());
        assert!(matches!(
            delete_note(&fx.storage, &fx.acme_member, ids[0]),
            Err(ApiError::NotFound(_))
        ));
    }
}

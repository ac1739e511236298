//! Sled-backed document store for tenants, users and notes.
//!
//! Records are Serde JSON. Notes live under `tenant_id ‖ note_id` keys and
//! every note function takes a [`TenantScope`], so a note id on its own can
//! never reach another tenant's data. The `note_timeline` tree indexes notes by
//! tenant and descending creation time.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, Transactional,
};
use sled::{Db, Tree};
use thiserror::Error;
use uuid::Uuid;

use crate::access::TenantScope;
use crate::models::{normalize_email, Note, NoteChanges, Tenant, User};
use crate::quota;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("{kind} '{value}' already exists")]
    Duplicate { kind: &'static str, value: String },

    #[error("corrupt key in tree {0}")]
    CorruptKey(&'static str),
}

impl From<TransactionError<()>> for StorageError {
    fn from(err: TransactionError<()>) -> Self {
        match err {
            TransactionError::Storage(e) => StorageError::Sled(e),
            // closures in this module never abort
            TransactionError::Abort(()) => StorageError::Sled(sled::Error::Unsupported(
                "transaction aborted".to_owned(),
            )),
        }
    }
}

impl From<TransactionError<StorageError>> for StorageError {
    fn from(err: TransactionError<StorageError>) -> Self {
        match err {
            TransactionError::Storage(e) => StorageError::Sled(e),
            TransactionError::Abort(e) => e,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Clone)] // Sled handles are cheap to clone and thread-safe
pub struct Storage {
    db: Db,
    tenants: Tree,
    tenant_slugs: Tree,
    users: Tree,
    user_emails: Tree,
    notes: Tree,
    note_timeline: Tree,
}

impl Storage {
    /// Open or create the Sled database at the given path
    pub fn open(path: &str) -> StorageResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database removed on drop
    pub fn temporary() -> StorageResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        Ok(Self {
            tenants: db.open_tree("tenants")?,
            tenant_slugs: db.open_tree("tenant_slugs")?,
            users: db.open_tree("users")?,
            user_emails: db.open_tree("user_emails")?,
            notes: db.open_tree("notes")?,
            note_timeline: db.open_tree("note_timeline")?,
            db,
        })
    }

    /// Drop every record (used by the seed script)
    pub fn clear(&self) -> StorageResult<()> {
        for tree in [
            &self.tenants,
            &self.tenant_slugs,
            &self.users,
            &self.user_emails,
            &self.notes,
            &self.note_timeline,
        ] {
            tree.clear()?;
        }
        self.flush()
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- Tenants ---

    /// Insert a tenant, claiming its slug first.
    pub fn create_tenant(&self, tenant: &Tenant) -> StorageResult<()> {
        claim_unique(&self.tenant_slugs, "tenant slug", &tenant.slug, tenant.id)?;
        put(&self.tenants, tenant.id.as_bytes(), tenant)
    }

    /// The scope's own tenant record.
    pub fn tenant(&self, scope: &TenantScope) -> StorageResult<Option<Tenant>> {
        get(&self.tenants, &scope.key_prefix())
    }

    pub fn tenant_by_slug(&self, slug: &str) -> StorageResult<Option<Tenant>> {
        match self.tenant_slugs.get(slug.as_bytes())? {
            Some(id) => get(&self.tenants, &id),
            None => Ok(None),
        }
    }

    /// Move the scope's tenant to the pro plan. Returns `None` if the tenant
    /// record is gone.
    pub fn upgrade_tenant(&self, scope: &TenantScope) -> StorageResult<Option<Tenant>> {
        let Some(tenant) = self.tenant(scope)? else {
            return Ok(None);
        };
        let upgraded = quota::upgrade(tenant.clone());
        if upgraded != tenant {
            put(&self.tenants, &scope.key_prefix(), &upgraded)?;
        }
        Ok(Some(upgraded))
    }

    // --- Users ---

    pub fn create_user(&self, user: &User) -> StorageResult<()> {
        claim_unique(&self.user_emails, "user email", &user.email, user.id)?;
        put(&self.users, user.id.as_bytes(), user)
    }

    pub fn user(&self, id: Uuid) -> StorageResult<Option<User>> {
        get(&self.users, id.as_bytes())
    }

    pub fn user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        match self.user_emails.get(normalize_email(email).as_bytes())? {
            Some(id) => get(&self.users, &id),
            None => Ok(None),
        }
    }

    // --- Notes (always tenant-scoped) ---

    /// Number of notes the tenant currently holds.
    pub fn count_notes(&self, scope: &TenantScope) -> StorageResult<usize> {
        let mut count = 0;
        for key in self.notes.scan_prefix(scope.key_prefix()).keys() {
            key?;
            count += 1;
        }
        Ok(count)
    }

    /// Store a new note owned by `author_id` in the scope's tenant.
    pub fn create_note(
        &self,
        scope: &TenantScope,
        author_id: Uuid,
        title: String,
        content: String,
    ) -> StorageResult<Note> {
        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4(),
            title,
            content,
            author_id,
            tenant_id: scope.tenant_id(),
            created_at: now,
            updated_at: now,
        };
        let key = note_key(scope, note.id);
        let timeline_key = timeline_key(&note);
        let bytes = serde_json::to_vec(&note)?;

        (&self.notes, &self.note_timeline).transaction(
            |(notes, timeline)| -> ConflictableTransactionResult<()> {
                notes.insert(&key[..], bytes.as_slice())?;
                timeline.insert(&timeline_key[..], &note.id.as_bytes()[..])?;
                Ok(())
            },
        )?;
        Ok(note)
    }

    /// The scope's notes, newest first.
    pub fn list_notes(&self, scope: &TenantScope) -> StorageResult<Vec<Note>> {
        let mut notes = Vec::new();
        for key in self.note_timeline.scan_prefix(scope.key_prefix()).keys() {
            let key = key?;
            let id = key
                .get(24..40)
                .and_then(|raw| Uuid::from_slice(raw).ok())
                .ok_or(StorageError::CorruptKey("note_timeline"))?;
            if let Some(note) = self.note(scope, id)? {
                notes.push(note);
            }
        }
        Ok(notes)
    }

    pub fn note(&self, scope: &TenantScope, id: Uuid) -> StorageResult<Option<Note>> {
        get(&self.notes, &note_key(scope, id))
    }

    /// Apply `changes` to a note of the scope's tenant. Author, tenant and
    /// creation time are left as they are.
    ///
    /// The note is re-read inside the transaction, so an update racing a
    /// delete finds nothing instead of writing the note back.
    pub fn update_note(
        &self,
        scope: &TenantScope,
        id: Uuid,
        changes: NoteChanges,
    ) -> StorageResult<Option<Note>> {
        let key = note_key(scope, id);
        let updated = self.notes.transaction(
            |notes| -> ConflictableTransactionResult<Option<Note>, StorageError> {
                let Some(bytes) = notes.get(&key[..])? else {
                    return Ok(None);
                };
                let mut note: Note = decode(&bytes)?;
                if changes.is_empty() {
                    return Ok(Some(note));
                }
                if let Some(title) = &changes.title {
                    note.title = title.clone();
                }
                if let Some(content) = &changes.content {
                    note.content = content.clone();
                }
                note.updated_at = Utc::now();
                notes.insert(&key[..], encode(&note)?)?;
                Ok(Some(note))
            },
        )?;
        Ok(updated)
    }

    /// Remove a note of the scope's tenant, returning what was deleted.
    pub fn delete_note(&self, scope: &TenantScope, id: Uuid) -> StorageResult<Option<Note>> {
        let key = note_key(scope, id);
        let deleted = (&self.notes, &self.note_timeline).transaction(
            |(notes, timeline)| -> ConflictableTransactionResult<Option<Note>, StorageError> {
                let Some(bytes) = notes.remove(&key[..])? else {
                    return Ok(None);
                };
                let note: Note = decode(&bytes)?;
                timeline.remove(&timeline_key(&note)[..])?;
                Ok(Some(note))
            },
        )?;
        Ok(deleted)
    }
}

fn note_key(scope: &TenantScope, id: Uuid) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(&scope.key_prefix());
    key[16..].copy_from_slice(id.as_bytes());
    key
}

/// `tenant ‖ inverted created-at micros ‖ note`, so a forward prefix scan
/// yields newest first.
fn timeline_key(note: &Note) -> [u8; 40] {
    let micros = note.created_at.timestamp_micros().max(0) as u64;
    let mut key = [0u8; 40];
    key[..16].copy_from_slice(note.tenant_id.as_bytes());
    key[16..24].copy_from_slice(&(u64::MAX - micros).to_be_bytes());
    key[24..].copy_from_slice(note.id.as_bytes());
    key
}

fn get<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> StorageResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Record codecs for use inside transactions; failures abort.
fn decode(bytes: &[u8]) -> ConflictableTransactionResult<Note, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn encode(note: &Note) -> ConflictableTransactionResult<Vec<u8>, StorageError> {
    serde_json::to_vec(note).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn put<T: Serialize>(tree: &Tree, key: &[u8], value: &T) -> StorageResult<()> {
    tree.insert(key, serde_json::to_vec(value)?)?;
    Ok(())
}

/// Atomically bind `value` to `id` in a uniqueness index.
fn claim_unique(index: &Tree, kind: &'static str, value: &str, id: Uuid) -> StorageResult<()> {
    let claimed = index.compare_and_swap(
        value.as_bytes(),
        None as Option<&[u8]>,
        Some(&id.as_bytes()[..]),
    )?;
    claimed.map_err(|_| StorageError::Duplicate {
        kind,
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Principal;
    use crate::models::{Role, Subscription};

    fn member_of(storage: &Storage, tenant: &Tenant, email: &str) -> Principal {
        let user = User::new(email, "hash".into(), Role::Member, tenant.id);
        storage.create_user(&user).expect("create user");
        Principal::from(&user)
    }

    fn setup() -> (Storage, Principal, Principal) {
        let storage = Storage::temporary().expect("temporary storage");
        let acme = Tenant::new("Acme Corporation", "acme");
        let globex = Tenant::new("Globex Corporation", "globex");
        storage.create_tenant(&acme).unwrap();
        storage.create_tenant(&globex).unwrap();
        let alice = member_of(&storage, &acme, "user@acme.test");
        let bob = member_of(&storage, &globex, "user@globex.test");
        (storage, alice, bob)
    }

    #[test]
    fn test_notes_are_invisible_across_tenants() {
        let (storage, alice, bob) = setup();
        let note = storage
            .create_note(&alice.scope(), alice.user_id(), "Plan".into(), "Secret".into())
            .unwrap();

        assert_eq!(storage.note(&alice.scope(), note.id).unwrap(), Some(note.clone()));
        assert_eq!(storage.note(&bob.scope(), note.id).unwrap(), None);
        assert!(storage.list_notes(&bob.scope()).unwrap().is_empty());
        assert_eq!(storage.count_notes(&bob.scope()).unwrap(), 0);

        let hijack = NoteChanges {
            title: Some("pwned".into()),
            content: None,
        };
        assert_eq!(storage.update_note(&bob.scope(), note.id, hijack).unwrap(), None);
        assert_eq!(storage.delete_note(&bob.scope(), note.id).unwrap(), None);
        assert_eq!(storage.note(&alice.scope(), note.id).unwrap().unwrap().title, "Plan");
    }

    #[test]
    fn test_list_is_newest_first() {
        let (storage, alice, _) = setup();
        let scope = alice.scope();
        let mut ids = Vec::new();
        for i in 0..3 {
            let note = storage
                .create_note(&scope, alice.user_id(), format!("n{i}"), "body".into())
                .unwrap();
            ids.push(note.id);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let listed: Vec<Uuid> = storage.list_notes(&scope).unwrap().iter().map(|n| n.id).collect();
        ids.reverse();
        assert_eq!(listed, ids);
        assert_eq!(storage.count_notes(&scope).unwrap(), 3);
    }

    #[test]
    fn test_delete_clears_timeline() {
        let (storage, alice, _) = setup();
        let scope = alice.scope();
        let note = storage
            .create_note(&scope, alice.user_id(), "t".into(), "c".into())
            .unwrap();
        assert_eq!(storage.delete_note(&scope, note.id).unwrap(), Some(note));
        assert!(storage.list_notes(&scope).unwrap().is_empty());
        assert_eq!(storage.count_notes(&scope).unwrap(), 0);
        assert!(storage.note_timeline.is_empty());
    }

    #[test]
    fn test_update_keeps_tenant_and_author() {
        let (storage, alice, _) = setup();
        let scope = alice.scope();
        let note = storage
            .create_note(&scope, alice.user_id(), "t".into(), "c".into())
            .unwrap();
        let updated = storage
            .update_note(
                &scope,
                note.id,
                NoteChanges {
                    title: None,
                    content: Some("new body".into()),
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "t");
        assert_eq!(updated.content, "new body");
        assert_eq!(updated.tenant_id, note.tenant_id);
        assert_eq!(updated.author_id, note.author_id);
        assert_eq!(updated.created_at, note.created_at);
        assert!(updated.updated_at >= note.updated_at);
    }

    #[test]
    fn test_update_racing_delete_leaves_no_orphans() {
        let (storage, alice, _) = setup();
        let scope = alice.scope();
        for round in 0..300 {
            let note = storage
                .create_note(&scope, alice.user_id(), format!("r{round}"), "c".into())
                .unwrap();
            std::thread::scope(|s| {
                s.spawn(|| {
                    let changes = NoteChanges {
                        title: Some("edited".into()),
                        content: None,
                    };
                    storage.update_note(&scope, note.id, changes).unwrap();
                });
                s.spawn(|| {
                    assert!(storage.delete_note(&scope, note.id).unwrap().is_some());
                });
            });
            assert_eq!(storage.note(&scope, note.id).unwrap(), None);
        }
        assert_eq!(storage.count_notes(&scope).unwrap(), 0);
        assert_eq!(
            storage.count_notes(&scope).unwrap(),
            storage.list_notes(&scope).unwrap().len()
        );
    }

    #[test]
    fn test_concurrent_deletes_report_once() {
        let (storage, alice, _) = setup();
        let scope = alice.scope();
        let note = storage
            .create_note(&scope, alice.user_id(), "t".into(), "c".into())
            .unwrap();
        let removed = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| storage.delete_note(&scope, note.id).unwrap()))
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .count()
        });
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_slug_and_email_are_unique() {
        let (storage, _, _) = setup();
        let dup = Tenant::new("Acme Again", " ACME ");
        assert!(matches!(
            storage.create_tenant(&dup),
            Err(StorageError::Duplicate { kind: "tenant slug", .. })
        ));

        let acme = storage.tenant_by_slug("acme").unwrap().unwrap();
        let dup_user = User::new("User@Acme.test", "hash".into(), Role::Admin, acme.id);
        assert!(matches!(
            storage.create_user(&dup_user),
            Err(StorageError::Duplicate { kind: "user email", .. })
        ));
        assert!(storage.user_by_email("USER@acme.test").unwrap().is_some());
    }

    #[test]
    fn test_upgrade_persists_and_is_idempotent() {
        let (storage, alice, _) = setup();
        let scope = alice.scope();
        let once = storage.upgrade_tenant(&scope).unwrap().unwrap();
        let twice = storage.upgrade_tenant(&scope).unwrap().unwrap();
        assert_eq!(once.subscription, Subscription::Pro);
        assert_eq!(once, twice);
        assert_eq!(storage.tenant(&scope).unwrap(), Some(twice));
    }

    #[test]
    fn test_clear_removes_everything() {
        let (storage, alice, _) = setup();
        storage
            .create_note(&alice.scope(), alice.user_id(), "t".into(), "c".into())
            .unwrap();
        storage.clear().unwrap();
        assert!(storage.tenant_by_slug("acme").unwrap().is_none());
        assert!(storage.user_by_email("user@acme.test").unwrap().is_none());
        assert_eq!(storage.count_notes(&alice.scope()).unwrap(), 0);
    }
}

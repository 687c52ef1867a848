// Contact table storage
//
// Rows live under the `contact/` prefix keyed by the big-endian id so a
// prefix scan yields id-ascending order. Id allocation and the schema
// version live under `meta/`.

use crate::store::backend::{MemoryStorage, SledStorage, StorageBackend};
use crate::ContactBookError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Identifier assigned by the store. `0` means "not yet persisted".
pub type ContactId = u64;

pub const UNSAVED_ID: ContactId = 0;

/// Schema version written into fresh databases. No migrations exist.
pub const SCHEMA_VERSION: u32 = 1;

const TABLE_PREFIX: &[u8] = b"contact/";
const NEXT_ID_KEY: &[u8] = b"meta/next_id";
const SCHEMA_VERSION_KEY: &[u8] = b"meta/schema_version";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub name: String,
    pub phone_number: String,
    pub email: String,
}

impl Contact {
    /// A contact that has not been persisted yet.
    pub fn new(name: String, phone_number: String, email: String) -> Self {
        Self {
            id: UNSAVED_ID,
            name,
            phone_number,
            email,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id != UNSAVED_ID
    }

    pub fn fields(&self) -> ContactFields {
        ContactFields {
            name: self.name.clone(),
            phone_number: self.phone_number.clone(),
            email: self.email.clone(),
        }
    }

    /// Checks that every required field carries a value.
    pub fn validate(&self) -> Result<(), ContactBookError> {
        for (field, value) in [
            ("name", &self.name),
            ("phoneNumber", &self.phone_number),
            ("email", &self.email),
        ] {
            if value.trim().is_empty() {
                return Err(ContactBookError::Validation {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Contact data without an identity, as produced by extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactFields {
    pub name: String,
    pub phone_number: String,
    pub email: String,
}

impl From<ContactFields> for Contact {
    fn from(fields: ContactFields) -> Self {
        Contact::new(fields.name, fields.phone_number, fields.email)
    }
}

/// Repository over the contact table.
pub trait ContactStore: Send + Sync {
    /// Persists a new row. The incoming id is ignored; the stored contact
    /// with its freshly assigned id is returned.
    fn insert(&self, contact: &Contact) -> Result<Contact, ContactBookError>;
    /// Replaces all fields of an existing row. `Ok(false)` when no row has
    /// that id.
    fn update(&self, contact: &Contact) -> Result<bool, ContactBookError>;
    /// Removes the row with `contact.id`. `Ok(false)` when absent.
    fn delete(&self, contact: &Contact) -> Result<bool, ContactBookError>;
    /// Every stored row, id ascending.
    fn get_all_contacts(&self) -> Result<Vec<Contact>, ContactBookError>;
    fn get(&self, id: ContactId) -> Result<Option<Contact>, ContactBookError>;
    fn count(&self) -> Result<usize, ContactBookError>;
    fn flush(&self) -> Result<(), ContactBookError>;
}

/// `ContactStore` implemented over any `StorageBackend`.
#[derive(Clone)]
pub struct KvContactStore {
    backend: Arc<dyn StorageBackend>,
    // Serializes id allocation and the read-check-write in `update`.
    write_lock: Arc<Mutex<()>>,
}

impl KvContactStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Result<Self, ContactBookError> {
        let store = Self {
            backend,
            write_lock: Arc::new(Mutex::new(())),
        };
        store.check_schema()?;
        Ok(store)
    }

    /// Ephemeral store, mostly for tests.
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryStorage::new()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open or create the durable contact database under `storage_dir`.
    pub fn open(storage_dir: impl AsRef<Path>, database_name: &str) -> Result<Self, ContactBookError> {
        let path = storage_dir.as_ref().join(database_name);
        let backend = SledStorage::open(&path)?;
        Self::new(Arc::new(backend))
    }

    fn check_schema(&self) -> Result<(), ContactBookError> {
        match self.backend.get(SCHEMA_VERSION_KEY)? {
            Some(raw) => {
                let version = decode_u32(&raw)?;
                if version != SCHEMA_VERSION {
                    return Err(ContactBookError::Storage(format!(
                        "Unsupported schema version {} (expected {})",
                        version, SCHEMA_VERSION
                    )));
                }
                Ok(())
            }
            None => {
                let existing = self.backend.count_prefix(TABLE_PREFIX)?;
                if existing > 0 {
                    return Err(ContactBookError::Storage(
                        "Contact table present without schema version".to_string(),
                    ));
                }
                self.backend
                    .put(SCHEMA_VERSION_KEY, &SCHEMA_VERSION.to_be_bytes())?;
                tracing::info!("Initialized contact table (schema v{})", SCHEMA_VERSION);
                Ok(())
            }
        }
    }

    fn allocate_id(&self) -> Result<ContactId, ContactBookError> {
        let next = match self.backend.get(NEXT_ID_KEY)? {
            Some(raw) => decode_u64(&raw)?,
            None => 1,
        };
        // Persist the counter before the row so an id is never handed out twice.
        self.backend.put(NEXT_ID_KEY, &(next + 1).to_be_bytes())?;
        Ok(next)
    }

    fn put_row(&self, contact: &Contact) -> Result<(), ContactBookError> {
        let value = serde_json::to_vec(contact)
            .map_err(|e| ContactBookError::Internal(format!("Failed to encode contact: {}", e)))?;
        self.backend.put(&row_key(contact.id), &value)
    }
}

impl ContactStore for KvContactStore {
    fn insert(&self, contact: &Contact) -> Result<Contact, ContactBookError> {
        contact.validate()?;
        let _guard = self.write_lock.lock();

        let mut stored = contact.clone();
        stored.id = self.allocate_id()?;
        self.put_row(&stored)?;
        tracing::debug!("Inserted contact {}", stored.id);
        Ok(stored)
    }

    fn update(&self, contact: &Contact) -> Result<bool, ContactBookError> {
        contact.validate()?;
        if !contact.is_persisted() {
            return Ok(false);
        }
        let _guard = self.write_lock.lock();

        if self.backend.get(&row_key(contact.id))?.is_none() {
            tracing::debug!("Update skipped, no contact with id {}", contact.id);
            return Ok(false);
        }
        self.put_row(contact)?;
        Ok(true)
    }

    fn delete(&self, contact: &Contact) -> Result<bool, ContactBookError> {
        if !contact.is_persisted() {
            return Ok(false);
        }
        let _guard = self.write_lock.lock();
        let removed = self.backend.remove(&row_key(contact.id))?;
        if removed {
            tracing::debug!("Deleted contact {}", contact.id);
        }
        Ok(removed)
    }

    fn get_all_contacts(&self) -> Result<Vec<Contact>, ContactBookError> {
        let rows = self.backend.scan_prefix(TABLE_PREFIX)?;
        let mut contacts = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            contacts.push(decode_row(&value)?);
        }
        // Key order already matches, but the ordering contract should not hinge on the backend.
        contacts.sort_by_key(|c| c.id);
        Ok(contacts)
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, ContactBookError> {
        match self.backend.get(&row_key(id))? {
            Some(value) => Ok(Some(decode_row(&value)?)),
            None => Ok(None),
        }
    }

    fn count(&self) -> Result<usize, ContactBookError> {
        self.backend.count_prefix(TABLE_PREFIX)
    }

    fn flush(&self) -> Result<(), ContactBookError> {
        self.backend.flush()
    }
}

fn row_key(id: ContactId) -> Vec<u8> {
    let mut key = Vec::with_capacity(TABLE_PREFIX.len() + 8);
    key.extend_from_slice(TABLE_PREFIX);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn decode_row(value: &[u8]) -> Result<Contact, ContactBookError> {
    serde_json::from_slice(value)
        .map_err(|e| ContactBookError::Storage(format!("Corrupt contact row: {}", e)))
}

fn decode_u64(raw: &[u8]) -> Result<u64, ContactBookError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| ContactBookError::Storage("Corrupt id counter".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_u32(raw: &[u8]) -> Result<u32, ContactBookError> {
    let bytes: [u8; 4] = raw
        .try_into()
        .map_err(|_| ContactBookError::Storage("Corrupt schema version".to_string()))?;
    Ok(u32::from_be_bytes(bytes))
}

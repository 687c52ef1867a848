// Store module: contact persistence

pub mod backend;
pub mod contacts;

pub use backend::{MemoryStorage, SledStorage, StorageBackend};
pub use contacts::{Contact, ContactFields, ContactId, ContactStore, KvContactStore, UNSAVED_ID};

// Contact Book Core: contact list persistence and picker import
//
// The store owns the canonical contacts, the controller moves data between
// the store, the platform picker and the presenter, and the presenter holds
// whatever is currently on screen.

pub mod controller;
pub mod picker;
pub mod presenter;
pub mod store;
pub mod ui;

use thiserror::Error;

pub use controller::{ContactSyncController, ControllerBuilder, ImportOutcome, ImportState};
pub use picker::{ContactExtractor, ContactPicker, ExtractionError, PickOutcome, RecordRef};
pub use presenter::{ContactListObserver, ContactListPresenter};
pub use store::{
    Contact, ContactFields, ContactId, ContactStore, KvContactStore, MemoryStorage, SledStorage,
    StorageBackend, UNSAVED_ID,
};
pub use ui::{InlineDispatcher, LogNotifier, UiDispatcher, UiTask, UserNotifier};

/// Default database directory name, relative to the storage path.
pub const DEFAULT_DATABASE_NAME: &str = "contact-database";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContactBookError {
    #[error("Validation error: {field} is required")]
    Validation { field: String },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Could not read the selected contact: {0}")]
    Extraction(String),
    #[error("Row {index} out of range (row count {row_count})")]
    OutOfRange { index: i64, row_count: usize },
    #[error("Controller disposed")]
    Disposed,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ExtractionError> for ContactBookError {
    fn from(err: ExtractionError) -> Self {
        ContactBookError::Extraction(err.0)
    }
}

impl From<anyhow::Error> for ContactBookError {
    fn from(err: anyhow::Error) -> Self {
        ContactBookError::Internal(format!("{:#}", err))
    }
}

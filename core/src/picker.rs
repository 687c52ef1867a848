//! External contact picker and record extraction seams.
//!
//! The platform owns the picker UI and the contact database it reads from.
//! The core only sees an opaque [`RecordRef`] and asks an extractor to turn it
//! into [`ContactFields`].

use crate::store::ContactFields;
use async_trait::async_trait;
use thiserror::Error;

/// Opaque reference to a record chosen in the platform picker
/// (a content URI on Android, an identifier on iOS, a file path on desktop).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordRef(String);

impl RecordRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one picker launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Selected(RecordRef),
    /// The user backed out. A normal outcome, not an error.
    Cancelled,
    /// The platform could not complete the pick.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ExtractionError(pub String);

/// Launches the platform contact picker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContactPicker: Send + Sync {
    async fn launch(&self) -> PickOutcome;
}

/// Reads contact fields out of a picked record.
#[cfg_attr(test, mockall::automock)]
pub trait ContactExtractor: Send + Sync {
    fn extract(&self, record: &RecordRef) -> Result<ContactFields, ExtractionError>;
}

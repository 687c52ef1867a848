// Contact list presenter
//
// Holds the rows currently on screen. The list is replaced wholesale on every
// sync and never edited in place.

use crate::store::Contact;
use crate::ContactBookError;
use parking_lot::RwLock;
use std::sync::Arc;

/// Rendering-side listener for list replacement
#[cfg_attr(test, mockall::automock)]
pub trait ContactListObserver: Send + Sync {
    fn on_data_replaced(&self, row_count: usize);
}

#[derive(Default)]
pub struct ContactListPresenter {
    rows: RwLock<Arc<Vec<Contact>>>,
    observer: RwLock<Option<Arc<dyn ContactListObserver>>>,
}

impl ContactListPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn ContactListObserver>>) {
        *self.observer.write() = observer;
    }

    /// Replace the displayed list and notify the observer.
    pub fn set_contacts(&self, contacts: Vec<Contact>) {
        let row_count = contacts.len();
        *self.rows.write() = Arc::new(contacts);

        // Clone out so the observer may read back without holding our lock.
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_data_replaced(row_count);
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    pub fn row_at(&self, index: i64) -> Result<Contact, ContactBookError> {
        let rows = self.rows.read();
        usize::try_from(index)
            .ok()
            .and_then(|i| rows.get(i))
            .cloned()
            .ok_or(ContactBookError::OutOfRange {
                index,
                row_count: rows.len(),
            })
    }

    /// The rows as currently displayed. Later replacements do not affect it.
    pub fn snapshot(&self) -> Arc<Vec<Contact>> {
        self.rows.read().clone()
    }
}

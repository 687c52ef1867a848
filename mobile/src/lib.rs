// contactbook-mobile: Native mobile bindings for iOS and Android
//
// Exposes the contact screen to Kotlin/Swift via UniFFI. The platform
// implements `ContactPlatform` (picker launch, record extraction, list
// invalidation, toasts) and drives a `ContactScreen` from its lifecycle.

use async_trait::async_trait;
use contactbook_core::{
    Contact, ContactBookError, ContactExtractor, ContactFields, ContactListObserver, ContactPicker,
    ContactSyncController, ExtractionError, ImportState, KvContactStore, PickOutcome, RecordRef,
    UserNotifier, DEFAULT_DATABASE_NAME,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

uniffi::setup_scaffolding!();

// ============================================================================
// FFI TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct ContactRecord {
    pub id: u64,
    pub name: String,
    pub phone_number: String,
    pub email: String,
}

impl From<Contact> for ContactRecord {
    fn from(contact: Contact) -> Self {
        Self {
            id: contact.id,
            name: contact.name,
            phone_number: contact.phone_number,
            email: contact.email,
        }
    }
}

impl From<ContactRecord> for Contact {
    fn from(record: ContactRecord) -> Self {
        Contact {
            id: record.id,
            name: record.name,
            phone_number: record.phone_number,
            email: record.email,
        }
    }
}

/// Contact fields read from a platform record
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct ContactDraft {
    pub name: String,
    pub phone_number: String,
    pub email: String,
}

impl From<ContactDraft> for ContactFields {
    fn from(draft: ContactDraft) -> Self {
        ContactFields {
            name: draft.name,
            phone_number: draft.phone_number,
            email: draft.email,
        }
    }
}

/// What the platform picker returned
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum PickResult {
    Selected { record_ref: String },
    Cancelled,
    Failed { reason: String },
}

impl From<PickResult> for PickOutcome {
    fn from(result: PickResult) -> Self {
        match result {
            PickResult::Selected { record_ref } => PickOutcome::Selected(RecordRef::new(record_ref)),
            PickResult::Cancelled => PickOutcome::Cancelled,
            PickResult::Failed { reason } => PickOutcome::Failed(reason),
        }
    }
}

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum MobileError {
    #[error("{field} is required")]
    Validation { field: String },
    #[error("Storage error: {message}")]
    Storage { message: String },
    #[error("Extraction error: {message}")]
    Extraction { message: String },
    #[error("Row {index} out of range")]
    OutOfRange { index: i64 },
    #[error("Screen disposed")]
    Disposed,
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<ContactBookError> for MobileError {
    fn from(err: ContactBookError) -> Self {
        match err {
            ContactBookError::Validation { field } => MobileError::Validation { field },
            ContactBookError::Storage(message) => MobileError::Storage { message },
            ContactBookError::Extraction(message) => MobileError::Extraction { message },
            ContactBookError::OutOfRange { index, .. } => MobileError::OutOfRange { index },
            ContactBookError::Disposed => MobileError::Disposed,
            ContactBookError::Internal(message) => MobileError::Internal { message },
        }
    }
}

impl From<tokio::task::JoinError> for MobileError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            MobileError::Disposed
        } else {
            MobileError::Internal {
                message: err.to_string(),
            }
        }
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for MobileError {
    fn from(err: uniffi::UnexpectedUniFFICallbackError) -> Self {
        MobileError::Internal {
            message: err.reason,
        }
    }
}

// ============================================================================
// PLATFORM CALLBACKS
// ============================================================================

/// Callback interface implemented by Android/iOS.
///
/// Callbacks may arrive on background threads; hop to the main thread
/// before touching views.
#[uniffi::export(with_foreign)]
pub trait ContactPlatform: Send + Sync {
    /// Open the system contact picker. Report the result with
    /// `ContactScreen::deliver_pick_result`.
    fn launch_picker(&self);
    fn extract(&self, record_ref: String) -> Result<ContactDraft, MobileError>;
    /// The displayed list was replaced; re-read rows and redraw.
    ///
    /// Runs on a runtime worker. Do not call `add_contact`, `update_contact`
    /// or `delete_contact` synchronously from here; post to the main thread
    /// first. Such calls fail with `MobileError::Internal`.
    fn on_contacts_replaced(&self, row_count: u64);
    fn show_message(&self, message: String);
}

type PendingPick = Arc<Mutex<Option<oneshot::Sender<PickOutcome>>>>;

/// Turns the launch-then-callback platform picker into an awaitable one.
struct PlatformPicker {
    platform: Arc<dyn ContactPlatform>,
    pending: PendingPick,
}

#[async_trait]
impl ContactPicker for PlatformPicker {
    async fn launch(&self) -> PickOutcome {
        let (tx, rx) = oneshot::channel();
        let stale = self.pending.lock().replace(tx);
        if stale.is_some() {
            tracing::warn!("Replacing an unanswered picker request");
        }

        self.platform.launch_picker();
        // A dropped sender means the screen went away mid-pick.
        rx.await.unwrap_or(PickOutcome::Cancelled)
    }
}

struct PlatformExtractor {
    platform: Arc<dyn ContactPlatform>,
}

impl ContactExtractor for PlatformExtractor {
    fn extract(&self, record: &RecordRef) -> Result<ContactFields, ExtractionError> {
        self.platform
            .extract(record.as_str().to_string())
            .map(ContactFields::from)
            .map_err(|e| ExtractionError(e.to_string()))
    }
}

struct PlatformObserver {
    platform: Arc<dyn ContactPlatform>,
}

impl ContactListObserver for PlatformObserver {
    fn on_data_replaced(&self, row_count: usize) {
        self.platform.on_contacts_replaced(row_count as u64);
    }
}

struct PlatformNotifier {
    platform: Arc<dyn ContactPlatform>,
}

impl UserNotifier for PlatformNotifier {
    fn notify_error(&self, error: &ContactBookError) {
        self.platform.show_message(error.to_string());
    }
}

// ============================================================================
// RUNTIME
// ============================================================================

// Global runtime for store work. Platform callback threads are not in a tokio context.
static GLOBAL_RT: parking_lot::RwLock<Option<tokio::runtime::Runtime>> =
    parking_lot::RwLock::new(None);

fn get_global_runtime() -> Result<tokio::runtime::Handle, MobileError> {
    let rt_read = GLOBAL_RT.read();
    if let Some(rt) = &*rt_read {
        return Ok(rt.handle().clone());
    }
    drop(rt_read);

    let mut rt_write = GLOBAL_RT.write();
    if let Some(rt) = &*rt_write {
        return Ok(rt.handle().clone());
    }

    tracing::info!("Initializing global Tokio runtime for contact storage...");
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(|e| MobileError::Internal {
            message: format!("Failed to create runtime: {}", e),
        })?;
    let handle = rt.handle().clone();
    *rt_write = Some(rt);
    Ok(handle)
}

/// Install a tracing subscriber once per process. Later calls are ignored.
#[uniffi::export]
pub fn init_logging(filter: String) {
    let result = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .try_init();
    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

/// `block_on` panics when the caller is already inside a runtime, which is
/// the case for every platform callback.
fn ensure_blocking_allowed() -> Result<(), MobileError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(MobileError::Internal {
            message: "Contact writes cannot block inside a platform callback".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// CONTACT SCREEN
// ============================================================================

/// The contact list screen as seen from platform code.
#[derive(uniffi::Object)]
pub struct ContactScreen {
    controller: ContactSyncController,
    pending_pick: PendingPick,
    runtime: tokio::runtime::Handle,
}

#[uniffi::export]
impl ContactScreen {
    /// Open (or create) the contact database under `storage_path`.
    #[uniffi::constructor]
    pub fn new(
        storage_path: String,
        platform: Arc<dyn ContactPlatform>,
    ) -> Result<Arc<Self>, MobileError> {
        let runtime = get_global_runtime()?;
        let store = KvContactStore::open(&storage_path, DEFAULT_DATABASE_NAME)?;
        let pending_pick: PendingPick = Arc::new(Mutex::new(None));

        let controller = ContactSyncController::builder(
            Arc::new(store),
            Arc::new(PlatformPicker {
                platform: Arc::clone(&platform),
                pending: Arc::clone(&pending_pick),
            }),
            Arc::new(PlatformExtractor {
                platform: Arc::clone(&platform),
            }),
        )
        .notifier(Arc::new(PlatformNotifier {
            platform: Arc::clone(&platform),
        }))
        .runtime(runtime.clone())
        .build()?;
        controller
            .presenter()
            .set_observer(Some(Arc::new(PlatformObserver { platform })));

        tracing::info!("ContactScreen opened at {}", storage_path);
        Ok(Arc::new(Self {
            controller,
            pending_pick,
            runtime,
        }))
    }

    /// Screen start: load contacts in the background.
    pub fn on_start(&self) {
        drop(self.controller.refresh());
    }

    /// Import button pressed.
    pub fn on_import_pressed(&self) {
        drop(self.controller.import_contact());
    }

    /// Hand the picker result back. Results for a picker the platform opened
    /// on its own go straight to the import flow.
    pub fn deliver_pick_result(&self, result: PickResult) {
        let outcome = PickOutcome::from(result);
        let waiting = self.pending_pick.lock().take();
        match waiting {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::debug!("Picker result arrived after the import was abandoned");
                }
            }
            None => drop(self.controller.on_import_result(outcome)),
        }
    }

    pub fn is_importing(&self) -> bool {
        self.controller.import_state() != ImportState::Idle
    }

    pub fn add_contact(&self, draft: ContactDraft) -> Result<ContactRecord, MobileError> {
        ensure_blocking_allowed()?;
        let handle = self.controller.add_contact(draft.into());
        let contact = self.runtime.block_on(handle)??;
        Ok(contact.into())
    }

    pub fn update_contact(&self, record: ContactRecord) -> Result<bool, MobileError> {
        ensure_blocking_allowed()?;
        let handle = self.controller.update_contact(record.into());
        Ok(self.runtime.block_on(handle)??)
    }

    pub fn delete_contact(&self, id: u64) -> Result<bool, MobileError> {
        ensure_blocking_allowed()?;
        let target = Contact {
            id,
            name: String::new(),
            phone_number: String::new(),
            email: String::new(),
        };
        let handle = self.controller.delete_contact(target);
        Ok(self.runtime.block_on(handle)??)
    }

    pub fn row_count(&self) -> u64 {
        self.controller.row_count() as u64
    }

    pub fn row_at(&self, index: i64) -> Result<ContactRecord, MobileError> {
        Ok(self.controller.row_at(index)?.into())
    }

    pub fn rows(&self) -> Vec<ContactRecord> {
        self.controller
            .presenter()
            .snapshot()
            .iter()
            .cloned()
            .map(ContactRecord::from)
            .collect()
    }

    /// Screen destroyed: abort background work and drop any pending pick.
    pub fn dispose(&self) {
        self.pending_pick.lock().take();
        self.controller.dispose();
    }
}

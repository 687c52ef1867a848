//! Contact sync controller
//!
//! Mediates between the store, the platform picker and the presenter. Store
//! and extraction calls run on tokio's blocking pool; presenter updates and
//! user notifications are posted through the [`UiDispatcher`].
//!
//! Every background task is registered with the controller. Disposing the
//! controller aborts them, and any result that still arrives afterwards is
//! dropped instead of reaching the presenter.

use crate::picker::{ContactExtractor, ContactPicker, PickOutcome, RecordRef};
use crate::presenter::ContactListPresenter;
use crate::store::{Contact, ContactFields, ContactStore};
use crate::ui::{InlineDispatcher, LogNotifier, UiDispatcher, UserNotifier};
use crate::ContactBookError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};

// ============================================================================
// IMPORT STATE MACHINE
// ============================================================================

/// Progress of the current import attempt.
///
/// `Idle → PickerLaunched → {Imported → Persisted → Refreshed} | Cancelled`,
/// and back to `Idle` once the attempt ends, however it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    PickerLaunched,
    Imported,
    Persisted,
    Refreshed,
    Cancelled,
}

impl std::fmt::Display for ImportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::PickerLaunched => write!(f, "PickerLaunched"),
            Self::Imported => write!(f, "Imported"),
            Self::Persisted => write!(f, "Persisted"),
            Self::Refreshed => write!(f, "Refreshed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// How an import attempt finished when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported(Contact),
    Cancelled,
    PickFailed(String),
    /// Another import was already in flight; this request was ignored.
    Busy,
}

/// Holds the import slot for one attempt and releases it on drop, including
/// when the owning task is aborted.
struct ImportAttempt {
    inner: Arc<ControllerInner>,
}

impl ImportAttempt {
    fn begin(inner: &Arc<ControllerInner>) -> Option<Self> {
        let mut state = inner.import_state.lock();
        if *state != ImportState::Idle {
            return None;
        }
        *state = ImportState::PickerLaunched;
        Some(Self {
            inner: Arc::clone(inner),
        })
    }

    fn advance(&self, next: ImportState) {
        let mut state = self.inner.import_state.lock();
        tracing::debug!("Import state {} -> {}", *state, next);
        *state = next;
    }
}

impl Drop for ImportAttempt {
    fn drop(&mut self) {
        *self.inner.import_state.lock() = ImportState::Idle;
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct ContactSyncController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    store: Arc<dyn ContactStore>,
    picker: Arc<dyn ContactPicker>,
    extractor: Arc<dyn ContactExtractor>,
    presenter: Arc<ContactListPresenter>,
    dispatcher: Arc<dyn UiDispatcher>,
    notifier: Arc<dyn UserNotifier>,
    runtime: Handle,
    alive: AtomicBool,
    /// `None` marks a task whose spawn is still in progress.
    tasks: Mutex<HashMap<u64, Option<AbortHandle>>>,
    next_task_id: AtomicU64,
    import_state: Mutex<ImportState>,
}

pub struct ControllerBuilder {
    store: Arc<dyn ContactStore>,
    picker: Arc<dyn ContactPicker>,
    extractor: Arc<dyn ContactExtractor>,
    presenter: Option<Arc<ContactListPresenter>>,
    dispatcher: Option<Arc<dyn UiDispatcher>>,
    notifier: Option<Arc<dyn UserNotifier>>,
    runtime: Option<Handle>,
}

impl ControllerBuilder {
    pub fn presenter(mut self, presenter: Arc<ContactListPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn UiDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Without an explicit runtime the builder must be called from inside one.
    pub fn build(self) -> Result<ContactSyncController, ContactBookError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| {
                ContactBookError::Internal("No tokio runtime available".to_string())
            })?,
        };

        Ok(ContactSyncController {
            inner: Arc::new(ControllerInner {
                store: self.store,
                picker: self.picker,
                extractor: self.extractor,
                presenter: self.presenter.unwrap_or_default(),
                dispatcher: self.dispatcher.unwrap_or_else(|| Arc::new(InlineDispatcher)),
                notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
                runtime,
                alive: AtomicBool::new(true),
                tasks: Mutex::new(HashMap::new()),
                next_task_id: AtomicU64::new(0),
                import_state: Mutex::new(ImportState::Idle),
            }),
        })
    }
}

impl ContactSyncController {
    pub fn builder(
        store: Arc<dyn ContactStore>,
        picker: Arc<dyn ContactPicker>,
        extractor: Arc<dyn ContactExtractor>,
    ) -> ControllerBuilder {
        ControllerBuilder {
            store,
            picker,
            extractor,
            presenter: None,
            dispatcher: None,
            notifier: None,
            runtime: None,
        }
    }

    /// Reload every contact and publish the list. Resolves to the number of
    /// rows published.
    pub fn refresh(&self) -> JoinHandle<Result<usize, ContactBookError>> {
        let inner = Arc::clone(&self.inner);
        self.inner.spawn(async move {
            let result = Arc::clone(&inner).reload().await;
            if let Err(ref e) = result {
                inner.report(e);
            }
            result
        })
    }

    /// Launch the picker and import whatever the user selects.
    pub fn import_contact(&self) -> JoinHandle<Result<ImportOutcome, ContactBookError>> {
        let Some(attempt) = ImportAttempt::begin(&self.inner) else {
            tracing::warn!("Import already in progress, ignoring request");
            return self.inner.runtime.spawn(async { Ok(ImportOutcome::Busy) });
        };

        tracing::info!("Launching contact picker");
        let inner = Arc::clone(&self.inner);
        self.inner.spawn(async move {
            let outcome = inner.picker.launch().await;
            inner.complete_import(outcome, attempt).await
        })
    }

    /// Feed a picker result delivered outside of [`import_contact`](Self::import_contact),
    /// for hosts that launch the picker themselves.
    pub fn on_import_result(
        &self,
        outcome: PickOutcome,
    ) -> JoinHandle<Result<ImportOutcome, ContactBookError>> {
        let Some(attempt) = ImportAttempt::begin(&self.inner) else {
            tracing::warn!("Import already in progress, ignoring picker result");
            return self.inner.runtime.spawn(async { Ok(ImportOutcome::Busy) });
        };

        let inner = Arc::clone(&self.inner);
        self.inner
            .spawn(async move { inner.complete_import(outcome, attempt).await })
    }

    pub fn add_contact(&self, fields: ContactFields) -> JoinHandle<Result<Contact, ContactBookError>> {
        let contact = Contact::from(fields);
        self.write_then_refresh(move |store| store.insert(&contact))
    }

    pub fn update_contact(&self, contact: Contact) -> JoinHandle<Result<bool, ContactBookError>> {
        self.write_then_refresh(move |store| store.update(&contact))
    }

    pub fn delete_contact(&self, contact: Contact) -> JoinHandle<Result<bool, ContactBookError>> {
        self.write_then_refresh(move |store| store.delete(&contact))
    }

    fn write_then_refresh<T, F>(&self, op: F) -> JoinHandle<Result<T, ContactBookError>>
    where
        F: FnOnce(&dyn ContactStore) -> Result<T, ContactBookError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.spawn(async move {
            let result = Arc::clone(&inner).write_then_reload(op).await;
            if let Err(ref e) = result {
                inner.report(e);
            }
            result
        })
    }

    /// Abort in-flight work without disposing. Returns how many tasks were aborted.
    pub fn cancel_pending(&self) -> usize {
        self.inner.abort_all()
    }

    /// Stop all background work for good. Idempotent.
    pub fn dispose(&self) {
        if !self.inner.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        let aborted = self.inner.abort_all();
        tracing::info!("Contact controller disposed ({} tasks aborted)", aborted);
    }

    pub fn is_disposed(&self) -> bool {
        !self.inner.is_alive()
    }

    pub fn import_state(&self) -> ImportState {
        *self.inner.import_state.lock()
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn presenter(&self) -> Arc<ContactListPresenter> {
        Arc::clone(&self.inner.presenter)
    }

    pub fn row_count(&self) -> usize {
        self.inner.presenter.row_count()
    }

    pub fn row_at(&self, index: i64) -> Result<Contact, ContactBookError> {
        self.inner.presenter.row_at(index)
    }
}

impl Drop for ContactSyncController {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ============================================================================
// TASK OWNERSHIP
// ============================================================================

/// Removes a finished (or aborted) task from the registry.
struct TaskRegistration {
    inner: Arc<ControllerInner>,
    id: u64,
}

impl Drop for TaskRegistration {
    fn drop(&mut self) {
        self.inner.tasks.lock().remove(&self.id);
    }
}

impl ControllerInner {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn spawn<F, T>(self: &Arc<Self>, fut: F) -> JoinHandle<Result<T, ContactBookError>>
    where
        F: Future<Output = Result<T, ContactBookError>> + Send + 'static,
        T: Send + 'static,
    {
        // Reserve the slot first. The registry lock is never held across
        // `spawn`, which drops the future in place when the runtime is gone.
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let reserved = {
            let mut tasks = self.tasks.lock();
            // Checked under the lock so dispose cannot drain in between.
            let alive = self.is_alive();
            if alive {
                tasks.insert(id, None);
            }
            alive
        };
        if !reserved {
            return self.runtime.spawn(async { Err(ContactBookError::Disposed) });
        }

        let registration = TaskRegistration {
            inner: Arc::clone(self),
            id,
        };
        let handle = self.runtime.spawn(async move {
            let _registration = registration;
            fut.await
        });

        // A missing slot means the task already finished, or dispose drained
        // the registry while we were spawning.
        let registered = match self.tasks.lock().get_mut(&id) {
            Some(slot) => {
                *slot = Some(handle.abort_handle());
                true
            }
            None => false,
        };
        if !registered && !self.is_alive() {
            handle.abort();
        }
        handle
    }

    fn abort_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.tasks.lock());
        let count = drained.len();
        for handle in drained.into_values().flatten() {
            handle.abort();
        }
        count
    }

    async fn reload(self: Arc<Self>) -> Result<usize, ContactBookError> {
        let store = Arc::clone(&self.store);
        let contacts = run_blocking(move || store.get_all_contacts()).await?;
        self.publish(contacts)
    }

    async fn write_then_reload<T, F>(self: Arc<Self>, op: F) -> Result<T, ContactBookError>
    where
        F: FnOnce(&dyn ContactStore) -> Result<T, ContactBookError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let value = run_blocking(move || op(store.as_ref())).await?;
        self.reload().await?;
        Ok(value)
    }

    fn publish(self: &Arc<Self>, contacts: Vec<Contact>) -> Result<usize, ContactBookError> {
        if !self.is_alive() {
            return Err(ContactBookError::Disposed);
        }

        let row_count = contacts.len();
        let inner = Arc::clone(self);
        self.dispatcher.dispatch(Box::new(move || {
            // Disposal may have happened while this was queued.
            if inner.is_alive() {
                inner.presenter.set_contacts(contacts);
            } else {
                tracing::debug!("Dropping contact list published after disposal");
            }
        }));
        tracing::info!("Published {} contacts", row_count);
        Ok(row_count)
    }

    async fn complete_import(
        self: &Arc<Self>,
        outcome: PickOutcome,
        attempt: ImportAttempt,
    ) -> Result<ImportOutcome, ContactBookError> {
        let record = match outcome {
            PickOutcome::Selected(record) => record,
            PickOutcome::Cancelled => {
                attempt.advance(ImportState::Cancelled);
                tracing::info!("Contact picker cancelled");
                return Ok(ImportOutcome::Cancelled);
            }
            PickOutcome::Failed(reason) => {
                attempt.advance(ImportState::Cancelled);
                tracing::warn!("Contact picker failed: {}", reason);
                return Ok(ImportOutcome::PickFailed(reason));
            }
        };

        let result = self.import_record(record, &attempt).await;
        match result {
            Ok(contact) => {
                tracing::info!("Imported contact {}", contact.id);
                Ok(ImportOutcome::Imported(contact))
            }
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        }
    }

    async fn import_record(
        self: &Arc<Self>,
        record: RecordRef,
        attempt: &ImportAttempt,
    ) -> Result<Contact, ContactBookError> {
        if !self.is_alive() {
            return Err(ContactBookError::Disposed);
        }

        let extractor = Arc::clone(&self.extractor);
        let fields = run_blocking(move || {
            extractor
                .extract(&record)
                .map_err(ContactBookError::from)
        })
        .await?;
        attempt.advance(ImportState::Imported);

        let store = Arc::clone(&self.store);
        let contact = Contact::from(fields);
        let stored = run_blocking(move || store.insert(&contact)).await?;
        attempt.advance(ImportState::Persisted);

        Arc::clone(self).reload().await?;
        attempt.advance(ImportState::Refreshed);
        Ok(stored)
    }

    /// The single place where failures turn into user-visible messages.
    fn report(self: &Arc<Self>, error: &ContactBookError) {
        if matches!(error, ContactBookError::Disposed) || !self.is_alive() {
            return;
        }
        tracing::error!("{}", error);

        let notifier = Arc::clone(&self.notifier);
        let error = error.clone();
        self.dispatcher
            .dispatch(Box::new(move || notifier.notify_error(&error)));
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ContactBookError>
where
    F: FnOnce() -> Result<T, ContactBookError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ContactBookError::Internal(format!("Background task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::{ExtractionError, MockContactExtractor, MockContactPicker};
    use crate::store::KvContactStore;
    use crate::ui::{MockUserNotifier, UiTask};
    use async_trait::async_trait;
    use std::time::Duration;

    struct PendingPicker;

    #[async_trait]
    impl ContactPicker for PendingPicker {
        async fn launch(&self) -> PickOutcome {
            futures::future::pending::<()>().await;
            PickOutcome::Cancelled
        }
    }

    /// Queues UI work until the test drains it.
    #[derive(Default)]
    struct QueueDispatcher {
        queue: Mutex<Vec<UiTask>>,
    }

    impl QueueDispatcher {
        fn drain(&self) {
            let tasks = std::mem::take(&mut *self.queue.lock());
            for task in tasks {
                task();
            }
        }
    }

    impl UiDispatcher for QueueDispatcher {
        fn dispatch(&self, task: UiTask) {
            self.queue.lock().push(task);
        }
    }

    fn john() -> Contact {
        Contact::new(
            "John Doe".to_string(),
            "123-456-7890".to_string(),
            "john@example.com".to_string(),
        )
    }

    /// Reads from a real store but refuses every insert.
    struct InsertRejectingStore {
        inner: KvContactStore,
    }

    impl ContactStore for InsertRejectingStore {
        fn insert(&self, _: &Contact) -> Result<Contact, ContactBookError> {
            Err(ContactBookError::Storage("constraint violation".to_string()))
        }
        fn update(&self, contact: &Contact) -> Result<bool, ContactBookError> {
            self.inner.update(contact)
        }
        fn delete(&self, contact: &Contact) -> Result<bool, ContactBookError> {
            self.inner.delete(contact)
        }
        fn get_all_contacts(&self) -> Result<Vec<Contact>, ContactBookError> {
            self.inner.get_all_contacts()
        }
        fn get(&self, id: u64) -> Result<Option<Contact>, ContactBookError> {
            self.inner.get(id)
        }
        fn count(&self) -> Result<usize, ContactBookError> {
            self.inner.count()
        }
        fn flush(&self) -> Result<(), ContactBookError> {
            self.inner.flush()
        }
    }

    fn no_extraction() -> MockContactExtractor {
        let mut extractor = MockContactExtractor::new();
        extractor.expect_extract().never();
        extractor
    }

    #[tokio::test]
    async fn test_cancelled_pick_leaves_list_unchanged() {
        let store = Arc::new(KvContactStore::in_memory());
        store.insert(&john()).unwrap();

        let mut picker = MockContactPicker::new();
        picker
            .expect_launch()
            .times(1)
            .returning(|| PickOutcome::Cancelled);
        let mut notifier = MockUserNotifier::new();
        notifier.expect_notify_error().never();

        let controller =
            ContactSyncController::builder(store.clone(), Arc::new(picker), Arc::new(no_extraction()))
                .notifier(Arc::new(notifier))
                .build()
                .unwrap();

        controller.refresh().await.unwrap().unwrap();
        let before = controller.presenter().snapshot();

        let outcome = controller.import_contact().await.unwrap().unwrap();
        assert_eq!(outcome, ImportOutcome::Cancelled);
        assert_eq!(*controller.presenter().snapshot(), *before);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(controller.import_state(), ImportState::Idle);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_reported_and_nothing_inserted() {
        let store = Arc::new(KvContactStore::in_memory());
        store.insert(&john()).unwrap();

        let mut picker = MockContactPicker::new();
        picker
            .expect_launch()
            .returning(|| PickOutcome::Selected(RecordRef::new("content://contacts/7")));
        let mut extractor = MockContactExtractor::new();
        extractor
            .expect_extract()
            .times(1)
            .returning(|_| Err(ExtractionError("record has no email".to_string())));
        let mut notifier = MockUserNotifier::new();
        notifier
            .expect_notify_error()
            .withf(|e| matches!(e, ContactBookError::Extraction(_)))
            .times(1)
            .return_const(());

        let controller = ContactSyncController::builder(store.clone(), Arc::new(picker), Arc::new(extractor))
            .notifier(Arc::new(notifier))
            .build()
            .unwrap();
        controller.refresh().await.unwrap().unwrap();

        let result = controller.import_contact().await.unwrap();
        assert!(matches!(result, Err(ContactBookError::Extraction(_))));
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(controller.row_count(), 1);
        assert_eq!(controller.import_state(), ImportState::Idle);
    }

    #[tokio::test]
    async fn test_selected_pick_inserts_and_refreshes() {
        let store = Arc::new(KvContactStore::in_memory());
        let mut picker = MockContactPicker::new();
        picker
            .expect_launch()
            .returning(|| PickOutcome::Selected(RecordRef::new("content://contacts/1")));
        let mut extractor = MockContactExtractor::new();
        extractor
            .expect_extract()
            .withf(|r| r.as_str() == "content://contacts/1")
            .returning(|_| Ok(john().fields()));

        let controller = ContactSyncController::builder(store, Arc::new(picker), Arc::new(extractor))
            .build()
            .unwrap();

        let outcome = controller.import_contact().await.unwrap().unwrap();
        let ImportOutcome::Imported(stored) = outcome else {
            panic!("expected an imported contact");
        };
        assert!(stored.is_persisted());
        assert_eq!(controller.row_count(), 1);
        assert_eq!(controller.row_at(0).unwrap(), stored);
    }

    #[tokio::test]
    async fn test_failed_pick_changes_nothing() {
        let store = Arc::new(KvContactStore::in_memory());
        let mut picker = MockContactPicker::new();
        picker
            .expect_launch()
            .returning(|| PickOutcome::Failed("permission denied".to_string()));

        let controller = ContactSyncController::builder(store.clone(), Arc::new(picker), Arc::new(no_extraction()))
            .build()
            .unwrap();

        let outcome = controller.import_contact().await.unwrap().unwrap();
        assert_eq!(outcome, ImportOutcome::PickFailed("permission denied".to_string()));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_press_while_picking_is_busy() {
        let store = Arc::new(KvContactStore::in_memory());
        let controller =
            ContactSyncController::builder(store, Arc::new(PendingPicker), Arc::new(no_extraction()))
                .build()
                .unwrap();

        let first = controller.import_contact();
        assert_eq!(controller.import_state(), ImportState::PickerLaunched);

        let second = controller.import_contact().await.unwrap().unwrap();
        assert_eq!(second, ImportOutcome::Busy);

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(controller.import_state(), ImportState::Idle);
    }

    #[tokio::test]
    async fn test_dispose_aborts_in_flight_import() {
        let store = Arc::new(KvContactStore::in_memory());
        let controller =
            ContactSyncController::builder(store, Arc::new(PendingPicker), Arc::new(no_extraction()))
                .build()
                .unwrap();

        let handle = controller.import_contact();
        tokio::task::yield_now().await;
        assert_eq!(controller.pending_tasks(), 1);

        controller.dispose();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(controller.pending_tasks(), 0);
        assert_eq!(controller.import_state(), ImportState::Idle);
        assert!(controller.is_disposed());
    }

    #[tokio::test]
    async fn test_late_publish_after_dispose_is_dropped() {
        let store = Arc::new(KvContactStore::in_memory());
        store.insert(&john()).unwrap();
        let dispatcher = Arc::new(QueueDispatcher::default());

        let controller = ContactSyncController::builder(
            store,
            Arc::new(MockContactPicker::new()),
            Arc::new(no_extraction()),
        )
        .dispatcher(dispatcher.clone())
        .build()
        .unwrap();

        assert_eq!(controller.refresh().await.unwrap().unwrap(), 1);
        controller.dispose();
        dispatcher.drain();

        assert_eq!(controller.row_count(), 0);
        let after = controller.refresh().await.unwrap();
        assert_eq!(after, Err(ContactBookError::Disposed));
    }

    #[tokio::test]
    async fn test_storage_failure_on_refresh_is_reported() {
        struct BrokenStore;

        impl ContactStore for BrokenStore {
            fn insert(&self, _: &Contact) -> Result<Contact, ContactBookError> {
                Err(ContactBookError::Storage("disk full".to_string()))
            }
            fn update(&self, _: &Contact) -> Result<bool, ContactBookError> {
                Err(ContactBookError::Storage("disk full".to_string()))
            }
            fn delete(&self, _: &Contact) -> Result<bool, ContactBookError> {
                Err(ContactBookError::Storage("disk full".to_string()))
            }
            fn get_all_contacts(&self) -> Result<Vec<Contact>, ContactBookError> {
                Err(ContactBookError::Storage("io error".to_string()))
            }
            fn get(&self, _: u64) -> Result<Option<Contact>, ContactBookError> {
                Ok(None)
            }
            fn count(&self) -> Result<usize, ContactBookError> {
                Ok(0)
            }
            fn flush(&self) -> Result<(), ContactBookError> {
                Ok(())
            }
        }

        let mut notifier = MockUserNotifier::new();
        notifier
            .expect_notify_error()
            .withf(|e| matches!(e, ContactBookError::Storage(_)))
            .times(2)
            .return_const(());

        let controller = ContactSyncController::builder(
            Arc::new(BrokenStore),
            Arc::new(MockContactPicker::new()),
            Arc::new(no_extraction()),
        )
        .notifier(Arc::new(notifier))
        .build()
        .unwrap();

        assert!(controller.refresh().await.unwrap().is_err());
        assert!(controller.add_contact(john().fields()).await.unwrap().is_err());
        assert_eq!(controller.row_count(), 0);
    }

    #[tokio::test]
    async fn test_crud_passthroughs_refresh_the_list() {
        let store = Arc::new(KvContactStore::in_memory());
        let controller = ContactSyncController::builder(
            store,
            Arc::new(MockContactPicker::new()),
            Arc::new(no_extraction()),
        )
        .build()
        .unwrap();

        let mut stored = controller.add_contact(john().fields()).await.unwrap().unwrap();
        assert_eq!(controller.row_count(), 1);

        stored.email = "doe@example.com".to_string();
        assert!(controller.update_contact(stored.clone()).await.unwrap().unwrap());
        assert_eq!(controller.row_at(0).unwrap().email, "doe@example.com");

        assert!(controller.delete_contact(stored).await.unwrap().unwrap());
        assert_eq!(controller.row_count(), 0);
    }

    #[tokio::test]
    async fn test_insert_failure_during_import_is_reported() {
        let inner = KvContactStore::in_memory();
        inner.insert(&john()).unwrap();
        let store = Arc::new(InsertRejectingStore { inner });

        let mut picker = MockContactPicker::new();
        picker
            .expect_launch()
            .returning(|| PickOutcome::Selected(RecordRef::new("content://contacts/2")));
        let mut extractor = MockContactExtractor::new();
        extractor.expect_extract().times(1).returning(|_| {
            Ok(ContactFields {
                name: "Jane Roe".to_string(),
                phone_number: "555-0100".to_string(),
                email: "jane@example.com".to_string(),
            })
        });
        let mut notifier = MockUserNotifier::new();
        notifier
            .expect_notify_error()
            .withf(|e| matches!(e, ContactBookError::Storage(_)))
            .times(1)
            .return_const(());

        let controller = ContactSyncController::builder(store.clone(), Arc::new(picker), Arc::new(extractor))
            .notifier(Arc::new(notifier))
            .build()
            .unwrap();
        controller.refresh().await.unwrap().unwrap();
        let before = controller.presenter().snapshot();

        let result = controller.import_contact().await.unwrap();
        assert!(matches!(result, Err(ContactBookError::Storage(_))));
        assert_eq!(*controller.presenter().snapshot(), *before);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(controller.import_state(), ImportState::Idle);
    }

    #[test]
    fn test_refresh_after_runtime_shutdown_returns() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let controller = ContactSyncController::builder(
            Arc::new(KvContactStore::in_memory()),
            Arc::new(MockContactPicker::new()),
            Arc::new(no_extraction()),
        )
        .runtime(rt.handle().clone())
        .build()
        .unwrap();
        rt.shutdown_timeout(Duration::from_secs(1));

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = futures::executor::block_on(controller.refresh());
            let cancelled = result.map(|_| ()).map_err(|e| e.is_cancelled());
            tx.send((cancelled, controller.pending_tasks())).unwrap();
        });

        let (cancelled, pending) = rx
            .recv_timeout(Duration::from_secs(3))
            .expect("refresh did not return after runtime shutdown");
        assert_eq!(cancelled, Err(true));
        assert_eq!(pending, 0);
    }

    #[test]
    fn test_dispose_racing_spawn_leaves_no_task_behind() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        for _ in 0..200 {
            let controller = ContactSyncController::builder(
                Arc::new(KvContactStore::in_memory()),
                Arc::new(MockContactPicker::new()),
                Arc::new(no_extraction()),
            )
            .runtime(rt.handle().clone())
            .build()
            .unwrap();

            let inner = Arc::clone(&controller.inner);
            let spawner = std::thread::spawn(move || {
                inner.spawn(async {
                    futures::future::pending::<()>().await;
                    Ok(())
                })
            });
            controller.dispose();
            let handle = spawner.join().unwrap();

            let joined = rt
                .block_on(async { tokio::time::timeout(Duration::from_secs(2), handle).await })
                .expect("task outlived dispose");
            match joined {
                Err(e) => assert!(e.is_cancelled()),
                Ok(result) => assert_eq!(result, Err(ContactBookError::Disposed)),
            }
            assert_eq!(controller.pending_tasks(), 0);
        }
    }
}

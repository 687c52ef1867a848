// Interactive-context hooks supplied by the host shell

use crate::ContactBookError;

pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// Posts work onto the interactive (UI) context.
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, task: UiTask);
}

/// Runs tasks on the calling thread. Suits hosts without a dedicated UI
/// thread, or whose observer hops to the main thread itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl UiDispatcher for InlineDispatcher {
    fn dispatch(&self, task: UiTask) {
        task();
    }
}

/// Transient user-visible messages (a toast on mobile, stderr on desktop)
#[cfg_attr(test, mockall::automock)]
pub trait UserNotifier: Send + Sync {
    fn notify_error(&self, error: &ContactBookError);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl UserNotifier for LogNotifier {
    fn notify_error(&self, error: &ContactBookError) {
        tracing::warn!("User notification: {}", error);
    }
}

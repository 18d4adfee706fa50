//! User-facing notification capability.
//!
//! Delivery is an external concern; the core only needs a `notify(title,
//! body)` call it can hand fixed strings to when the watched beacon crosses
//! the region boundary.

use tracing::info;

/// Dispatches a local user-facing notification.
pub trait Notifier: Send + Sync {
    /// Deliver a notification with the given title and body.
    fn notify(&self, title: &str, body: &str);
}

/// [`Notifier`] that writes the notification to the log.
///
/// Used by the daemon, which has no notification surface of its own, and as
/// the default in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(title, body, "notification");
    }
}

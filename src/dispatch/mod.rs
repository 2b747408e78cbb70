//! Outward notification path: composing text and the throttled dispatch tick.

pub mod composer;
pub mod reconciler;

pub use composer::{ComposeError, Notification, NotificationComposer};
pub use reconciler::{DispatchReconciler, TickOutcome};

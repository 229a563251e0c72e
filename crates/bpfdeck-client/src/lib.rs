pub mod api;
pub mod controller;
pub mod error;
pub mod notify;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use api::{ControlApi, HttpControlApi};
pub use controller::{LifecycleController, LifecycleOutcome, OperationState};
pub use error::ClientError;
pub use notify::{Notification, NotificationLevel, NotificationSink, ToastQueue};
pub use sync::{PollState, PollTick, StreamSynchronizer, SyncConfig, TickOutcome};

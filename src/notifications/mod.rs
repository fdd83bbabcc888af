//! Notification planning and delivery.
//!
//! - [`planner`] turns a task's due date and triggers into notification rows.
//! - [`transport`] delivers one notification through a user's provider.
//! - [`pump`] runs the periodic Sender, Sweeper and Overdue synthesizer jobs.

pub mod planner;
pub mod pump;
pub mod transport;

pub use planner::Planner;
pub use pump::{NotificationPump, PumpConfig};
pub use transport::{Notifier, Transport, TransportError};

//! Notification fan-out for the stock engine.
//!
//! The engine publishes one [`StockNotification`] per newly raised alert on an
//! [`EventBus`]; delivery (mail, in-app inbox, push) is the subscriber's job.

pub mod bus;
pub mod in_memory_bus;
pub mod notification;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use notification::{Audience, NotificationKind, StockNotification};
pub use tenant::TenantScoped;

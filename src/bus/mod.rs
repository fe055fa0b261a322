//! Notification bus — channel naming, event types, and pub/sub delivery.

pub mod channel;
pub mod event;
pub mod notification;

pub use channel::ChannelName;
pub use event::{BusEvent, OutboundEvent};
pub use notification::{NotificationBus, Publisher, Subscription};

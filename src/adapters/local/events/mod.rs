//! Observer connections and the notification bus.

pub mod bus;
pub mod connection;

pub use bus::{HeartbeatReport, NotificationBus};
pub use connection::ClientConnection;

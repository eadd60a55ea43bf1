//! Service providers started and stopped by the coordinator.
//!
//! Each provider wraps one long-running part of the daemon behind the
//! [`ServiceProvider`] lifecycle so the coordinator can order and degrade
//! them uniformly.

pub mod dbus;
pub mod fan;
pub mod status;
pub mod traits;
pub mod wifi;

// Re-export core types for convenience
pub use dbus::DBusServiceProvider;
pub use fan::FanServiceProvider;
pub use status::StatusServiceProvider;
pub use traits::ServiceProvider;
pub use wifi::WifiServiceProvider;

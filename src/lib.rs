//! # picpd
//!
//! A Linux daemon for Raspberry Pi class boards that keeps a PWM fan, an
//! SH1106 OLED status display and a push-button WiFi access point running.
//!
//! ## Features
//!
//! - **Fan Control**: hysteresis on the SoC temperature, hardware PWM
//! - **Status Page**: IP, CPU, memory, disk and network throughput on the OLED
//! - **Access Point Button**: debounced short press toggles a NetworkManager connection
//! - **Live Reconfiguration**: each controller restarts with the new settings
//! - **D-Bus Interface**: optional control surface for external tools
//!
//! ## Architecture
//!
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - Main lifecycle manager
//! - [`TaskRunner`](task_runner::TaskRunner) - Restartable background loop per controller
//! - [`Display`](display::Display) - The one device shared between controllers
//! - [`ControlSurface`](control::ControlSurface) - Entry point for external control
//! - [`EventBus`](event::EventBus) - Inter-service communication
//!
//! ## Example
//!
//! ```no_run
//! use picpd::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod application;
pub mod cli;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod display;
pub mod drivers;
pub mod error;
pub mod event;
pub mod fan;
pub mod graphics;
pub mod interface;
pub mod metrics;
pub mod providers;
pub mod sensors;
pub mod status;
pub mod task_runner;
pub mod wifi;

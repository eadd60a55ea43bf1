//! D-Bus service provider.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use tokio::sync::Mutex;
use zbus::{Connection, connection};

use crate::{
    control::ControlSurface,
    interface::{BUS_NAME, ControlInterface, OBJECT_PATH},
    providers::traits::ServiceProvider,
};

/// Publishes the [`ControlSurface`] on D-Bus.
///
/// # Priority and Criticality
///
/// - **Priority**: 4 (starts after the controllers it exposes)
/// - **Critical**: No (the daemon keeps controlling hardware without a bus)
///
/// # Interface
///
/// - **Service Name**: `io.github.picpd`
/// - **Object Path**: `/io/github/picpd`
/// - **Interface**: `io.github.picpd1`
///
/// The system bus is used unless `control.system_bus` is off. The bus
/// policy must allow the daemon to own the name.
pub struct DBusServiceProvider {
    surface: ControlSurface,
    system_bus: bool,
    connection: Mutex<Option<Connection>>,
}

impl DBusServiceProvider {
    pub fn new(surface: ControlSurface, system_bus: bool) -> Self {
        Self {
            surface,
            system_bus,
            connection: Mutex::new(None),
        }
    }

    fn bus_kind(&self) -> &'static str {
        if self.system_bus { "system" } else { "session" }
    }
}

#[async_trait]
impl ServiceProvider for DBusServiceProvider {
    async fn start(&self) -> Result<()> {
        let mut slot = self.connection.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let builder = if self.system_bus {
            connection::Builder::system()?
        } else {
            connection::Builder::session()?
        };
        let interface = ControlInterface::new(self.surface.clone(), env!("CARGO_PKG_VERSION"));
        let conn = builder
            .name(BUS_NAME)?
            .serve_at(OBJECT_PATH, interface)?
            .build()
            .await
            .with_context(|| format!("Failed to register {BUS_NAME} on the {} bus", self.bus_kind()))?;

        info!("D-Bus interface published at {OBJECT_PATH} on the {} bus", self.bus_kind());
        *slot = Some(conn);
        Ok(())
    }

    async fn stop(&self, _deadline: Duration) -> Result<()> {
        if self.connection.lock().await.take().is_some() {
            info!("D-Bus interface withdrawn");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DBusService"
    }

    fn priority(&self) -> i32 {
        4
    }
}

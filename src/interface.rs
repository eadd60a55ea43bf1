//! D-Bus adapter over the [`ControlSurface`].
//!
//! Configuration sections travel as JSON strings so the wire format follows
//! the YAML file field for field.

use serde::{Serialize, de::DeserializeOwned};
use zbus::{fdo, interface, object_server::SignalEmitter};

use crate::{control::ControlSurface, graphics::DrawOptions, wifi::network::RadioBand};

pub const BUS_NAME: &str = "io.github.picpd";
pub const OBJECT_PATH: &str = "/io/github/picpd";

pub struct ControlInterface {
    surface: ControlSurface,
    version: String,
}

impl ControlInterface {
    pub fn new(surface: ControlSurface, version: impl Into<String>) -> Self {
        Self {
            surface,
            version: version.into(),
        }
    }
}

fn failed(err: anyhow::Error) -> fdo::Error {
    fdo::Error::Failed(format!("{err:#}"))
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

fn from_json<T: DeserializeOwned>(json: &str) -> fdo::Result<T> {
    serde_json::from_str(json).map_err(|e| fdo::Error::InvalidArgs(e.to_string()))
}

#[interface(name = "io.github.picpd1")]
impl ControlInterface {
    #[zbus(signal)]
    async fn stopped(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    async fn stop(
        &self,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> fdo::Result<()> {
        emitter.stopped().await?;
        self.surface.request_shutdown().map_err(failed)
    }

    async fn get_fan_config(&self) -> fdo::Result<String> {
        to_json(&self.surface.fan_config().await)
    }

    async fn set_fan_config(&self, config: &str) -> fdo::Result<()> {
        self.surface
            .set_fan_config(from_json(config)?)
            .await
            .map_err(failed)
    }

    async fn get_wifi_config(&self) -> fdo::Result<String> {
        to_json(&self.surface.wifi_config().await)
    }

    async fn set_wifi_config(&self, config: &str) -> fdo::Result<()> {
        self.surface
            .set_wifi_config(from_json(config)?)
            .await
            .map_err(failed)
    }

    async fn get_display_config(&self) -> fdo::Result<String> {
        to_json(&self.surface.display_config().await)
    }

    async fn set_display_config(&self, config: &str) -> fdo::Result<()> {
        self.surface
            .set_display_config(from_json(config)?)
            .await
            .map_err(failed)
    }

    /// `options` is a JSON [`DrawOptions`]; an empty string centers the text.
    async fn render_text(&self, lines: Vec<String>, options: &str) -> fdo::Result<()> {
        let opts = if options.trim().is_empty() {
            DrawOptions::centered()
        } else {
            from_json(options)?
        };
        self.surface.render_text(lines, opts).await.map_err(failed)
    }

    async fn set_status_enabled(&self, enabled: bool) {
        self.surface.set_status_enabled(enabled).await;
    }

    async fn list_access_points(&self, device_name: &str) -> fdo::Result<String> {
        let access_points = self
            .surface
            .list_access_points(device_name)
            .await
            .map_err(failed)?;
        to_json(&access_points)
    }

    async fn radio_status(&self) -> fdo::Result<String> {
        to_json(&self.surface.radio_status().await.map_err(failed)?)
    }

    /// `band` is `wifi` or `wwan`.
    async fn radio_switch(&self, band: &str, on: bool) -> fdo::Result<()> {
        let band: RadioBand = serde_json::from_value(serde_json::Value::String(band.to_string()))
            .map_err(|e| fdo::Error::InvalidArgs(e.to_string()))?;
        self.surface.radio_switch(band, on).await.map_err(failed)
    }

    #[zbus(property)]
    async fn version(&self) -> String {
        self.version.clone()
    }

    /// Percent over the last sampling window, -1 until measured.
    #[zbus(property)]
    async fn cpu_percent(&self) -> f64 {
        self.surface.cpu_percent().unwrap_or(-1.0)
    }

    #[zbus(property)]
    async fn cpu_temp(&self) -> f64 {
        self.surface.cpu_temp().map(f64::from).unwrap_or(-1.0)
    }

    /// Bytes per second sent, -1 while unavailable.
    #[zbus(property)]
    async fn net_tx_speed(&self) -> i64 {
        self.surface.net_speed().map_or(-1, |s| s.tx as i64)
    }

    /// Bytes per second received, -1 while unavailable.
    #[zbus(property)]
    async fn net_rx_speed(&self) -> i64 {
        self.surface.net_speed().map_or(-1, |s| s.rx as i64)
    }

    #[zbus(property)]
    async fn status_enabled(&self) -> bool {
        self.surface.status_enabled()
    }

    #[zbus(property)]
    async fn ap_active(&self) -> bool {
        self.surface.ap_active()
    }
}

//! Entry point for external control of the running daemon.
//!
//! Every boundary (currently D-Bus) goes through [`ControlSurface`] and never
//! reaches into controller internals.

use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::{
    config::{ConfigManager, DisplayCfg, FanCfg, WifiCfg},
    display::Display,
    event::{ConfigSection, Event, EventBus},
    fan::FanController,
    graphics::DrawOptions,
    status::{NetSpeed, StatusReporter},
    wifi::{
        WifiController,
        network::{AccessPoint, RadioBand, RadioStatus},
    },
};

#[derive(Clone)]
pub struct ControlSurface {
    config: ConfigManager,
    display: Display,
    fan: Arc<FanController>,
    status: Arc<StatusReporter>,
    wifi: Arc<WifiController>,
    events: EventBus,
}

impl ControlSurface {
    pub fn new(
        config: ConfigManager,
        display: Display,
        fan: Arc<FanController>,
        status: Arc<StatusReporter>,
        wifi: Arc<WifiController>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            display,
            fan,
            status,
            wifi,
            events,
        }
    }

    pub async fn fan_config(&self) -> FanCfg {
        self.fan.config().await
    }

    pub async fn set_fan_config(&self, cfg: FanCfg) -> Result<()> {
        self.fan.set_config(cfg).await?;
        self.changed(ConfigSection::Fan);
        Ok(())
    }

    pub async fn wifi_config(&self) -> WifiCfg {
        self.wifi.config().await
    }

    pub async fn set_wifi_config(&self, cfg: WifiCfg) -> Result<()> {
        self.wifi.set_config(cfg).await?;
        self.changed(ConfigSection::Wifi);
        Ok(())
    }

    pub async fn display_config(&self) -> DisplayCfg {
        self.config.display().await
    }

    /// Swaps the display for one built from `cfg` and restarts the status
    /// page on it.
    pub async fn set_display_config(&self, cfg: DisplayCfg) -> Result<()> {
        self.display.reconfigure(&self.config, cfg).await?;
        self.status.restart().await?;
        self.changed(ConfigSection::Display);
        Ok(())
    }

    pub async fn render_text(&self, lines: Vec<String>, opts: DrawOptions) -> Result<()> {
        self.display.render_text(lines, opts).await
    }

    pub async fn set_status_enabled(&self, enabled: bool) {
        self.status.set_enabled(enabled).await;
    }

    pub fn status_enabled(&self) -> bool {
        self.status.is_enabled()
    }

    pub fn cpu_percent(&self) -> Option<f64> {
        self.status.cpu_percent()
    }

    pub fn cpu_temp(&self) -> Option<f32> {
        self.status.cpu_temp()
    }

    pub fn net_speed(&self) -> Option<NetSpeed> {
        self.status.net_speed()
    }

    pub fn ap_active(&self) -> bool {
        self.wifi.is_ap_active()
    }

    pub async fn list_access_points(&self, device_name: &str) -> Result<Vec<AccessPoint>> {
        self.wifi.network().list_access_points(device_name).await
    }

    pub async fn radio_status(&self) -> Result<RadioStatus> {
        self.wifi.network().radio_status().await
    }

    pub async fn radio_switch(&self, band: RadioBand, on: bool) -> Result<()> {
        self.wifi.network().radio_switch(band, on).await
    }

    /// Asks the coordinator to shut the daemon down.
    pub fn request_shutdown(&self) -> Result<()> {
        info!("Shutdown requested through control surface");
        self.events.publish(Event::SystemShutdown)
    }

    fn changed(&self, section: ConfigSection) {
        info!("{section:?} configuration updated");
        self.events.notify(Event::ConfigChanged(section));
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::{
        config::Config,
        drivers::mock::MockHardware,
        error::is_validation,
        metrics::mock::FakeMetrics,
        sensors::mock::ScriptedSensor,
        wifi::network::mock::MockNetwork,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    pub struct Harness {
        pub surface: ControlSurface,
        pub hardware: MockHardware,
        pub network: Arc<MockNetwork>,
        pub events: EventBus,
        pub config: ConfigManager,
        pub _dir: TempDir,
    }

    /// Surface over mock hardware with nothing started.
    pub async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let config = ConfigManager::new(Config::default(), dir.path().join("config.yml"));
        let hardware = MockHardware::default();
        let shared: Arc<dyn crate::drivers::Hardware> = Arc::new(hardware.clone());
        let display = Display::open(Arc::clone(&shared), &config.display().await)
            .await
            .unwrap();
        let sensor = Arc::new(ScriptedSensor::new([Some(42.0)]));
        let status = Arc::new(StatusReporter::with_interval(
            config.clone(),
            display.clone(),
            Arc::new(FakeMetrics::default()),
            sensor.clone(),
            Duration::from_millis(20),
        ));
        let fan = Arc::new(FanController::new(config.clone(), Arc::clone(&shared), sensor));
        let network = Arc::new(MockNetwork::default());
        let events = EventBus::new();
        let wifi = Arc::new(WifiController::new(
            config.clone(),
            shared,
            network.clone(),
            display.clone(),
            Arc::clone(&status),
            events.clone(),
        ));
        let surface = ControlSurface::new(
            config.clone(),
            display,
            fan,
            status,
            wifi,
            events.clone(),
        );
        Harness {
            surface,
            hardware,
            network,
            events,
            config,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn fan_update_publishes_change() {
        let h = harness().await;
        let mut events = h.events.subscribe();
        let cfg = FanCfg {
            enabled: true,
            duty_percent: 60,
            ..FanCfg::default()
        };

        h.surface.set_fan_config(cfg.clone()).await.unwrap();

        assert_eq!(h.surface.fan_config().await, cfg);
        assert_eq!(
            events.try_recv().unwrap(),
            Event::ConfigChanged(ConfigSection::Fan)
        );
    }

    #[tokio::test]
    async fn rejected_update_publishes_nothing() {
        let h = harness().await;
        let mut events = h.events.subscribe();

        let err = h
            .surface
            .set_fan_config(FanCfg {
                duty_percent: 0,
                ..FanCfg::default()
            })
            .await
            .unwrap_err();

        assert!(is_validation(&err));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn display_update_restarts_status_on_new_panel() {
        let h = harness().await;
        let cfg = DisplayCfg {
            height: 32,
            ..DisplayCfg::default()
        };

        h.surface.set_display_config(cfg.clone()).await.unwrap();
        h.hardware.bus.take();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.surface.display_config().await, cfg);
        assert!(h.hardware.bus.take().iter().any(|f| f[0] == 0x40));
        assert!(h.surface.cpu_percent().is_some());
    }

    #[tokio::test]
    async fn wifi_queries_reach_network_client() {
        let h = harness().await;

        h.surface.list_access_points("wlan0").await.unwrap();
        h.surface.radio_switch(RadioBand::Wifi, false).await.unwrap();

        assert_eq!(h.network.calls(), vec!["list wlan0", "radio wifi false"]);
        assert!(!h.surface.ap_active());
    }

    #[tokio::test]
    async fn shutdown_request_reaches_subscribers() {
        let h = harness().await;
        let mut events = h.events.subscribe();

        h.surface.request_shutdown().unwrap();

        assert_eq!(events.try_recv().unwrap(), Event::SystemShutdown);
        assert_eq!(h.config.fan().await, FanCfg::default());
    }
}
